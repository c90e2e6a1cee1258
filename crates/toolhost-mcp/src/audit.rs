// crates/toolhost-mcp/src/audit.rs
// ============================================================================
// Module: Tool Call Audit
// Description: Sanitized, append-only audit records for every call attempt.
// Purpose: Persist one redacted record per call without ever failing the call.
// Dependencies: serde, serde_json, time, tracing
// ============================================================================

//! ## Overview
//! Every call attempt produces exactly one [`AuditRecord`], including calls
//! short-circuited by authorization or rate admission. Sensitive argument keys
//! are redacted when the record is built, so no sink ever observes a raw
//! secret. [`AuditSink::record`] has no failure path: persistence errors are
//! logged and dropped.
//!
//! The file sink writes `audit-YYYY-MM-DD.jsonl` in UTC and, on its first
//! write, deletes files older than the retention window.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::fs::File;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use time::Date;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Replacement written in place of sensitive values.
pub const REDACTED: &str = "[REDACTED]";
/// Normalized key fragments treated as sensitive.
const SENSITIVE_KEYS: &[&str] = &[
    "password",
    "passwd",
    "secret",
    "token",
    "apikey",
    "key",
    "connectionstring",
    "authorization",
    "credential",
];
/// Prefix of daily audit file names.
const FILE_PREFIX: &str = "audit-";
/// Suffix of daily audit file names.
const FILE_SUFFIX: &str = ".jsonl";

// ============================================================================
// SECTION: Types
// ============================================================================

/// Final outcome of one call attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    /// Tool ran and returned a non-error result.
    Success,
    /// Tool ran (or could not run) and the result is error-flagged.
    Failure,
    /// Tool exceeded its timeout or cancellation grace period.
    Timeout,
    /// Rejected by rate admission.
    RateLimited,
    /// Rejected by authorization.
    Unauthorized,
    /// Served from the response cache.
    CacheHit,
}

/// Immutable audit record for one call attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditRecord {
    /// RFC 3339 UTC timestamp.
    pub timestamp: String,
    /// Correlation id linking the record to its request.
    pub correlation_id: String,
    /// Tool name as requested.
    pub tool: String,
    /// Action named in the arguments.
    pub action: String,
    /// Arguments with sensitive values redacted.
    pub arguments: Value,
    /// Call outcome.
    pub outcome: AuditOutcome,
    /// Error text for failed or denied calls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall time spent in the pipeline.
    pub duration_ms: u64,
}

impl AuditRecord {
    /// Builds a record, redacting `arguments`.
    #[must_use]
    pub fn new(
        correlation_id: impl Into<String>,
        tool: impl Into<String>,
        action: impl Into<String>,
        arguments: &Value,
        outcome: AuditOutcome,
        error: Option<String>,
        duration: Duration,
    ) -> Self {
        Self {
            timestamp: now_rfc3339(),
            correlation_id: correlation_id.into(),
            tool: tool.into(),
            action: action.into(),
            arguments: redact(arguments),
            outcome,
            error,
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

// ============================================================================
// SECTION: Redaction
// ============================================================================

/// Returns true when a key names a credential-like value.
#[must_use]
pub fn is_sensitive_key(key: &str) -> bool {
    let normalized: String = key
        .chars()
        .filter(|ch| *ch != '_' && *ch != '-')
        .flat_map(char::to_lowercase)
        .collect();
    SENSITIVE_KEYS.iter().any(|fragment| normalized.contains(fragment))
}

/// Returns a copy of `value` with sensitive object values replaced.
#[must_use]
pub fn redact(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, inner)| {
                    let cleaned = if is_sensitive_key(key) {
                        Value::String(REDACTED.to_string())
                    } else {
                        redact(inner)
                    };
                    (key.clone(), cleaned)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact).collect()),
        other => other.clone(),
    }
}

// ============================================================================
// SECTION: Sinks
// ============================================================================

/// Destination for audit records. Implementations must not panic or block
/// for long; failures are handled internally.
pub trait AuditSink: Send + Sync {
    /// Persists one record.
    fn record(&self, record: &AuditRecord);
}

/// Sink that drops every record.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&self, _record: &AuditRecord) {}
}

/// Sink that keeps records in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    /// Recorded entries in arrival order.
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of recorded entries.
    #[must_use]
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, record: &AuditRecord) {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).push(record.clone());
    }
}

/// Writer state for the daily file sink.
#[derive(Debug, Default)]
struct DailyState {
    /// Open file and the UTC date it belongs to.
    current: Option<(Date, File)>,
    /// Whether the retention purge already ran.
    purged: bool,
}

/// Sink appending JSON lines to one file per UTC day.
#[derive(Debug)]
pub struct DailyFileAuditSink {
    /// Directory holding the daily files.
    directory: PathBuf,
    /// Days of files to keep.
    retention_days: u32,
    /// Single-writer state.
    state: Mutex<DailyState>,
}

impl DailyFileAuditSink {
    /// Creates a sink writing into `directory`. Nothing touches the disk until
    /// the first record.
    #[must_use]
    pub fn new(directory: impl Into<PathBuf>, retention_days: u32) -> Self {
        Self {
            directory: directory.into(),
            retention_days,
            state: Mutex::new(DailyState::default()),
        }
    }

    /// Returns the file path used for `date`.
    #[must_use]
    pub fn path_for(&self, date: Date) -> PathBuf {
        self.directory.join(file_name_for(date))
    }

    /// Writes one line, rotating and purging as needed.
    fn write_line(&self, line: &str) -> std::io::Result<()> {
        let today = OffsetDateTime::now_utc().date();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !state.purged {
            state.purged = true;
            purge_expired(&self.directory, today, self.retention_days);
        }
        let stale = state.current.as_ref().is_none_or(|(date, _)| *date != today);
        if stale {
            fs::create_dir_all(&self.directory)?;
            let file = OpenOptions::new().create(true).append(true).open(self.path_for(today))?;
            state.current = Some((today, file));
        }
        if let Some((_, file)) = state.current.as_mut() {
            file.write_all(line.as_bytes())?;
            file.flush()?;
        }
        Ok(())
    }
}

impl AuditSink for DailyFileAuditSink {
    fn record(&self, record: &AuditRecord) {
        let line = match serde_json::to_string(record) {
            Ok(mut line) => {
                line.push('\n');
                line
            }
            Err(err) => {
                tracing::warn!(error = %err, "audit record serialization failed");
                return;
            }
        };
        if let Err(err) = self.write_line(&line) {
            tracing::warn!(
                error = %err,
                directory = %self.directory.display(),
                "audit write failed"
            );
        }
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Formats the current UTC time as RFC 3339.
fn now_rfc3339() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(&Rfc3339).unwrap_or_else(|_| now.unix_timestamp().to_string())
}

/// Returns the daily file name for `date`.
fn file_name_for(date: Date) -> String {
    let stamp = date
        .format(format_description!("[year]-[month]-[day]"))
        .unwrap_or_else(|_| date.to_julian_day().to_string());
    format!("{FILE_PREFIX}{stamp}{FILE_SUFFIX}")
}

/// Parses the date out of a daily file name.
fn date_from_file_name(name: &str) -> Option<Date> {
    let stamp = name.strip_prefix(FILE_PREFIX)?.strip_suffix(FILE_SUFFIX)?;
    Date::parse(stamp, format_description!("[year]-[month]-[day]")).ok()
}

/// Deletes daily files older than `retention_days`, best-effort.
fn purge_expired(directory: &Path, today: Date, retention_days: u32) {
    let Some(cutoff) = today.checked_sub(time::Duration::days(i64::from(retention_days))) else {
        return;
    };
    let Ok(entries) = fs::read_dir(directory) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(date) = name.to_str().and_then(date_from_file_name) else {
            continue;
        };
        if date < cutoff {
            match fs::remove_file(entry.path()) {
                Ok(()) => tracing::info!(file = %entry.path().display(), "purged expired audit file"),
                Err(err) => tracing::warn!(
                    error = %err,
                    file = %entry.path().display(),
                    "audit purge failed"
                ),
            }
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
