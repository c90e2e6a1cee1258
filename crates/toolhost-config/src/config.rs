// crates/toolhost-config/src/config.rs
// ============================================================================
// Module: Toolhost Configuration
// Description: Configuration loading and validation for the tool host.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: serde, serde_json, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and path limits.
//! Every section is optional and defaults to a safe local posture; values that
//! are present are validated and rejected when out of range.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "toolhost.toml";
/// Environment variable used to override the config path.
pub const CONFIG_ENV_VAR: &str = "TOOLHOST_CONFIG";
/// Default environment variable holding the session credential.
pub const DEFAULT_CREDENTIAL_ENV: &str = "TOOLHOST_API_KEY";
/// Maximum configuration file size in bytes.
pub(crate) const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
pub(crate) const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
pub(crate) const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Upper bound for a single inbound protocol line.
pub(crate) const MAX_MESSAGE_BYTES_LIMIT: usize = 64 * 1024 * 1024;
/// Maximum number of configured identities.
pub(crate) const MAX_IDENTITIES: usize = 64;
/// Maximum credential length.
pub(crate) const MAX_CREDENTIAL_LENGTH: usize = 256;
/// Maximum per-minute admissions for a single key.
pub(crate) const MAX_RATE_PER_MINUTE: u32 = 100_000;
/// Maximum cache capacity.
pub(crate) const MAX_CACHE_CAPACITY: usize = 65_536;
/// Maximum cache TTL in seconds (one week).
pub(crate) const MAX_CACHE_TTL_SECS: u64 = 7 * 24 * 60 * 60;
/// Maximum audit retention in days.
pub(crate) const MAX_RETENTION_DAYS: u32 = 3650;
/// Maximum per-call timeout in milliseconds (one hour).
pub(crate) const MAX_CALL_TIMEOUT_MS: u64 = 60 * 60 * 1000;
/// Maximum cancellation grace period in milliseconds.
pub(crate) const MAX_CANCEL_GRACE_MS: u64 = 60_000;
/// Minimum plugin startup timeout in milliseconds.
pub(crate) const MIN_PLUGIN_STARTUP_TIMEOUT_MS: u64 = 100;
/// Maximum plugin startup timeout in milliseconds.
pub(crate) const MAX_PLUGIN_STARTUP_TIMEOUT_MS: u64 = 60_000;

// ============================================================================
// SECTION: Configuration Types
// ============================================================================

/// Tool host configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolhostConfig {
    /// Server identity and message limits.
    #[serde(default)]
    pub server: ServerConfig,
    /// Credential-to-identity mapping.
    #[serde(default)]
    pub auth: AuthConfig,
    /// Sliding-window rate limits.
    #[serde(default)]
    pub rate_limits: RateLimitConfig,
    /// Response cache sizing.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Audit log settings.
    #[serde(default)]
    pub audit: AuditConfig,
    /// Invocation pipeline timeouts.
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Plugin discovery settings.
    #[serde(default)]
    pub plugins: PluginsConfig,
    /// Diagnostic and client log settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ToolhostConfig {
    /// Loads configuration from disk using the default resolution rules:
    /// explicit path, then `TOOLHOST_CONFIG`, then `toolhost.toml`. When
    /// neither a path nor the variable is given and `toolhost.toml` does not
    /// exist, the built-in defaults are used.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (resolved, source) = resolve_path(path)?;
        load_resolved(&resolved, source)
    }

    /// Parses and validates configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when parsing or validation fails.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.auth.validate()?;
        self.rate_limits.validate()?;
        self.cache.validate()?;
        self.audit.validate()?;
        self.pipeline.validate()?;
        self.plugins.validate()?;
        self.logging.validate()
    }
}

/// Server identity and message limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Name advertised in the handshake.
    #[serde(default = "default_server_name")]
    pub name: String,
    /// Maximum bytes accepted for a single inbound line.
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: default_server_name(),
            max_message_bytes: default_max_message_bytes(),
        }
    }
}

impl ServerConfig {
    /// Validates server settings.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid("server.name must be non-empty".to_string()));
        }
        if self.max_message_bytes == 0 || self.max_message_bytes > MAX_MESSAGE_BYTES_LIMIT {
            return Err(ConfigError::Invalid(
                "server.max_message_bytes must be between 1 and 67108864".to_string(),
            ));
        }
        Ok(())
    }
}

/// Authorization configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    /// Reject anonymous sessions when true.
    #[serde(default)]
    pub require_auth: bool,
    /// Environment variable that carries the session credential.
    #[serde(default = "default_credential_env")]
    pub credential_env: String,
    /// Static credential-to-permission mapping.
    #[serde(default)]
    pub identities: Vec<IdentityConfig>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            require_auth: false,
            credential_env: default_credential_env(),
            identities: Vec::new(),
        }
    }
}

impl AuthConfig {
    /// Validates auth settings.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.credential_env.trim().is_empty() {
            return Err(ConfigError::Invalid("auth.credential_env must be non-empty".to_string()));
        }
        if self.require_auth && self.identities.is_empty() {
            return Err(ConfigError::Invalid(
                "auth.require_auth requires at least one identity".to_string(),
            ));
        }
        if self.identities.len() > MAX_IDENTITIES {
            return Err(ConfigError::Invalid("auth.identities exceeds max entries".to_string()));
        }
        let mut credentials = BTreeSet::new();
        for identity in &self.identities {
            identity.validate()?;
            if !credentials.insert(identity.credential.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "auth.identities credential for {} is not unique",
                    identity.name
                )));
            }
        }
        Ok(())
    }
}

/// One credential and the permissions it grants.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IdentityConfig {
    /// Identity label used in logs and audit context.
    pub name: String,
    /// Opaque credential presented by the client.
    pub credential: String,
    /// Tools this identity may call; `*` allows every tool.
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    /// Per-tool allowed actions; `*` allows every action. Tools absent from
    /// this map allow any action.
    #[serde(default)]
    pub allowed_actions: BTreeMap<String, Vec<String>>,
}

impl IdentityConfig {
    /// Validates a single identity entry.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid("auth.identities.name must be non-empty".to_string()));
        }
        let credential = self.credential.trim();
        if credential.is_empty() || credential.len() > MAX_CREDENTIAL_LENGTH {
            return Err(ConfigError::Invalid(format!(
                "auth.identities.{} credential must be 1..=256 bytes",
                self.name
            )));
        }
        if self.allowed_tools.iter().any(|tool| tool.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "auth.identities.{} allowed_tools contains an empty entry",
                self.name
            )));
        }
        for (tool, actions) in &self.allowed_actions {
            if actions.iter().any(|action| action.trim().is_empty()) {
                return Err(ConfigError::Invalid(format!(
                    "auth.identities.{}.allowed_actions.{tool} contains an empty entry",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

/// Sliding-window rate limits, in admissions per minute.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Limit applied to tools without an override; 0 means unlimited.
    #[serde(default = "default_rate_per_minute")]
    pub default_per_minute: u32,
    /// Per-tool overrides; 0 means unlimited.
    #[serde(default)]
    pub per_tool: BTreeMap<String, u32>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            default_per_minute: default_rate_per_minute(),
            per_tool: BTreeMap::new(),
        }
    }
}

impl RateLimitConfig {
    /// Returns the effective per-minute limit for a key.
    #[must_use]
    pub fn limit_for(&self, key: &str) -> u32 {
        self.per_tool.get(key).copied().unwrap_or(self.default_per_minute)
    }

    /// Validates rate limit settings.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.default_per_minute > MAX_RATE_PER_MINUTE {
            return Err(ConfigError::Invalid(
                "rate_limits.default_per_minute exceeds 100000".to_string(),
            ));
        }
        if let Some((tool, _)) =
            self.per_tool.iter().find(|(_, limit)| **limit > MAX_RATE_PER_MINUTE)
        {
            return Err(ConfigError::Invalid(format!(
                "rate_limits.per_tool.{tool} exceeds 100000"
            )));
        }
        Ok(())
    }
}

/// Response cache sizing.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Maximum number of entries; 0 disables caching.
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
    /// TTL for tools without an override; 0 means do not store.
    #[serde(default = "default_cache_ttl_secs")]
    pub default_ttl_secs: u64,
    /// Per-tool TTL overrides in seconds.
    #[serde(default)]
    pub per_tool_ttl_secs: BTreeMap<String, u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
            default_ttl_secs: default_cache_ttl_secs(),
            per_tool_ttl_secs: BTreeMap::new(),
        }
    }
}

impl CacheConfig {
    /// Returns the effective TTL for a tool; per-tool overrides win.
    #[must_use]
    pub fn ttl_for(&self, tool: &str) -> Duration {
        Duration::from_secs(
            self.per_tool_ttl_secs.get(tool).copied().unwrap_or(self.default_ttl_secs),
        )
    }

    /// Validates cache settings.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity > MAX_CACHE_CAPACITY {
            return Err(ConfigError::Invalid("cache.capacity exceeds 65536".to_string()));
        }
        if self.default_ttl_secs > MAX_CACHE_TTL_SECS {
            return Err(ConfigError::Invalid("cache.default_ttl_secs exceeds one week".to_string()));
        }
        if let Some((tool, _)) =
            self.per_tool_ttl_secs.iter().find(|(_, ttl)| **ttl > MAX_CACHE_TTL_SECS)
        {
            return Err(ConfigError::Invalid(format!(
                "cache.per_tool_ttl_secs.{tool} exceeds one week"
            )));
        }
        Ok(())
    }
}

/// Audit log settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuditConfig {
    /// Write audit records when true.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Directory holding daily audit files.
    #[serde(default = "default_audit_directory")]
    pub directory: PathBuf,
    /// Days of audit files to keep.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: default_audit_directory(),
            retention_days: default_retention_days(),
        }
    }
}

impl AuditConfig {
    /// Validates audit settings.
    fn validate(&self) -> Result<(), ConfigError> {
        if !self.enabled {
            return Ok(());
        }
        validate_path_string("audit.directory", &self.directory.to_string_lossy())?;
        if self.retention_days == 0 || self.retention_days > MAX_RETENTION_DAYS {
            return Err(ConfigError::Invalid(
                "audit.retention_days must be between 1 and 3650".to_string(),
            ));
        }
        Ok(())
    }
}

/// Invocation pipeline timeouts.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Hard per-call timeout in milliseconds; 0 disables it.
    #[serde(default)]
    pub call_timeout_ms: u64,
    /// Time a cancelled tool has to finish before it is abandoned.
    #[serde(default = "default_cancel_grace_ms")]
    pub cancel_grace_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 0,
            cancel_grace_ms: default_cancel_grace_ms(),
        }
    }
}

impl PipelineConfig {
    /// Returns the per-call timeout, if one is configured.
    #[must_use]
    pub const fn call_timeout(&self) -> Option<Duration> {
        if self.call_timeout_ms == 0 { None } else { Some(Duration::from_millis(self.call_timeout_ms)) }
    }

    /// Returns the cancellation grace period.
    #[must_use]
    pub const fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }

    /// Validates pipeline settings.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.call_timeout_ms > MAX_CALL_TIMEOUT_MS {
            return Err(ConfigError::Invalid("pipeline.call_timeout_ms exceeds one hour".to_string()));
        }
        if self.cancel_grace_ms > MAX_CANCEL_GRACE_MS {
            return Err(ConfigError::Invalid(
                "pipeline.cancel_grace_ms exceeds 60000".to_string(),
            ));
        }
        Ok(())
    }
}

/// Plugin discovery settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PluginsConfig {
    /// Discover plugins when true.
    #[serde(default)]
    pub enabled: bool,
    /// Directory scanned for plugin executables.
    #[serde(default = "default_plugins_directory")]
    pub directory: PathBuf,
    /// Time allowed for a plugin to finish its handshake and listing.
    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,
    /// Scoped settings keyed by plugin file stem.
    #[serde(default)]
    pub settings: BTreeMap<String, Value>,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            directory: default_plugins_directory(),
            startup_timeout_ms: default_startup_timeout_ms(),
            settings: BTreeMap::new(),
        }
    }
}

impl PluginsConfig {
    /// Returns the scoped settings for a plugin, or an empty object.
    #[must_use]
    pub fn settings_for(&self, plugin: &str) -> Value {
        self.settings.get(plugin).cloned().unwrap_or_else(|| Value::Object(serde_json::Map::new()))
    }

    /// Returns the plugin startup timeout.
    #[must_use]
    pub const fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    /// Validates plugin settings.
    fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_PLUGIN_STARTUP_TIMEOUT_MS..=MAX_PLUGIN_STARTUP_TIMEOUT_MS)
            .contains(&self.startup_timeout_ms)
        {
            return Err(ConfigError::Invalid(
                "plugins.startup_timeout_ms must be between 100 and 60000".to_string(),
            ));
        }
        if self.enabled {
            validate_path_string("plugins.directory", &self.directory.to_string_lossy())?;
        }
        if let Some((name, _)) = self.settings.iter().find(|(_, value)| !value.is_object()) {
            return Err(ConfigError::Invalid(format!("plugins.settings.{name} must be a table")));
        }
        Ok(())
    }
}

/// Severity levels for client log notifications, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Debug detail.
    Debug,
    /// Informational.
    Info,
    /// Normal but significant.
    Notice,
    /// Warning conditions.
    Warning,
    /// Error conditions.
    Error,
    /// Critical conditions.
    Critical,
    /// Action must be taken immediately.
    Alert,
    /// System is unusable.
    Emergency,
}

impl LogLevel {
    /// Returns the wire name of the level.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Notice => "notice",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
            Self::Alert => "alert",
            Self::Emergency => "emergency",
        }
    }
}

/// Diagnostic and client log settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// `tracing` filter directive for the diagnostic log on stderr.
    #[serde(default = "default_log_filter")]
    pub filter: String,
    /// Minimum level for client log notifications before `logging/setLevel`.
    #[serde(default)]
    pub client_level: Option<LogLevel>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            client_level: None,
        }
    }
}

impl LoggingConfig {
    /// Validates logging settings.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.filter.trim().is_empty() {
            return Err(ConfigError::Invalid("logging.filter must be non-empty".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Defaults
// ============================================================================

/// Default server name.
fn default_server_name() -> String {
    "toolhost".to_string()
}

/// Default inbound line limit (4 MiB).
const fn default_max_message_bytes() -> usize {
    4 * 1024 * 1024
}

/// Default credential environment variable.
fn default_credential_env() -> String {
    DEFAULT_CREDENTIAL_ENV.to_string()
}

/// Default per-minute admissions.
const fn default_rate_per_minute() -> u32 {
    120
}

/// Default cache capacity.
const fn default_cache_capacity() -> usize {
    256
}

/// Default cache TTL in seconds.
const fn default_cache_ttl_secs() -> u64 {
    60
}

/// Serde helper returning true.
const fn default_true() -> bool {
    true
}

/// Default audit directory.
fn default_audit_directory() -> PathBuf {
    PathBuf::from("audit")
}

/// Default audit retention in days.
const fn default_retention_days() -> u32 {
    30
}

/// Default cancellation grace period.
const fn default_cancel_grace_ms() -> u64 {
    5_000
}

/// Default plugin directory.
fn default_plugins_directory() -> PathBuf {
    PathBuf::from("plugins")
}

/// Default plugin startup timeout.
const fn default_startup_timeout_ms() -> u64 {
    5_000
}

/// Default diagnostic log filter.
fn default_log_filter() -> String {
    "info".to_string()
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Where a config path came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigSource {
    /// `--config` or the environment variable; the file must exist.
    Named,
    /// The implicit `toolhost.toml`; a missing file means defaults.
    Implicit,
}

/// Resolves the config path from CLI or environment defaults.
fn resolve_path(path: Option<&Path>) -> Result<(PathBuf, ConfigSource), ConfigError> {
    if let Some(path) = path {
        return Ok((path.to_path_buf(), ConfigSource::Named));
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok((PathBuf::from(env_path), ConfigSource::Named));
    }
    Ok((PathBuf::from(DEFAULT_CONFIG_NAME), ConfigSource::Implicit))
}

/// Reads, parses, and validates the file at `path`.
fn load_resolved(path: &Path, source: ConfigSource) -> Result<ToolhostConfig, ConfigError> {
    validate_path(path)?;
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err)
            if source == ConfigSource::Implicit && err.kind() == std::io::ErrorKind::NotFound =>
        {
            let config = ToolhostConfig::default();
            config.validate()?;
            return Ok(config);
        }
        Err(err) => return Err(ConfigError::Io(err.to_string())),
    };
    if bytes.len() > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
    }
    let content = std::str::from_utf8(&bytes)
        .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
    ToolhostConfig::from_toml_str(content)
}

/// Validates the resolved path against length limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    if path.to_string_lossy().len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
    }
    if path
        .components()
        .any(|component| component.as_os_str().len() > MAX_PATH_COMPONENT_LENGTH)
    {
        return Err(ConfigError::Invalid("config path component too long".to_string()));
    }
    Ok(())
}

/// Validates a configured directory string against length constraints.
fn validate_path_string(field: &str, value: &str) -> Result<(), ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must be non-empty")));
    }
    if trimmed.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid(format!("{field} exceeds max length")));
    }
    if Path::new(trimmed)
        .components()
        .any(|component| component.as_os_str().len() > MAX_PATH_COMPONENT_LENGTH)
    {
        return Err(ConfigError::Invalid(format!("{field} path component too long")));
    }
    Ok(())
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        clippy::expect_used,
        reason = "Test fixtures use explicit asserts and unwraps for clarity."
    )]

    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = ToolhostConfig::from_toml_str("").expect("defaults");
        assert_eq!(config.server.name, "toolhost");
        assert_eq!(config.auth.credential_env, DEFAULT_CREDENTIAL_ENV);
        assert_eq!(config.cache.ttl_for("anything"), Duration::from_secs(60));
        assert!(config.pipeline.call_timeout().is_none());
        assert!(config.logging.client_level.is_none());
    }

    #[test]
    fn per_tool_overrides_beat_defaults() {
        let config = ToolhostConfig::from_toml_str(
            r#"
            [rate_limits]
            default_per_minute = 10
            per_tool = { x = 1, free = 0 }

            [cache]
            default_ttl_secs = 30
            per_tool_ttl_secs = { slow = 300 }
            "#,
        )
        .expect("config");
        assert_eq!(config.rate_limits.limit_for("x"), 1);
        assert_eq!(config.rate_limits.limit_for("free"), 0);
        assert_eq!(config.rate_limits.limit_for("other"), 10);
        assert_eq!(config.cache.ttl_for("slow"), Duration::from_secs(300));
        assert_eq!(config.cache.ttl_for("fast"), Duration::from_secs(30));
    }

    #[test]
    fn validate_path_rejects_long_component() {
        let long = "a".repeat(MAX_PATH_COMPONENT_LENGTH + 1);
        assert!(validate_path(Path::new(&long)).is_err());
        assert!(validate_path(Path::new("toolhost.toml")).is_ok());
    }

    #[test]
    fn missing_implicit_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(DEFAULT_CONFIG_NAME);
        let config = load_resolved(&path, ConfigSource::Implicit).expect("defaults");
        assert_eq!(config.server.name, "toolhost");
        assert_eq!(config.rate_limits.limit_for("any"), 120);
    }

    #[test]
    fn missing_named_file_is_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("absent.toml");
        let err = load_resolved(&path, ConfigSource::Named).expect_err("missing");
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn present_implicit_file_is_still_read() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(DEFAULT_CONFIG_NAME);
        fs::write(&path, "[server]\nname = \"local\"\n").expect("write");
        let config = load_resolved(&path, ConfigSource::Implicit).expect("config");
        assert_eq!(config.server.name, "local");
        fs::write(&path, "[server\n").expect("write");
        let err = load_resolved(&path, ConfigSource::Implicit).expect_err("broken");
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn log_levels_order_by_severity() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Warning < LogLevel::Error);
        assert!(LogLevel::Alert < LogLevel::Emergency);
        assert_eq!(LogLevel::Warning.as_str(), "warning");
    }
}
