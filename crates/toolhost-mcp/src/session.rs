// crates/toolhost-mcp/src/session.rs
// ============================================================================
// Module: Protocol Session
// Description: Handshake state machine, progress emitters, client logging.
// Purpose: Gate tool traffic on the handshake and bind outbound notifications.
// Dependencies: serde_json, toolhost-config, toolhost-core
// ============================================================================

//! ## Overview
//! The session moves `Uninitialized -> Initializing -> Ready` and is mutated
//! only by the handshake. It lives for the whole process and is owned by the
//! engine's read loop, so it needs no lock.
//!
//! [`ProgressEmitter`] and [`ClientLog`] both write through the shared
//! [`OutboundWriter`], which keeps notifications whole-line with responses.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::PoisonError;
use std::sync::RwLock;

use serde_json::Map;
use serde_json::Value;
use toolhost_config::LogLevel;
use toolhost_core::ProgressSink;
use toolhost_core::ProgressUpdate;

use crate::outbound::OutboundWriter;
use crate::protocol::Implementation;
use crate::protocol::InitializeParams;
use crate::protocol::ProtocolError;
use crate::protocol::methods;
use crate::protocol::negotiate_version;

// ============================================================================
// SECTION: Session
// ============================================================================

/// Handshake phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No `initialize` seen yet.
    Uninitialized,
    /// `initialize` answered; waiting for `notifications/initialized`.
    Initializing,
    /// Handshake complete; tool traffic allowed.
    Ready,
}

/// Per-connection protocol state.
#[derive(Debug)]
pub struct Session {
    /// Current phase.
    phase: SessionPhase,
    /// Negotiated protocol revision.
    protocol_version: Option<&'static str>,
    /// Client descriptor from `initialize`.
    client: Option<Implementation>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// Creates an uninitialized session.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            phase: SessionPhase::Uninitialized,
            protocol_version: None,
            client: None,
        }
    }

    /// Returns the current phase.
    #[must_use]
    pub const fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Returns true once the handshake is complete.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.phase == SessionPhase::Ready
    }

    /// Returns the negotiated protocol revision.
    #[must_use]
    pub const fn protocol_version(&self) -> Option<&'static str> {
        self.protocol_version
    }

    /// Returns the client descriptor.
    #[must_use]
    pub const fn client(&self) -> Option<&Implementation> {
        self.client.as_ref()
    }

    /// Handles `initialize`; returns the negotiated revision.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidRequest`] when already initialized.
    pub fn begin_initialize(
        &mut self,
        params: InitializeParams,
    ) -> Result<&'static str, ProtocolError> {
        if self.phase != SessionPhase::Uninitialized {
            return Err(ProtocolError::InvalidRequest("already initialized".to_string()));
        }
        let version = negotiate_version(&params.protocol_version);
        tracing::info!(
            client = %params.client_info.name,
            client_version = %params.client_info.version,
            requested = %params.protocol_version,
            negotiated = version,
            "session initializing"
        );
        self.protocol_version = Some(version);
        self.client = Some(params.client_info);
        self.phase = SessionPhase::Initializing;
        Ok(version)
    }

    /// Handles `notifications/initialized`. Returns true when the session
    /// became ready.
    pub fn complete_initialize(&mut self) -> bool {
        if self.phase == SessionPhase::Initializing {
            self.phase = SessionPhase::Ready;
            tracing::info!("session ready");
            true
        } else {
            tracing::debug!(phase = ?self.phase, "ignored initialized notification");
            false
        }
    }
}

// ============================================================================
// SECTION: Progress
// ============================================================================

/// Progress sink bound to one request's progress token.
#[derive(Debug, Clone)]
pub struct ProgressEmitter {
    /// Client-supplied token.
    token: Value,
    /// Output channel.
    writer: OutboundWriter,
}

impl ProgressEmitter {
    /// Binds a token to the output channel.
    #[must_use]
    pub const fn new(token: Value, writer: OutboundWriter) -> Self {
        Self {
            token,
            writer,
        }
    }
}

impl ProgressSink for ProgressEmitter {
    fn report(&self, update: ProgressUpdate) {
        let mut params = Map::new();
        params.insert("progressToken".to_string(), self.token.clone());
        params.insert("progress".to_string(), Value::from(update.progress));
        if let Some(total) = update.total {
            params.insert("total".to_string(), Value::from(total));
        }
        if let Some(message) = update.message {
            params.insert("message".to_string(), Value::String(message));
        }
        self.writer.notify(methods::PROGRESS, Value::Object(params));
    }
}

// ============================================================================
// SECTION: Client Log
// ============================================================================

/// Level-gated `notifications/message` emitter.
#[derive(Debug, Clone)]
pub struct ClientLog {
    /// Output channel.
    writer: OutboundWriter,
    /// Minimum level; `None` disables client log notifications.
    level: Arc<RwLock<Option<LogLevel>>>,
}

impl ClientLog {
    /// Creates a client log with an initial threshold.
    #[must_use]
    pub fn new(writer: OutboundWriter, level: Option<LogLevel>) -> Self {
        Self {
            writer,
            level: Arc::new(RwLock::new(level)),
        }
    }

    /// Sets the minimum forwarded level.
    pub fn set_level(&self, level: LogLevel) {
        *self.level.write().unwrap_or_else(PoisonError::into_inner) = Some(level);
    }

    /// Returns true when `level` would be forwarded.
    #[must_use]
    pub fn enabled(&self, level: LogLevel) -> bool {
        self.level
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some_and(|minimum| level >= minimum)
    }

    /// Emits a log notification when `level` passes the threshold.
    pub fn log(&self, level: LogLevel, logger: &str, data: Value) {
        if !self.enabled(level) {
            return;
        }
        let mut params = Map::new();
        params.insert("level".to_string(), Value::String(level.as_str().to_string()));
        params.insert("logger".to_string(), Value::String(logger.to_string()));
        params.insert("data".to_string(), data);
        self.writer.notify(methods::MESSAGE, Value::Object(params));
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
