// crates/toolhost-core/src/tool.rs
// ============================================================================
// Module: Tool Contract
// Description: Tool descriptors, results, progress, and the execution trait.
// Purpose: Define the contract shared by built-in and plugin tools.
// Dependencies: serde, serde_json, async-trait, tokio-util, base64
// ============================================================================

//! ## Overview
//! A tool is a named, schema-described capability. Built-in tools implement
//! [`ToolInstance`] directly; plugin tools implement it by forwarding calls to
//! a child process that speaks the same JSON shapes.
//!
//! ## Invariants
//! - A [`ToolDescriptor`] is immutable once registered.
//! - A [`ToolResult`] with `is_error = true` is a normal outcome, not a fault.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as Base64;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

// ============================================================================
// SECTION: Descriptor
// ============================================================================

/// Tool metadata advertised to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Unique tool name.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// JSON schema for the tool arguments.
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

impl ToolDescriptor {
    /// Builds a descriptor from its parts.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

// ============================================================================
// SECTION: Results
// ============================================================================

/// Typed content block in a tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text output.
    Text {
        /// Text payload.
        text: String,
    },
    /// Binary image output.
    Image {
        /// Base64-encoded bytes.
        data: String,
        /// MIME type of the decoded bytes.
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    /// Binary audio output.
    Audio {
        /// Base64-encoded bytes.
        data: String,
        /// MIME type of the decoded bytes.
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
}

impl ContentBlock {
    /// Builds a text block.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
        }
    }

    /// Builds an image block from raw bytes.
    #[must_use]
    pub fn image(bytes: &[u8], mime_type: impl Into<String>) -> Self {
        Self::Image {
            data: Base64.encode(bytes),
            mime_type: mime_type.into(),
        }
    }
}

/// Tool call result: content blocks plus an error flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Ordered content blocks.
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    /// Whether the tool reported a failure.
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl ToolResult {
    /// Builds a successful single-text result.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::text(text)],
            is_error: false,
        }
    }

    /// Builds an error-flagged single-text result.
    #[must_use]
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::text(text)],
            is_error: true,
        }
    }

    /// Returns the first text block, if any.
    #[must_use]
    pub fn first_text(&self) -> Option<&str> {
        self.content.iter().find_map(|block| match block {
            ContentBlock::Text {
                text,
            } => Some(text.as_str()),
            _ => None,
        })
    }
}

// ============================================================================
// SECTION: Progress
// ============================================================================

/// One progress update pushed by tool code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    /// Progress so far.
    pub progress: f64,
    /// Total amount of work when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
    /// Optional human-readable status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProgressUpdate {
    /// Builds an update with a known total.
    #[must_use]
    pub const fn of(progress: f64, total: f64) -> Self {
        Self {
            progress,
            total: Some(total),
            message: None,
        }
    }
}

/// Receiver for tool progress updates.
pub trait ProgressSink: Send + Sync {
    /// Reports a progress update. Must not block.
    fn report(&self, update: ProgressUpdate);
}

/// Progress sink that discards updates.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn report(&self, _update: ProgressUpdate) {}
}

// ============================================================================
// SECTION: Execution
// ============================================================================

/// Unexpected tool-side fault. The pipeline converts these into generic
/// error results; they never reach the caller verbatim.
#[derive(Debug, Error)]
pub enum ToolFault {
    /// Tool code failed unexpectedly.
    #[error("execution fault: {0}")]
    Execution(String),
    /// The tool observed cancellation and stopped.
    #[error("cancelled")]
    Cancelled,
    /// The backing implementation is unreachable (plugin exited).
    #[error("tool unavailable: {0}")]
    Unavailable(String),
}

/// Executable tool capability.
#[async_trait]
pub trait ToolInstance: Send + Sync {
    /// Returns the tool descriptor.
    fn descriptor(&self) -> &ToolDescriptor;

    /// Executes the tool. `cancel` is advisory; the caller enforces a grace
    /// period after triggering it.
    async fn execute(
        &self,
        arguments: Value,
        progress: Arc<dyn ProgressSink>,
        cancel: CancellationToken,
    ) -> Result<ToolResult, ToolFault>;
}

/// Shared handle to a tool instance.
pub type SharedTool = Arc<dyn ToolInstance>;

// ============================================================================
// SECTION: Tests
// ============================================================================
