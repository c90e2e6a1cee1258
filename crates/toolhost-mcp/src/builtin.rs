// crates/toolhost-mcp/src/builtin.rs
// ============================================================================
// Module: Built-in Tools
// Description: Tools compiled into the host.
// Purpose: Make a bare host useful and give clients a cheap liveness probe.
// Dependencies: serde_json, toolhost-core
// ============================================================================

//! ## Overview
//! Built-ins register before any plugin, so their names are reserved.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use toolhost_core::ProgressSink;
use toolhost_core::SharedTool;
use toolhost_core::ToolDescriptor;
use toolhost_core::ToolFault;
use toolhost_core::ToolInstance;
use toolhost_core::ToolResult;

// ============================================================================
// SECTION: Host Info
// ============================================================================

/// Reports the host name, version, and platform.
pub struct HostInfoTool {
    /// Static descriptor.
    descriptor: ToolDescriptor,
    /// Configured server name.
    server_name: String,
}

impl HostInfoTool {
    /// Tool name.
    pub const NAME: &'static str = "host_info";

    /// Creates the tool for a server name.
    #[must_use]
    pub fn new(server_name: impl Into<String>) -> Self {
        Self {
            descriptor: ToolDescriptor::new(
                Self::NAME,
                "Returns the tool host name, version, and platform.",
                json!({"type": "object", "properties": {}, "additionalProperties": false}),
            ),
            server_name: server_name.into(),
        }
    }
}

#[async_trait]
impl ToolInstance for HostInfoTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(
        &self,
        _arguments: Value,
        _progress: Arc<dyn ProgressSink>,
        _cancel: CancellationToken,
    ) -> Result<ToolResult, ToolFault> {
        let info = json!({
            "name": self.server_name,
            "version": env!("CARGO_PKG_VERSION"),
            "os": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
        });
        Ok(ToolResult::text(info.to_string()))
    }
}

/// Returns every built-in tool in registration order.
#[must_use]
pub fn builtin_tools(server_name: &str) -> Vec<SharedTool> {
    vec![Arc::new(HostInfoTool::new(server_name))]
}
