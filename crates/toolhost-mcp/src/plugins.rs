// crates/toolhost-mcp/src/plugins.rs
// ============================================================================
// Module: Plugin Loader
// Description: Discovers plugin executables and proxies their tools.
// Purpose: Admit third-party tools behind a process boundary.
// Dependencies: tokio, toolhost-config, toolhost-core
// ============================================================================

//! ## Overview
//! A plugin is an executable in the configured directory that speaks the
//! host's newline-delimited JSON-RPC tool contract over stdin/stdout. The
//! loader starts every candidate, performs the handshake, and lists its tools.
//! Any spawn, handshake, or listing failure is logged and only that plugin is
//! skipped; a malformed descriptor skips only that descriptor.
//!
//! Security posture: plugins run with the host's privileges and environment.
//! The directory is operator-controlled and treated as trusted code.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use toolhost_config::PluginsConfig;
use toolhost_core::ProgressSink;
use toolhost_core::SharedTool;
use toolhost_core::ToolDescriptor;
use toolhost_core::ToolFault;
use toolhost_core::ToolInstance;
use toolhost_core::ToolResult;

use crate::protocol::LATEST_PROTOCOL_VERSION;
use crate::protocol::methods;

mod client;

pub use client::PendingCall;
pub use client::PluginConnection;
pub use client::PluginError;
pub use client::ProgressRoute;
pub use client::plugin_name;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Time a plugin has to exit after its stdin closes.
pub const PLUGIN_EXIT_GRACE: Duration = Duration::from_secs(2);

/// Client name the host presents to plugins.
const HOST_CLIENT_NAME: &str = "toolhost";

/// JSON-RPC code for an unsupported method or parameter set.
const METHOD_NOT_FOUND: i64 = -32601;

// ============================================================================
// SECTION: Discovery
// ============================================================================

/// Returns plugin candidates in `directory`, sorted by file name.
///
/// Only regular, non-hidden files are considered; on Unix a candidate must
/// also carry an execute bit.
///
/// # Errors
///
/// Returns [`PluginError::Directory`] when the directory cannot be read.
pub fn candidates(directory: &Path) -> Result<Vec<PathBuf>, PluginError> {
    let directory_error = |source| PluginError::Directory {
        path: directory.to_path_buf(),
        source,
    };
    let mut found = Vec::new();
    for entry in std::fs::read_dir(directory).map_err(directory_error)? {
        let entry = entry.map_err(directory_error)?;
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        let Ok(metadata) = std::fs::metadata(entry.path()) else {
            continue;
        };
        if metadata.is_file() && is_executable(&metadata) {
            found.push(entry.path());
        }
    }
    found.sort_by(|left, right| left.file_name().cmp(&right.file_name()));
    Ok(found)
}

/// Returns true when the file carries an execute bit.
#[cfg(unix)]
fn is_executable(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

/// Returns true for every regular file.
#[cfg(not(unix))]
fn is_executable(_metadata: &std::fs::Metadata) -> bool {
    true
}

// ============================================================================
// SECTION: Host
// ============================================================================

/// One plugin that completed its handshake.
pub struct LoadedPlugin {
    /// Executable path.
    path: PathBuf,
    /// Live connection.
    connection: Arc<PluginConnection>,
    /// Proxied tools in listing order.
    tools: Vec<SharedTool>,
}

impl LoadedPlugin {
    /// Returns the plugin name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.connection.name()
    }

    /// Returns the executable path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the proxied tools.
    #[must_use]
    pub fn tools(&self) -> &[SharedTool] {
        &self.tools
    }
}

/// Every loaded plugin, in discovery order.
#[derive(Default)]
pub struct PluginHost {
    /// Loaded plugins.
    plugins: Vec<LoadedPlugin>,
}

impl PluginHost {
    /// Returns a host with no plugins.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            plugins: Vec::new(),
        }
    }

    /// Loads plugins when enabled; otherwise returns an empty host.
    pub async fn discover(config: &PluginsConfig) -> Self {
        if !config.enabled {
            tracing::debug!("plugin discovery disabled");
            return Self::empty();
        }
        Self::load_all(config).await
    }

    /// Loads every candidate in the configured directory, skipping failures.
    pub async fn load_all(config: &PluginsConfig) -> Self {
        let paths = match candidates(&config.directory) {
            Ok(paths) => paths,
            Err(err) => {
                tracing::warn!(error = %err, "plugin discovery skipped");
                return Self::empty();
            }
        };
        let mut plugins = Vec::with_capacity(paths.len());
        for path in paths {
            match load_plugin(&path, config).await {
                Ok(plugin) => {
                    tracing::info!(
                        plugin = %plugin.name(),
                        tools = plugin.tools.len(),
                        "plugin loaded"
                    );
                    plugins.push(plugin);
                }
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "plugin skipped");
                }
            }
        }
        Self {
            plugins,
        }
    }

    /// Returns the loaded plugins.
    #[must_use]
    pub fn plugins(&self) -> &[LoadedPlugin] {
        &self.plugins
    }

    /// Returns every proxied tool, plugin by plugin, in listing order.
    #[must_use]
    pub fn tools(&self) -> Vec<SharedTool> {
        self.plugins.iter().flat_map(|plugin| plugin.tools.iter().cloned()).collect()
    }

    /// Stops every plugin process.
    pub async fn shutdown(&self, grace: Duration) {
        for plugin in &self.plugins {
            plugin.connection.shutdown(grace).await;
        }
    }
}

// ============================================================================
// SECTION: Loading
// ============================================================================

/// Starts one plugin and lists its tools.
async fn load_plugin(path: &Path, config: &PluginsConfig) -> Result<LoadedPlugin, PluginError> {
    let connection = Arc::new(PluginConnection::spawn(path)?);
    let settings = config.settings_for(connection.name());
    match handshake(&connection, settings, config.startup_timeout()).await {
        Ok(descriptors) => {
            let tools = descriptors
                .into_iter()
                .map(|descriptor| {
                    Arc::new(PluginTool::new(descriptor, Arc::clone(&connection))) as SharedTool
                })
                .collect();
            Ok(LoadedPlugin {
                path: path.to_path_buf(),
                connection,
                tools,
            })
        }
        Err(err) => {
            connection.shutdown(PLUGIN_EXIT_GRACE).await;
            Err(err)
        }
    }
}

/// Runs initialize, initialized, and tools/list under one deadline.
async fn handshake(
    connection: &PluginConnection,
    settings: Value,
    limit: Duration,
) -> Result<Vec<ToolDescriptor>, PluginError> {
    let plugin = connection.name();
    let exchange = async {
        let context = json!({"plugin": plugin, "config": settings});
        match connection.request(methods::INITIALIZE, initialize_params(Some(context))).await {
            Ok(_) => {}
            Err(PluginError::Rpc {
                error, ..
            }) if error.code == METHOD_NOT_FOUND => {
                tracing::debug!(plugin = %plugin, "plugin declined context; retrying without it");
                connection.request(methods::INITIALIZE, initialize_params(None)).await?;
            }
            Err(err) => return Err(err),
        }
        connection.notify(methods::INITIALIZED, json!({}))?;
        let listing = connection.request(methods::TOOLS_LIST, json!({})).await?;
        parse_listing(plugin, listing)
    };
    tokio::time::timeout(limit, exchange).await.map_err(|_| PluginError::Timeout {
        plugin: plugin.to_string(),
        stage: "handshake",
    })?
}

/// Builds `initialize` params, optionally carrying the plugin context.
fn initialize_params(context: Option<Value>) -> Value {
    let mut params = json!({
        "protocolVersion": LATEST_PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {"name": HOST_CLIENT_NAME, "version": env!("CARGO_PKG_VERSION")},
    });
    if let (Some(context), Value::Object(map)) = (context, &mut params) {
        map.insert("context".to_string(), context);
    }
    params
}

/// Extracts descriptors from a `tools/list` result, skipping malformed ones.
fn parse_listing(plugin: &str, listing: Value) -> Result<Vec<ToolDescriptor>, PluginError> {
    let malformed = |reason: &str| PluginError::Malformed {
        plugin: plugin.to_string(),
        what: "tool listing",
        reason: reason.to_string(),
    };
    let Value::Object(mut listing) = listing else {
        return Err(malformed("result is not an object"));
    };
    let Some(Value::Array(items)) = listing.remove("tools") else {
        return Err(malformed("missing tools array"));
    };
    let mut descriptors = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        match serde_json::from_value::<ToolDescriptor>(item) {
            Ok(descriptor) => descriptors.push(descriptor),
            Err(err) => {
                tracing::warn!(plugin = %plugin, index, error = %err, "tool descriptor skipped");
            }
        }
    }
    Ok(descriptors)
}

// ============================================================================
// SECTION: Proxy Tool
// ============================================================================

/// Tool instance that forwards calls to its plugin process.
pub struct PluginTool {
    /// Descriptor listed by the plugin.
    descriptor: ToolDescriptor,
    /// Owning plugin connection.
    connection: Arc<PluginConnection>,
}

impl PluginTool {
    /// Binds a listed descriptor to its plugin.
    #[must_use]
    pub const fn new(descriptor: ToolDescriptor, connection: Arc<PluginConnection>) -> Self {
        Self {
            descriptor,
            connection,
        }
    }

    /// Returns the owning plugin name.
    #[must_use]
    pub fn plugin(&self) -> &str {
        self.connection.name()
    }
}

#[async_trait]
impl ToolInstance for PluginTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(
        &self,
        arguments: Value,
        progress: Arc<dyn ProgressSink>,
        cancel: CancellationToken,
    ) -> Result<ToolResult, ToolFault> {
        let token = self.connection.progress_token();
        let _route = self.connection.route_progress(token.clone(), progress);
        let params = json!({
            "name": self.descriptor.name,
            "arguments": arguments,
            "_meta": {"progressToken": token},
        });
        let call = self.connection.start_request(methods::TOOLS_CALL, params).map_err(fault_from)?;
        let request_id = call.id();
        tokio::select! {
            response = call.response() => {
                let value = response.map_err(fault_from)?;
                serde_json::from_value::<ToolResult>(value)
                    .map_err(|err| ToolFault::Execution(format!("malformed tool result: {err}")))
            }
            () = cancel.cancelled() => {
                let notice = json!({"requestId": request_id, "reason": "cancelled by host"});
                if let Err(err) = self.connection.notify(methods::CANCELLED, notice) {
                    tracing::debug!(plugin = %self.plugin(), error = %err, "cancel notice not delivered");
                }
                Err(ToolFault::Cancelled)
            }
        }
    }
}

/// Maps a connection failure onto the tool fault surface.
fn fault_from(err: PluginError) -> ToolFault {
    match err {
        PluginError::Rpc {
            error, ..
        } => ToolFault::Execution(error.message),
        other => ToolFault::Unavailable(other.to_string()),
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
