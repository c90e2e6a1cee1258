// crates/toolhost-mcp/src/plugins/client.rs
// ============================================================================
// Module: Plugin Connection
// Description: JSON-RPC client over a plugin child process's stdio.
// Purpose: Multiplex concurrent calls into one plugin and route its output.
// Dependencies: tokio, tokio-util, serde_json, tracing
// ============================================================================

//! ## Overview
//! One [`PluginConnection`] owns one child process. Requests are written by a
//! dedicated writer task and answered through a pending map keyed by request
//! id, so many calls can be in flight at once. A reader task routes responses,
//! progress notifications, and log notifications; when the child closes its
//! output every pending call fails with [`PluginError::Closed`].
//!
//! Request ids start at 1 per plugin and increase by one per request.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use serde_json::Value;
use serde_json::json;
use thiserror::Error;
use tokio::io::BufReader;
use tokio::process::Child;
use tokio::process::ChildStderr;
use tokio::process::ChildStdout;
use tokio::process::Command;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use toolhost_core::ProgressSink;
use toolhost_core::ProgressUpdate;

use crate::framing::LineRead;
use crate::framing::read_bounded_line;
use crate::outbound::OutboundWriter;
use crate::outbound::spawn_writer;
use crate::protocol::Incoming;
use crate::protocol::JsonRpcError;
use crate::protocol::JsonRpcRequest;
use crate::protocol::JsonRpcResponse;
use crate::protocol::ProtocolError;
use crate::protocol::methods;
use crate::protocol::parse_message;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Longest line accepted from a plugin's stdout; longer lines are dropped.
pub const MAX_PLUGIN_LINE_BYTES: usize = 8 * 1024 * 1024;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Plugin discovery and communication failures.
#[derive(Debug, Error)]
pub enum PluginError {
    /// Plugin directory could not be read.
    #[error("cannot read plugin directory {}: {source}", .path.display())]
    Directory {
        /// Directory path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// Executable could not be started.
    #[error("cannot start plugin {}: {source}", .path.display())]
    Spawn {
        /// Executable path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// Child process was started without a piped stream.
    #[error("plugin {plugin} is missing its {stream} pipe")]
    Pipe {
        /// Plugin name.
        plugin: String,
        /// Missing stream.
        stream: &'static str,
    },
    /// Connection closed before a response arrived.
    #[error("plugin {plugin} closed its connection")]
    Closed {
        /// Plugin name.
        plugin: String,
    },
    /// Plugin answered with a JSON-RPC error.
    #[error("plugin {plugin} rejected {method}: {} ({})", .error.message, .error.code)]
    Rpc {
        /// Plugin name.
        plugin: String,
        /// Request method.
        method: String,
        /// Error payload.
        error: JsonRpcError,
    },
    /// Plugin did not answer in time.
    #[error("plugin {plugin} timed out during {stage}")]
    Timeout {
        /// Plugin name.
        plugin: String,
        /// Stage that timed out.
        stage: &'static str,
    },
    /// Plugin sent a payload with the wrong shape.
    #[error("plugin {plugin} sent a malformed {what}: {reason}")]
    Malformed {
        /// Plugin name.
        plugin: String,
        /// Payload kind.
        what: &'static str,
        /// Parse failure.
        reason: String,
    },
}

// ============================================================================
// SECTION: Types
// ============================================================================

/// Response or error payload for one request.
type RpcOutcome = Result<Value, JsonRpcError>;

/// In-flight requests keyed by id.
type PendingMap = Mutex<HashMap<u64, oneshot::Sender<RpcOutcome>>>;

/// Progress sinks keyed by progress token.
type ProgressRoutes = Mutex<HashMap<String, Arc<dyn ProgressSink>>>;

/// Client side of one plugin child process.
pub struct PluginConnection {
    /// Plugin name (executable file stem).
    name: String,
    /// Writer for the child's stdin.
    writer: OutboundWriter,
    /// Writer task; taken on shutdown.
    writer_task: Mutex<Option<JoinHandle<std::io::Result<()>>>>,
    /// Child process; taken on shutdown.
    child: Mutex<Option<Child>>,
    /// In-flight requests.
    pending: Arc<PendingMap>,
    /// Progress routes for forwarded calls.
    routes: Arc<ProgressRoutes>,
    /// Next request id.
    next_id: AtomicU64,
    /// Next progress token sequence.
    next_token: AtomicU64,
    /// Cancelled when the child's output closes.
    closed: CancellationToken,
}

impl PluginConnection {
    /// Starts `path` with piped stdio and its own directory as working
    /// directory. Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Spawn`] when the process cannot be started.
    pub fn spawn(path: &Path) -> Result<Self, PluginError> {
        Self::spawn_with_line_limit(path, MAX_PLUGIN_LINE_BYTES)
    }

    /// Like [`PluginConnection::spawn`], dropping stdout lines longer than
    /// `line_limit` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Spawn`] when the process cannot be started.
    pub fn spawn_with_line_limit(path: &Path, line_limit: usize) -> Result<Self, PluginError> {
        let name = plugin_name(path);
        let program = std::fs::canonicalize(path).map_err(|source| PluginError::Spawn {
            path: path.to_path_buf(),
            source,
        })?;
        let mut command = Command::new(&program);
        command.stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::piped()).kill_on_drop(true);
        if let Some(directory) = program.parent() {
            command.current_dir(directory);
        }
        let mut child = command.spawn().map_err(|source| PluginError::Spawn {
            path: path.to_path_buf(),
            source,
        })?;
        let missing = |stream: &'static str| PluginError::Pipe {
            plugin: name.clone(),
            stream,
        };
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

        let (writer, writer_task) = spawn_writer(stdin);
        let pending: Arc<PendingMap> = Arc::new(Mutex::new(HashMap::new()));
        let routes: Arc<ProgressRoutes> = Arc::new(Mutex::new(HashMap::new()));
        let closed = CancellationToken::new();
        tokio::spawn(forward_stderr(name.clone(), stderr, line_limit));
        tokio::spawn(read_loop(
            ReaderContext {
                name: name.clone(),
                writer: writer.clone(),
                pending: Arc::clone(&pending),
                routes: Arc::clone(&routes),
                closed: closed.clone(),
                line_limit,
            },
            stdout,
        ));
        tracing::debug!(plugin = %name, path = %program.display(), "plugin process started");
        Ok(Self {
            name,
            writer,
            writer_task: Mutex::new(Some(writer_task)),
            child: Mutex::new(Some(child)),
            pending,
            routes,
            next_id: AtomicU64::new(1),
            next_token: AtomicU64::new(1),
            closed,
        })
    }

    /// Returns the plugin name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns true once the child's output has closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Sends a request and waits for its response.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Rpc`] for error responses and
    /// [`PluginError::Closed`] when the plugin goes away first.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, PluginError> {
        self.start_request(method, params)?.response().await
    }

    /// Sends a request and returns a handle to its pending response.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Closed`] when the connection is closed.
    pub fn start_request(&self, method: &str, params: Value) -> Result<PendingCall<'_>, PluginError> {
        if self.is_closed() {
            return Err(self.closed_error());
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id, tx);
        let call = PendingCall {
            connection: self,
            id,
            method: method.to_string(),
            rx,
        };
        // The reader may have closed between the first check and the insert.
        if self.is_closed() {
            return Err(self.closed_error());
        }
        if !self.writer.send(&JsonRpcRequest::new(id, method, params)) {
            return Err(self.closed_error());
        }
        Ok(call)
    }

    /// Sends a notification.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Closed`] when the writer has stopped.
    pub fn notify(&self, method: &str, params: Value) -> Result<(), PluginError> {
        if self.writer.notify(method, params) { Ok(()) } else { Err(self.closed_error()) }
    }

    /// Allocates a progress token unique within this connection.
    #[must_use]
    pub fn progress_token(&self) -> String {
        let sequence = self.next_token.fetch_add(1, Ordering::SeqCst);
        format!("{}-{sequence}", self.name)
    }

    /// Routes plugin progress for `token` to `sink` until the guard drops.
    #[must_use]
    pub fn route_progress(&self, token: String, sink: Arc<dyn ProgressSink>) -> ProgressRoute<'_> {
        lock(&self.routes).insert(token.clone(), sink);
        ProgressRoute {
            connection: self,
            token,
        }
    }

    /// Closes stdin, waits up to `grace` for the child to exit, then kills it.
    pub async fn shutdown(&self, grace: Duration) {
        self.writer.close();
        let writer_task = lock(&self.writer_task).take();
        if let Some(task) = writer_task {
            let _ = tokio::time::timeout(grace, task).await;
        }
        let child = lock(&self.child).take();
        let Some(mut child) = child else {
            return;
        };
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => tracing::debug!(plugin = %self.name, %status, "plugin exited"),
            Ok(Err(err)) => tracing::warn!(plugin = %self.name, error = %err, "plugin wait failed"),
            Err(_) => {
                tracing::warn!(plugin = %self.name, "plugin did not exit; killing");
                if let Err(err) = child.kill().await {
                    tracing::warn!(plugin = %self.name, error = %err, "plugin kill failed");
                }
            }
        }
    }

    /// Builds the closed-connection error.
    fn closed_error(&self) -> PluginError {
        PluginError::Closed {
            plugin: self.name.clone(),
        }
    }
}

// ============================================================================
// SECTION: Guards
// ============================================================================

/// Handle to one in-flight request; dropping it forgets the request.
pub struct PendingCall<'a> {
    /// Owning connection.
    connection: &'a PluginConnection,
    /// Request id.
    id: u64,
    /// Request method.
    method: String,
    /// Response channel.
    rx: oneshot::Receiver<RpcOutcome>,
}

impl PendingCall<'_> {
    /// Returns the request id.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Waits for the response.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Rpc`] for error responses and
    /// [`PluginError::Closed`] when the plugin exits first.
    pub async fn response(mut self) -> Result<Value, PluginError> {
        match (&mut self.rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(PluginError::Rpc {
                plugin: self.connection.name.clone(),
                method: self.method.clone(),
                error,
            }),
            Err(_) => Err(self.connection.closed_error()),
        }
    }
}

impl Drop for PendingCall<'_> {
    fn drop(&mut self) {
        lock(&self.connection.pending).remove(&self.id);
    }
}

/// Registered progress route; dropping it removes the route.
pub struct ProgressRoute<'a> {
    /// Owning connection.
    connection: &'a PluginConnection,
    /// Routed token.
    token: String,
}

impl Drop for ProgressRoute<'_> {
    fn drop(&mut self) {
        lock(&self.connection.routes).remove(&self.token);
    }
}

// ============================================================================
// SECTION: Reader Task
// ============================================================================

/// Shared state the reader task routes into.
struct ReaderContext {
    /// Plugin name.
    name: String,
    /// Writer for answering plugin-initiated requests.
    writer: OutboundWriter,
    /// In-flight requests.
    pending: Arc<PendingMap>,
    /// Progress routes.
    routes: Arc<ProgressRoutes>,
    /// Closed signal.
    closed: CancellationToken,
    /// Longest accepted stdout line in bytes.
    line_limit: usize,
}

/// Reads the child's stdout until it closes, then fails every pending call.
/// Oversized or unparseable lines are dropped; only EOF or a read error
/// closes the connection.
async fn read_loop(context: ReaderContext, stdout: ChildStdout) {
    let mut reader = BufReader::new(stdout);
    let mut buffer = Vec::new();
    loop {
        match read_bounded_line(&mut reader, &mut buffer, context.line_limit).await {
            Ok(LineRead::Line) => {
                if !buffer.iter().all(u8::is_ascii_whitespace) {
                    route_line(&context, &buffer);
                }
            }
            Ok(LineRead::Oversized) => {
                tracing::warn!(
                    plugin = %context.name,
                    limit = context.line_limit,
                    "oversized plugin message dropped"
                );
            }
            Ok(LineRead::Eof) => break,
            Err(err) => {
                tracing::warn!(plugin = %context.name, error = %err, "plugin output unreadable");
                break;
            }
        }
    }
    context.closed.cancel();
    let failed = {
        let mut pending = lock(&context.pending);
        let count = pending.len();
        pending.clear();
        count
    };
    tracing::info!(plugin = %context.name, failed_calls = failed, "plugin connection closed");
}

/// Routes one line from the plugin.
fn route_line(context: &ReaderContext, line: &[u8]) {
    match parse_message(line) {
        Ok(Incoming::Response {
            id,
            outcome,
        }) => {
            let sender = id.as_u64().and_then(|id| lock(&context.pending).remove(&id));
            match sender {
                Some(sender) => {
                    let _ = sender.send(outcome);
                }
                None => tracing::debug!(plugin = %context.name, %id, "response for unknown request"),
            }
        }
        Ok(Incoming::Notification {
            method,
            params,
        }) => match method.as_str() {
            methods::PROGRESS => route_progress(context, params),
            methods::MESSAGE => forward_log(&context.name, &params),
            _ => tracing::debug!(plugin = %context.name, method = %method, "plugin notification ignored"),
        },
        Ok(Incoming::Request {
            id,
            method,
            ..
        }) => {
            let response = if method == methods::PING {
                JsonRpcResponse::success(id, json!({}))
            } else {
                JsonRpcResponse::failure(id, &ProtocolError::MethodNotFound(method))
            };
            context.writer.respond(&response);
        }
        Err(err) => {
            tracing::warn!(plugin = %context.name, error = %err.error, "malformed plugin message");
        }
    }
}

/// Delivers a progress notification to its route.
fn route_progress(context: &ReaderContext, params: Value) {
    let Some(token) = params.get("progressToken").map(token_key) else {
        return;
    };
    let sink = lock(&context.routes).get(&token).cloned();
    let Some(sink) = sink else {
        tracing::debug!(plugin = %context.name, token = %token, "progress for unknown token");
        return;
    };
    match serde_json::from_value::<ProgressUpdate>(params) {
        Ok(update) => sink.report(update),
        Err(err) => tracing::debug!(plugin = %context.name, error = %err, "malformed progress"),
    }
}

/// Normalizes a progress token into a route key.
fn token_key(token: &Value) -> String {
    match token {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Forwards a plugin log notification to the host log.
fn forward_log(plugin: &str, params: &Value) {
    let level = params.get("level").and_then(Value::as_str).unwrap_or("info");
    let logger = params.get("logger").and_then(Value::as_str).unwrap_or(plugin);
    let data = params.get("data").map(Value::to_string).unwrap_or_default();
    match level {
        "debug" => tracing::debug!(plugin, logger, data = %data, "plugin log"),
        "info" | "notice" => tracing::info!(plugin, logger, data = %data, "plugin log"),
        "warning" => tracing::warn!(plugin, logger, data = %data, "plugin log"),
        _ => tracing::error!(plugin, logger, level, data = %data, "plugin log"),
    }
}

/// Forwards stderr lines to the host log until the stream ends. The stream
/// is drained even when lines are oversized so the child never blocks on a
/// full pipe.
async fn forward_stderr(plugin: String, stderr: ChildStderr, line_limit: usize) {
    let mut reader = BufReader::new(stderr);
    let mut buffer = Vec::new();
    loop {
        match read_bounded_line(&mut reader, &mut buffer, line_limit).await {
            Ok(LineRead::Line) => {
                let line = String::from_utf8_lossy(&buffer);
                tracing::info!(plugin = %plugin, line = %line, "plugin stderr");
            }
            Ok(LineRead::Oversized) => {
                tracing::warn!(plugin = %plugin, limit = line_limit, "oversized plugin stderr line dropped");
            }
            Ok(LineRead::Eof) | Err(_) => break,
        }
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Returns the plugin name for an executable path.
#[must_use]
pub fn plugin_name(path: &Path) -> String {
    path.file_stem()
        .or_else(|| path.file_name())
        .map_or_else(|| path.display().to_string(), |stem| stem.to_string_lossy().into_owned())
}

/// Locks a mutex, recovering from poisoning.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
