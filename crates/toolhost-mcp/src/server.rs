// crates/toolhost-mcp/src/server.rs
// ============================================================================
// Module: Protocol Engine
// Description: Stdio JSON-RPC engine dispatching into the invocation pipeline.
// Purpose: Own the session, read lines, and answer every request exactly once.
// Dependencies: tokio, tokio-util, toolhost-config, toolhost-core
// ============================================================================

//! ## Overview
//! [`McpServer`] reads one JSON-RPC message per line, gates traffic on the
//! handshake, and dispatches methods. `tools/call` runs on its own task and
//! answers through the shared outbound writer when it completes, so the read
//! loop keeps accepting messages (including `notifications/cancelled`) while
//! calls run. Everything else is answered inline.
//!
//! On input EOF the engine cancels in-flight calls through the host shutdown
//! token, waits for them to answer, stops plugin processes, and drains the
//! writer.
//!
//! Security posture: every inbound line is untrusted; lines above
//! `server.max_message_bytes` are rejected without being buffered whole.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;

use serde_json::Map;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio::io::BufReader;
use tokio::task::JoinError;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use toolhost_config::LogLevel;
use toolhost_config::ToolhostConfig;
use toolhost_core::NoopProgress;
use toolhost_core::ProgressSink;
use toolhost_core::ToolDescriptor;

use crate::audit::AuditOutcome;
use crate::audit::AuditSink;
use crate::audit::DailyFileAuditSink;
use crate::audit::NoopAuditSink;
use crate::auth::DefaultToolAuthz;
use crate::auth::Principal;
use crate::builtin::builtin_tools;
use crate::framing::LineRead;
use crate::framing::read_bounded_line;
use crate::cache::ResponseCache;
use crate::outbound::OutboundWriter;
use crate::outbound::spawn_writer;
use crate::pipeline::CallOutcome;
use crate::pipeline::CallRequest;
use crate::pipeline::InvocationPipeline;
use crate::pipeline::PipelineParts;
use crate::plugins::PLUGIN_EXIT_GRACE;
use crate::plugins::PluginHost;
use crate::protocol::CancelledParams;
use crate::protocol::GetPromptParams;
use crate::protocol::Incoming;
use crate::protocol::InitializeParams;
use crate::protocol::JsonRpcResponse;
use crate::protocol::ProtocolError;
use crate::protocol::ReadResourceParams;
use crate::protocol::SetLevelParams;
use crate::protocol::ToolCallParams;
use crate::protocol::methods;
use crate::protocol::parse_message;
use crate::protocol::parse_params;
use crate::rate_limit::SlidingWindowLimiter;
use crate::registry::ToolOrigin;
use crate::registry::ToolRegistry;
use crate::session::ClientLog;
use crate::session::ProgressEmitter;
use crate::session::Session;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Extra time allowed for call tasks to answer after the cancel grace.
const DRAIN_SLACK: Duration = Duration::from_secs(1);

/// Logger name used for client log notifications.
const CLIENT_LOGGER: &str = "toolhost";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Startup and transport failures.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Configuration is invalid.
    #[error("configuration error: {0}")]
    Config(String),
    /// A host component could not be initialized.
    #[error("initialization error: {0}")]
    Init(String),
    /// The protocol stream failed.
    #[error("transport error: {0}")]
    Transport(String),
}

// ============================================================================
// SECTION: Server
// ============================================================================

/// Components assembled into a server.
pub struct ServerParts {
    /// Name advertised in the handshake.
    pub name: String,
    /// Maximum accepted line length in bytes.
    pub max_message_bytes: usize,
    /// Invocation pipeline.
    pub pipeline: InvocationPipeline,
    /// Session principal.
    pub principal: Principal,
    /// Loaded plugins, stopped on shutdown.
    pub plugins: PluginHost,
    /// Client log threshold before `logging/setLevel`.
    pub client_level: Option<LogLevel>,
}

/// Stdio tool host.
pub struct McpServer {
    /// Assembled components.
    parts: ServerParts,
}

impl McpServer {
    /// Wraps assembled components.
    #[must_use]
    pub const fn new(parts: ServerParts) -> Self {
        Self {
            parts,
        }
    }

    /// Builds a server from configuration: built-ins register first, then
    /// plugin tools; the session principal is resolved from `credential`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError`] when configuration is invalid or the audit
    /// directory cannot be created.
    pub async fn from_config(
        config: &ToolhostConfig,
        credential: Option<&str>,
    ) -> Result<Self, ServerError> {
        config.validate().map_err(|err| ServerError::Config(err.to_string()))?;

        let mut registry = ToolRegistry::new();
        registry.register_all(builtin_tools(&config.server.name), &ToolOrigin::Builtin);
        let plugins = PluginHost::discover(&config.plugins).await;
        for plugin in plugins.plugins() {
            registry.register_all(
                plugin.tools().iter().cloned(),
                &ToolOrigin::Plugin(plugin.name().to_string()),
            );
        }
        tracing::info!(tools = registry.len(), plugins = plugins.plugins().len(), "registry built");

        let audit: Arc<dyn AuditSink> = if config.audit.enabled {
            std::fs::create_dir_all(&config.audit.directory).map_err(|err| {
                ServerError::Init(format!(
                    "audit directory {}: {err}",
                    config.audit.directory.display()
                ))
            })?;
            Arc::new(DailyFileAuditSink::new(
                config.audit.directory.clone(),
                config.audit.retention_days,
            ))
        } else {
            Arc::new(NoopAuditSink)
        };

        let pipeline = InvocationPipeline::new(PipelineParts {
            authz: Arc::new(DefaultToolAuthz::from_config(&config.auth)),
            admission: Arc::new(SlidingWindowLimiter::from_config(&config.rate_limits)),
            cache: Arc::new(ResponseCache::with_capacity(config.cache.capacity)),
            cache_ttls: config.cache.clone(),
            registry: Arc::new(registry),
            audit,
            call_timeout: config.pipeline.call_timeout(),
            cancel_grace: config.pipeline.cancel_grace(),
            shutdown: CancellationToken::new(),
        });
        let principal = pipeline.resolve_identity(credential);
        match &principal {
            Principal::Identified(identity) => {
                tracing::info!(identity = %identity.name, "session identity resolved");
            }
            Principal::Anonymous => tracing::info!("session is anonymous"),
            Principal::Rejected(err) => {
                tracing::warn!(error = %err, "session credential rejected; tool calls will be denied");
            }
        }

        Ok(Self::new(ServerParts {
            name: config.server.name.clone(),
            max_message_bytes: config.server.max_message_bytes,
            pipeline,
            principal,
            plugins,
            client_level: config.logging.client_level,
        }))
    }

    /// Returns registered tool descriptors in registration order.
    #[must_use]
    pub fn tools(&self) -> Vec<ToolDescriptor> {
        self.parts.pipeline.registry().descriptors()
    }

    /// Serves on the process stdin and stdout until stdin closes.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Transport`] when stdio fails.
    pub async fn serve(self) -> Result<(), ServerError> {
        self.run(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Runs the engine over arbitrary streams until `input` reaches EOF.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Transport`] when reading or writing fails.
    pub async fn run<R, W>(self, input: R, output: W) -> Result<(), ServerError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let ServerParts {
            name,
            max_message_bytes,
            pipeline,
            principal,
            plugins,
            client_level,
        } = self.parts;
        let (writer, writer_task) = spawn_writer(output);
        let mut connection = Connection {
            server_name: name,
            pipeline: Arc::new(pipeline),
            principal: Arc::new(principal),
            session: Session::new(),
            client_log: ClientLog::new(writer.clone(), client_level),
            writer: writer.clone(),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            tasks: JoinSet::new(),
        };

        let mut reader = BufReader::new(input);
        let mut buffer = Vec::new();
        let read_failure = loop {
            match read_bounded_line(&mut reader, &mut buffer, max_message_bytes).await {
                Ok(LineRead::Eof) => break None,
                Ok(LineRead::Oversized) => {
                    tracing::warn!(limit = max_message_bytes, "oversized message rejected");
                    connection.reply(
                        Value::Null,
                        Err(ProtocolError::InvalidRequest("message exceeds size limit".to_string())),
                    );
                }
                Ok(LineRead::Line) => connection.handle_line(&buffer),
                Err(err) => break Some(err),
            }
            connection.reap_finished();
        };

        tracing::info!("input closed; shutting down");
        connection.drain().await;
        plugins.shutdown(PLUGIN_EXIT_GRACE).await;
        writer.close();
        let written = writer_task.await;

        if let Some(err) = read_failure {
            return Err(ServerError::Transport(format!("read failed: {err}")));
        }
        match written {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(ServerError::Transport(format!("write failed: {err}"))),
            Err(err) => Err(ServerError::Transport(format!("writer task failed: {err}"))),
        }
    }
}

// ============================================================================
// SECTION: Connection
// ============================================================================

/// Per-connection engine state owned by the read loop.
struct Connection {
    /// Name advertised in the handshake.
    server_name: String,
    /// Shared pipeline.
    pipeline: Arc<InvocationPipeline>,
    /// Session principal.
    principal: Arc<Principal>,
    /// Handshake state.
    session: Session,
    /// Client log emitter.
    client_log: ClientLog,
    /// Outbound writer.
    writer: OutboundWriter,
    /// Cancel tokens for running calls keyed by serialized request id.
    in_flight: Arc<Mutex<HashMap<String, CancellationToken>>>,
    /// Running call tasks.
    tasks: JoinSet<()>,
}

impl Connection {
    /// Parses and dispatches one line.
    fn handle_line(&mut self, line: &[u8]) {
        if line.iter().all(u8::is_ascii_whitespace) {
            return;
        }
        match parse_message(line) {
            Ok(Incoming::Request {
                id,
                method,
                params,
            }) => self.handle_request(id, &method, params),
            Ok(Incoming::Notification {
                method,
                params,
            }) => self.handle_notification(&method, params),
            Ok(Incoming::Response {
                id, ..
            }) => tracing::debug!(%id, "unsolicited response ignored"),
            Err(err) => {
                tracing::debug!(error = %err.error, "malformed message");
                self.reply(err.id, Err(err.error));
            }
        }
    }

    /// Dispatches one request.
    fn handle_request(&mut self, id: Value, method: &str, params: Value) {
        tracing::debug!(%id, method, "request");
        if !self.session.is_ready() && method != methods::INITIALIZE && method != methods::PING {
            self.reply(id, Err(ProtocolError::NotInitialized));
            return;
        }
        if method == methods::TOOLS_CALL {
            if let Err(err) = self.spawn_call(id.clone(), params) {
                self.reply(id, Err(err));
            }
            return;
        }
        let outcome = match method {
            methods::INITIALIZE => self.initialize(params),
            methods::PING => Ok(json!({})),
            methods::TOOLS_LIST => Ok(json!({"tools": self.pipeline.registry().descriptors()})),
            methods::RESOURCES_LIST => Ok(json!({"resources": []})),
            methods::RESOURCES_READ => parse_params::<ReadResourceParams>(params).and_then(
                |params| Err(ProtocolError::InvalidParams(format!("unknown resource: {}", params.uri))),
            ),
            methods::PROMPTS_LIST => Ok(json!({"prompts": []})),
            methods::PROMPTS_GET => parse_params::<GetPromptParams>(params).and_then(|params| {
                Err(ProtocolError::InvalidParams(format!("unknown prompt: {}", params.name)))
            }),
            methods::LOGGING_SET_LEVEL => parse_params::<SetLevelParams>(params).map(|params| {
                self.client_log.set_level(params.level);
                json!({})
            }),
            other => Err(ProtocolError::MethodNotFound(other.to_string())),
        };
        self.reply(id, outcome);
    }

    /// Handles `initialize`.
    fn initialize(&mut self, params: Value) -> Result<Value, ProtocolError> {
        let params: InitializeParams = parse_params(params)?;
        let version = self.session.begin_initialize(params)?;
        Ok(json!({
            "protocolVersion": version,
            "capabilities": {
                "tools": {"listChanged": false},
                "resources": {},
                "prompts": {},
                "logging": {},
            },
            "serverInfo": {"name": self.server_name, "version": env!("CARGO_PKG_VERSION")},
        }))
    }

    /// Starts a `tools/call` on its own task.
    fn spawn_call(&mut self, id: Value, params: Value) -> Result<(), ProtocolError> {
        let params: ToolCallParams = parse_params(params)?;
        let progress: Arc<dyn ProgressSink> =
            match params.meta.and_then(|meta| meta.progress_token) {
                Some(token) => Arc::new(ProgressEmitter::new(token, self.writer.clone())),
                None => Arc::new(NoopProgress),
            };
        let key = id.to_string();
        let cancel = self.pipeline.call_token();
        {
            let mut in_flight = lock(&self.in_flight);
            if in_flight.contains_key(&key) {
                return Err(ProtocolError::InvalidRequest(format!(
                    "request id {key} is already in flight"
                )));
            }
            in_flight.insert(key.clone(), cancel.clone());
        }
        let request = CallRequest {
            correlation_id: format!("req-{key}"),
            tool: params.name,
            arguments: params.arguments.unwrap_or_else(|| Value::Object(Map::new())),
            progress,
            cancel,
        };

        let pipeline = Arc::clone(&self.pipeline);
        let principal = Arc::clone(&self.principal);
        let in_flight = Arc::clone(&self.in_flight);
        let writer = self.writer.clone();
        let client_log = self.client_log.clone();
        self.tasks.spawn(async move {
            let tool = request.tool.clone();
            let outcome = pipeline.invoke(&principal, request).await;
            lock(&in_flight).remove(&key);
            report_outcome(&client_log, &tool, &outcome);
            let response = match serde_json::to_value(&outcome.result) {
                Ok(result) => JsonRpcResponse::success(id, result),
                Err(err) => JsonRpcResponse::failure(id, &ProtocolError::Internal(err.to_string())),
            };
            writer.respond(&response);
        });
        Ok(())
    }

    /// Handles one notification.
    fn handle_notification(&mut self, method: &str, params: Value) {
        match method {
            methods::INITIALIZED => {
                self.session.complete_initialize();
            }
            methods::CANCELLED => match parse_params::<CancelledParams>(params) {
                Ok(params) => {
                    let token = lock(&self.in_flight).get(&params.request_id.to_string()).cloned();
                    match token {
                        Some(token) => {
                            tracing::debug!(request_id = %params.request_id, "call cancelled by client");
                            token.cancel();
                        }
                        None => {
                            tracing::debug!(request_id = %params.request_id, "cancel for unknown call");
                        }
                    }
                }
                Err(err) => tracing::debug!(error = %err, "malformed cancel notification"),
            },
            other => tracing::debug!(method = other, "notification ignored"),
        }
    }

    /// Queues a response.
    fn reply(&self, id: Value, outcome: Result<Value, ProtocolError>) {
        let response = match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(err) => JsonRpcResponse::failure(id, &err),
        };
        self.writer.respond(&response);
    }

    /// Collects call tasks that already finished.
    fn reap_finished(&mut self) {
        while let Some(joined) = self.tasks.try_join_next() {
            log_join(joined);
        }
    }

    /// Cancels running calls and waits for them to answer.
    async fn drain(&mut self) {
        self.pipeline.shutdown_token().cancel();
        let deadline = self.pipeline.cancel_grace() + DRAIN_SLACK;
        let tasks = &mut self.tasks;
        let drained = tokio::time::timeout(deadline, async {
            while let Some(joined) = tasks.join_next().await {
                log_join(joined);
            }
        })
        .await;
        if drained.is_err() {
            tracing::warn!(remaining = self.tasks.len(), "call tasks aborted at shutdown");
            self.tasks.abort_all();
        }
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Emits a client log notification summarizing one call.
fn report_outcome(client_log: &ClientLog, tool: &str, outcome: &CallOutcome) {
    let level = match outcome.outcome {
        AuditOutcome::Success | AuditOutcome::CacheHit => LogLevel::Debug,
        AuditOutcome::Unauthorized | AuditOutcome::RateLimited | AuditOutcome::Timeout => {
            LogLevel::Warning
        }
        AuditOutcome::Failure => LogLevel::Error,
    };
    tracing::debug!(tool, outcome = ?outcome.outcome, "call finished");
    client_log.log(
        level,
        CLIENT_LOGGER,
        json!({"tool": tool, "outcome": outcome.outcome, "message": outcome.result.first_text()}),
    );
}

/// Logs a call task that panicked or was aborted.
fn log_join(joined: Result<(), JoinError>) {
    if let Err(err) = joined {
        tracing::error!(error = %err, "call task failed");
    }
}

/// Locks a mutex, recovering from poisoning.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
