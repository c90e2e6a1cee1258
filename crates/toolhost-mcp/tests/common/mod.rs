// crates/toolhost-mcp/tests/common/mod.rs
// ============================================================================
// Module: Common Test Fixtures
// Description: In-memory engine harness and scripted tools.
// Purpose: Drive the protocol engine over duplex streams.
// Dependencies: toolhost-mcp, toolhost-core, toolhost-config, tokio
// ============================================================================

//! ## Overview
//! [`TestClient`] runs an [`McpServer`] over a `tokio::io::duplex` pair and
//! speaks line-delimited JSON-RPC to it. Notifications received while waiting
//! for a response are kept in [`TestClient::notifications`].

#![allow(dead_code, reason = "Shared test helpers may be unused in some cases.")]
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    reason = "Test fixtures favor direct unwraps for setup clarity."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use serde_json::json;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::io::DuplexStream;
use tokio::io::Lines;
use tokio::io::ReadHalf;
use tokio::io::WriteHalf;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use toolhost_config::AuthConfig;
use toolhost_config::CacheConfig;
use toolhost_config::LogLevel;
use toolhost_core::ProgressSink;
use toolhost_core::ProgressUpdate;
use toolhost_core::SharedTool;
use toolhost_core::ToolDescriptor;
use toolhost_core::ToolFault;
use toolhost_core::ToolInstance;
use toolhost_core::ToolResult;
use toolhost_mcp::AdmissionControl;
use toolhost_mcp::DefaultToolAuthz;
use toolhost_mcp::InvocationPipeline;
use toolhost_mcp::McpServer;
use toolhost_mcp::MemoryAuditSink;
use toolhost_mcp::PipelineParts;
use toolhost_mcp::PluginHost;
use toolhost_mcp::ResponseCache;
use toolhost_mcp::ServerError;
use toolhost_mcp::ServerParts;
use toolhost_mcp::ToolOrigin;
use toolhost_mcp::ToolRegistry;
use toolhost_mcp::builtin::builtin_tools;
use toolhost_mcp::rate_limit::UnlimitedAdmission;

// ============================================================================
// SECTION: Scripted Tools
// ============================================================================

/// Behaviors a scripted tool can exhibit.
#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    /// Returns the arguments as text.
    Echo,
    /// Returns an error-flagged result.
    ReportError,
    /// Reports two progress steps, then succeeds.
    Progress,
    /// Waits for cancellation and reports it.
    AwaitCancel,
    /// Sleeps for the given milliseconds, then succeeds.
    Sleep(u64),
}

/// Tool double counting executions.
pub struct ScriptedTool {
    /// Listed descriptor.
    descriptor: ToolDescriptor,
    /// Scripted behavior.
    behavior: Behavior,
    /// Executions so far.
    pub runs: AtomicUsize,
}

impl ScriptedTool {
    /// Creates a tool accepting any object.
    pub fn new(name: &str, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            descriptor: ToolDescriptor::new(name, "scripted", json!({"type": "object"})),
            behavior,
            runs: AtomicUsize::new(0),
        })
    }

    /// Returns the execution count.
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolInstance for ScriptedTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(
        &self,
        arguments: Value,
        progress: Arc<dyn ProgressSink>,
        cancel: CancellationToken,
    ) -> Result<ToolResult, ToolFault> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            Behavior::Echo => Ok(ToolResult::text(arguments.to_string())),
            Behavior::ReportError => Ok(ToolResult::error("scripted failure")),
            Behavior::Progress => {
                progress.report(ProgressUpdate::of(1.0, 2.0));
                progress.report(ProgressUpdate::of(2.0, 2.0));
                Ok(ToolResult::text("done"))
            }
            Behavior::AwaitCancel => {
                cancel.cancelled().await;
                Err(ToolFault::Cancelled)
            }
            Behavior::Sleep(millis) => {
                tokio::time::sleep(Duration::from_millis(millis)).await;
                Ok(ToolResult::text("slept"))
            }
        }
    }
}

// ============================================================================
// SECTION: Server Fixtures
// ============================================================================

/// Knobs for [`build_server`].
pub struct ServerOptions {
    /// Auth configuration.
    pub auth: AuthConfig,
    /// Credential presented by the session.
    pub credential: Option<String>,
    /// Rate admission.
    pub admission: Arc<dyn AdmissionControl>,
    /// Cache capacity.
    pub cache_capacity: usize,
    /// Line limit.
    pub max_message_bytes: usize,
    /// Client log threshold.
    pub client_level: Option<LogLevel>,
    /// Cancel grace period.
    pub cancel_grace: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            auth: AuthConfig::default(),
            credential: None,
            admission: Arc::new(UnlimitedAdmission),
            cache_capacity: 0,
            max_message_bytes: 64 * 1024,
            client_level: None,
            cancel_grace: Duration::from_millis(500),
        }
    }
}

/// Builds a server with built-ins followed by `tools`.
pub fn build_server(
    tools: Vec<SharedTool>,
    options: ServerOptions,
) -> (McpServer, Arc<MemoryAuditSink>) {
    let mut registry = ToolRegistry::new();
    registry.register_all(builtin_tools("toolhost-test"), &ToolOrigin::Builtin);
    registry.register_all(tools, &ToolOrigin::Builtin);
    let audit = Arc::new(MemoryAuditSink::new());
    let pipeline = InvocationPipeline::new(PipelineParts {
        authz: Arc::new(DefaultToolAuthz::from_config(&options.auth)),
        admission: options.admission,
        cache: Arc::new(ResponseCache::with_capacity(options.cache_capacity)),
        cache_ttls: CacheConfig::default(),
        registry: Arc::new(registry),
        audit: audit.clone(),
        call_timeout: None,
        cancel_grace: options.cancel_grace,
        shutdown: CancellationToken::new(),
    });
    let principal = pipeline.resolve_identity(options.credential.as_deref());
    let server = McpServer::new(ServerParts {
        name: "toolhost-test".to_string(),
        max_message_bytes: options.max_message_bytes,
        pipeline,
        principal,
        plugins: PluginHost::empty(),
        client_level: options.client_level,
    });
    (server, audit)
}

// ============================================================================
// SECTION: Client
// ============================================================================

/// Line-oriented JSON-RPC client over a duplex stream.
pub struct TestClient {
    /// Client write half; dropped to signal EOF.
    writer: Option<WriteHalf<DuplexStream>>,
    /// Client read half.
    lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
    /// Engine task.
    engine: JoinHandle<Result<(), ServerError>>,
    /// Notifications seen while waiting for responses.
    pub notifications: Vec<Value>,
}

impl TestClient {
    /// Starts the engine on a background task.
    pub fn start(server: McpServer) -> Self {
        let (client, host) = tokio::io::duplex(1 << 20);
        let (host_read, host_write) = tokio::io::split(host);
        let engine = tokio::spawn(server.run(host_read, host_write));
        let (client_read, client_write) = tokio::io::split(client);
        Self {
            writer: Some(client_write),
            lines: BufReader::new(client_read).lines(),
            engine,
            notifications: Vec::new(),
        }
    }

    /// Writes one raw line.
    pub async fn send_raw(&mut self, line: &str) {
        let writer = self.writer.as_mut().expect("client still open");
        writer.write_all(line.as_bytes()).await.unwrap();
        writer.write_all(b"\n").await.unwrap();
        writer.flush().await.unwrap();
    }

    /// Writes one JSON message.
    pub async fn send(&mut self, message: &Value) {
        self.send_raw(&message.to_string()).await;
    }

    /// Sends a notification.
    pub async fn notify(&mut self, method: &str, params: Value) {
        self.send(&json!({"jsonrpc": "2.0", "method": method, "params": params})).await;
    }

    /// Sends a request without waiting.
    pub async fn start_request(&mut self, id: i64, method: &str, params: Value) {
        self.send(&json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}))
            .await;
    }

    /// Sends a request and waits for its response.
    pub async fn request(&mut self, id: i64, method: &str, params: Value) -> Value {
        self.start_request(id, method, params).await;
        self.response(&json!(id)).await
    }

    /// Reads the next message.
    pub async fn next_message(&mut self) -> Value {
        let line = tokio::time::timeout(Duration::from_secs(10), self.lines.next_line())
            .await
            .expect("engine answered in time")
            .unwrap()
            .expect("engine output open");
        serde_json::from_str(&line).unwrap()
    }

    /// Reads until the response for `id`, keeping notifications.
    pub async fn response(&mut self, id: &Value) -> Value {
        loop {
            let message = self.next_message().await;
            if message.get("method").is_none() && message.get("id") == Some(id) {
                return message;
            }
            self.notifications.push(message);
        }
    }

    /// Runs the handshake.
    pub async fn handshake(&mut self) -> Value {
        let result = self
            .request(
                0,
                "initialize",
                json!({
                    "protocolVersion": "2025-06-18",
                    "capabilities": {},
                    "clientInfo": {"name": "test-client", "version": "1.0"}
                }),
            )
            .await;
        self.notify("notifications/initialized", json!({})).await;
        result
    }

    /// Calls a tool and returns the response.
    pub async fn call_tool(&mut self, id: i64, name: &str, arguments: Value) -> Value {
        self.request(id, "tools/call", json!({"name": name, "arguments": arguments})).await
    }

    /// Closes input, collects remaining output, and waits for the engine.
    pub async fn finish(mut self) -> Vec<Value> {
        if let Some(mut writer) = self.writer.take() {
            writer.shutdown().await.unwrap();
        }
        let mut remaining = Vec::new();
        while let Some(line) =
            tokio::time::timeout(Duration::from_secs(10), self.lines.next_line())
                .await
                .expect("engine drained in time")
                .unwrap()
        {
            remaining.push(serde_json::from_str(&line).unwrap());
        }
        self.engine.await.unwrap().unwrap();
        remaining
    }
}

/// Returns the JSON-RPC error code of a response.
pub fn error_code(response: &Value) -> i64 {
    response["error"]["code"].as_i64().expect("error response")
}

/// Returns the first text block of a tool result response.
pub fn result_text(response: &Value) -> String {
    response["result"]["content"][0]["text"].as_str().expect("text content").to_string()
}
