// crates/toolhost-mcp/src/lib.rs
// ============================================================================
// Module: Toolhost MCP
// Description: Stdio tool host with an invocation pipeline and plugin loader.
// Purpose: Expose built-in and plugin tools to a JSON-RPC client.
// Dependencies: toolhost-config, toolhost-core, tokio, jsonschema
// ============================================================================

//! ## Overview
//! `toolhost-mcp` is the request-processing core of the tool host. The
//! [`McpServer`] engine owns the protocol session and dispatches `tools/call`
//! into the [`InvocationPipeline`], which applies authorization, rate
//! admission, response caching, execution, and auditing in a fixed order.
//! Tools are either compiled in ([`builtin`]) or proxied to plugin processes
//! ([`plugins`]).
//!
//! Security posture: client input and plugin output are untrusted; plugin
//! executables themselves are operator-trusted code.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod audit;
pub mod auth;
pub mod builtin;
pub mod cache;
pub mod framing;
pub mod outbound;
pub mod pipeline;
pub mod plugins;
pub mod protocol;
pub mod rate_limit;
pub mod registry;
pub mod server;
pub mod session;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use audit::AuditOutcome;
pub use audit::AuditRecord;
pub use audit::AuditSink;
pub use audit::DailyFileAuditSink;
pub use audit::MemoryAuditSink;
pub use audit::NoopAuditSink;
pub use auth::DefaultToolAuthz;
pub use auth::Principal;
pub use auth::ToolAuthz;
pub use cache::ResponseCache;
pub use pipeline::CallOutcome;
pub use pipeline::CallRequest;
pub use pipeline::InvocationPipeline;
pub use pipeline::PipelineParts;
pub use plugins::PluginError;
pub use plugins::PluginHost;
pub use rate_limit::AdmissionControl;
pub use rate_limit::SlidingWindowLimiter;
pub use registry::ToolOrigin;
pub use registry::ToolRegistry;
pub use server::McpServer;
pub use server::ServerError;
pub use server::ServerParts;
