// crates/toolhost-mcp/src/pipeline.rs
// ============================================================================
// Module: Invocation Pipeline
// Description: Authorization, admission, caching, execution, and audit.
// Purpose: Wrap every tool call in a fixed order and always yield a result.
// Dependencies: tokio, tokio-util, toolhost-config, toolhost-core
// ============================================================================

//! ## Overview
//! One call runs these stages in order and stops at the first that decides
//! the outcome:
//! 1. authorize (denial consumes no rate token)
//! 2. rate admission (denial never touches the cache)
//! 3. cache probe
//! 4. registry lookup, argument validation, and execution
//!
//! A non-error result is cached with the tool's TTL. Exactly one audit record
//! is written per call attempt, whatever the outcome. Tool faults and panics
//! become the generic error result "tool execution failed"; nothing escapes
//! as an unhandled fault.
//!
//! Tools run on their own task under a token that descends from the host
//! shutdown token. After cancellation the tool has a bounded grace period; a
//! tool that overruns it, or the optional per-call timeout, yields `Timeout`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use serde_json::Value;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use toolhost_config::CacheConfig;
use toolhost_core::ProgressSink;
use toolhost_core::SharedTool;
use toolhost_core::ToolFault;
use toolhost_core::ToolResult;

use crate::audit::AuditOutcome;
use crate::audit::AuditRecord;
use crate::audit::AuditSink;
use crate::auth::Principal;
use crate::auth::ToolAuthz;
use crate::cache::META_KEY;
use crate::cache::ResponseCache;
use crate::cache::action_of;
use crate::cache::cache_key;
use crate::rate_limit::AdmissionControl;
use crate::registry::ToolRegistry;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Caller-visible text for tool faults and panics.
pub const GENERIC_FAILURE: &str = "tool execution failed";

// ============================================================================
// SECTION: Types
// ============================================================================

/// Collaborators and limits for a pipeline.
pub struct PipelineParts {
    /// Credential resolution and authorization.
    pub authz: Arc<dyn ToolAuthz>,
    /// Rate admission.
    pub admission: Arc<dyn AdmissionControl>,
    /// Response cache.
    pub cache: Arc<ResponseCache>,
    /// Cache TTL configuration.
    pub cache_ttls: CacheConfig,
    /// Registered tools.
    pub registry: Arc<ToolRegistry>,
    /// Audit destination.
    pub audit: Arc<dyn AuditSink>,
    /// Hard per-call timeout.
    pub call_timeout: Option<Duration>,
    /// Time a cancelled tool has to stop.
    pub cancel_grace: Duration,
    /// Host shutdown token; parent of every call token.
    pub shutdown: CancellationToken,
}

/// One tool invocation.
pub struct CallRequest {
    /// Correlation id recorded in the audit log.
    pub correlation_id: String,
    /// Requested tool name.
    pub tool: String,
    /// Raw arguments, possibly carrying `_meta` and `action`.
    pub arguments: Value,
    /// Progress destination.
    pub progress: Arc<dyn ProgressSink>,
    /// Request-scoped cancellation; see [`InvocationPipeline::call_token`].
    pub cancel: CancellationToken,
}

/// Result of one invocation plus its audited outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct CallOutcome {
    /// Caller-visible result.
    pub result: ToolResult,
    /// Audited outcome.
    pub outcome: AuditOutcome,
}

/// Why execution stopped before the tool returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    /// Request or host cancellation.
    Cancelled,
    /// Per-call timeout elapsed.
    TimedOut,
}

// ============================================================================
// SECTION: Pipeline
// ============================================================================

/// Orchestrates one tool call across the cross-cutting stages.
pub struct InvocationPipeline {
    /// Collaborators and limits.
    parts: PipelineParts,
}

impl InvocationPipeline {
    /// Builds a pipeline.
    #[must_use]
    pub const fn new(parts: PipelineParts) -> Self {
        Self {
            parts,
        }
    }

    /// Returns the tool registry.
    #[must_use]
    pub fn registry(&self) -> &ToolRegistry {
        &self.parts.registry
    }

    /// Returns the host shutdown token.
    #[must_use]
    pub const fn shutdown_token(&self) -> &CancellationToken {
        &self.parts.shutdown
    }

    /// Returns the cancellation grace period.
    #[must_use]
    pub const fn cancel_grace(&self) -> Duration {
        self.parts.cancel_grace
    }

    /// Returns a fresh request token descending from host shutdown.
    #[must_use]
    pub fn call_token(&self) -> CancellationToken {
        self.parts.shutdown.child_token()
    }

    /// Resolves a credential. Session transports call this once; per-call
    /// transports call it per request.
    #[must_use]
    pub fn resolve_identity(&self, credential: Option<&str>) -> Principal {
        self.parts.authz.resolve(credential)
    }

    /// Runs one call through every stage. Never fails.
    pub async fn invoke(&self, principal: &Principal, request: CallRequest) -> CallOutcome {
        let started = Instant::now();
        let CallRequest {
            correlation_id,
            tool,
            arguments,
            progress,
            cancel,
        } = request;
        let action = action_of(&arguments).to_string();
        let finish = |result: ToolResult, outcome: AuditOutcome, error: Option<String>| {
            self.parts.audit.record(&AuditRecord::new(
                correlation_id.as_str(),
                tool.as_str(),
                action.as_str(),
                &arguments,
                outcome,
                error,
                started.elapsed(),
            ));
            CallOutcome {
                result,
                outcome,
            }
        };

        let decision = self.parts.authz.authorize(principal, &tool, &action);
        if !decision.allowed {
            let reason = decision.reason.unwrap_or_else(|| "unauthorized".to_string());
            return finish(
                ToolResult::error(format!("unauthorized: {reason}")),
                AuditOutcome::Unauthorized,
                Some(reason),
            );
        }

        if !self.parts.admission.admit(&tool) {
            let reason = format!("rate limit exceeded for tool {tool}");
            return finish(ToolResult::error(&reason), AuditOutcome::RateLimited, Some(reason));
        }

        let key = match cache_key(&tool, &arguments) {
            Ok(key) => Some(key),
            Err(err) => {
                tracing::warn!(tool = %tool, error = %err, "cache key unavailable");
                None
            }
        };
        if let Some(hit) = key.as_deref().and_then(|key| self.parts.cache.get(key)) {
            return finish(hit, AuditOutcome::CacheHit, None);
        }

        let Some(entry) = self.parts.registry.get(&tool) else {
            let reason = format!("unknown tool: {tool}");
            return finish(ToolResult::error(&reason), AuditOutcome::Failure, Some(reason));
        };
        let call_arguments = strip_meta(&arguments);
        if let Err(reason) = entry.validate_arguments(&call_arguments) {
            let reason = format!("invalid arguments: {reason}");
            return finish(ToolResult::error(&reason), AuditOutcome::Failure, Some(reason));
        }

        let (result, outcome, error) =
            self.execute(Arc::clone(&entry.tool), call_arguments, progress, &cancel).await;
        if outcome == AuditOutcome::Success
            && let Some(key) = key.as_deref()
        {
            self.parts.cache.put(key, result.clone(), self.parts.cache_ttls.ttl_for(&tool));
        }
        finish(result, outcome, error)
    }

    /// Runs the tool on its own task, enforcing timeout and grace period.
    async fn execute(
        &self,
        tool: SharedTool,
        arguments: Value,
        progress: Arc<dyn ProgressSink>,
        cancel: &CancellationToken,
    ) -> (ToolResult, AuditOutcome, Option<String>) {
        let name = tool.descriptor().name.clone();
        let token = cancel.child_token();
        let task_token = token.clone();
        let mut handle =
            tokio::spawn(async move { tool.execute(arguments, progress, task_token).await });

        let stopped = tokio::select! {
            joined = &mut handle => return settle(&name, joined),
            () = cancel.cancelled() => StopReason::Cancelled,
            () = sleep_for(self.parts.call_timeout) => StopReason::TimedOut,
        };

        token.cancel();
        let grace = tokio::time::timeout(self.parts.cancel_grace, &mut handle).await;
        match (stopped, grace) {
            (StopReason::Cancelled, Ok(joined)) => settle(&name, joined),
            (StopReason::TimedOut, Ok(_)) => {
                let reason = format!("tool {name} timed out");
                (ToolResult::error(&reason), AuditOutcome::Timeout, Some(reason))
            }
            (_, Err(_)) => {
                handle.abort();
                tracing::warn!(tool = %name, "tool ignored cancellation past grace period");
                let reason = format!("tool {name} did not stop within the grace period");
                (ToolResult::error(&reason), AuditOutcome::Timeout, Some(reason))
            }
        }
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Maps a joined tool task to a result, outcome, and audit error.
fn settle(
    tool: &str,
    joined: Result<Result<ToolResult, ToolFault>, JoinError>,
) -> (ToolResult, AuditOutcome, Option<String>) {
    match joined {
        Ok(Ok(result)) if result.is_error => {
            let error = result.first_text().map(str::to_string);
            (result, AuditOutcome::Failure, error)
        }
        Ok(Ok(result)) => (result, AuditOutcome::Success, None),
        Ok(Err(ToolFault::Cancelled)) => {
            let reason = format!("tool {tool} cancelled");
            (ToolResult::error(&reason), AuditOutcome::Timeout, Some(reason))
        }
        Ok(Err(fault)) => {
            tracing::warn!(tool = %tool, error = %fault, "tool fault");
            (ToolResult::error(GENERIC_FAILURE), AuditOutcome::Failure, Some(fault.to_string()))
        }
        Err(err) => {
            tracing::error!(tool = %tool, error = %err, "tool task failed");
            (ToolResult::error(GENERIC_FAILURE), AuditOutcome::Failure, Some(err.to_string()))
        }
    }
}

/// Returns the arguments without protocol metadata; non-objects pass through.
fn strip_meta(arguments: &Value) -> Value {
    match arguments {
        Value::Object(map) if map.contains_key(META_KEY) => {
            let mut stripped = map.clone();
            stripped.remove(META_KEY);
            Value::Object(stripped)
        }
        other => other.clone(),
    }
}

/// Sleeps for `limit`, or forever when there is none.
async fn sleep_for(limit: Option<Duration>) {
    match limit {
        Some(limit) => tokio::time::sleep(limit).await,
        None => std::future::pending().await,
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
