// crates/toolhost-mcp/src/registry.rs
// ============================================================================
// Module: Tool Registry
// Description: Name-keyed set of built-in and plugin tool instances.
// Purpose: Resolve tool names to instances and compiled argument schemas.
// Dependencies: jsonschema, toolhost-core
// ============================================================================

//! ## Overview
//! The registry is built once at startup and shared read-only afterwards. A
//! tool name maps to exactly one instance: the first registration wins and
//! later duplicates are logged and skipped. Built-ins are registered before
//! plugins, so a plugin can never shadow a built-in.
//!
//! Each entry carries its compiled input schema so argument validation costs
//! no compilation per call.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::fmt;

use jsonschema::Draft;
use jsonschema::Validator;
use serde_json::Value;
use thiserror::Error;
use toolhost_core::SharedTool;
use toolhost_core::ToolDescriptor;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum tool name length.
pub const MAX_TOOL_NAME_LENGTH: usize = 128;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Where a tool came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOrigin {
    /// Compiled into the host.
    Builtin,
    /// Supplied by the named plugin.
    Plugin(String),
}

impl fmt::Display for ToolOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Builtin => f.write_str("builtin"),
            Self::Plugin(name) => write!(f, "plugin:{name}"),
        }
    }
}

/// Registered tool with its compiled schema.
pub struct RegisteredTool {
    /// Tool instance.
    pub tool: SharedTool,
    /// Registration origin.
    pub origin: ToolOrigin,
    /// Compiled input schema.
    validator: Validator,
}

impl RegisteredTool {
    /// Validates call arguments against the input schema.
    ///
    /// # Errors
    ///
    /// Returns the first validation error message.
    pub fn validate_arguments(&self, arguments: &Value) -> Result<(), String> {
        if self.validator.is_valid(arguments) {
            return Ok(());
        }
        Err(self
            .validator
            .iter_errors(arguments)
            .next()
            .map_or_else(|| "arguments do not match input schema".to_string(), |err| err.to_string()))
    }
}

/// Registration failures. All of them are non-fatal to the host.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A tool with the same name is already registered.
    #[error("tool {name} already registered by {existing}")]
    Duplicate {
        /// Conflicting tool name.
        name: String,
        /// Origin of the registration that won.
        existing: ToolOrigin,
    },
    /// Descriptor failed validation.
    #[error("invalid tool descriptor {name}: {reason}")]
    InvalidDescriptor {
        /// Offending tool name.
        name: String,
        /// Validation failure.
        reason: String,
    },
}

// ============================================================================
// SECTION: Registry
// ============================================================================

/// Ordered, name-unique tool registry.
#[derive(Default)]
pub struct ToolRegistry {
    /// Entries in registration order.
    entries: Vec<RegisteredTool>,
    /// Index into `entries` by tool name.
    by_name: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool. The first registration of a name wins.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] when the name is taken or the descriptor is
    /// invalid; the registry is unchanged in both cases.
    pub fn register(&mut self, tool: SharedTool, origin: ToolOrigin) -> Result<(), RegistryError> {
        let descriptor = tool.descriptor();
        let validator = validate_descriptor(descriptor)?;
        if let Some(index) = self.by_name.get(&descriptor.name) {
            return Err(RegistryError::Duplicate {
                name: descriptor.name.clone(),
                existing: self.entries[*index].origin.clone(),
            });
        }
        self.by_name.insert(descriptor.name.clone(), self.entries.len());
        self.entries.push(RegisteredTool {
            tool,
            origin,
            validator,
        });
        Ok(())
    }

    /// Registers every tool, logging and skipping the ones that fail.
    /// Returns the number registered.
    pub fn register_all(
        &mut self,
        tools: impl IntoIterator<Item = SharedTool>,
        origin: &ToolOrigin,
    ) -> usize {
        let mut registered = 0;
        for tool in tools {
            let name = tool.descriptor().name.clone();
            match self.register(tool, origin.clone()) {
                Ok(()) => registered += 1,
                Err(err) => {
                    tracing::warn!(tool = %name, origin = %origin, error = %err, "tool skipped");
                }
            }
        }
        registered
    }

    /// Returns the entry for `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.by_name.get(name).and_then(|index| self.entries.get(*index))
    }

    /// Returns descriptors in registration order.
    #[must_use]
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.entries.iter().map(|entry| entry.tool.descriptor().clone()).collect()
    }

    /// Returns the number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when no tools are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Validates a descriptor and compiles its input schema.
///
/// # Errors
///
/// Returns [`RegistryError::InvalidDescriptor`] on a bad name or schema.
pub fn validate_descriptor(descriptor: &ToolDescriptor) -> Result<Validator, RegistryError> {
    let invalid = |reason: String| RegistryError::InvalidDescriptor {
        name: descriptor.name.clone(),
        reason,
    };
    let name = descriptor.name.as_str();
    if name.is_empty() || name.len() > MAX_TOOL_NAME_LENGTH {
        return Err(invalid("name must be 1..=128 characters".to_string()));
    }
    if !name.chars().all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.')) {
        return Err(invalid("name may only contain [A-Za-z0-9_.-]".to_string()));
    }
    if descriptor.input_schema.get("type").and_then(Value::as_str) != Some("object") {
        return Err(invalid("input schema must have type object".to_string()));
    }
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&descriptor.input_schema)
        .map_err(|err| invalid(err.to_string()))
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions.")]

    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::Value;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;
    use toolhost_core::ProgressSink;
    use toolhost_core::ToolDescriptor;
    use toolhost_core::ToolFault;
    use toolhost_core::ToolInstance;
    use toolhost_core::ToolResult;

    use super::RegistryError;
    use super::ToolOrigin;
    use super::ToolRegistry;

    struct Fixed {
        descriptor: ToolDescriptor,
        reply: &'static str,
    }

    #[async_trait]
    impl ToolInstance for Fixed {
        fn descriptor(&self) -> &ToolDescriptor {
            &self.descriptor
        }

        async fn execute(
            &self,
            _arguments: Value,
            _progress: Arc<dyn ProgressSink>,
            _cancel: CancellationToken,
        ) -> Result<ToolResult, ToolFault> {
            Ok(ToolResult::text(self.reply))
        }
    }

    fn fixed(name: &str, reply: &'static str) -> Arc<Fixed> {
        Arc::new(Fixed {
            descriptor: ToolDescriptor::new(
                name,
                "fixed reply",
                json!({"type": "object", "properties": {"n": {"type": "integer"}}}),
            ),
            reply,
        })
    }

    #[test]
    fn first_registration_wins() {
        let mut registry = ToolRegistry::new();
        registry.register(fixed("echo", "builtin"), ToolOrigin::Builtin).unwrap();
        let err = registry
            .register(fixed("echo", "plugin"), ToolOrigin::Plugin("p".to_string()))
            .unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate { existing: ToolOrigin::Builtin, .. }));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("echo").unwrap().origin, ToolOrigin::Builtin);
    }

    #[test]
    fn register_all_skips_bad_descriptors_only() {
        let mut registry = ToolRegistry::new();
        let bad = Arc::new(Fixed {
            descriptor: ToolDescriptor::new("bad name", "", json!({"type": "object"})),
            reply: "",
        });
        let count = registry.register_all(
            [fixed("a", "a"), bad, fixed("b", "b")].map(|tool| tool as Arc<dyn ToolInstance>),
            &ToolOrigin::Plugin("mixed".to_string()),
        );
        assert_eq!(count, 2);
        let names: Vec<String> = registry.descriptors().into_iter().map(|d| d.name).collect();
        assert_eq!(names, ["a", "b"]);
    }

    #[test]
    fn argument_validation_reports_first_error() {
        let mut registry = ToolRegistry::new();
        registry.register(fixed("count", "ok"), ToolOrigin::Builtin).unwrap();
        let entry = registry.get("count").unwrap();
        assert!(entry.validate_arguments(&json!({"n": 3})).is_ok());
        assert!(entry.validate_arguments(&json!({"n": "three"})).is_err());
    }
}
