// crates/toolhost-mcp/src/auth.rs
// ============================================================================
// Module: Tool Authorization
// Description: Credential resolution and tool/action authorization.
// Purpose: Map an opaque credential to the tools and actions it may use.
// Dependencies: sha2, subtle, toolhost-config
// ============================================================================

//! ## Overview
//! A session presents at most one credential. [`ToolAuthz::resolve`] turns it
//! into a [`Principal`] once; [`ToolAuthz::authorize`] then checks each call
//! against that principal. Credentials are compared as SHA-256 digests in
//! constant time and never stored in plain form.
//!
//! Anonymous sessions are valid only when `auth.require_auth` is false, in
//! which case they may call every tool.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use sha2::Digest;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;
use toolhost_config::AuthConfig;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Wildcard entry matching every tool or action.
pub const WILDCARD: &str = "*";

// ============================================================================
// SECTION: Types
// ============================================================================

/// Resolved permission set behind a credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Identity label.
    pub name: String,
    /// Allowed tools; may contain [`WILDCARD`].
    pub allowed_tools: BTreeSet<String>,
    /// Allowed actions per tool; may contain [`WILDCARD`]. Tools not listed
    /// allow any action.
    pub allowed_actions: BTreeMap<String, BTreeSet<String>>,
}

impl Identity {
    /// Returns true when `tool` is in the allowed set.
    #[must_use]
    pub fn allows_tool(&self, tool: &str) -> bool {
        self.allowed_tools.contains(WILDCARD) || self.allowed_tools.contains(tool)
    }

    /// Returns true when `action` is allowed for `tool`.
    #[must_use]
    pub fn allows_action(&self, tool: &str, action: &str) -> bool {
        self.allowed_actions
            .get(tool)
            .is_none_or(|actions| actions.contains(WILDCARD) || actions.contains(action))
    }
}

/// Caller behind a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    /// No credential presented.
    Anonymous,
    /// Credential matched a configured identity.
    Identified(Identity),
    /// Credential resolution failed; every call is denied.
    Rejected(AuthError),
}

/// Outcome of one authorization check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationDecision {
    /// Whether the call may proceed.
    pub allowed: bool,
    /// Denial reason when not allowed.
    pub reason: Option<String>,
}

impl AuthorizationDecision {
    /// Builds an allow decision.
    #[must_use]
    pub const fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    /// Builds a deny decision.
    #[must_use]
    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Credential resolution errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Missing or unknown credential.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),
}

// ============================================================================
// SECTION: Traits
// ============================================================================

/// Authn/authz interface for tool calls.
pub trait ToolAuthz: Send + Sync {
    /// Resolves a presented credential into a principal.
    fn resolve(&self, credential: Option<&str>) -> Principal;

    /// Authorizes one call for `principal`.
    fn authorize(&self, principal: &Principal, tool: &str, action: &str) -> AuthorizationDecision;
}

// ============================================================================
// SECTION: Default Policy
// ============================================================================

/// Configured identity with its credential digest.
#[derive(Debug, Clone)]
struct CredentialEntry {
    /// SHA-256 digest of the credential.
    digest: [u8; 32],
    /// Identity granted by the credential.
    identity: Identity,
}

/// Static credential-to-permission mapping from configuration.
#[derive(Debug, Clone)]
pub struct DefaultToolAuthz {
    /// Reject anonymous sessions when true.
    require_auth: bool,
    /// Configured identities.
    entries: Vec<CredentialEntry>,
}

impl DefaultToolAuthz {
    /// Builds the policy from auth configuration.
    #[must_use]
    pub fn from_config(config: &AuthConfig) -> Self {
        let entries = config
            .identities
            .iter()
            .map(|identity| CredentialEntry {
                digest: digest(identity.credential.trim()),
                identity: Identity {
                    name: identity.name.clone(),
                    allowed_tools: identity.allowed_tools.iter().cloned().collect(),
                    allowed_actions: identity
                        .allowed_actions
                        .iter()
                        .map(|(tool, actions)| (tool.clone(), actions.iter().cloned().collect()))
                        .collect(),
                },
            })
            .collect();
        Self {
            require_auth: config.require_auth,
            entries,
        }
    }

    /// Returns the identity whose credential digest matches, comparing every
    /// entry in constant time.
    fn lookup(&self, credential: &str) -> Option<&Identity> {
        let presented = digest(credential);
        let mut found = None;
        for entry in &self.entries {
            if bool::from(entry.digest.as_slice().ct_eq(presented.as_slice())) {
                found = Some(&entry.identity);
            }
        }
        found
    }
}

impl ToolAuthz for DefaultToolAuthz {
    fn resolve(&self, credential: Option<&str>) -> Principal {
        match credential.map(str::trim).filter(|value| !value.is_empty()) {
            None if self.require_auth => {
                Principal::Rejected(AuthError::Unauthenticated("missing credential".to_string()))
            }
            None => Principal::Anonymous,
            Some(value) => self.lookup(value).map_or_else(
                || Principal::Rejected(AuthError::Unauthenticated("invalid credential".to_string())),
                |identity| Principal::Identified(identity.clone()),
            ),
        }
    }

    fn authorize(&self, principal: &Principal, tool: &str, action: &str) -> AuthorizationDecision {
        match principal {
            Principal::Rejected(err) => AuthorizationDecision::deny(err.to_string()),
            Principal::Anonymous if self.require_auth => {
                AuthorizationDecision::deny("authentication required")
            }
            Principal::Anonymous => AuthorizationDecision::allow(),
            Principal::Identified(identity) => {
                if !identity.allows_tool(tool) {
                    AuthorizationDecision::deny(format!(
                        "identity {} is not allowed to call tool {tool}",
                        identity.name
                    ))
                } else if !identity.allows_action(tool, action) {
                    AuthorizationDecision::deny(format!(
                        "identity {} is not allowed action {action} on tool {tool}",
                        identity.name
                    ))
                } else {
                    AuthorizationDecision::allow()
                }
            }
        }
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Returns the SHA-256 digest of a credential.
fn digest(credential: &str) -> [u8; 32] {
    Sha256::digest(credential.as_bytes()).into()
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use toolhost_config::AuthConfig;
    use toolhost_config::IdentityConfig;

    use super::DefaultToolAuthz;
    use super::Principal;
    use super::ToolAuthz;

    fn authz(require_auth: bool) -> DefaultToolAuthz {
        let mut allowed_actions = BTreeMap::new();
        allowed_actions.insert("filesystem".to_string(), vec!["read".to_string()]);
        DefaultToolAuthz::from_config(&AuthConfig {
            require_auth,
            identities: vec![
                IdentityConfig {
                    name: "analyst".to_string(),
                    credential: "analyst-key".to_string(),
                    allowed_tools: vec!["sql_query".to_string()],
                    allowed_actions: BTreeMap::new(),
                },
                IdentityConfig {
                    name: "ops".to_string(),
                    credential: "ops-key".to_string(),
                    allowed_tools: vec!["*".to_string()],
                    allowed_actions,
                },
            ],
            ..AuthConfig::default()
        })
    }

    #[test]
    fn sql_only_identity_is_scoped_to_sql_query() {
        let authz = authz(true);
        let principal = authz.resolve(Some("analyst-key"));
        assert!(matches!(&principal, Principal::Identified(identity) if identity.name == "analyst"));
        assert!(!authz.authorize(&principal, "filesystem", "read").allowed);
        for action in ["select", "explain", "-"] {
            assert!(authz.authorize(&principal, "sql_query", action).allowed);
        }
    }

    #[test]
    fn wildcard_tools_with_action_restrictions() {
        let authz = authz(true);
        let principal = authz.resolve(Some("ops-key"));
        assert!(authz.authorize(&principal, "anything", "whatever").allowed);
        assert!(authz.authorize(&principal, "filesystem", "read").allowed);
        let denied = authz.authorize(&principal, "filesystem", "write");
        assert!(!denied.allowed);
        assert!(denied.reason.unwrap_or_default().contains("action write"));
    }

    #[test]
    fn anonymous_allowed_only_without_required_auth() {
        let open = authz(false);
        assert_eq!(open.resolve(None), Principal::Anonymous);
        assert!(open.authorize(&Principal::Anonymous, "sql_query", "-").allowed);

        let closed = authz(true);
        let principal = closed.resolve(None);
        assert!(matches!(principal, Principal::Rejected(_)));
        assert!(!closed.authorize(&principal, "sql_query", "-").allowed);
        assert!(!closed.authorize(&Principal::Anonymous, "sql_query", "-").allowed);
    }

    #[test]
    fn unknown_credential_is_rejected_even_when_optional() {
        let open = authz(false);
        let principal = open.resolve(Some("nope"));
        let decision = open.authorize(&principal, "sql_query", "-");
        assert!(!decision.allowed);
        assert_eq!(decision.reason.as_deref(), Some("unauthenticated: invalid credential"));
    }
}
