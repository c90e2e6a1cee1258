//! Config loading and validation tests for toolhost-config.
// crates/toolhost-config/tests/config_validation.rs
// =============================================================================
// Module: Config Validation Tests
// Description: Validate defaults, limits, and file loading behavior.
// Purpose: Ensure toolhost.toml fails closed on invalid input.
// =============================================================================

use std::fs;

use toolhost_config::ConfigError;
use toolhost_config::LogLevel;
use toolhost_config::ToolhostConfig;

mod common;

use common::TestResult;
use common::assert_invalid;

#[test]
fn default_config_validates() -> TestResult {
    let config = common::minimal_config().map_err(|err| err.to_string())?;
    config.validate().map_err(|err| err.to_string())?;
    if !config.audit.enabled || config.plugins.enabled {
        return Err("audit should default on and plugins off".to_string());
    }
    Ok(())
}

#[test]
fn require_auth_needs_identities() -> TestResult {
    assert_invalid(
        ToolhostConfig::from_toml_str("[auth]\nrequire_auth = true\n"),
        "requires at least one identity",
    )
}

#[test]
fn duplicate_credentials_rejected() -> TestResult {
    assert_invalid(
        ToolhostConfig::from_toml_str(
            r#"
            [[auth.identities]]
            name = "a"
            credential = "same"
            allowed_tools = ["*"]

            [[auth.identities]]
            name = "b"
            credential = "same"
            allowed_tools = ["*"]
            "#,
        ),
        "not unique",
    )
}

#[test]
fn identity_actions_parse() -> TestResult {
    let config = ToolhostConfig::from_toml_str(
        r#"
        [auth]
        require_auth = true

        [[auth.identities]]
        name = "analyst"
        credential = "k-1"
        allowed_tools = ["sql_query"]

        [auth.identities.allowed_actions]
        sql_query = ["select", "explain"]
        "#,
    )
    .map_err(|err| err.to_string())?;
    let identity = config.auth.identities.first().ok_or("missing identity")?;
    let actions = identity.allowed_actions.get("sql_query").ok_or("missing actions")?;
    if actions != &["select".to_string(), "explain".to_string()] {
        return Err(format!("unexpected actions {actions:?}"));
    }
    Ok(())
}

#[test]
fn unknown_fields_rejected() -> TestResult {
    match ToolhostConfig::from_toml_str("[cache]\ncapacityy = 3\n") {
        Err(ConfigError::Parse(_)) => Ok(()),
        other => Err(format!("expected parse error, got {other:?}")),
    }
}

#[test]
fn limits_enforced() -> TestResult {
    assert_invalid(ToolhostConfig::from_toml_str("[cache]\ncapacity = 100000\n"), "cache.capacity")?;
    assert_invalid(
        ToolhostConfig::from_toml_str("[rate_limits.per_tool]\nx = 200000\n"),
        "rate_limits.per_tool.x",
    )?;
    assert_invalid(
        ToolhostConfig::from_toml_str("[audit]\nretention_days = 0\n"),
        "audit.retention_days",
    )?;
    assert_invalid(
        ToolhostConfig::from_toml_str("[plugins]\nstartup_timeout_ms = 5\n"),
        "plugins.startup_timeout_ms",
    )?;
    assert_invalid(
        ToolhostConfig::from_toml_str("[server]\nmax_message_bytes = 0\n"),
        "server.max_message_bytes",
    )
}

#[test]
fn plugin_settings_must_be_tables() -> TestResult {
    assert_invalid(
        ToolhostConfig::from_toml_str("[plugins.settings]\necho = 3\n"),
        "plugins.settings.echo",
    )?;
    let config = ToolhostConfig::from_toml_str(
        "[plugins.settings.echo]\nprefix = \">\"\n",
    )
    .map_err(|err| err.to_string())?;
    let scoped = config.plugins.settings_for("echo");
    if scoped.get("prefix").and_then(|value| value.as_str()) != Some(">") {
        return Err(format!("unexpected scoped settings {scoped}"));
    }
    if config.plugins.settings_for("missing").as_object().is_none_or(|map| !map.is_empty()) {
        return Err("missing plugin settings should be an empty object".to_string());
    }
    Ok(())
}

#[test]
fn client_level_parses_lowercase() -> TestResult {
    let config = ToolhostConfig::from_toml_str("[logging]\nclient_level = \"warning\"\n")
        .map_err(|err| err.to_string())?;
    if config.logging.client_level != Some(LogLevel::Warning) {
        return Err("client_level should be warning".to_string());
    }
    Ok(())
}

#[test]
fn load_reads_explicit_path() -> TestResult {
    let dir = tempfile::tempdir().map_err(|err| err.to_string())?;
    let path = dir.path().join("toolhost.toml");
    fs::write(&path, "[server]\nname = \"local-host\"\n").map_err(|err| err.to_string())?;
    let config = ToolhostConfig::load(Some(&path)).map_err(|err| err.to_string())?;
    if config.server.name != "local-host" {
        return Err("server name not loaded".to_string());
    }
    Ok(())
}

#[test]
fn load_rejects_oversized_file() -> TestResult {
    let dir = tempfile::tempdir().map_err(|err| err.to_string())?;
    let path = dir.path().join("big.toml");
    let padding = format!("# {}\n", "x".repeat(1024 * 1024));
    fs::write(&path, padding).map_err(|err| err.to_string())?;
    assert_invalid(ToolhostConfig::load(Some(&path)), "size limit")
}

#[test]
fn load_missing_file_is_io_error() -> TestResult {
    let dir = tempfile::tempdir().map_err(|err| err.to_string())?;
    match ToolhostConfig::load(Some(&dir.path().join("absent.toml"))) {
        Err(ConfigError::Io(_)) => Ok(()),
        other => Err(format!("expected io error, got {other:?}")),
    }
}
