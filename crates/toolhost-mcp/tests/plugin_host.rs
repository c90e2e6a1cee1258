// crates/toolhost-mcp/tests/plugin_host.rs
// ============================================================================
// Module: Plugin Host Tests
// Description: Config-driven assembly with real plugin processes.
// Purpose: Validate registry merge order, name collisions, and proxying.
// Dependencies: toolhost-mcp, toolhost-config, tempfile, tokio
// ============================================================================

//! ## Overview
//! Builds servers through [`McpServer::from_config`] with a plugin directory
//! holding shell-script plugins, then drives them through the engine.

#![cfg(unix)]
#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only assertions are permitted."
)]

mod common;

use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use common::TestClient;
use common::result_text;
use serde_json::json;
use toolhost_config::ToolhostConfig;
use toolhost_mcp::McpServer;
use toolhost_mcp::ServerError;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

/// Plugin listing `echo` and a colliding `host_info`, answering calls.
const ECHO_PLUGIN: &str = r#"#!/bin/sh
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/^{"jsonrpc":"2.0","id":\([0-9]*\),.*/\1/p')
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2025-06-18","capabilities":{},"serverInfo":{"name":"echo","version":"1"}}}\n' "$id" ;;
    *'"method":"tools/list"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"echo","inputSchema":{"type":"object"}},{"name":"host_info","inputSchema":{"type":"object"}}]}}\n' "$id" ;;
    *'"method":"tools/call"'*)
      token=$(printf '%s\n' "$line" | sed -n 's/.*"progressToken":"\([^"]*\)".*/\1/p')
      printf '{"jsonrpc":"2.0","method":"notifications/message","params":{"level":"info","data":"working"}}\n'
      printf '{"jsonrpc":"2.0","method":"notifications/progress","params":{"progressToken":"%s","progress":1}}\n' "$token"
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"from plugin"}]}}\n' "$id" ;;
  esac
done
"#;

fn write_executable(dir: &Path, name: &str, contents: &[u8]) {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

fn config_with_plugins(plugin_dir: &Path) -> ToolhostConfig {
    ToolhostConfig::from_toml_str(&format!(
        r#"
[audit]
enabled = false

[plugins]
enabled = true
directory = "{}"
startup_timeout_ms = 5000
"#,
        plugin_dir.display()
    ))
    .unwrap()
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[tokio::test]
async fn plugin_tools_follow_builtins_and_lose_collisions() {
    let dir = tempfile::tempdir().unwrap();
    write_executable(dir.path(), "corrupt", b"\x7fELF\x02\x01\x01not really");
    write_executable(dir.path(), "echo", ECHO_PLUGIN.as_bytes());
    let server = McpServer::from_config(&config_with_plugins(dir.path()), None).await.unwrap();

    let names: Vec<String> = server.tools().into_iter().map(|tool| tool.name).collect();
    assert_eq!(names, vec!["host_info", "echo"]);

    let mut client = TestClient::start(server);
    client.handshake().await;
    let info = client.call_tool(1, "host_info", json!({})).await;
    let payload: serde_json::Value = serde_json::from_str(&result_text(&info)).unwrap();
    assert_eq!(payload["name"], "toolhost");

    let response = client
        .request(
            2,
            "tools/call",
            json!({"name": "echo", "arguments": {"x": 1}, "_meta": {"progressToken": 42}}),
        )
        .await;
    assert_eq!(result_text(&response), "from plugin");
    assert_eq!(response["result"]["isError"], false);
    let progress: Vec<_> = client
        .notifications
        .iter()
        .filter(|message| message["method"] == "notifications/progress")
        .collect();
    assert_eq!(progress.len(), 1);
    assert_eq!(progress[0]["params"]["progressToken"], 42);
    client.finish().await;
}

#[tokio::test]
async fn missing_plugin_directory_leaves_builtins() {
    let dir = tempfile::tempdir().unwrap();
    let server =
        McpServer::from_config(&config_with_plugins(&dir.path().join("absent")), None).await.unwrap();
    let names: Vec<String> = server.tools().into_iter().map(|tool| tool.name).collect();
    assert_eq!(names, vec!["host_info"]);
}

#[tokio::test]
async fn invalid_config_is_rejected_at_startup() {
    let mut config = ToolhostConfig::default();
    config.server.max_message_bytes = 0;
    let result = McpServer::from_config(&config, None).await;
    assert!(matches!(result, Err(ServerError::Config(_))));
}

#[tokio::test]
async fn audit_directory_is_created_when_enabled() {
    let dir = tempfile::tempdir().unwrap();
    let audit_dir = dir.path().join("nested").join("audit");
    let config = ToolhostConfig::from_toml_str(&format!(
        "[audit]\nenabled = true\ndirectory = \"{}\"\n",
        audit_dir.display()
    ))
    .unwrap();
    let server = McpServer::from_config(&config, None).await.unwrap();
    assert!(audit_dir.is_dir());

    let mut client = TestClient::start(server);
    client.handshake().await;
    client.call_tool(1, "host_info", json!({"token": "hidden"})).await;
    client.finish().await;

    let entries: Vec<_> = std::fs::read_dir(&audit_dir).unwrap().collect();
    assert_eq!(entries.len(), 1);
    let contents = std::fs::read_to_string(entries[0].as_ref().unwrap().path()).unwrap();
    assert!(contents.contains("[REDACTED]"));
    assert!(!contents.contains("hidden"));
}
