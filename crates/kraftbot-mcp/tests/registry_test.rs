//! Integration tests for the MCP registry against a real stdio server.
//!
//! The server is a small POSIX shell loop, so these tests only need `sh`
//! and `sed`. They skip themselves when a shell is not available.

use kraftbot_core::ToolCall;
use kraftbot_mcp::{McpError, McpManager, TransportError};
use serde_json::json;

const SHELL_SERVER: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"sh-server"}}}\n' "$id" ;;
    *'"method":"tools/list"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"greet","description":"Say hello","inputSchema":{"type":"object"}}]}}\n' "$id" ;;
    *'"method":"tools/call"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"hello from sh"}]}}\n' "$id" ;;
  esac
done
"#;

fn shell_available() -> bool {
    std::process::Command::new("sh")
        .arg("-c")
        .arg("exit 0")
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[tokio::test]
async fn test_stdio_server_end_to_end() {
    if !shell_available() {
        eprintln!("sh not available, skipping");
        return;
    }

    let mut manager = McpManager::new();
    let name = manager
        .add_stdio_server("sh", ["-c", SHELL_SERVER], Some("sh"), Some("shell"))
        .unwrap();
    assert_eq!(name, "shell");

    let mut toolset = manager.toolset();
    let failures = toolset.discover().await;
    assert!(failures.is_empty(), "discovery failed: {:?}", failures);

    let names: Vec<_> = toolset.definitions().iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, vec!["sh_greet"]);
    assert_eq!(toolset.definitions()[0].description, "Say hello");

    let result = toolset.call(&ToolCall::new("call_1", "sh_greet", json!({}))).await;
    assert!(result.success, "tool call failed: {:?}", result.error);
    assert_eq!(result.output, "hello from sh");

    manager.close_all().await;
}

#[tokio::test]
async fn test_registration_does_not_spawn() {
    let mut manager = McpManager::new();
    manager
        .add_stdio_server("kraftbot-no-such-mcp-server", Vec::<String>::new(), None, None)
        .unwrap();

    // Registration succeeds; the failure surfaces on first use.
    assert_eq!(manager.get_server_names(), vec!["stdio_kraftbot-no-such-mcp-server"]);

    let handle = manager.get_server_by_name("stdio_kraftbot-no-such-mcp-server").unwrap();
    let err = handle.list_tools().await.unwrap_err();
    assert!(matches!(err, McpError::Transport(TransportError::SpawnFailed(_))));
}

#[tokio::test]
async fn test_unreachable_remote_server_is_skipped_in_discovery() {
    let mut manager = McpManager::new();
    manager
        .add_http_server("http://127.0.0.1:9/mcp", None, Some("offline"))
        .unwrap();

    let mut toolset = manager.toolset();
    let failures = toolset.discover().await;

    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].server, "offline");
    assert!(toolset.is_empty());
}
