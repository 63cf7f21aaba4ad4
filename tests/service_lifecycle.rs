//! Supervisor lifecycle against real child processes.

mod common;

use mcp_bridge::{McpError, McpService, ProcessState, ServerConfig};
use serde_json::json;
use std::time::Duration;

/// Shell server that answers by request sequence number: the handshake
/// first, then a tool listing, then content-block tool results. It also
/// writes a spurious non-JSON line onto the protocol stream before the
/// tool listing, which the framer must skip.
const SCRIPTED_SERVER: &str = r#"#!/bin/sh
printf 'scripted server booting\n' >&2
n=0
while IFS= read -r line; do
  case "$line" in
    *'"method":"notifications/'*) continue ;;
  esac
  n=$((n+1))
  case "$n" in
    1) printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{},"serverInfo":{"name":"scripted-server","version":"1.0.0"}}}' ;;
    2) printf 'log: spurious diagnostic line\n'
       printf '%s\n' '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"echo_payload","description":"Echo a payload back"}]}}' ;;
    *) printf '%s\n' '{"jsonrpc":"2.0","id":'"$n"',"result":{"content":[{"type":"text","text":"{\"x\":1}"}]}}' ;;
  esac
done
"#;

fn fast_config(command: &str) -> ServerConfig {
    ServerConfig::new(command)
        .with_warmup(Duration::from_millis(100))
        .with_init_timeout(Duration::from_millis(500))
        .with_init_attempts(2)
        .with_init_backoff(Duration::from_millis(50))
        .with_stop_grace(Duration::from_secs(2))
}

#[tokio::test]
async fn start_fails_fast_on_missing_executable() {
    let service = McpService::new(fast_config("/nonexistent/bin/mcp-server"));

    let err = service.start().await.unwrap_err();
    assert!(matches!(err, McpError::Startup(_)));
    assert!(err.to_string().contains("/nonexistent/bin/mcp-server"));
    assert_eq!(service.state(), ProcessState::Stopped);
}

#[tokio::test]
async fn start_fails_fast_on_missing_credential_file() {
    let config =
        fast_config("/bin/cat").with_credential_file("accounts-file", "/nonexistent/accounts.json");
    let service = McpService::new(config);

    let err = service.start().await.unwrap_err();
    assert!(matches!(err, McpError::Startup(_)));
    assert!(err.to_string().contains("accounts.json"));
}

#[tokio::test]
async fn start_reports_stderr_of_a_process_that_dies_immediately() {
    common::init_tracing();
    let config = fast_config("/bin/sh").with_args(["-c", "echo 'fatal: no credentials' >&2; exit 1"]);
    let service = McpService::new(config);

    let err = service.start().await.unwrap_err();
    match err {
        McpError::Startup(message) => {
            assert!(message.contains("fatal: no credentials"), "got: {message}");
        }
        other => panic!("expected startup error, got {:?}", other),
    }
}

#[tokio::test]
async fn start_times_out_against_an_unresponsive_process() {
    // `cat` echoes our own requests back and never produces a response,
    // so every handshake attempt must end in a timeout.
    let service = McpService::new(fast_config("/bin/cat"));

    let err = service.start().await.unwrap_err();
    assert!(err.is_timeout(), "got: {err:?}");
    assert_eq!(service.state(), ProcessState::Crashed);

    service.stop().await;
    assert_eq!(service.state(), ProcessState::Stopped);
}

#[tokio::test]
async fn full_lifecycle_against_a_scripted_server() {
    common::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("server.sh");
    std::fs::write(&script, SCRIPTED_SERVER).unwrap();

    let config = fast_config("/bin/sh")
        .with_arg(script.display().to_string())
        .with_working_dir(dir.path());
    let service = McpService::new(config);

    service.start().await.unwrap();
    assert_eq!(service.state(), ProcessState::Running);
    assert!(service.is_running());

    // Startup primed the cache from the server's advertised listing, in
    // spite of the garbage line preceding it on the stream.
    let tools = service.cached_tools().await;
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "echo_payload");

    let outcome = service.call_tool("echo_payload", json!({"x": 1})).await;
    assert!(outcome.is_success(), "got: {outcome:?}");
    assert_eq!(outcome.payload().unwrap()["x"], 1);

    // Starting again while running is a no-op.
    service.start().await.unwrap();
    assert_eq!(service.state(), ProcessState::Running);

    service.stop().await;
    assert_eq!(service.state(), ProcessState::Stopped);

    // And stopping again stays a no-op.
    service.stop().await;
    assert_eq!(service.state(), ProcessState::Stopped);
}

#[tokio::test]
async fn stop_before_start_is_a_no_op() {
    let service = McpService::new(fast_config("/bin/cat"));
    service.stop().await;
    assert_eq!(service.state(), ProcessState::Stopped);
}

#[tokio::test]
async fn facade_is_non_fatal_while_stopped() {
    let service = McpService::new(fast_config("/bin/cat"));

    assert!(service.list_tools().await.is_empty());

    let outcome = service.call_tool("anything", json!({})).await;
    assert!(!outcome.is_success());

    assert!(service.ping().await.is_err());
}
