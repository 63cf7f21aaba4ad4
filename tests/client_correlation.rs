//! Correlation behavior under concurrency, reordering and failure.

mod common;

use common::scripted_transport;
use mcp_bridge::{
    CallOutcome, ClientOptions, JsonRpcMessage, JsonRpcResponse, McpClient, McpError,
    NotificationHandler,
};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn client_with_timeout(
    transport: Arc<dyn mcp_bridge::McpTransport>,
    request_timeout: Duration,
) -> Arc<McpClient> {
    Arc::new(McpClient::with_options(
        transport,
        ClientOptions {
            request_timeout,
            ..ClientOptions::default()
        },
    ))
}

/// Responses delivered in reverse order still reach the callers that
/// issued the matching requests.
#[tokio::test]
async fn concurrent_calls_resolve_by_id_not_order() {
    common::init_tracing();
    let (transport, mut script) = scripted_transport();
    let client = client_with_timeout(transport, Duration::from_secs(5));

    let mut callers = Vec::new();
    for k in 0..5i64 {
        let client = Arc::clone(&client);
        callers.push(tokio::spawn(async move {
            let result = client
                .call("echo", Some(json!({ "k": k })))
                .await
                .expect("call failed");
            (k, result)
        }));
    }

    // Collect all five requests, then answer them newest-first, echoing
    // each request's params back as its result.
    let mut requests = Vec::new();
    for _ in 0..5 {
        requests.push(script.sent_request().await);
    }
    for request in requests.into_iter().rev() {
        let params = request.params.clone().unwrap_or(Value::Null);
        script.push(JsonRpcMessage::Response(JsonRpcResponse::success(
            request.id, params,
        )));
    }

    for caller in callers {
        let (k, result) = caller.await.expect("caller panicked");
        assert_eq!(result["k"], k, "caller received someone else's result");
    }

    client.close().await;
}

/// A response with an unknown id is discarded and leaves other pending
/// calls untouched.
#[tokio::test]
async fn unknown_id_is_discarded() {
    let (transport, mut script) = scripted_transport();
    let client = client_with_timeout(transport, Duration::from_secs(5));

    let pending = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.call("echo", Some(json!({"real": true}))).await })
    };

    let request = script.sent_request().await;

    script.push(JsonRpcMessage::Response(JsonRpcResponse::success(
        9999i64,
        json!({"stray": true}),
    )));
    script.push(JsonRpcMessage::Response(JsonRpcResponse::success(
        request.id,
        json!({"real": true}),
    )));

    let result = pending.await.unwrap().unwrap();
    assert_eq!(result["real"], true);

    client.close().await;
}

/// A call with no response resolves with a timeout exactly once, a late
/// response for it is dropped, and the id is never handed out again.
#[tokio::test(start_paused = true)]
async fn timeout_resolves_once_and_late_response_is_dropped() {
    let (transport, mut script) = scripted_transport();
    let client = client_with_timeout(transport, Duration::from_secs(1));

    let first = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.call("slow", None).await })
    };

    let first_request = script.sent_request().await;
    let err = first.await.unwrap().unwrap_err();
    assert!(matches!(err, McpError::Timeout { seconds: 1 }));

    // The stale response arrives after the deadline; it must vanish.
    script.push(JsonRpcMessage::Response(JsonRpcResponse::success(
        first_request.id.clone(),
        json!({"stale": true}),
    )));

    let second = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.call("fast", None).await })
    };

    let second_request = script.sent_request().await;
    assert_ne!(
        second_request.id, first_request.id,
        "ids must never be reused, even after a timeout"
    );
    script.push(JsonRpcMessage::Response(JsonRpcResponse::success(
        second_request.id,
        json!({"fresh": true}),
    )));

    let result = second.await.unwrap().unwrap();
    assert_eq!(result["fresh"], true);

    client.close().await;
}

/// Closing the client resolves every pending call with a terminal error.
#[tokio::test]
async fn close_drains_pending_calls() {
    let (transport, mut script) = scripted_transport();
    let client = client_with_timeout(transport, Duration::from_secs(60));

    let mut callers = Vec::new();
    for _ in 0..3 {
        let client = Arc::clone(&client);
        callers.push(tokio::spawn(async move { client.call("hang", None).await }));
    }
    for _ in 0..3 {
        script.sent_request().await;
    }

    client.close().await;

    for caller in callers {
        let err = caller.await.unwrap().unwrap_err();
        assert!(matches!(err, McpError::Cancelled));
    }
}

/// A transport failure fails every pending call instead of hanging it.
#[tokio::test]
async fn transport_failure_fails_pending_calls() {
    let (transport, mut script) = scripted_transport();
    let client = client_with_timeout(transport, Duration::from_secs(60));

    let pending = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.call("doomed", None).await })
    };
    script.sent_request().await;

    script.fail(McpError::transport("pipe broke"));

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, McpError::Transport(_)));

    client.close().await;
    assert!(!client.is_connected());
}

/// Full handshake then an echo tool call, with the result normalized
/// through the facade contract.
#[tokio::test]
async fn initialize_then_echo_tool_call() {
    let (transport, mut script) = scripted_transport();
    let client = client_with_timeout(transport, Duration::from_secs(5));

    let init = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.initialize().await })
    };

    let request = script.sent_request().await;
    assert_eq!(request.method, "initialize");
    let params = request.params.clone().unwrap();
    assert_eq!(params["protocolVersion"], "2024-11-05");
    assert_eq!(params["clientInfo"]["name"], "mcp-bridge");

    script.push(JsonRpcMessage::Response(JsonRpcResponse::success(
        request.id,
        json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "serverInfo": {"name": "echo-server", "version": "1.2.3"},
        }),
    )));

    let result = init.await.unwrap().unwrap();
    assert_eq!(result.server_info.unwrap().name, "echo-server");

    // The fire-and-forget completion notification follows the call.
    match script.sent().await {
        JsonRpcMessage::Notification(note) => {
            assert_eq!(note.method, "notifications/initialized");
        }
        other => panic!("expected initialized notification, got {:?}", other),
    }

    let call = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.call_tool("echo", json!({"x": 1})).await })
    };

    let request = script.sent_request().await;
    assert_eq!(request.method, "tools/call");
    assert_eq!(request.params.as_ref().unwrap()["name"], "echo");
    script.push(JsonRpcMessage::Response(JsonRpcResponse::success(
        request.id,
        json!({"x": 1}),
    )));

    let raw = call.await.unwrap().unwrap();
    let outcome = CallOutcome::from_result(raw);
    assert!(outcome.is_success());
    assert_eq!(outcome.payload().unwrap()["x"], 1);

    client.close().await;
}

/// Notifications from the server reach the configured sink.
#[tokio::test]
async fn notifications_reach_the_sink() {
    struct Recorder(Mutex<Vec<String>>);

    impl NotificationHandler for Recorder {
        fn handle(&self, method: &str, _params: Option<Value>) {
            self.0.lock().unwrap().push(method.to_string());
        }
    }

    let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
    let (transport, script) = scripted_transport();
    let client = Arc::new(McpClient::with_options(
        transport,
        ClientOptions {
            notifications: Arc::clone(&recorder) as Arc<dyn NotificationHandler>,
            ..ClientOptions::default()
        },
    ));

    script.push(JsonRpcMessage::Notification(
        mcp_bridge::JsonRpcNotification::new("notifications/progress")
            .with_params(json!({"progress": 40})),
    ));

    // The reader loop delivers asynchronously; poll briefly.
    let mut seen = Vec::new();
    for _ in 0..100 {
        seen = recorder.0.lock().unwrap().clone();
        if !seen.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(seen, vec!["notifications/progress"]);

    client.close().await;
}
