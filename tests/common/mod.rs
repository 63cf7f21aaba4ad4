//! Shared test support
#![allow(dead_code)]

use async_trait::async_trait;
use mcp_bridge::{JsonRpcMessage, McpError, McpTransport};
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};

/// Transport whose peer is the test itself.
///
/// Frames the client writes surface on [`ScriptHandle::sent`]; the test
/// injects replies (or transport failures) through [`ScriptHandle::push`].
/// Dropping the handle ends the stream.
pub struct ScriptedTransport {
    sent_tx: mpsc::UnboundedSender<JsonRpcMessage>,
    incoming: Mutex<mpsc::UnboundedReceiver<Result<JsonRpcMessage, McpError>>>,
}

/// Test-side end of a [`ScriptedTransport`].
pub struct ScriptHandle {
    sent: mpsc::UnboundedReceiver<JsonRpcMessage>,
    push_tx: mpsc::UnboundedSender<Result<JsonRpcMessage, McpError>>,
}

impl ScriptHandle {
    /// Next frame the client wrote.
    pub async fn sent(&mut self) -> JsonRpcMessage {
        self.sent.recv().await.expect("client side closed")
    }

    /// Next request the client wrote, skipping notifications.
    pub async fn sent_request(&mut self) -> mcp_bridge::JsonRpcRequest {
        loop {
            if let JsonRpcMessage::Request(request) = self.sent().await {
                return request;
            }
        }
    }

    /// Inject a message for the client to receive.
    pub fn push(&self, message: JsonRpcMessage) {
        self.push_tx.send(Ok(message)).expect("reader side closed");
    }

    /// Inject a transport failure.
    pub fn fail(&self, error: McpError) {
        self.push_tx.send(Err(error)).expect("reader side closed");
    }
}

/// Build a scripted transport and its test-side handle.
pub fn scripted_transport() -> (Arc<ScriptedTransport>, ScriptHandle) {
    let (sent_tx, sent) = mpsc::unbounded_channel();
    let (push_tx, incoming) = mpsc::unbounded_channel();
    let transport = Arc::new(ScriptedTransport {
        sent_tx,
        incoming: Mutex::new(incoming),
    });
    (transport, ScriptHandle { sent, push_tx })
}

#[async_trait]
impl McpTransport for ScriptedTransport {
    async fn send(&self, message: JsonRpcMessage) -> Result<(), McpError> {
        self.sent_tx
            .send(message)
            .map_err(|_| McpError::transport("test harness dropped"))
    }

    async fn receive(&self) -> Result<JsonRpcMessage, McpError> {
        match self.incoming.lock().await.recv().await {
            Some(result) => result,
            None => Err(McpError::transport("scripted stream closed")),
        }
    }

    async fn close(&self) -> Result<(), McpError> {
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }
}

/// Route test logs through tracing when RUST_LOG asks for them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
