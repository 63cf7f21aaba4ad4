//! Reader loop and request correlation
//!
//! A single loop owns the id-to-completion-handle map. Callers talk to it
//! through a command channel, so the map needs no lock and exactly one
//! consumer ever reads the transport.

use super::notification::NotificationHandler;
use crate::error::McpError;
use crate::protocol::{JsonRpcMessage, JsonRpcResponse};
use crate::service::StateHandle;
use crate::transport::McpTransport;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

/// Completion handle a suspended caller waits on.
pub(super) type ResponseSender = oneshot::Sender<Result<JsonRpcResponse, McpError>>;

/// Commands from callers to the reader loop.
pub(super) enum ReaderCommand {
    /// Track a pending call; sent before its request is written
    Register { id: String, sender: ResponseSender },
    /// Forget a pending call whose deadline expired, so that a late
    /// response is discarded as unknown instead of resolving anything
    Unregister { id: String },
    /// Drain every pending call with a terminal error and stop
    Shutdown,
}

/// Run the reader loop until the stream closes or a shutdown arrives.
///
/// Responses resolve the matching pending call; responses with an unknown
/// id are discarded; notifications go to the sink. When the transport
/// fails, every pending call resolves with a transport error and the
/// lifecycle state is marked crashed unless a stop is already in flight.
pub(super) async fn reader_loop(
    transport: Arc<dyn McpTransport>,
    mut commands: mpsc::Receiver<ReaderCommand>,
    running: Arc<AtomicBool>,
    state: StateHandle,
    notifications: Arc<dyn NotificationHandler>,
) {
    let mut pending: HashMap<String, ResponseSender> = HashMap::new();

    // Exits only through the shutdown command or a transport failure, so
    // every pending call is guaranteed a pass through drain().
    loop {
        tokio::select! {
            cmd = commands.recv() => {
                match cmd {
                    Some(ReaderCommand::Register { id, sender }) => {
                        pending.insert(id, sender);
                    }
                    Some(ReaderCommand::Unregister { id }) => {
                        pending.remove(&id);
                    }
                    Some(ReaderCommand::Shutdown) | None => {
                        debug!("reader loop shutting down");
                        drain(&mut pending, || McpError::Cancelled);
                        break;
                    }
                }
            }
            received = transport.receive() => {
                match received {
                    Ok(JsonRpcMessage::Response(response)) => {
                        let id = response.id.to_string();
                        match pending.remove(&id) {
                            Some(sender) => {
                                if sender.send(Ok(response)).is_err() {
                                    warn!(%id, "caller went away before its response arrived");
                                }
                            }
                            None => {
                                warn!(%id, "discarding response for unknown request id");
                            }
                        }
                    }
                    Ok(JsonRpcMessage::Notification(notification)) => {
                        notifications.handle(&notification.method, notification.params);
                    }
                    Ok(JsonRpcMessage::Request(request)) => {
                        warn!(method = %request.method, "ignoring server-initiated request");
                    }
                    Err(err) => {
                        if running.load(Ordering::SeqCst) {
                            error!(error = %err, "protocol stream failed");
                        }
                        state.mark_crashed_unless_stopping();
                        drain(&mut pending, || {
                            McpError::transport(format!("transport closed: {}", err))
                        });
                        break;
                    }
                }
            }
        }
    }

    running.store(false, Ordering::SeqCst);
}

/// Resolve every pending call with a terminal error; none may leak.
fn drain(pending: &mut HashMap<String, ResponseSender>, terminal: impl Fn() -> McpError) {
    for (id, sender) in pending.drain() {
        debug!(%id, "resolving pending call with terminal error");
        let _ = sender.send(Err(terminal()));
    }
}
