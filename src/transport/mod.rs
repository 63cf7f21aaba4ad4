//! Transport layer
//!
//! Frames JSON-RPC messages as newline-delimited JSON over a byte stream.
//! The only production transport is [`stdio::StdioTransport`], which owns a
//! spawned server process; tests substitute scripted implementations of
//! [`McpTransport`].

pub mod stdio;

pub use stdio::StdioTransport;

use crate::error::McpError;
use crate::protocol::JsonRpcMessage;
use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Duplex message channel to one server process.
///
/// `send` may be called from any task; implementations serialize writers so
/// frames never interleave. `receive` is only ever called by the single
/// reader loop.
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Write one message as a single newline-terminated frame and flush.
    async fn send(&self, message: JsonRpcMessage) -> Result<(), McpError>;

    /// Return the next decoded message from the stream.
    async fn receive(&self) -> Result<JsonRpcMessage, McpError>;

    /// Tear the channel down, releasing whatever backs it.
    async fn close(&self) -> Result<(), McpError>;

    /// Whether the channel is still believed usable.
    fn is_connected(&self) -> bool;
}

/// Serialize `message` followed by a newline and flush.
///
/// The frame is written with a single `write_all` so a peer reading lines
/// never sees a partial document, provided callers hold the write lock.
pub(crate) async fn write_message<W>(
    writer: &mut W,
    message: &JsonRpcMessage,
) -> Result<(), McpError>
where
    W: AsyncWrite + Unpin,
{
    let mut frame = serde_json::to_vec(message)?;
    frame.push(b'\n');
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read lines until one decodes as a JSON-RPC message.
///
/// Empty and non-JSON lines are logged and skipped; the server may leak
/// diagnostics onto the protocol stream and that must not kill it. End of
/// stream surfaces as a transport error.
///
/// Cancellation-safe: `buf` is cleared only after a full line has been
/// consumed, so a caller dropped mid-read resumes the same line on the next
/// call instead of corrupting it.
pub(crate) async fn read_message<R>(
    reader: &mut R,
    buf: &mut String,
) -> Result<JsonRpcMessage, McpError>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let bytes_read = reader.read_line(buf).await?;
        if bytes_read == 0 {
            return Err(McpError::transport("stream closed"));
        }

        let decoded = {
            let line = buf.trim();
            if line.is_empty() {
                None
            } else {
                match serde_json::from_str::<JsonRpcMessage>(line) {
                    Ok(message) => Some(message),
                    Err(err) => {
                        let sample: String = line.chars().take(200).collect();
                        debug!(error = %err, line = %sample, "skipping non-JSON line on protocol stream");
                        None
                    }
                }
            }
        };

        buf.clear();
        if let Some(message) = decoded {
            return Ok(message);
        }
    }
}
