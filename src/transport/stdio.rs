//! Stdio transport
//!
//! Spawns the server process and frames messages over its stdin/stdout.
//! Stderr is never parsed as protocol traffic; it is forwarded to the log
//! and a short tail is retained for startup diagnostics.

use super::{McpTransport, read_message, write_message};
use crate::config::ServerConfig;
use crate::error::McpError;
use crate::protocol::JsonRpcMessage;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::Mutex as StdMutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Lines of stderr kept for diagnostics
const STDERR_TAIL_LINES: usize = 32;

#[derive(Debug)]
struct ReadHalf {
    reader: BufReader<ChildStdout>,
    buf: String,
}

/// Transport over a spawned server process's stdin/stdout.
#[derive(Debug)]
pub struct StdioTransport {
    /// Child process handle
    child: Mutex<Option<Child>>,
    /// Write half; the lock serializes concurrent writers
    stdin: Mutex<Option<ChildStdin>>,
    /// Read half; only the reader loop takes this lock
    stdout: Mutex<Option<ReadHalf>>,
    /// Most recent stderr lines
    stderr_tail: Arc<StdMutex<VecDeque<String>>>,
    /// Whether the stream is still believed usable
    connected: AtomicBool,
    /// How long `close` waits before killing the child
    stop_grace: Duration,
}

impl StdioTransport {
    /// Spawn the server process described by `config`.
    ///
    /// Fails with a startup error if the executable cannot be spawned. The
    /// warm-up pause and preflight checks belong to the supervisor; this
    /// only creates the process and wires its streams.
    pub fn spawn(config: &ServerConfig) -> Result<Self, McpError> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(dir) = &config.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &config.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|e| {
            McpError::startup(format!(
                "failed to spawn '{}': {}",
                config.command.display(),
                e
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::startup("failed to open child stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::startup("failed to open child stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| McpError::startup("failed to open child stderr"))?;

        let stderr_tail = Arc::new(StdMutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
        let tail = Arc::clone(&stderr_tail);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(target: "mcp_bridge::server_stderr", "{}", line);
                if let Ok(mut tail) = tail.lock() {
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
            }
        });

        Ok(Self {
            child: Mutex::new(Some(child)),
            stdin: Mutex::new(Some(stdin)),
            stdout: Mutex::new(Some(ReadHalf {
                reader: BufReader::new(stdout),
                buf: String::new(),
            })),
            stderr_tail,
            connected: AtomicBool::new(true),
            stop_grace: config.stop_grace,
        })
    }

    /// Exit status if the child has already terminated.
    pub async fn exit_status(&self) -> Option<std::process::ExitStatus> {
        let mut child = self.child.lock().await;
        child.as_mut().and_then(|c| c.try_wait().ok().flatten())
    }

    /// Recent stderr output, oldest line first.
    pub fn stderr_tail(&self) -> Vec<String> {
        self.stderr_tail
            .lock()
            .map(|tail| tail.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn send(&self, message: JsonRpcMessage) -> Result<(), McpError> {
        let mut stdin = self.stdin.lock().await;
        let stdin = stdin
            .as_mut()
            .ok_or_else(|| McpError::transport("stdin closed"))?;

        match write_message(stdin, &message).await {
            Ok(()) => Ok(()),
            Err(err) => {
                if matches!(err, McpError::Transport(_)) {
                    self.connected.store(false, Ordering::SeqCst);
                }
                Err(err)
            }
        }
    }

    async fn receive(&self) -> Result<JsonRpcMessage, McpError> {
        let mut stdout = self.stdout.lock().await;
        let half = stdout
            .as_mut()
            .ok_or_else(|| McpError::transport("stdout closed"))?;

        match read_message(&mut half.reader, &mut half.buf).await {
            Ok(message) => Ok(message),
            Err(err) => {
                self.connected.store(false, Ordering::SeqCst);
                Err(err)
            }
        }
    }

    async fn close(&self) -> Result<(), McpError> {
        self.connected.store(false, Ordering::SeqCst);

        // Dropping stdin delivers EOF, the polite termination request.
        self.stdin.lock().await.take();

        if let Some(mut child) = self.child.lock().await.take() {
            tokio::select! {
                result = child.wait() => {
                    let status = result.map_err(|e| McpError::transport(e.to_string()))?;
                    debug!(%status, "server process exited");
                }
                _ = tokio::time::sleep(self.stop_grace) => {
                    warn!(grace = ?self.stop_grace, "server process ignored EOF, killing it");
                    child.kill().await.ok();
                }
            }
        }

        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        // Best-effort cleanup when close() was never reached.
        if let Ok(mut guard) = self.child.try_lock() {
            if let Some(child) = guard.as_mut() {
                let _ = child.start_kill();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_spawn_missing_executable_is_startup_error() {
        let config = ServerConfig::new("/nonexistent/definitely-not-a-server");
        let err = StdioTransport::spawn(&config).unwrap_err();
        assert!(matches!(err, McpError::Startup(_)));
    }

    #[tokio::test]
    async fn test_eof_after_child_exit_is_transport_error() {
        // `true` exits immediately without writing anything to stdout.
        let config = ServerConfig::new("/bin/true").with_stop_grace(Duration::from_millis(200));
        let transport = StdioTransport::spawn(&config).unwrap();

        let err = transport.receive().await.unwrap_err();
        assert!(matches!(err, McpError::Transport(_)));
        assert!(!transport.is_connected());

        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_waits_for_voluntary_exit() {
        // `cat` exits on stdin EOF, well inside the grace period.
        let config = ServerConfig::new("/bin/cat").with_stop_grace(Duration::from_secs(2));
        let transport = StdioTransport::spawn(&config).unwrap();
        assert!(transport.is_connected());

        transport.close().await.unwrap();
        assert!(!transport.is_connected());
    }
}
