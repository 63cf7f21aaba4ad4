//! Process supervisor and call facade
//!
//! [`McpService`] owns one server process end to end: preflight checks,
//! spawn, warm-up, handshake with bounded retries, and graceful-then-forced
//! shutdown. It is also the public call surface; results come back under a
//! single normalized contract no matter how the server shapes them.

use crate::client::{ClientOptions, McpClient};
use crate::config::ServerConfig;
use crate::error::McpError;
use crate::outcome::CallOutcome;
use crate::transport::{McpTransport, StdioTransport};
use crate::types::{InitializeResult, ToolDescriptor};
use serde_json::Value;
use std::sync::Mutex as StdMutex;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};

/// Lifecycle of the managed server process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// No process; the initial and final state
    Stopped,
    /// Spawned, handshake not yet complete
    Starting,
    /// Handshake done, calls accepted
    Running,
    /// Deliberate shutdown in flight
    Stopping,
    /// The stream closed without a stop being requested
    Crashed,
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Crashed => "crashed",
        };
        f.write_str(name)
    }
}

/// Shared view of the lifecycle state.
///
/// The supervisor owns every transition; the reader loop holds a clone for
/// one purpose only, recording an unexpected stream end as a crash.
#[derive(Clone)]
pub(crate) struct StateHandle(Arc<StdMutex<ProcessState>>);

impl StateHandle {
    fn new() -> Self {
        Self(Arc::new(StdMutex::new(ProcessState::Stopped)))
    }

    /// A state nobody supervises, for clients constructed standalone.
    pub(crate) fn detached() -> Self {
        Self::new()
    }

    pub(crate) fn get(&self) -> ProcessState {
        self.0.lock().map(|state| *state).unwrap_or(ProcessState::Crashed)
    }

    pub(crate) fn set(&self, next: ProcessState) {
        if let Ok(mut state) = self.0.lock() {
            *state = next;
        }
    }

    /// Record a crash, unless a deliberate stop is already in flight.
    pub(crate) fn mark_crashed_unless_stopping(&self) {
        if let Ok(mut state) = self.0.lock() {
            if !matches!(*state, ProcessState::Stopping | ProcessState::Stopped) {
                *state = ProcessState::Crashed;
            }
        }
    }
}

/// Supervisor for one MCP server process and the facade for calling it.
pub struct McpService {
    config: ServerConfig,
    state: StateHandle,
    /// Serializes start/stop so only one lifecycle change runs at a time
    lifecycle: tokio::sync::Mutex<()>,
    transport: RwLock<Option<Arc<StdioTransport>>>,
    client: RwLock<Option<Arc<McpClient>>>,
    tools_cache: RwLock<Vec<ToolDescriptor>>,
}

impl McpService {
    /// Create a supervisor; nothing is spawned until [`start`](Self::start).
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            state: StateHandle::new(),
            lifecycle: tokio::sync::Mutex::new(()),
            transport: RwLock::new(None),
            client: RwLock::new(None),
            tools_cache: RwLock::new(Vec::new()),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ProcessState {
        self.state.get()
    }

    /// Whether the plane is up and accepting calls.
    pub fn is_running(&self) -> bool {
        self.state.get() == ProcessState::Running
    }

    /// Spawn the server process and bring the plane to `Running`.
    ///
    /// A no-op when already running. Fails fast, before spawning, when the
    /// executable or a required credential file is missing; fails with the
    /// captured stderr tail when the process dies during warm-up.
    #[instrument(skip(self), fields(command = %self.config.command.display()))]
    pub async fn start(&self) -> Result<(), McpError> {
        let _lifecycle = self.lifecycle.lock().await;

        if matches!(
            self.state.get(),
            ProcessState::Running | ProcessState::Starting
        ) {
            debug!("server already running");
            return Ok(());
        }

        self.preflight()?;
        self.state.set(ProcessState::Starting);

        let transport = match StdioTransport::spawn(&self.config) {
            Ok(transport) => Arc::new(transport),
            Err(err) => {
                self.state.set(ProcessState::Stopped);
                return Err(err);
            }
        };

        let options = ClientOptions {
            request_timeout: self.config.request_timeout,
            init_timeout: self.config.init_timeout,
            ..ClientOptions::default()
        };
        let client = Arc::new(McpClient::with_state(
            Arc::clone(&transport) as Arc<dyn McpTransport>,
            options,
            self.state.clone(),
        ));

        *self.transport.write().await = Some(Arc::clone(&transport));
        *self.client.write().await = Some(Arc::clone(&client));

        // Give the server room to come up before the first handshake
        // attempt; production cold starts need noticeably longer than a
        // local run.
        debug!(warmup = ?self.config.warmup, "waiting out server warm-up");
        tokio::time::sleep(self.config.warmup).await;

        if let Some(status) = transport.exit_status().await {
            self.state.set(ProcessState::Crashed);
            client.close().await;
            let tail = transport.stderr_tail().join("\n");
            return Err(McpError::startup(format!(
                "server process exited immediately ({}): {}",
                status, tail
            )));
        }

        match handshake(&client, &self.config).await {
            Ok(result) => {
                self.state.set(ProcessState::Running);
                let server = result
                    .server_info
                    .map(|info| info.name)
                    .unwrap_or_else(|| "unknown".to_string());
                info!(%server, "server started and initialized");
            }
            Err(err) => {
                self.state.set(ProcessState::Crashed);
                client.close().await;
                let _ = transport.close().await;
                return Err(err);
            }
        }

        // Prime the tool cache; advisory, a failure here is not fatal.
        match client.list_tools().await {
            Ok(tools) => {
                let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
                info!(?names, "server tools");
                *self.tools_cache.write().await = tools;
            }
            Err(err) => warn!(error = %err, "could not list tools after startup"),
        }

        Ok(())
    }

    /// Tear the plane down.
    ///
    /// Resolves every pending call with a terminal error, closes the
    /// child's stdin, waits out the grace period and kills the process if
    /// it is still there. A no-op when already stopped or stopping.
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        let _lifecycle = self.lifecycle.lock().await;

        if matches!(
            self.state.get(),
            ProcessState::Stopped | ProcessState::Stopping
        ) {
            debug!("server already stopped");
            return;
        }
        self.state.set(ProcessState::Stopping);

        if let Some(client) = self.client.write().await.take() {
            client.close().await;
        }
        if let Some(transport) = self.transport.write().await.take() {
            if let Err(err) = transport.close().await {
                warn!(error = %err, "error while closing transport");
            }
        }

        self.tools_cache.write().await.clear();
        self.state.set(ProcessState::Stopped);
        info!("server stopped");
    }

    /// List the tools the server advertises.
    ///
    /// Failures are logged and yield an empty list; discovery going wrong
    /// must not take the caller down.
    pub async fn list_tools(&self) -> Vec<ToolDescriptor> {
        let Some(client) = self.client().await else {
            warn!("list_tools called while the server is not running");
            return Vec::new();
        };

        match client.list_tools().await {
            Ok(tools) => {
                *self.tools_cache.write().await = tools.clone();
                tools
            }
            Err(err) => {
                warn!(error = %err, "failed to list tools");
                Vec::new()
            }
        }
    }

    /// The most recently fetched tool list, without a round trip.
    pub async fn cached_tools(&self) -> Vec<ToolDescriptor> {
        self.tools_cache.read().await.clone()
    }

    /// Invoke a tool.
    ///
    /// Always returns a [`CallOutcome`]; timeouts, transport failures and
    /// tool-level errors all come back as a failure outcome rather than
    /// escaping the facade.
    #[instrument(skip(self, arguments), fields(tool = %name))]
    pub async fn call_tool(&self, name: &str, arguments: Value) -> CallOutcome {
        let Some(client) = self.client().await else {
            return CallOutcome::failure(McpError::NotInitialized);
        };

        match client.call_tool(name, arguments).await {
            Ok(result) => CallOutcome::from_result(result),
            Err(err) => CallOutcome::failure(err),
        }
    }

    /// Liveness probe against the running server.
    pub async fn ping(&self) -> Result<(), McpError> {
        match self.client().await {
            Some(client) => client.ping().await,
            None => Err(McpError::NotInitialized),
        }
    }

    async fn client(&self) -> Option<Arc<McpClient>> {
        self.client.read().await.clone()
    }

    /// Check spawn preconditions without side effects.
    fn preflight(&self) -> Result<(), McpError> {
        let command = &self.config.command;
        let has_parent = command
            .parent()
            .is_some_and(|p| !p.as_os_str().is_empty());
        if has_parent && !command.exists() {
            return Err(McpError::startup(format!(
                "server executable not found: {}",
                command.display()
            )));
        }

        for file in &self.config.required_files {
            if !file.exists() {
                return Err(McpError::startup(format!(
                    "required credential file not found: {}",
                    file.display()
                )));
            }
        }

        if let Some(dir) = &self.config.working_dir {
            if !dir.is_dir() {
                return Err(McpError::startup(format!(
                    "working directory not found: {}",
                    dir.display()
                )));
            }
        }

        Ok(())
    }
}

/// Drive the initialize exchange with bounded retries.
///
/// Only a deadline expiry is retried; attempt k sleeps k times the backoff
/// base before the next try. Every other failure propagates immediately.
async fn handshake(
    client: &McpClient,
    config: &ServerConfig,
) -> Result<InitializeResult, McpError> {
    let attempts = config.init_attempts.max(1);
    let mut attempt = 1u32;

    loop {
        match client.initialize().await {
            Ok(result) => return Ok(result),
            Err(err) if err.is_timeout() && attempt < attempts => {
                let delay = config.init_backoff * attempt;
                warn!(attempt, ?delay, "initialize timed out, retrying after backoff");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                error!(attempt, error = %err, "handshake failed");
                return Err(err);
            }
        }
    }
}
