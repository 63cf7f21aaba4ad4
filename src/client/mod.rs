//! MCP client
//!
//! Issues concurrent JSON-RPC calls over one transport and routes each
//! response back to the caller that issued it, regardless of the order the
//! server answers in.
//!
//! One reader loop is spawned per client and lives until the stream closes
//! or [`McpClient::close`] runs; correctness depends only on id matching,
//! never on temporal order.

mod notification;
mod receiver;

pub use notification::{LoggingNotificationHandler, NotificationHandler};

use crate::error::McpError;
use crate::protocol::{
    JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, PROTOCOL_VERSION, RequestId, methods,
};
use crate::service::StateHandle;
use crate::transport::McpTransport;
use crate::types::{
    ClientCapabilities, ClientInfo, InitializeParams, InitializeResult, ServerInfo, ToolDescriptor,
};
use receiver::{ReaderCommand, reader_loop};
use serde_json::{Value, json};
use std::sync::Mutex as StdMutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{RwLock, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, instrument};

/// Default per-call deadline in seconds
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Default deadline for one `initialize` attempt in seconds
const DEFAULT_INIT_TIMEOUT_SECS: u64 = 60;

/// Command channel depth between callers and the reader loop
const COMMAND_CHANNEL_DEPTH: usize = 100;

/// Tunables for one client instance.
pub struct ClientOptions {
    /// Deadline for a regular call
    pub request_timeout: Duration,
    /// Deadline for one `initialize` attempt
    pub init_timeout: Duration,
    /// Sink for server-initiated notifications
    pub notifications: Arc<dyn NotificationHandler>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            init_timeout: Duration::from_secs(DEFAULT_INIT_TIMEOUT_SECS),
            notifications: Arc::new(LoggingNotificationHandler),
        }
    }
}

/// Client for one MCP server connection.
///
/// Creating a client spawns its reader loop, so construction must happen
/// inside a tokio runtime.
pub struct McpClient {
    /// Shared write target; the transport serializes writers internally
    transport: Arc<dyn McpTransport>,
    /// Strictly increasing id counter, never reused within this instance
    request_id: AtomicU64,
    /// Channel to the reader loop
    commands: mpsc::Sender<ReaderCommand>,
    /// Flipped off when the reader loop ends
    running: Arc<AtomicBool>,
    /// Whether the handshake has completed
    initialized: RwLock<bool>,
    /// Identity the server reported during the handshake
    server_info: RwLock<Option<ServerInfo>>,
    /// Deadline for a regular call
    request_timeout: Duration,
    /// Deadline for one `initialize` attempt
    init_timeout: Duration,
    /// Reader loop task, joined on close
    reader_handle: StdMutex<Option<JoinHandle<()>>>,
}

impl McpClient {
    /// Create a client with default options.
    pub fn new(transport: Arc<dyn McpTransport>) -> Self {
        Self::with_options(transport, ClientOptions::default())
    }

    /// Create a client with explicit options.
    pub fn with_options(transport: Arc<dyn McpTransport>, options: ClientOptions) -> Self {
        Self::with_state(transport, options, StateHandle::detached())
    }

    /// Create a client wired to a supervisor's lifecycle state, so the
    /// reader loop can record an unexpected stream end as a crash.
    pub(crate) fn with_state(
        transport: Arc<dyn McpTransport>,
        options: ClientOptions,
        state: StateHandle,
    ) -> Self {
        let (commands, command_receiver) = mpsc::channel(COMMAND_CHANNEL_DEPTH);
        let running = Arc::new(AtomicBool::new(true));

        let reader_handle = tokio::spawn(reader_loop(
            Arc::clone(&transport),
            command_receiver,
            Arc::clone(&running),
            state,
            Arc::clone(&options.notifications),
        ));

        Self {
            transport,
            request_id: AtomicU64::new(1),
            commands,
            running,
            initialized: RwLock::new(false),
            server_info: RwLock::new(None),
            request_timeout: options.request_timeout,
            init_timeout: options.init_timeout,
            reader_handle: StdMutex::new(Some(reader_handle)),
        }
    }

    /// Perform the handshake: the `initialize` call followed by the
    /// `notifications/initialized` notification.
    #[instrument(skip(self), level = "debug")]
    pub async fn initialize(&self) -> Result<InitializeResult, McpError> {
        if *self.initialized.read().await {
            return Err(McpError::AlreadyInitialized);
        }

        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ClientCapabilities::default(),
            client_info: ClientInfo::default(),
        };

        let value = self
            .call_with_deadline(methods::INITIALIZE, Some(json!(params)), self.init_timeout)
            .await?;

        // Decoded leniently; the handshake only needs the call to succeed.
        let result: InitializeResult = serde_json::from_value(value).unwrap_or_default();
        *self.server_info.write().await = result.server_info.clone();

        self.notify(methods::INITIALIZED, None).await?;
        *self.initialized.write().await = true;

        Ok(result)
    }

    /// Whether the handshake has completed.
    pub async fn is_initialized(&self) -> bool {
        *self.initialized.read().await
    }

    /// Identity the server reported during the handshake.
    pub async fn server_info(&self) -> Option<ServerInfo> {
        self.server_info.read().await.clone()
    }

    /// Issue a call and await its correlated response.
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        self.call_with_deadline(method, params, self.request_timeout)
            .await
    }

    async fn call_with_deadline(
        &self,
        method: &str,
        params: Option<Value>,
        deadline: Duration,
    ) -> Result<Value, McpError> {
        let id = self.next_request_id();
        let key = id.to_string();

        let mut request = JsonRpcRequest::new(id, method);
        if let Some(params) = params {
            request = request.with_params(params);
        }

        // Register before writing, or a fast response could race the entry.
        let (sender, receiver) = oneshot::channel();
        self.commands
            .send(ReaderCommand::Register {
                id: key.clone(),
                sender,
            })
            .await
            .map_err(|_| McpError::connection("reader loop is not running"))?;

        if let Err(err) = self.transport.send(JsonRpcMessage::Request(request)).await {
            let _ = self
                .commands
                .send(ReaderCommand::Unregister { id: key })
                .await;
            return Err(err);
        }

        let response = match timeout(deadline, receiver).await {
            Ok(Ok(result)) => result?,
            Ok(Err(_)) => return Err(McpError::connection("completion handle dropped")),
            Err(_) => {
                // Deadline expired; unregister so a late response for this
                // id is discarded rather than resolving anything.
                let _ = self
                    .commands
                    .send(ReaderCommand::Unregister { id: key })
                    .await;
                return Err(McpError::timeout(deadline.as_secs()));
            }
        };

        response
            .into_result()
            .map_err(|e| McpError::server(e.code, e.message))
    }

    /// Send a notification; nothing is awaited beyond the write.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        let mut notification = JsonRpcNotification::new(method);
        if let Some(params) = params {
            notification = notification.with_params(params);
        }
        self.transport
            .send(JsonRpcMessage::Notification(notification))
            .await
    }

    /// List the tools the server advertises.
    #[instrument(skip(self), level = "debug")]
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, McpError> {
        self.ensure_initialized().await?;

        let result = self.call(methods::TOOLS_LIST, None).await?;
        let tools: Vec<ToolDescriptor> =
            serde_json::from_value(result.get("tools").cloned().unwrap_or_default())
                .unwrap_or_default();
        Ok(tools)
    }

    /// Invoke a tool and return the raw result value.
    ///
    /// Shape normalization is the facade's job; see
    /// [`crate::outcome::CallOutcome::from_result`].
    #[instrument(skip(self, arguments), fields(tool = %name), level = "debug")]
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, McpError> {
        self.ensure_initialized().await?;

        let params = json!({
            "name": name,
            "arguments": arguments,
        });
        self.call(methods::TOOLS_CALL, Some(params)).await
    }

    /// Liveness probe.
    pub async fn ping(&self) -> Result<(), McpError> {
        let _ = self.call(methods::PING, None).await?;
        Ok(())
    }

    /// Whether the reader loop is still alive.
    pub fn is_connected(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop the reader loop, resolving every pending call with a terminal
    /// error, and wait for it to finish.
    ///
    /// The transport is left open; whoever owns the process tears it down.
    pub async fn close(&self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.commands.send(ReaderCommand::Shutdown).await;

        let handle = {
            let mut guard = match self.reader_handle.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.take()
        };
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        *self.initialized.write().await = false;
        debug!("client closed");
    }

    async fn ensure_initialized(&self) -> Result<(), McpError> {
        if !*self.initialized.read().await {
            return Err(McpError::NotInitialized);
        }
        Ok(())
    }

    fn next_request_id(&self) -> RequestId {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        match i64::try_from(id) {
            Ok(n) => RequestId::Number(n),
            Err(_) => RequestId::String(format!("req-{}", id)),
        }
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Ok(mut guard) = self.reader_handle.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}
