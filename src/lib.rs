//! Control plane for MCP tool servers running as stdio subprocesses.
//!
//! This crate owns the unglamorous part of speaking MCP: spawning the
//! server process, keeping it healthy, multiplexing concurrent calls onto
//! its line-delimited JSON-RPC stream, and shutting it down without leaving
//! callers hanging.
//!
//! ## Example
//!
//! ```rust,ignore
//! use mcp_bridge::{McpService, ServerConfig};
//! use serde_json::json;
//!
//! let config = ServerConfig::new("/srv/mcp/node")
//!     .with_arg("dist/server.js")
//!     .with_credential_file("gauth-file", "/etc/creds/gauth.json")
//!     .with_credential_file("accounts-file", "/etc/creds/accounts.json")
//!     .with_working_dir("/srv/mcp")
//!     .production();
//!
//! let service = McpService::new(config);
//! service.start().await?;
//!
//! let tools = service.list_tools().await;
//! let outcome = service
//!     .call_tool("calendar_get_events", json!({"user_id": "a@example.com"}))
//!     .await;
//!
//! service.stop().await;
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod outcome;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod types;

pub use client::{ClientOptions, LoggingNotificationHandler, McpClient, NotificationHandler};
pub use config::ServerConfig;
pub use error::McpError;
pub use outcome::CallOutcome;
pub use protocol::{
    JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId, RpcError,
};
pub use service::{McpService, ProcessState};
pub use transport::{McpTransport, StdioTransport};
pub use types::{ClientInfo, InitializeResult, ServerInfo, ToolDescriptor};
