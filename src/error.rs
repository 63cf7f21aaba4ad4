//! Error types for the control plane

use thiserror::Error;

/// Errors produced while managing an MCP server process or talking to it.
#[derive(Debug, Error, Clone)]
pub enum McpError {
    /// The server process could not be reached or the channel to it is gone
    #[error("connection error: {0}")]
    Connection(String),

    /// The byte stream ended or broke mid-conversation
    #[error("transport error: {0}")]
    Transport(String),

    /// Well-formed JSON that violates the JSON-RPC contract
    #[error("protocol error: {0}")]
    Protocol(String),

    /// JSON encode/decode failure
    #[error("serialization error: {0}")]
    Serialization(String),

    /// No response arrived within the per-call deadline
    #[error("request timed out after {seconds} seconds")]
    Timeout {
        /// Deadline that elapsed, in seconds
        seconds: u64,
    },

    /// Explicit error reported by the server for one call
    #[error("server error {code}: {message}")]
    Server {
        /// JSON-RPC error code, or -1 for tool-level failures
        code: i64,
        /// Human-readable error message
        message: String,
    },

    /// Preflight check or spawn failed; the plane never came up
    #[error("startup error: {0}")]
    Startup(String),

    /// An operation ran before the handshake completed
    #[error("client not initialized")]
    NotInitialized,

    /// `initialize` was issued twice on the same connection
    #[error("client already initialized")]
    AlreadyInitialized,

    /// The pending call was resolved by a shutdown
    #[error("operation cancelled")]
    Cancelled,

    /// Anything that does not fit the kinds above
    #[error("{0}")]
    Other(String),
}

impl McpError {
    /// Create a new `Connection` error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Create a new `Transport` error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Create a new `Protocol` error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Create a new `Serialization` error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization(message.into())
    }

    /// Create a new `Timeout` error
    pub fn timeout(seconds: u64) -> Self {
        Self::Timeout { seconds }
    }

    /// Create a new `Server` error
    pub fn server(code: i64, message: impl Into<String>) -> Self {
        Self::Server {
            code,
            message: message.into(),
        }
    }

    /// Create a new `Startup` error
    pub fn startup(message: impl Into<String>) -> Self {
        Self::Startup(message.into())
    }

    /// Create a new `Other` error
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }

    /// Whether this error is a per-call deadline expiry.
    ///
    /// Only timeouts are retried, and only during the handshake.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<serde_json::Error> for McpError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

impl From<std::io::Error> for McpError {
    fn from(err: std::io::Error) -> Self {
        Self::transport(err.to_string())
    }
}
