//! Handshake and discovery types

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Identity this client reports during `initialize`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Client name
    pub name: String,
    /// Client version
    pub version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: "mcp-bridge".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Capability descriptor sent during `initialize`.
///
/// Serialized as an empty object unless a capability is declared.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientCapabilities {
    /// Workspace roots capability
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roots: Option<HashMap<String, Value>>,
    /// Sampling capability
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampling: Option<HashMap<String, Value>>,
}

/// Parameters of the `initialize` call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Protocol revision the client speaks
    pub protocol_version: String,
    /// Client capabilities
    pub capabilities: ClientCapabilities,
    /// Client identity
    pub client_info: ClientInfo,
}

/// Identity the server reports back
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    /// Server name
    #[serde(default)]
    pub name: String,
    /// Server version
    #[serde(default)]
    pub version: String,
}

/// Result of the `initialize` call.
///
/// Decoded leniently: servers vary in which fields they fill in, and the
/// handshake only needs the call to succeed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// Protocol revision the server speaks
    #[serde(default)]
    pub protocol_version: Option<String>,
    /// Raw server capability descriptor
    #[serde(default)]
    pub capabilities: Value,
    /// Server identity
    #[serde(default)]
    pub server_info: Option<ServerInfo>,
}

/// One tool advertised by `tools/list`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    /// Tool name
    pub name: String,
    /// Tool description
    #[serde(default)]
    pub description: Option<String>,
    /// Input schema (JSON Schema)
    #[serde(default)]
    pub input_schema: Value,
}

impl ToolDescriptor {
    /// Create a descriptor with just a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            input_schema: Value::Object(serde_json::Map::new()),
        }
    }
}
