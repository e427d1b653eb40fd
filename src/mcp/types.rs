//! JSON-RPC and MCP protocol types
//!
//! These types implement the MCP (Model Context Protocol) JSON-RPC
//! interface.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC request
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    #[allow(dead_code)]
    pub jsonrpc: String,
    pub id: Option<Value>,
    pub method: String,
    pub params: Option<Value>,
}

/// JSON-RPC response
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Option<Value>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// JSON-RPC error
#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    /// Server-side failure with structured category + remediation data.
    pub fn categorized(category: crate::search::ErrorCategory, message: String) -> Self {
        use crate::search::ErrorCategory;
        let code = match category {
            ErrorCategory::Contract | ErrorCategory::Protocol => -32602,
            _ => -32603,
        };
        Self {
            code,
            message,
            data: Some(serde_json::json!({
                "category": category.as_str(),
                "suggestion": category.suggestion(),
            })),
        }
    }
}

// MCP protocol types

/// MCP initialize request parameters.
///
/// Required by the protocol but unused beyond validation; the server
/// accepts any protocol version and makes no decisions from client
/// identity.
#[derive(Deserialize)]
pub(crate) struct InitializeParams {
    #[serde(rename = "protocolVersion")]
    #[allow(dead_code)]
    pub protocol_version: Option<String>,
    #[allow(dead_code)]
    pub capabilities: Option<Value>,
    #[serde(rename = "clientInfo")]
    #[allow(dead_code)]
    pub client_info: Option<Value>,
}

#[derive(Serialize)]
pub(crate) struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    pub capabilities: ServerCapabilities,
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
}

#[derive(Serialize)]
pub(crate) struct ServerCapabilities {
    pub tools: ToolsCapability,
}

#[derive(Serialize)]
pub(crate) struct ToolsCapability {
    #[serde(rename = "listChanged")]
    pub list_changed: bool,
}

#[derive(Serialize)]
pub(crate) struct ServerInfo {
    pub name: String,
    pub version: String,
}

#[derive(Serialize)]
pub(crate) struct Tool {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

#[derive(Serialize)]
pub(crate) struct ToolsListResult {
    pub tools: Vec<Tool>,
}

/// Arguments of the `search_regex` tool.
///
/// Numeric fields deserialize as i64 so a negative offset is a clean
/// contract error instead of a serde failure.
#[derive(Debug, Deserialize)]
pub(crate) struct RegexSearchArgs {
    pub pattern: String,
    pub page_size: Option<i64>,
    pub offset: Option<i64>,
    pub max_response_tokens: Option<i64>,
    pub path: Option<String>,
}

/// Arguments of the `search_semantic` tool
#[derive(Debug, Deserialize)]
pub(crate) struct SemanticSearchArgs {
    pub query: String,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub threshold: Option<f32>,
    pub page_size: Option<i64>,
    pub offset: Option<i64>,
    pub max_response_tokens: Option<i64>,
    pub path: Option<String>,
}
