//! Control-plane wire types (JSON-RPC 2.0).

use crate::engine::types::Participant;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Incoming JSON-RPC request envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    #[allow(dead_code)]
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub id: Value,
}

/// Outgoing JSON-RPC response envelope.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
            }),
            id,
        }
    }
}

/// Standard JSON-RPC error codes.
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
}

/// `deliberate` verb parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct DeliberateParams {
    pub question: String,
    pub participants: Vec<Participant>,
    #[serde(default)]
    pub rounds: Option<u32>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub context: Option<String>,
}

/// `query_decisions` verb parameters. `threshold` is retained for
/// back-compat and treated as advisory.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryDecisionsParams {
    pub query_text: String,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub threshold: Option<f64>,
}

/// One scored decision in a query response.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionSummary {
    pub id: String,
    pub question: String,
    pub consensus: String,
    pub score: f64,
    pub participants: Vec<String>,
    pub timestamp: String,
}

/// `query_decisions` verb result.
#[derive(Debug, Clone, Serialize)]
pub struct QueryDecisionsResult {
    #[serde(rename = "type")]
    pub kind: String,
    pub count: usize,
    pub results: Vec<DecisionSummary>,
}
