// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! JSON-RPC 2.0 envelopes.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC error codes used by this crate.
pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
}

/// A parsed request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default = "version")]
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub id: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct ErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ErrorObject>,
}

fn version() -> String {
    "2.0".to_string()
}

/// Encode a request.
pub fn request(method: &str, params: Value, id: u64) -> String {
    serde_json::json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
        "id": id,
    })
    .to_string()
}

/// Encode a success response.
pub fn result(value: Value, id: &Value) -> String {
    serde_json::json!({
        "jsonrpc": "2.0",
        "result": value,
        "id": id,
    })
    .to_string()
}

/// Encode an error response.
pub fn error(code: i64, message: &str, id: &Value) -> String {
    serde_json::json!({
        "jsonrpc": "2.0",
        "error": ErrorObject { code, message: message.to_string() },
        "id": id,
    })
    .to_string()
}

/// Encode `err` as an error response.
pub fn error_from(err: &Error, id: &Value) -> String {
    error(err.json_rpc_code(), &err.to_string(), id)
}

/// Parse a request payload.
pub fn parse_request(payload: &str) -> Result<JsonRpcRequest> {
    Ok(serde_json::from_str(payload)?)
}

/// Id of a request payload, `null` if it cannot be parsed.
pub fn request_id(payload: &str) -> Value {
    serde_json::from_str::<Value>(payload)
        .ok()
        .and_then(|v| v.get("id").cloned())
        .unwrap_or(Value::Null)
}

/// Extract the result of a response; error objects become [`Error::Remote`].
pub fn parse_response(payload: &str) -> Result<Value> {
    let envelope: Envelope = serde_json::from_str(payload)?;
    match (envelope.error, envelope.result) {
        (Some(err), _) => Err(Error::Remote {
            code: err.code,
            message: err.message,
        }),
        (None, Some(value)) => Ok(value),
        (None, None) => Ok(Value::Null),
    }
}
