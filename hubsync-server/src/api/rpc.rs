//! JSON-RPC 2.0 message endpoint.

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error, warn};

use super::{AppState, SERVICE_NAME};
use crate::tools::{codes, ToolError};

pub const PROTOCOL_VERSION: &str = "2024-11-05";

const PARSE_ERROR: i64 = -32700;
const INVALID_REQUEST: i64 = -32600;

fn rpc_result(id: Value, result: Value) -> Response {
    Json(json!({ "jsonrpc": "2.0", "id": id, "result": result })).into_response()
}

fn rpc_error(id: Value, code: i64, message: impl Into<String>, data: Option<Value>) -> Response {
    let mut err = json!({ "code": code, "message": message.into() });
    if let Some(data) = data {
        err["data"] = data;
    }
    Json(json!({ "jsonrpc": "2.0", "id": id, "error": err })).into_response()
}

fn bad_request(id: Value, code: i64, message: &str) -> Response {
    let mut response = rpc_error(id, code, message, None);
    *response.status_mut() = StatusCode::BAD_REQUEST;
    response
}

/// POST /messages - Dispatch one JSON-RPC request
pub async fn messages(State(state): State<AppState>, body: Bytes) -> Response {
    let request: Value = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            debug!("Rejecting unparsable message: {}", e);
            return bad_request(Value::Null, PARSE_ERROR, "Parse error");
        }
    };

    let id = request.get("id").cloned().unwrap_or(Value::Null);
    if request.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
        return bad_request(id, INVALID_REQUEST, "Invalid Request");
    }
    let Some(method) = request.get("method").and_then(Value::as_str) else {
        return bad_request(id, INVALID_REQUEST, "Invalid Request");
    };
    let params = request.get("params").cloned().unwrap_or_else(|| json!({}));

    debug!("JSON-RPC {}", method);
    match method {
        "initialize" => rpc_result(
            id,
            json!({
                "capabilities": { "tools": {}, "logging": {}, "resources": {} },
                "serverInfo": { "name": SERVICE_NAME, "version": env!("CARGO_PKG_VERSION") },
                "protocolVersion": PROTOCOL_VERSION,
            }),
        ),
        "ping" => rpc_result(id, json!({})),
        "tools/list" => rpc_result(id, json!({ "tools": state.registry.list() })),
        "tools/call" => call_tool(&state, id, params).await,
        m if m.starts_with("notifications/") => StatusCode::OK.into_response(),
        _ => rpc_error(id, codes::METHOD_NOT_FOUND, "Method not found", None),
    }
}

async fn call_tool(state: &AppState, id: Value, params: Value) -> Response {
    let Some(name) = params.get("name").and_then(Value::as_str).map(str::to_string) else {
        return rpc_error(id, codes::INVALID_PARAMS, "Missing 'name'", None);
    };
    if !state.registry.contains(&name) {
        return rpc_error(id, codes::METHOD_NOT_FOUND, format!("Tool not found: {}", name), None);
    }
    let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);

    let permit = match state.tool_permits.clone().acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => return rpc_error(id, codes::INTERNAL_ERROR, "Server is shutting down", None),
    };

    // The task keeps its permit until it finishes, even after the caller timed out.
    let registry = state.registry.clone();
    let ctx = state.tools.clone();
    let tool = name.clone();
    let task = tokio::spawn(async move {
        let _permit = permit;
        registry.call(&ctx, &tool, arguments).await
    });

    let timeout = Duration::from_secs(state.config.tools.timeout_secs);
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(Ok(value))) => match serde_json::to_string_pretty(&value) {
            Ok(text) => rpc_result(
                id,
                json!({
                    "content": [{ "type": "text", "text": text }],
                    "isError": false,
                }),
            ),
            Err(e) => {
                error!("Failed to encode result of {}: {}", name, e);
                rpc_error(id, codes::INTERNAL_ERROR, "Internal error", None)
            }
        },
        Ok(Ok(Err(err))) => {
            warn!("Tool {} failed: {}", name, err);
            rpc_error(id, err.rpc_code(), err.to_string(), Some(err.data()))
        }
        Ok(Err(join_err)) => {
            error!("Tool {} panicked: {}", name, join_err);
            rpc_error(id, codes::TOOL_FAILED, "Internal error", None)
        }
        Err(_) => {
            let err = ToolError::Timeout(timeout.as_secs());
            warn!("Tool {} timed out after {}s", name, timeout.as_secs());
            rpc_error(id, err.rpc_code(), err.to_string(), Some(err.data()))
        }
    }
}
