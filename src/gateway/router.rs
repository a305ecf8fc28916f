//! HTTP router and handlers

use std::fmt::Write as _;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{Request, StatusCode, header},
    middleware,
    response::{Html, IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use serde_json::{Value, json};
use tower_http::{catch_panic::CatchPanicLayer, compression::CompressionLayer, trace::TraceLayer};
use tracing::{debug, warn};

use super::dispatch::Dispatcher;
use super::identity::{CallerContext, IdentityState, identity_middleware};
use crate::Error;
use crate::error::rpc_codes;
use crate::protocol::{
    Info, InitializeResult, JsonRpcResponse, RequestId, ServerCapabilities, ToolsCallResult,
    ToolsCapability, ToolsListResult, negotiate_version,
};

/// Name reported in `serverInfo` and on the index page
pub const SERVER_NAME: &str = "mcp-unitycatalog";

/// Largest request body accepted on the MCP endpoint
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Shared application state
pub struct AppState {
    /// Tool invocation pipeline (owns the registry)
    pub dispatcher: Dispatcher,
}

/// Create the router.
///
/// The MCP endpoint lives at `{mount_path}/mcp`; `/` and `/health` stay at
/// the root.
pub fn create_router(state: Arc<AppState>, identity: IdentityState, mount_path: &str) -> Router {
    let mcp_path = mcp_route(mount_path);
    debug!(path = %mcp_path, "Mounting MCP endpoint");

    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route(&mcp_path, get(mcp_get_handler).post(mcp_handler))
        // Identity enrichment runs before every handler and never rejects
        .layer(middleware::from_fn_with_state(identity, identity_middleware))
        .layer(CatchPanicLayer::new())
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// `{mount_path}/mcp` with exactly one leading slash and no doubled separators
fn mcp_route(mount_path: &str) -> String {
    let trimmed = mount_path.trim().trim_matches('/');
    if trimmed.is_empty() {
        "/mcp".to_string()
    } else {
        format!("/{trimmed}/mcp")
    }
}

/// GET on the MCP endpoint - no server-initiated stream is offered
async fn mcp_get_handler() -> impl IntoResponse {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        [(header::ALLOW, "POST")],
        Json(json!({
            "jsonrpc": "2.0",
            "error": {
                "code": rpc_codes::INVALID_REQUEST,
                "message": "Server-initiated streams are not supported. Use POST to send JSON-RPC requests"
            },
            "id": null
        })),
    )
}

/// Health check handler
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "tools": state.dispatcher.registry().len(),
    }))
}

/// Static index page listing the registered tools
async fn index_handler(State(state): State<Arc<AppState>>) -> Html<String> {
    let mut items = String::new();
    for tool in state.dispatcher.registry().list() {
        let _ = write!(items, "<li><code>{}</code>", html_escape(tool.name()));
        if let Some(description) = tool.description() {
            let _ = write!(items, " - {}", html_escape(description));
        }
        items.push_str("</li>\n");
    }
    if items.is_empty() {
        items.push_str("<li>No tools registered</li>\n");
    }

    Html(format!(
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>{SERVER_NAME}</title></head>\n\
         <body>\n<h1>{SERVER_NAME}</h1>\n<p>Version {}</p>\n<ul>\n{items}</ul>\n</body>\n</html>\n",
        env!("CARGO_PKG_VERSION")
    ))
}

fn html_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// MCP handler (POST)
async fn mcp_handler(State(state): State<Arc<AppState>>, http_request: Request<Body>) -> Response {
    let authorization = http_request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    let caller = http_request
        .extensions()
        .get::<CallerContext>()
        .cloned()
        .unwrap_or_default();

    let body_bytes = match axum::body::to_bytes(http_request.into_body(), MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return bad_request(JsonRpcResponse::error(
                None,
                rpc_codes::PARSE_ERROR,
                format!("Failed to read body: {e}"),
            ));
        }
    };

    let request: Value = match serde_json::from_slice(&body_bytes) {
        Ok(v) => v,
        Err(e) => {
            return bad_request(JsonRpcResponse::error(
                None,
                rpc_codes::PARSE_ERROR,
                format!("Invalid JSON: {e}"),
            ));
        }
    };

    let (id, method, params) = match parse_request(&request) {
        Ok(parsed) => parsed,
        Err(response) => return bad_request(response),
    };

    debug!(method = %method, user = ?caller.user_info.as_ref().map(|u| &u.user_name), "MCP request");

    // Notifications get no JSON-RPC response
    if is_notification_method(&method) {
        debug!(notification = %method, "Handling notification");
        return StatusCode::ACCEPTED.into_response();
    }

    let Some(id) = id else {
        return bad_request(JsonRpcResponse::error(None, rpc_codes::INVALID_REQUEST, "Missing id"));
    };

    match method.as_str() {
        "initialize" => Json(handle_initialize(id, params.as_ref())).into_response(),
        "tools/list" => Json(handle_tools_list(&state, id)).into_response(),
        "tools/call" => {
            // A missing name resolves to no tool, after the credential checks
            let (tool_name, arguments) = extract_tools_call_params(params.as_ref());
            let outcome = state
                .dispatcher
                .invoke(authorization.as_deref(), &caller, tool_name, arguments)
                .await;
            match outcome {
                Ok(value) => Json(serialized(id, &ToolsCallResult::success(&value))).into_response(),
                Err(e) => tool_error_response(id, e),
            }
        }
        "ping" => Json(JsonRpcResponse::success(id, json!({}))).into_response(),
        _ => {
            debug!(method = %method, "Unknown method");
            Json(JsonRpcResponse::error(
                Some(id),
                rpc_codes::METHOD_NOT_FOUND,
                format!("Method not found: {method}"),
            ))
            .into_response()
        }
    }
}

fn handle_initialize(id: RequestId, params: Option<&Value>) -> JsonRpcResponse {
    let requested = params
        .and_then(|p| p.get("protocolVersion"))
        .and_then(Value::as_str)
        .unwrap_or("");
    let negotiated = negotiate_version(requested);
    debug!(client = requested, negotiated = negotiated, "Protocol version negotiation");

    let result = InitializeResult {
        protocol_version: negotiated.to_string(),
        capabilities: ServerCapabilities {
            tools: Some(ToolsCapability {
                list_changed: false,
            }),
        },
        server_info: Info {
            name: SERVER_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            title: Some("Unity Catalog MCP server".to_string()),
        },
        instructions: None,
    };
    serialized(id, &result)
}

fn handle_tools_list(state: &AppState, id: RequestId) -> JsonRpcResponse {
    let result = ToolsListResult {
        tools: state
            .dispatcher
            .registry()
            .list()
            .iter()
            .map(crate::tools::ToolDescriptor::to_mcp_tool)
            .collect(),
        next_cursor: None,
    };
    serialized(id, &result)
}

/// Success response carrying `result`, or an internal error if it cannot be serialized
fn serialized<T: Serialize>(id: RequestId, result: &T) -> JsonRpcResponse {
    match serde_json::to_value(result) {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err(e) => JsonRpcResponse::error(Some(id), rpc_codes::INTERNAL_ERROR, e.to_string()),
    }
}

/// Map a failed `tools/call` onto HTTP status and JSON-RPC payload.
///
/// Authentication failures are protocol errors with 401/403; caller mistakes
/// are `-32602`; anything the backend reported becomes an `isError` result.
fn tool_error_response(id: RequestId, error: Error) -> Response {
    match error {
        Error::Unauthenticated(_) => (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, "Bearer")],
            Json(JsonRpcResponse::error(Some(id), error.to_rpc_code(), error.to_string())),
        )
            .into_response(),
        Error::ExchangeFailed(_) => (
            StatusCode::FORBIDDEN,
            Json(JsonRpcResponse::error(Some(id), error.to_rpc_code(), error.to_string())),
        )
            .into_response(),
        Error::ToolNotFound(_) | Error::InvalidArguments(_) => Json(JsonRpcResponse::error(
            Some(id),
            error.to_rpc_code(),
            error.to_string(),
        ))
        .into_response(),
        other => {
            warn!(error = %other, "Returning tool failure to caller");
            Json(serialized(id, &ToolsCallResult::failure(other.to_string()))).into_response()
        }
    }
}

fn bad_request(response: JsonRpcResponse) -> Response {
    (StatusCode::BAD_REQUEST, Json(response)).into_response()
}

/// Extract a `RequestId` from a JSON value.
///
/// Supports string and integer ID values per JSON-RPC 2.0.
/// Returns `None` if the value is not a recognised ID type.
fn extract_request_id(value: &Value) -> Option<RequestId> {
    match value {
        Value::String(s) => Some(RequestId::String(s.clone())),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_u64().and_then(|u| i64::try_from(u).ok()))
            .map(RequestId::Number),
        _ => None,
    }
}

/// Check whether a method name represents a notification (no response expected).
fn is_notification_method(method: &str) -> bool {
    method.starts_with("notifications/")
}

/// Extract the `tools/call` parameters (tool name and arguments) from request params.
///
/// Returns `("", {})` when the expected fields are absent so callers never
/// need to deal with `Option`.
fn extract_tools_call_params(params: Option<&Value>) -> (&str, Value) {
    let tool_name = params
        .and_then(|p| p.get("name"))
        .and_then(|v| v.as_str())
        .unwrap_or("");
    let arguments = params
        .and_then(|p| p.get("arguments"))
        .cloned()
        .unwrap_or(json!({}));
    (tool_name, arguments)
}

/// Parse JSON-RPC request or notification
/// Returns (Option<RequestId>, method, params) - id is None for notifications
#[allow(clippy::result_large_err)] // JsonRpcResponse used directly as HTTP error body
fn parse_request(
    value: &Value,
) -> Result<(Option<RequestId>, String, Option<Value>), JsonRpcResponse> {
    let jsonrpc = value.get("jsonrpc").and_then(|v| v.as_str());
    if jsonrpc != Some("2.0") {
        return Err(JsonRpcResponse::error(
            None,
            rpc_codes::INVALID_REQUEST,
            "Invalid JSON-RPC version",
        ));
    }

    // Required for requests, absent for notifications
    let id = value.get("id").and_then(extract_request_id);

    let method = value
        .get("method")
        .and_then(|v| v.as_str())
        .ok_or_else(|| JsonRpcResponse::error(id.clone(), rpc_codes::INVALID_REQUEST, "Missing method"))?;

    let params = value.get("params").cloned();

    if !is_notification_method(method) && id.is_none() {
        return Err(JsonRpcResponse::error(None, rpc_codes::INVALID_REQUEST, "Missing id"));
    }

    Ok((id, method.to_string(), params))
}
