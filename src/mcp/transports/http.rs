//! HTTP transport for the MCP server
//!
//! JSON-RPC over a loopback HTTP endpoint (`POST /mcp/`). Binds to
//! 127.0.0.1 unless the operator explicitly configures another host;
//! non-loopback binds get a loud warning because there is no
//! authentication layer.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::Value;
use tower_http::limit::RequestBodyLimitLayer;

use super::super::server::{McpServer, MCP_PROTOCOL_VERSION};
use super::super::types::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};

/// JSON-RPC bodies past this size are protocol abuse, not queries
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Run the server over HTTP until ctrl-c, then shut down.
pub async fn serve_http(server: Arc<McpServer>, host: &str, port: u16) -> Result<()> {
    server.start().await;

    let is_loopback = matches!(host, "127.0.0.1" | "localhost" | "::1");
    if !is_loopback {
        tracing::warn!(host, "Binding MCP HTTP transport to a non-loopback address WITHOUT authentication");
    }

    let app = Router::new()
        .route("/mcp", post(handle_mcp_post))
        .route("/mcp/", post(handle_mcp_post))
        .route("/health", get(handle_health))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(Arc::clone(&server));

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    tracing::info!(addr = %addr, protocol = MCP_PROTOCOL_VERSION, "MCP HTTP server listening");

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Received ctrl-c");
    };
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    server.shutdown().await;
    Ok(())
}

async fn handle_mcp_post(
    State(server): State<Arc<McpServer>>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let request: JsonRpcRequest = match serde_json::from_value(body) {
        Ok(req) => req,
        Err(e) => {
            let response = JsonRpcResponse::failure(
                None,
                JsonRpcError {
                    code: -32700,
                    message: format!("Parse error: {e}"),
                    data: None,
                },
            );
            return (
                StatusCode::OK,
                Json(serde_json::to_value(response).unwrap_or(Value::Null)),
            );
        }
    };

    let is_notification = request.id.is_none();
    let response = server.handle_request(request).await;

    if is_notification && response.error.is_none() {
        // Notifications get 202 with an empty body per the HTTP binding
        return (StatusCode::ACCEPTED, Json(Value::Null));
    }

    (
        StatusCode::OK,
        Json(serde_json::to_value(response).unwrap_or(Value::Null)),
    )
}

async fn handle_health(State(server): State<Arc<McpServer>>) -> Json<Value> {
    Json(serde_json::json!({
        "status": "ok",
        "phase": format!("{:?}", server.phase()),
    }))
}
