//! HTTP server implementation using Axum
//!
//! `POST /rpc` takes one JSON request `{id, method, params}` and always
//! answers with a JSON response; failures travel in its `error` field.
//! `GET /health` answers liveness checks.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use leash_core::rpc::{RpcError, RpcRequest, RpcResponse};
use leash_core::LeashError;

use super::dispatch::dispatch;
use crate::state::ServerState;

/// Build the router over shared state
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/rpc", post(handle_rpc))
        .route("/health", get(health))
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

async fn handle_rpc(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Json<RpcResponse> {
    let client_info = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let request: RpcRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            let err = LeashError::InvalidRequest(format!("malformed request: {}", e));
            return Json(RpcResponse::err(Value::Null, RpcError::from(&err)));
        }
    };

    Json(dispatch(&state, request, client_info).await)
}

/// RPC server bound to one address
pub struct RpcServer {
    /// Address to bind, e.g. `127.0.0.1:8086`
    pub address: String,
    state: Arc<ServerState>,
    shutdown_token: Option<CancellationToken>,
}

impl RpcServer {
    pub fn new(address: String, state: Arc<ServerState>) -> Self {
        Self {
            address,
            state,
            shutdown_token: None,
        }
    }

    /// Set the shutdown token (call before run)
    pub fn with_shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown_token = Some(token);
        self
    }

    /// Serve until the shutdown token is cancelled
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.address)
            .await
            .with_context(|| format!("Failed to bind RPC server to {}", self.address))?;
        let local = listener
            .local_addr()
            .context("Failed to read bound address")?;
        tracing::info!("RPC server listening on {}", local);

        let app = router(Arc::clone(&self.state));
        let token = self.shutdown_token.clone().unwrap_or_default();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await
            .context("RPC server failed")?;

        tracing::info!("RPC server stopped");
        Ok(())
    }
}
