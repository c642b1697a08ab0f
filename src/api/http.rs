//! HTTP Status API
//!
//! Read-only view of the node: supervisor state, active replication links,
//! the last reconcile tick, and the peer directory contents.

use std::sync::Arc;
use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Router,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::config::ApiConfig;
use crate::directory::{DirectoryEntry, PeerDirectory};
use crate::error::{Error, Result};
use crate::supervisor::{StatusBoard, SupervisorState};

/// Shared application state
pub struct AppState {
    /// Node status written by the supervisor
    pub status: StatusBoard,
    /// Peer directory
    pub directory: Arc<dyn PeerDirectory>,
}

/// HTTP status server
pub struct HttpServer {
    config: ApiConfig,
    state: Arc<AppState>,
}

impl HttpServer {
    /// Create a new HTTP server
    pub fn new(config: ApiConfig, status: StatusBoard, directory: Arc<dyn PeerDirectory>) -> Self {
        Self {
            config,
            state: Arc::new(AppState { status, directory }),
        }
    }

    /// Create the router
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(handle_health))
            .route("/status", get(handle_status))
            .route("/directory", get(handle_directory))
            .layer(TraceLayer::new_for_http())
            .with_state(Arc::clone(&self.state))
    }

    /// Start the HTTP server
    pub async fn start(&self) -> Result<()> {
        if !self.config.enabled {
            tracing::info!("HTTP API disabled");
            return Ok(());
        }

        let listener = tokio::net::TcpListener::bind(&self.config.bind_address).await?;
        tracing::info!("HTTP API listening on {}", self.config.bind_address);

        axum::serve(listener, self.router())
            .await
            .map_err(|e| Error::Network(format!("HTTP server error: {}", e)))?;

        Ok(())
    }
}

// ============ Response Types ============

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub node_id: String,
    pub state: SupervisorState,
}

/// Directory listing response
#[derive(Debug, Serialize)]
pub struct DirectoryResponse {
    pub entries: Vec<DirectoryEntry>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

// ============ Handlers ============

async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let status = state.status.snapshot().await;
    let healthy = matches!(status.state, SupervisorState::Starting | SupervisorState::Running);
    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(HealthResponse {
            healthy,
            node_id: status.node_id.to_string(),
            state: status.state,
        }),
    )
}

async fn handle_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.status.snapshot().await)
}

async fn handle_directory(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.directory.list_all().await {
        Ok(entries) => Json(DirectoryResponse { entries }).into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: e.to_string(),
                code: "DIRECTORY_UNAVAILABLE".to_string(),
            }),
        )
            .into_response(),
    }
}
