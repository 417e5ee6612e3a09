//! HTTP API Server
//!
//! Read-only status endpoints for a running election node.

use std::sync::Arc;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::config::ApiConfig;
use crate::error::{Error, Result};
use crate::node::ElectionHandle;

/// Shared application state
pub struct AppState {
    /// Handle to the local election node
    pub election: ElectionHandle,
    /// Process start time
    pub started_at: chrono::DateTime<chrono::Utc>,
}

/// HTTP API server
pub struct HttpServer {
    config: ApiConfig,
    state: Arc<AppState>,
}

impl HttpServer {
    /// Create a new HTTP server
    pub fn new(config: ApiConfig, election: ElectionHandle) -> Self {
        let state = Arc::new(AppState {
            election,
            started_at: chrono::Utc::now(),
        });

        Self { config, state }
    }

    /// Create the router
    fn create_router(state: Arc<AppState>) -> Router {
        Router::new()
            .route("/health", get(handle_health))
            .route("/status", get(handle_status))
            .route("/peers", get(handle_peers))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Start the HTTP server
    pub async fn start(&self) -> Result<()> {
        if !self.config.enabled {
            tracing::info!("HTTP API disabled");
            return Ok(());
        }

        let listener = TcpListener::bind(&self.config.bind_address).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        tracing::info!("HTTP API listening on {}", listener.local_addr()?);

        let app = Self::create_router(Arc::clone(&self.state));
        axum::serve(listener, app)
            .await
            .map_err(|e| Error::Network(format!("HTTP server error: {}", e)))?;

        Ok(())
    }
}

// ============ Response Types ============

/// Health response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub node_id: String,
    pub is_leader: bool,
    pub uptime_seconds: i64,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

// ============ Handlers ============

async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let uptime = chrono::Utc::now() - state.started_at;

    Json(HealthResponse {
        healthy: true,
        node_id: state.election.node_id().to_string(),
        is_leader: state.election.is_leader(),
        uptime_seconds: uptime.num_seconds(),
    })
}

async fn handle_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.election.status())
}

async fn handle_peers(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.election.peers().await {
        Ok(peers) => Json(peers).into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: e.to_string(),
                code: "NODE_STOPPED".to_string(),
            }),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{ChannelNames, MemoryBus};
    use crate::id::NodeId;
    use crate::node::{ElectionNode, NodeOptions};
    use crate::state::{ElectionStatus, PeerSummary};
    use std::time::Duration;

    async fn start_api() -> (ElectionHandle, String) {
        let bus = Arc::new(MemoryBus::new());
        let interval = Duration::from_millis(20);
        let options = NodeOptions {
            channels: ChannelNames::new("api-test"),
            heartbeat_interval: interval,
            leader_check_min: interval * 3,
            leader_check_max: interval * 6,
            queue_capacity: 64,
        };
        let (handle, _join) = ElectionNode::spawn(NodeId::generate(), bus, options)
            .await
            .unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let server = HttpServer::new(ApiConfig::default(), handle.clone());
        tokio::spawn(async move { server.serve(listener).await });

        (handle, base)
    }

    #[tokio::test]
    async fn test_status_and_peers() {
        let (handle, base) = start_api().await;
        handle.wait_until(|s| s.is_leader).await.unwrap();

        let health: HealthResponse = reqwest::get(format!("{}/health", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(health.healthy);
        assert_eq!(health.node_id, handle.node_id().to_string());

        let status: ElectionStatus = reqwest::get(format!("{}/status", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status.node_id, handle.node_id());
        assert!(status.is_leader);
        assert_eq!(status.majority_required_size, 1);

        let peers: Vec<PeerSummary> = reqwest::get(format!("{}/peers", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].id, handle.node_id());
    }

    #[tokio::test]
    async fn test_peers_unavailable_after_shutdown() {
        let (handle, base) = start_api().await;
        handle.shutdown().await.unwrap();

        // Wait for the event loop to exit
        while handle.peers().await.is_ok() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let response = reqwest::get(format!("{}/peers", base)).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
    }
}
