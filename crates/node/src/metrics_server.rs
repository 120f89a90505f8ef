use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use tracing::{error, info};

use crate::metrics::{MetricsCollector, LEDGER_HEIGHT, NODE_HEIGHT};

/// HTTP server for exposing Prometheus metrics
pub struct MetricsServer {
    metrics: MetricsCollector,
    bind_address: String,
}

impl MetricsServer {
    pub fn new(metrics: MetricsCollector, bind_address: impl Into<String>) -> Self {
        Self {
            metrics,
            bind_address: bind_address.into(),
        }
    }

    /// Start metrics HTTP server
    pub async fn start(self) -> std::io::Result<()> {
        let app = create_metrics_router(self.metrics);
        let listener = tokio::net::TcpListener::bind(&self.bind_address).await?;
        info!("Metrics server listening on {}", self.bind_address);

        axum::serve(listener, app).await
    }
}

/// Handler for /metrics endpoint
async fn metrics_handler(State(metrics): State<MetricsCollector>) -> Result<String, StatusCode> {
    metrics.gather().map_err(|err| {
        error!("Failed to gather metrics: {}", err);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

/// Handler for /health endpoint; reports how far the ledger trails the node.
async fn health_handler() -> Json<serde_json::Value> {
    let ledger_height = LEDGER_HEIGHT.get() as u64;
    let node_height = NODE_HEIGHT.get() as u64;
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "ledger_height": ledger_height,
        "node_height": node_height,
        "blocks_behind": node_height.saturating_sub(ledger_height),
    }))
}

pub fn create_metrics_router(metrics: MetricsCollector) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(metrics)
}
