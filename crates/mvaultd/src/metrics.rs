//! Prometheus /metrics + health check HTTP endpoints
//!
//! Endpoints:
//!   GET /metrics   Prometheus text format
//!   GET /healthz   Liveness check (always 200 if process is running)
//!   GET /readyz    Readiness check (200 if storage is reachable)

use anyhow::Result;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use mvault_storage::BlobStore;
use prometheus_client::{
    encoding::text::encode,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};
use std::sync::Arc;

type Labels = Vec<(String, String)>;

/// Outcome label for served requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Full,
    Partial,
    NotSatisfiable,
    NotFound,
    Error,
}

impl Outcome {
    fn as_str(&self) -> &'static str {
        match self {
            Outcome::Full => "full",
            Outcome::Partial => "partial",
            Outcome::NotSatisfiable => "not_satisfiable",
            Outcome::NotFound => "not_found",
            Outcome::Error => "error",
        }
    }
}

#[derive(Clone, Default)]
pub struct VaultMetrics {
    requests: Family<Labels, Counter>,
    bytes_served: Counter,
    uploads: Family<Labels, Counter>,
    bytes_uploaded: Counter,
}

impl VaultMetrics {
    pub fn new(registry: &mut Registry) -> Self {
        let metrics = Self::default();
        registry.register(
            "mvault_requests",
            "Object read requests by outcome",
            metrics.requests.clone(),
        );
        registry.register(
            "mvault_bytes_served",
            "Plaintext bytes handed to client response bodies",
            metrics.bytes_served.clone(),
        );
        registry.register(
            "mvault_uploads",
            "Completed uploads by encryption mode",
            metrics.uploads.clone(),
        );
        registry.register(
            "mvault_bytes_uploaded",
            "Plaintext bytes accepted by uploads",
            metrics.bytes_uploaded.clone(),
        );
        metrics
    }

    pub fn request(&self, outcome: Outcome) {
        self.requests
            .get_or_create(&vec![("outcome".to_string(), outcome.as_str().to_string())])
            .inc();
    }

    pub fn served(&self, bytes: u64) {
        self.bytes_served.inc_by(bytes);
    }

    pub fn upload(&self, encrypted: bool, bytes: u64) {
        let mode = if encrypted { "encrypted" } else { "plain" };
        self.uploads
            .get_or_create(&vec![("mode".to_string(), mode.to_string())])
            .inc();
        self.bytes_uploaded.inc_by(bytes);
    }

    #[cfg(test)]
    pub fn request_count(&self, outcome: Outcome) -> u64 {
        self.requests
            .get_or_create(&vec![("outcome".to_string(), outcome.as_str().to_string())])
            .get()
    }

    #[cfg(test)]
    pub fn served_bytes(&self) -> u64 {
        self.bytes_served.get()
    }
}

/// Shared state for the metrics and health router
#[derive(Clone)]
pub struct HealthState {
    pub registry: Arc<Registry>,
    pub store: BlobStore,
}

pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .with_state(state)
}

/// Serve Prometheus metrics and health endpoints on `addr` (e.g. "127.0.0.1:9100")
pub async fn serve(addr: String, state: HealthState) -> Result<()> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("metrics bind {addr}: {e}"))?;

    tracing::info!(addr = %addr, "metrics: listening on /metrics, /healthz, /readyz");

    axum::serve(listener, app)
        .await
        .map_err(|e| anyhow::anyhow!("metrics server: {e}"))
}

async fn metrics_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let mut body = String::new();
    match encode(&mut body, &state.registry) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            body,
        ),
        Err(e) => {
            tracing::error!("metrics encode failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                e.to_string(),
            )
        }
    }
}

/// Liveness: returns 200 if the process is running.
async fn healthz_handler() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness: returns 200 if storage is reachable, 503 otherwise.
async fn readyz_handler(State(state): State<HealthState>) -> impl IntoResponse {
    match state.store.check_health().await {
        Ok(()) => (StatusCode::OK, "ready"),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "storage unreachable"),
    }
}
