//! Prometheus /metrics + health check HTTP endpoints
//!
//! Endpoints:
//!   GET /metrics  — Prometheus text format
//!   GET /healthz  — Liveness probe (200 if the process is running)
//!
//! Storage gauges are pulled from a stats callback on each scrape, so the
//! metrics module needs no knowledge of the quota manager; the upload and
//! download counters belong to the embedding request layer.

use anyhow::Result;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use std::sync::Arc;

use deaddrop_storage::QuotaStats;

/// Live storage statistics for the gauges; `None` when quota accounting is
/// not configured.
pub type StatsFn = Arc<dyn Fn() -> Option<QuotaStats> + Send + Sync>;

/// Operational counters incremented by the request layer.
#[derive(Clone, Default)]
pub struct OpCounters {
    pub uploads: Counter,
    pub downloads: Counter,
}

#[derive(Clone)]
pub struct MetricsState {
    registry: Arc<Registry>,
    stats: StatsFn,
    storage_bytes: Gauge,
    active_drops: Gauge,
    pub counters: OpCounters,
}

impl MetricsState {
    pub fn new(stats: StatsFn) -> Self {
        let mut registry = Registry::default();

        let counters = OpCounters::default();
        registry.register(
            "dead_drop_uploads",
            "Total number of successful uploads",
            counters.uploads.clone(),
        );
        registry.register(
            "dead_drop_downloads",
            "Total number of successful downloads",
            counters.downloads.clone(),
        );

        let storage_bytes = Gauge::default();
        registry.register(
            "dead_drop_storage_bytes",
            "Current storage usage in bytes",
            storage_bytes.clone(),
        );
        let active_drops = Gauge::default();
        registry.register(
            "dead_drop_active_drops",
            "Current number of active drops",
            active_drops.clone(),
        );

        Self {
            registry: Arc::new(registry),
            stats,
            storage_bytes,
            active_drops,
            counters,
        }
    }
}

/// Serve /metrics and /healthz on `addr` (e.g. "127.0.0.1:9100").
pub async fn serve(addr: String, state: MetricsState) -> Result<()> {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("metrics bind {addr}: {e}"))?;

    tracing::info!(addr = %addr, "metrics: listening on /metrics, /healthz");

    axum::serve(listener, app)
        .await
        .map_err(|e| anyhow::anyhow!("metrics server: {e}"))
}

async fn metrics_handler(State(state): State<MetricsState>) -> impl IntoResponse {
    if let Some(stats) = (state.stats)() {
        state.storage_bytes.set(stats.total_bytes as i64);
        state.active_drops.set(stats.drop_count as i64);
    }

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

async fn healthz_handler() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
