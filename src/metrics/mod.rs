//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Chain connection status
//! - Swap submissions, outcomes and latency
//! - Decoded lifecycle events
//! - Transient error retries and active pollers
//! - Quote refreshes

use crate::error::{EngineError, EngineResult};

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;

lazy_static! {
    // Chain metrics
    pub static ref CHAIN_CONNECTED: GaugeVec = register_gauge_vec!(
        "cell_swap_chain_connected",
        "Chain connection status (1=connected, 0=disconnected)",
        &["chain_id"]
    ).unwrap();

    pub static ref ACTIVE_POLLERS: GaugeVec = register_gauge_vec!(
        "cell_swap_active_pollers",
        "Chain pollers currently running",
        &["chain_id"]
    ).unwrap();

    // Event metrics
    pub static ref EVENTS_DECODED: CounterVec = register_counter_vec!(
        "cell_swap_events_decoded_total",
        "Lifecycle events decoded from confirmed receipts",
        &["chain_id", "event_type"]
    ).unwrap();

    // Swap metrics
    pub static ref SWAPS_SUBMITTED: CounterVec = register_counter_vec!(
        "cell_swap_swaps_submitted_total",
        "Swaps accepted by the wallet",
        &["chain_id"]
    ).unwrap();

    pub static ref SWAPS_FINISHED: CounterVec = register_counter_vec!(
        "cell_swap_swaps_finished_total",
        "Swaps reaching a terminal state",
        &["chain_id", "state"]
    ).unwrap();

    pub static ref SWAP_LATENCY: HistogramVec = register_histogram_vec!(
        "cell_swap_swap_latency_seconds",
        "Time from wallet request to terminal state",
        &["chain_id"],
        vec![1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0]
    ).unwrap();

    // Retry metrics
    pub static ref RETRIES: CounterVec = register_counter_vec!(
        "cell_swap_retries_total",
        "Transient provider errors retried",
        &["operation", "kind"]
    ).unwrap();

    // Quote metrics
    pub static ref QUOTE_REFRESHES: CounterVec = register_counter_vec!(
        "cell_swap_quote_refreshes_total",
        "Quote refresh requests by outcome",
        &["outcome"]
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> EngineResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, (StatusCode, String)> {
    render().map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

/// Text exposition of every registered metric
pub fn render() -> EngineResult<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| EngineError::Internal(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| EngineError::Internal(e.to_string()))
}

// Helper functions to record metrics

pub fn record_chain_health(chain_id: u64, healthy: bool) {
    CHAIN_CONNECTED
        .with_label_values(&[&chain_id.to_string()])
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_poller_started(chain_id: u64) {
    ACTIVE_POLLERS
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_poller_stopped(chain_id: u64) {
    ACTIVE_POLLERS
        .with_label_values(&[&chain_id.to_string()])
        .dec();
}

pub fn record_event(chain_id: u64, event_type: &str) {
    EVENTS_DECODED
        .with_label_values(&[&chain_id.to_string(), event_type])
        .inc();
}

pub fn record_swap_submitted(chain_id: u64) {
    SWAPS_SUBMITTED
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_swap_finished(chain_id: u64, state: &str, elapsed: Duration) {
    let chain = chain_id.to_string();
    SWAPS_FINISHED.with_label_values(&[&chain, state]).inc();
    SWAP_LATENCY
        .with_label_values(&[&chain])
        .observe(elapsed.as_secs_f64());
}

pub fn record_retry(operation: &str, kind: &str) {
    RETRIES.with_label_values(&[operation, kind]).inc();
}

pub fn record_quote_refresh(outcome: &str) {
    QUOTE_REFRESHES.with_label_values(&[outcome]).inc();
}
