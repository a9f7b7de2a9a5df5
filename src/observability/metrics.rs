//! Metrics collection and exposition.
//!
//! # Metrics
//! - `node_stage_ready` (counter): module stages constructed, by stage
//! - `node_bootstrap_dials_total` (counter): bootstrap dials attempted
//! - `gateway_peers` (gauge): currently connected peers
//! - `gateway_dials_total` (counter): outbound dials by outcome
//! - `tpool_transactions` (gauge): unconfirmed transactions held

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

use crate::lifecycle::Stage;

/// Start the Prometheus exporter on `addr`.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to start metrics exporter"),
    }
}

pub fn record_stage_ready(stage: Stage) {
    metrics::counter!("node_stage_ready", "stage" => stage.as_str()).increment(1);
}

pub fn record_bootstrap_dials(count: usize) {
    metrics::counter!("node_bootstrap_dials_total").increment(count as u64);
}

pub fn record_gateway_peers(count: usize) {
    metrics::gauge!("gateway_peers").set(count as f64);
}

/// `outcome` is one of "connected", "failed", "timeout", "cancelled".
pub fn record_dial(outcome: &'static str) {
    metrics::counter!("gateway_dials_total", "outcome" => outcome).increment(1);
}

pub fn record_pool_size(count: usize) {
    metrics::gauge!("tpool_transactions").set(count as f64);
}
