//! Metrics collection and exposition.
//!
//! # Metrics
//! - `trace_upgrade_attempts_total` (counter): probe outcomes by `outcome`
//! - `rpc_server_requests_total` (counter): dispatched messages by `method`, `result`
//! - `rpc_client_calls_total` (counter): finished client calls by `result`
//! - `rpc_server_active_connections` (gauge): current connection count
//!
//! # Design Decisions
//! - Recording is a no-op until `init_metrics` installs the exporter
//! - Label values are bounded: method names come from the registered service

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

/// Count one upgrade probe by outcome ("enhanced", "rejected", "unsupported").
pub fn record_upgrade(outcome: &str) {
    counter!("trace_upgrade_attempts_total", "outcome" => outcome.to_string()).increment(1);
}

/// Count one dispatched server message.
pub fn record_server_request(method: &str, result: &str) {
    counter!(
        "rpc_server_requests_total",
        "method" => method.to_string(),
        "result" => result.to_string()
    )
    .increment(1);
}

/// Count one finished client call.
pub fn record_client_call(result: &str) {
    counter!("rpc_client_calls_total", "result" => result.to_string()).increment(1);
}

pub fn set_active_connections(count: usize) {
    gauge!("rpc_server_active_connections").set(count as f64);
}
