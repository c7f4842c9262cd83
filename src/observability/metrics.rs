//! Metrics collection and exposition.
//!
//! # Metrics
//! - `carillon_http_requests_total` (counter): requests by method, status
//! - `carillon_http_request_duration_seconds` (histogram): time to build a response
//! - `carillon_ws_connections` (gauge): live WebSocket sessions
//! - `carillon_ws_broadcasts_total` (counter): messages queued by broadcast
//! - `carillon_client_requests_total` (counter): client round trips by outcome
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Start the Prometheus scrape endpoint on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record one HTTP exchange.
pub fn record_request(method: &str, status: u16, started: Instant) {
    let labels = [("method", method.to_string()), ("status", status.to_string())];
    metrics::counter!("carillon_http_requests_total", &labels).increment(1);
    metrics::histogram!("carillon_http_request_duration_seconds", &labels)
        .record(started.elapsed().as_secs_f64());
}

pub fn record_ws_connected() {
    metrics::gauge!("carillon_ws_connections").increment(1.0);
}

pub fn record_ws_disconnected() {
    metrics::gauge!("carillon_ws_connections").decrement(1.0);
}

/// Record the sends issued by one broadcast.
pub fn record_broadcast(sends: usize) {
    metrics::counter!("carillon_ws_broadcasts_total").increment(sends as u64);
}

/// Record one client round trip; `outcome` is `ok` or an error kind.
pub fn record_client_request(outcome: &'static str) {
    metrics::counter!("carillon_client_requests_total", "outcome" => outcome).increment(1);
}
