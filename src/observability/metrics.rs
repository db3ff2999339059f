//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by method, status, service
//! - `gateway_request_duration_seconds` (histogram): latency distribution
//! - `gateway_auth_failures_total` (counter): rejected credentials by surface and reason
//! - `gateway_policy_denials_total` (counter): policy denials by error code
//! - `gateway_certificates_loaded` (gauge): certificates in the SNI index
//! - `gateway_active_websockets` (gauge): open bridged websockets
//!
//! # Design Decisions
//! - Updates go through the `metrics` facade; without an installed
//!   recorder they are no-ops, so tests need no setup
//! - Prometheus exporter listens on its own address

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

/// Install the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, service: &str, start: Instant) {
    let labels = [
        ("method", method.to_string()),
        ("status", status.to_string()),
        ("service", service.to_string()),
    ];
    counter!("gateway_requests_total", &labels).increment(1);
    histogram!("gateway_request_duration_seconds", &labels).record(start.elapsed().as_secs_f64());
}

pub fn record_auth_failure(surface: &'static str, reason: &'static str) {
    counter!("gateway_auth_failures_total", "surface" => surface, "reason" => reason).increment(1);
}

pub fn record_policy_denial(code: &str) {
    counter!("gateway_policy_denials_total", "code" => code.to_string()).increment(1);
}

pub fn set_certificates_loaded(count: usize) {
    gauge!("gateway_certificates_loaded").set(count as f64);
}

pub fn set_active_websockets(count: u64) {
    gauge!("gateway_active_websockets").set(count as f64);
}
