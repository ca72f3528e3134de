//! Metrics collection and exposition.
//!
//! # Metrics
//! - `guard_requests_total` (counter): requests by route class and status
//! - `guard_request_duration_seconds` (histogram): time spent in pipeline and upstream
//! - `guard_rate_limited_total` (counter): 429s by route class
//! - `guard_csrf_rejected_total` (counter): 403s by reason
//! - `guard_xss_detected_total` (counter): detections by mode
//! - `guard_malformed_json_total` (counter): bodies that failed to parse
//! - `guard_rate_limit_keys` (gauge): tracked rate-limit windows
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(class: &str, status: u16, start: Instant) {
    counter!(
        "guard_requests_total",
        "class" => class.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("guard_request_duration_seconds", "class" => class.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_rate_limited(class: &str) {
    counter!("guard_rate_limited_total", "class" => class.to_string()).increment(1);
}

pub fn record_csrf_rejected(reason: &'static str) {
    counter!("guard_csrf_rejected_total", "reason" => reason).increment(1);
}

pub fn record_xss_detected(mode: &'static str) {
    counter!("guard_xss_detected_total", "mode" => mode).increment(1);
}

pub fn record_malformed_json() {
    counter!("guard_malformed_json_total").increment(1);
}

pub fn record_rate_limit_keys(count: usize) {
    gauge!("guard_rate_limit_keys").set(count as f64);
}
