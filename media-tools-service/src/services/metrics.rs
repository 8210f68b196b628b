//! Metrics collection for media-tools-service.
//!
//! HTTP request metrics come from the shared middleware; the counters here
//! track quota decisions and link resolution outcomes.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Calling it twice is a no-op.
pub fn init_metrics() {
    if METRICS_HANDLE.get().is_some() {
        return;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            let _ = METRICS_HANDLE.set(handle);
        }
        Err(e) => tracing::warn!("Failed to install Prometheus recorder: {}", e),
    }
}

/// Get metrics output in Prometheus text format.
pub fn get_metrics() -> String {
    METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized\n".to_string())
}

pub fn record_usage_check(can_generate: bool) {
    metrics::counter!("usage_checks_total", "can_generate" => can_generate.to_string()).increment(1);
}

pub fn record_consume(accepted: bool) {
    metrics::counter!("usage_consume_total", "accepted" => accepted.to_string()).increment(1);
}

/// Record a successful resolution and the strategy that produced it.
pub fn record_resolution(method: &'static str) {
    metrics::counter!("url_resolutions_total", "method" => method).increment(1);
}

/// Record a failed step: `redirect`, a strategy name, or `exhausted`.
pub fn record_resolution_failure(stage: &'static str) {
    metrics::counter!("url_resolution_failures_total", "stage" => stage).increment(1);
}
