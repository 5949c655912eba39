//! Prometheus metrics exposition
//!
//! Registers and exposes the service metrics:
//!
//! - `pagegen_pages_total` (counter): label `outcome`
//! - `pagegen_page_duration_seconds` (histogram): label `outcome`
//! - `pagegen_provider_calls_total` (counter): label `outcome`
//!
//! The pool crate additionally emits `pool_key_state_total` and
//! `pool_fallback_total` through the same recorder.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// Page generation spans several provider calls with backoff in between, so
/// the duration buckets run from sub-second to ten minutes. The handle's
/// `render()` output is served on `/metrics`.
pub fn install_recorder() -> PrometheusHandle {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Full(
                "pagegen_page_duration_seconds".to_string(),
            ),
            &[0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0],
        )
        .expect("failed to set histogram buckets")
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Record a finished page-generation task.
pub fn record_page(outcome: &str, duration_secs: f64) {
    metrics::counter!("pagegen_pages_total", "outcome" => outcome.to_string()).increment(1);
    metrics::histogram!("pagegen_page_duration_seconds", "outcome" => outcome.to_string())
        .record(duration_secs);
}

/// Record one provider call outcome ("ok", "failed").
pub fn record_provider_call(outcome: &str) {
    metrics::counter!("pagegen_provider_calls_total", "outcome" => outcome.to_string())
        .increment(1);
}
