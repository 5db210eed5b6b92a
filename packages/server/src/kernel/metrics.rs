//! Prometheus metrics for the API and worker processes.
//!
//! One global recorder per process; GET /api/metrics renders the registry
//! in Prometheus text format.

use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the process-wide Prometheus recorder.
///
/// Returns the handle used to render the scrape output. Safe to call once
/// per process; tests that race on the global recorder simply get `None`.
pub fn install() -> Option<PrometheusHandle> {
    PrometheusBuilder::new().install_recorder().ok()
}

/// Record one handled HTTP request.
pub fn http_request(method: &str, path: &str, status: u16, elapsed: Duration) {
    counter!(
        "http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status.to_string(),
    )
    .increment(1);

    histogram!(
        "http_request_duration_seconds",
        "method" => method.to_string(),
        "path" => path.to_string(),
    )
    .record(elapsed.as_secs_f64());
}

/// Queue depth gauges, refreshed by the worker's poll loop.
pub fn queue_depth(waiting: i64, active: i64) {
    gauge!("queue_jobs_waiting").set(waiting as f64);
    gauge!("queue_jobs_active").set(active as f64);
}

/// One pipeline job reached a terminal state.
pub fn job_finished(outcome: &str) {
    counter!("pipeline_jobs_total", "outcome" => outcome.to_string()).increment(1);
}

/// One pipeline job was claimed by a worker.
pub fn job_started() {
    counter!("pipeline_jobs_started_total").increment(1);
}

/// LLM token spend for one job run.
pub fn llm_tokens(prompt: u64, completion: u64) {
    counter!("llm_tokens_total", "kind" => "prompt").increment(prompt);
    counter!("llm_tokens_total", "kind" => "completion").increment(completion);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_recorder_is_a_noop() {
        // No recorder installed in unit tests; all helpers must not panic.
        http_request("GET", "/api/health", 200, Duration::from_millis(3));
        queue_depth(1, 2);
        job_started();
        job_finished("completed");
        llm_tokens(100, 50);
    }
}
