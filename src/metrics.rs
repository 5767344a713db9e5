use crate::error::{Error, Result};
use prometheus::{
    register_counter_vec, register_histogram, register_int_counter, CounterVec, Encoder,
    Histogram, HistogramOpts, IntCounter, TextEncoder,
};
use std::time::Instant;

lazy_static::lazy_static! {
    // Optimizer round-trips, by purpose
    static ref OPTIMIZER_CALLS: CounterVec = register_counter_vec!(
        "dbmind_advisor_optimizer_calls_total",
        "Statement batches sent to the optimizer",
        &["purpose", "status"]
    ).unwrap();

    // Statements dropped by the per-query error boundary
    static ref QUERY_FAILURES: CounterVec = register_counter_vec!(
        "dbmind_advisor_query_failures_total",
        "Statements that contributed nothing because of an error",
        &["stage"]
    ).unwrap();

    static ref CANDIDATES_GENERATED: IntCounter = register_int_counter!(
        "dbmind_advisor_candidates_total",
        "Candidate indexes that survived validation"
    ).unwrap();

    static ref RUN_DURATION: Histogram = register_histogram!(
        HistogramOpts::new(
            "dbmind_advisor_run_duration_seconds",
            "Wall time of a complete advisor run"
        ).buckets(vec![0.01, 0.1, 1.0, 10.0, 60.0, 600.0])
    ).unwrap();
}

pub fn record_optimizer_call(purpose: &str, ok: bool) {
    let status = if ok { "ok" } else { "error" };
    OPTIMIZER_CALLS.with_label_values(&[purpose, status]).inc();
}

pub fn record_query_failure(stage: &str) {
    QUERY_FAILURES.with_label_values(&[stage]).inc();
}

pub fn record_candidates(count: usize) {
    CANDIDATES_GENERATED.inc_by(count as u64);
}

/// Observes the wall time of a run when dropped
pub struct RunTimer {
    start: Instant,
}

impl RunTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Drop for RunTimer {
    fn drop(&mut self) {
        RUN_DURATION.observe(self.start.elapsed().as_secs_f64());
    }
}

/// Export all advisor metrics in the Prometheus text format
pub fn gather_metrics() -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| Error::Generic(format!("Failed to encode metrics: {}", e)))?;
    String::from_utf8(buffer).map_err(|e| Error::Generic(format!("Invalid metrics text: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_show_up_in_export() {
        record_optimizer_call("cost", true);
        record_query_failure("validate");
        record_candidates(2);

        let text = gather_metrics().unwrap();
        assert!(text.contains("dbmind_advisor_optimizer_calls_total"));
        assert!(text.contains("dbmind_advisor_query_failures_total"));
    }
}
