//! Metrics and telemetry for the aggregation engine
//!
//! Prometheus collectors for query execution, shard fan-out, bucket folding
//! and worker pool pressure.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge_vec, register_histogram_vec, Counter,
    CounterVec, Encoder, GaugeVec, HistogramVec, TextEncoder,
};

lazy_static! {
    // === Query Counters ===

    /// Total queries by final status
    pub static ref QUERIES_TOTAL: CounterVec = register_counter_vec!(
        "kuba_queries_total",
        "Total aggregation queries executed",
        &["status"]
    ).unwrap();

    /// Shard fetches by outcome (resolved, failed, cancelled)
    pub static ref FETCHES_TOTAL: CounterVec = register_counter_vec!(
        "kuba_fetches_total",
        "Shard fetches by terminal outcome",
        &["outcome"]
    ).unwrap();

    // === Aggregation Counters ===

    /// Samples folded into at least one bucket
    pub static ref SAMPLES_APPLIED: Counter = register_counter!(
        "kuba_samples_applied_total",
        "Samples folded into at least one bucket"
    ).unwrap();

    /// Samples dropped because they fell outside every bucket window
    pub static ref SAMPLES_OUT_OF_BOUNDS: Counter = register_counter!(
        "kuba_samples_out_of_bounds_total",
        "Samples outside the aggregation extent"
    ).unwrap();

    // === Pool Gauges ===

    /// Tasks waiting for a worker, per pool
    pub static ref POOL_QUEUED: GaugeVec = register_gauge_vec!(
        "kuba_pool_queued_tasks",
        "Tasks queued on a worker pool",
        &["pool"]
    ).unwrap();

    /// Tasks rejected because the pool queue was full
    pub static ref POOL_REJECTED: CounterVec = register_counter_vec!(
        "kuba_pool_rejected_total",
        "Tasks rejected by a saturated worker pool",
        &["pool"]
    ).unwrap();

    // === Latency Histograms ===

    /// End-to-end query latency
    pub static ref QUERY_DURATION: HistogramVec = register_histogram_vec!(
        "kuba_query_duration_seconds",
        "Aggregation query latency in seconds",
        &["status"],
        vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0]
    ).unwrap();
}

/// Record `count` shard fetches that ended with `outcome`
pub fn record_fetches(outcome: &str, count: u64) {
    FETCHES_TOTAL.with_label_values(&[outcome]).inc_by(count as f64);
}

/// Record a finished query
pub fn record_query(status: &str, seconds: f64) {
    QUERIES_TOTAL.with_label_values(&[status]).inc();
    QUERY_DURATION.with_label_values(&[status]).observe(seconds);
}

/// Render all registered metrics in the Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_render() {
        record_fetches("resolved", 3);
        record_query("ok", 0.002);
        POOL_QUEUED.with_label_values(&["read"]).set(0.0);

        let text = gather_metrics();
        assert!(text.contains("kuba_fetches_total"));
        assert!(text.contains("kuba_queries_total"));
    }
}
