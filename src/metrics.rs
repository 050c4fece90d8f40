//! Prometheus metrics for benchmark runs
//!
//! Features:
//! - Skeleton mutations by outcome
//! - Cell writes, retries and in-flight writes
//! - Bulk reads by outcome
//! - Per-phase durations

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use tracing::{error, info};

lazy_static::lazy_static! {
    /// Global metrics registry
    pub static ref METRICS_REGISTRY: Registry = Registry::new();

    pub static ref SKELETON_MUTATIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("hybridtable_skeleton_mutations_total", "Structural mutations against the skeleton store"),
        &["phase", "status"]
    ).unwrap();

    pub static ref CELL_WRITES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("hybridtable_cell_writes_total", "Row record writes against the cell store"),
        &["status"]
    ).unwrap();

    pub static ref CELL_WRITE_RETRIES_TOTAL: IntCounter = IntCounter::new(
        "hybridtable_cell_write_retries_total",
        "Row record writes issued again after a failure"
    ).unwrap();

    pub static ref CELL_WRITES_IN_FLIGHT: IntGauge = IntGauge::new(
        "hybridtable_cell_writes_in_flight",
        "Row record writes currently admitted"
    ).unwrap();

    pub static ref BATCH_READS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("hybridtable_batch_reads_total", "Bulk reads against the cell store"),
        &["status"]
    ).unwrap();

    pub static ref PHASE_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "hybridtable_phase_duration_seconds",
            "Benchmark phase duration in seconds"
        ).buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0]),
        &["phase"]
    ).unwrap();
}

/// Initialize metrics registry
pub fn init_metrics() {
    info!("Initializing Prometheus metrics");

    METRICS_REGISTRY.register(Box::new(SKELETON_MUTATIONS_TOTAL.clone())).ok();
    METRICS_REGISTRY.register(Box::new(CELL_WRITES_TOTAL.clone())).ok();
    METRICS_REGISTRY.register(Box::new(CELL_WRITE_RETRIES_TOTAL.clone())).ok();
    METRICS_REGISTRY.register(Box::new(CELL_WRITES_IN_FLIGHT.clone())).ok();
    METRICS_REGISTRY.register(Box::new(BATCH_READS_TOTAL.clone())).ok();
    METRICS_REGISTRY.register(Box::new(PHASE_DURATION.clone())).ok();
}

fn status(success: bool) -> &'static str {
    if success {
        "success"
    } else {
        "error"
    }
}

pub fn record_mutation(phase: &str, success: bool) {
    SKELETON_MUTATIONS_TOTAL
        .with_label_values(&[phase, status(success)])
        .inc();
}

pub fn record_write(success: bool) {
    CELL_WRITES_TOTAL.with_label_values(&[status(success)]).inc();
}

pub fn record_retry() {
    CELL_WRITE_RETRIES_TOTAL.inc();
}

pub fn record_batch_read(success: bool) {
    BATCH_READS_TOTAL.with_label_values(&[status(success)]).inc();
}

pub fn observe_phase(phase: &str, seconds: f64) {
    PHASE_DURATION.with_label_values(&[phase]).observe(seconds);
}

/// Export all metrics in Prometheus text format
pub fn export_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = METRICS_REGISTRY.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return String::from("# Error encoding metrics\n");
    }

    String::from_utf8(buffer).unwrap_or_else(|_| String::from("# Error converting metrics\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics() {
        init_metrics();
        init_metrics();
    }

    #[test]
    fn test_export_contains_recorded_series() {
        init_metrics();
        record_write(true);
        record_batch_read(false);
        observe_phase("fill", 0.2);

        let output = export_metrics();
        assert!(output.contains("hybridtable_cell_writes_total"));
        assert!(output.contains("hybridtable_batch_reads_total"));
        assert!(output.contains("hybridtable_phase_duration_seconds"));
    }

    #[test]
    fn test_retry_counter_increments() {
        let before = CELL_WRITE_RETRIES_TOTAL.get();
        record_retry();
        assert!(CELL_WRITE_RETRIES_TOTAL.get() > before);
    }
}
