//! Batch summary and lock-heartbeat metrics, emitted only when the
//! `observability` feature is enabled. No-op stubs keep call sites
//! unconditional when it is not.

#[cfg(feature = "observability")]
pub use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! counter {
    ($($arg:tt)*) => {{
        struct NoopCounter;
        impl NoopCounter {
            fn increment(&self, _: u64) {}
        }
        NoopCounter
    }};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! gauge {
    ($($arg:tt)*) => {{
        struct NoopGauge;
        impl NoopGauge {
            fn set(&self, _: f64) {}
        }
        NoopGauge
    }};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! histogram {
    ($($arg:tt)*) => {{
        struct NoopHistogram;
        impl NoopHistogram {
            fn record(&self, _: f64) {}
        }
        NoopHistogram
    }};
}

#[cfg(not(feature = "observability"))]
pub use {counter, gauge, histogram};

/// Registers descriptions for every metric this crate emits, so a
/// Prometheus scrape carries `# HELP` text even before the first sample.
#[cfg(feature = "observability")]
pub fn describe_metrics() {
    describe_histogram!("pipeline_stage_duration_ms", "Per-stage duration for process_race");
    describe_counter!("pipeline_results_total", "process_race outcomes by status");
    describe_gauge!("batch_effective_concurrency", "Effective concurrency of the last batch run");
    describe_counter!("lock_heartbeats_total", "Heartbeat writes by job name");
}

#[cfg(not(feature = "observability"))]
pub fn describe_metrics() {}
