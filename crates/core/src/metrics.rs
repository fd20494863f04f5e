//! Prometheus metrics for the storage backends.
//!
//! This module provides metrics for:
//! - Writes, split into rows actually written and idempotent no-ops
//! - Operation latency per backend
//! - Recoveries from unreadable file stores

use std::time::Instant;

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts};

// =============================================================================
// Writes
// =============================================================================

/// Rows submitted for writing, by outcome.
pub static WRITES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("podstore_writes_total", "Rows submitted to a backend for writing"),
        &["backend", "entity", "outcome"], // outcome: "written", "unchanged"
    )
    .unwrap()
});

// =============================================================================
// Latency
// =============================================================================

/// Repository operation duration in seconds.
pub static OPERATION_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "podstore_operation_duration_seconds",
            "Duration of repository operations",
        )
        .buckets(vec![
            0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
        ]),
        &["backend", "operation"],
    )
    .unwrap()
});

// =============================================================================
// Recovery
// =============================================================================

/// Unreadable or corrupt stores that were treated as empty.
pub static STORE_RECOVERIES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "podstore_store_recoveries_total",
            "Corrupt or unreadable stores read as empty",
        ),
        &["backend"],
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Count one row write attempt.
pub fn record_write(backend: &str, entity: &str, written: bool) {
    let outcome = if written { "written" } else { "unchanged" };
    WRITES.with_label_values(&[backend, entity, outcome]).inc();
}

/// Observes the elapsed time of an operation when dropped.
pub struct OperationTimer {
    backend: &'static str,
    operation: &'static str,
    started: Instant,
}

impl OperationTimer {
    pub fn start(backend: &'static str, operation: &'static str) -> Self {
        Self {
            backend,
            operation,
            started: Instant::now(),
        }
    }
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        OPERATION_DURATION
            .with_label_values(&[self.backend, self.operation])
            .observe(self.started.elapsed().as_secs_f64());
    }
}

/// Get all metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(WRITES.clone()),
        Box::new(OPERATION_DURATION.clone()),
        Box::new(STORE_RECOVERIES.clone()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_write_increments_outcome() {
        let before = WRITES
            .with_label_values(&["test", "episode", "unchanged"])
            .get();
        record_write("test", "episode", false);
        let after = WRITES
            .with_label_values(&["test", "episode", "unchanged"])
            .get();
        assert_eq!(after, before + 1);
    }

    #[test]
    fn test_timer_observes_on_drop() {
        {
            let _timer = OperationTimer::start("test", "noop");
        }
        let count = OPERATION_DURATION
            .with_label_values(&["test", "noop"])
            .get_sample_count();
        assert!(count >= 1);
    }

    #[test]
    fn test_all_metrics_register() {
        let registry = prometheus::Registry::new();
        for metric in all_metrics() {
            registry.register(metric).unwrap();
        }
        record_write("test", "podcast", true);
        assert!(!registry.gather().is_empty());
    }
}
