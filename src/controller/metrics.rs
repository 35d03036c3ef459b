//! Operation Metrics
//!
//! Prometheus counters for lifecycle operations, labelled by operation and
//! outcome.

use crate::crd::OperationType;
use crate::error::{Error, Result};
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};

/// Counter of finished lifecycle operations
pub const OPERATIONS_TOTAL: &str = "csi_driver_lvm_operations_total";

/// Histogram of lifecycle operation durations
pub const OPERATION_DURATION: &str = "csi_driver_lvm_operation_duration_seconds";

/// Lifecycle operation metrics
#[derive(Debug, Clone)]
pub struct Metrics {
    operations: IntCounterVec,
    duration: HistogramVec,
}

impl Metrics {
    /// Create unregistered metrics
    pub fn new() -> Result<Self> {
        let operations = IntCounterVec::new(
            Opts::new(OPERATIONS_TOTAL, "Lifecycle operations by type and result"),
            &["operation", "result"],
        )
        .map_err(metrics_error)?;
        let duration = HistogramVec::new(
            HistogramOpts::new(OPERATION_DURATION, "Duration of lifecycle operations"),
            &["operation"],
        )
        .map_err(metrics_error)?;

        Ok(Self {
            operations,
            duration,
        })
    }

    /// Register the metrics with a registry
    pub fn register(&self, registry: &Registry) -> Result<()> {
        registry
            .register(Box::new(self.operations.clone()))
            .and_then(|_| registry.register(Box::new(self.duration.clone())))
            .map_err(metrics_error)
    }

    /// Record the outcome of one operation
    pub fn observe(&self, operation: OperationType, seconds: f64, result: &Result<()>) {
        let op = operation.to_string();
        let outcome = match result {
            Ok(()) => "success",
            Err(_) => "error",
        };
        self.operations
            .with_label_values(&[op.as_str(), outcome])
            .inc();
        self.duration
            .with_label_values(&[op.as_str()])
            .observe(seconds);
    }

    /// Number of recorded operations of a type and outcome
    pub fn count(&self, operation: OperationType, outcome: &str) -> u64 {
        self.operations
            .with_label_values(&[operation.to_string().as_str(), outcome])
            .get()
    }
}

fn metrics_error(err: prometheus::Error) -> Error {
    Error::Internal(format!("metrics: {}", err))
}
