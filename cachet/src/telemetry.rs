//! Prometheus-backed operation recorder.

use std::time::Duration;

use cachet_core::{CachetError, CachetResult, OperationRecorder};
use prometheus::{Encoder, HistogramOpts, HistogramVec, Registry, TextEncoder};
use tracing::warn;

/// Cache operation latency buckets (seconds)
/// Covers: 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 2.5s, 5s, 10s
const CACHE_LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0,
];

/// Label value used when an operation succeeded.
const NO_ERROR: &str = "none";

/// Records cache operation durations into a Prometheus histogram.
///
/// Histogram `cache_operation_duration_seconds`, labels: operation, adapter,
/// error_type.
#[derive(Clone)]
pub struct PrometheusRecorder {
    registry: Registry,
    operation_duration_seconds: HistogramVec,
}

impl PrometheusRecorder {
    /// Create a recorder with its own registry.
    pub fn new() -> CachetResult<Self> {
        Self::with_registry(Registry::new())
    }

    /// Create a recorder registered on `registry`.
    pub fn with_registry(registry: Registry) -> CachetResult<Self> {
        let operation_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "cache_operation_duration_seconds",
                "Cache operation duration in seconds",
            )
            .buckets(CACHE_LATENCY_BUCKETS.to_vec()),
            &["operation", "adapter", "error_type"],
        )
        .map_err(|e| telemetry_error(format!("Failed to create cache_operation_duration_seconds: {}", e)))?;

        registry
            .register(Box::new(operation_duration_seconds.clone()))
            .map_err(|e| telemetry_error(format!("Failed to register cache_operation_duration_seconds: {}", e)))?;

        Ok(Self {
            registry,
            operation_duration_seconds,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn histogram(&self) -> &HistogramVec {
        &self.operation_duration_seconds
    }

    /// Render every metric in the registry in the Prometheus text format.
    pub fn gather_text(&self) -> CachetResult<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| telemetry_error(format!("Failed to encode metrics: {}", e)))?;
        String::from_utf8(buffer).map_err(|e| telemetry_error(format!("Metrics are not UTF-8: {}", e)))
    }
}

impl OperationRecorder for PrometheusRecorder {
    fn record(&self, operation: &str, adapter: &str, elapsed: Duration, error_type: Option<&str>) {
        let error_type = error_type.unwrap_or(NO_ERROR);
        match self
            .operation_duration_seconds
            .get_metric_with_label_values(&[operation, adapter, error_type])
        {
            Ok(histogram) => histogram.observe(elapsed.as_secs_f64()),
            Err(e) => warn!(operation, adapter, error = %e, "Failed to record cache operation"),
        }
    }
}

impl std::fmt::Debug for PrometheusRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusRecorder").finish_non_exhaustive()
    }
}

fn telemetry_error(reason: String) -> CachetError {
    CachetError::Config(cachet_core::ConfigError::InvalidValue {
        field: "telemetry".to_string(),
        value: "cache_operation_duration_seconds".to_string(),
        reason,
    })
}
