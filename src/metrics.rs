//! Prometheus metrics for the data lake.
//!
//! Installs a global Prometheus recorder using `metrics-exporter-prometheus`
//! and defines the metric names the lake records.  Recording goes through
//! the `metrics` facade, so without an installed recorder every call is a
//! no-op.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;

use crate::errors::Result;

// -- Metric name constants ----------------------------------------------------

/// Total lake operations (counter). Labels: operation, backend, status.
pub const OPERATIONS_TOTAL: &str = "datalake_operations_total";

/// Lake operation duration in seconds (histogram). Labels: operation, backend.
pub const OPERATION_DURATION_SECONDS: &str = "datalake_operation_duration_seconds";

/// Total bytes written to object storage (counter).
pub const BYTES_UPLOADED_TOTAL: &str = "datalake_bytes_uploaded_total";

/// Total bytes read from object storage (counter).
pub const BYTES_DOWNLOADED_TOTAL: &str = "datalake_bytes_downloaded_total";

// -- Global recorder installation ---------------------------------------------

/// Singleton handle to the Prometheus recorder.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus metrics recorder. Idempotent -- safe to call
/// multiple times (e.g. in tests). Returns a reference to the global handle.
pub fn init_metrics() -> &'static PrometheusHandle {
    PROMETHEUS_HANDLE.get_or_init(|| {
        PrometheusBuilder::new()
            .install_recorder()
            .expect("failed to install Prometheus recorder")
    })
}

/// Register metric descriptions with the global recorder. Call once after
/// `init_metrics()`.
pub fn describe_metrics() {
    describe_counter!(OPERATIONS_TOTAL, "Total data lake operations by type");
    describe_histogram!(
        OPERATION_DURATION_SECONDS,
        "Data lake operation duration in seconds"
    );
    describe_counter!(BYTES_UPLOADED_TOTAL, "Total bytes uploaded to the lake");
    describe_counter!(BYTES_DOWNLOADED_TOTAL, "Total bytes downloaded from the lake");
}

/// Prometheus exposition text, or `None` if the recorder is not installed.
pub fn render() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(PrometheusHandle::render)
}

// -- Recording ----------------------------------------------------------------

/// `status` label: `ok`, or the error code of the failure.
fn status_label<T>(result: &Result<T>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(err) => err.code(),
    }
}

/// Record one finished lake operation.
pub(crate) fn record_operation<T>(
    operation: &'static str,
    backend: &'static str,
    result: &Result<T>,
    elapsed: Duration,
) {
    counter!(
        OPERATIONS_TOTAL,
        "operation" => operation,
        "backend" => backend,
        "status" => status_label(result)
    )
    .increment(1);
    histogram!(
        OPERATION_DURATION_SECONDS,
        "operation" => operation,
        "backend" => backend
    )
    .record(elapsed.as_secs_f64());
}

pub(crate) fn record_bytes_uploaded(bytes: usize) {
    counter!(BYTES_UPLOADED_TOTAL).increment(bytes as u64);
}

pub(crate) fn record_bytes_downloaded(bytes: usize) {
    counter!(BYTES_DOWNLOADED_TOTAL).increment(bytes as u64);
}

// -- Tests --------------------------------------------------------------------
