//! Prometheus metrics for sessions and engine operations.
//!
//! Recording goes through the `metrics` facade and is a no-op until a
//! recorder is installed, so libraries and tests can record freely.
//!
//! # Example
//!
//! ```rust,no_run
//! use ems_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Serve metrics on port 9090
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use ems_core::{OpCode, Status};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics server.
///
/// Exposes metrics on an HTTP endpoint for Prometheus scraping.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a metrics server that will listen on `addr`
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Install the global recorder and spawn the HTTP exporter.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or a recorder is
    /// already installed.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let (recorder, exporter) = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let handle = recorder.handle();
        metrics::set_global_recorder(recorder).map_err(|e| MetricsError::Install(e.to_string()))?;

        let addr = self.addr;
        tokio::spawn(async move {
            // `ExporterError` implements neither `Debug` nor `Display` in 0.15.
            if exporter.await.is_err() {
                tracing::error!(%addr, "Metrics exporter stopped");
            }
        });

        tracing::info!(addr = %self.addr, "Metrics available at http://{}/metrics", self.addr);
        self.handle = Some(handle);
        Ok(())
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if the server hasn't been started.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    describe_counter!(
        "ems_operations_total",
        "Engine operations served, by op and outcome"
    );
    describe_histogram!(
        "ems_operation_duration_seconds",
        "Time taken to serve one engine operation"
    );
    describe_counter!(
        "ems_sessions_started_total",
        "Sessions activated by a worker"
    );
    describe_gauge!(
        "ems_sessions_active",
        "Session slots currently held, queued sessions included"
    );
    describe_gauge!(
        "ems_admission_queue_depth",
        "Admitted sessions waiting for a worker"
    );
}

/// Engine operation metrics recorder.
pub struct OperationMetrics;

impl OperationMetrics {
    /// Record one served operation.
    pub fn record(op: OpCode, status: Status, duration: Duration) {
        let outcome = if status.is_ok() { "ok" } else { "rejected" };
        counter!("ems_operations_total", "op" => op.name(), "outcome" => outcome).increment(1);
        histogram!("ems_operation_duration_seconds", "op" => op.name()).record(duration.as_secs_f64());
    }
}

/// Session lifecycle metrics recorder.
pub struct SessionMetrics;

impl SessionMetrics {
    /// A worker activated a session.
    pub fn record_started() {
        counter!("ems_sessions_started_total").increment(1);
    }

    /// A session slot was taken.
    pub fn record_slot_acquired() {
        gauge!("ems_sessions_active").increment(1.0);
    }

    /// A session slot was freed.
    pub fn record_slot_released() {
        gauge!("ems_sessions_active").decrement(1.0);
    }

    /// Current admission queue depth.
    pub fn record_queue_depth(depth: usize) {
        // Queue depth is bounded by the session count; f64 is exact far beyond it
        #[allow(clippy::cast_precision_loss)]
        gauge!("ems_admission_queue_depth").set(depth as f64);
    }
}
