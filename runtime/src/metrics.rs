//! Prometheus metrics for observability and monitoring.
//!
//! This module provides metric collection for the service components:
//! - Event processing outcomes and apply latency
//! - Query latency
//! - Repository write conflicts (recorded by `microservices-postgres`)
//! - Registry size and evictions (recorded by `microservices-registry`)
//!
//! # Example
//!
//! ```rust,no_run
//! use microservices_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Exposition text for a `/metrics` route
//! let text = server.render();
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
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

/// Prometheus recorder plus the address its scrape endpoint is served on.
///
/// The recorder is process-global. The owning binary serves
/// [`render`](Self::render) on the address given to [`new`](Self::new).
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address to bind to (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Describe all metrics and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// If a recorder is already installed (e.g., in tests), this logs a warning
    /// and [`render`](Self::render) keeps returning `None`.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(addr = %self.addr, "Metrics recorder installed");
                Ok(())
            },
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            },
        }
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if server hasn't been started.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    describe_counter!(
        "events_processed_total",
        "Events handled by the consumer, by aggregate and outcome"
    );
    describe_histogram!(
        "event_apply_duration_seconds",
        "Time taken to decode and apply one event"
    );
    describe_counter!(
        "event_deliveries_total",
        "Deliveries acknowledged or rejected by the consumer"
    );
    describe_histogram!(
        "query_duration_seconds",
        "Time taken to serve one read"
    );
    describe_counter!(
        "repository_conflicts_total",
        "Writes rejected for a duplicate natural key or a stale version"
    );
    describe_gauge!("registry_instances", "Instances held by the registry");
    describe_counter!(
        "registry_evictions_total",
        "Instances removed because their lease expired"
    );
}

/// Event consumer metrics recorder.
pub struct ConsumerMetrics;

impl ConsumerMetrics {
    /// Record one processed event.
    pub fn record(aggregate: &'static str, outcome: &'static str, duration: Duration) {
        counter!("events_processed_total", "aggregate" => aggregate, "outcome" => outcome)
            .increment(1);
        histogram!("event_apply_duration_seconds", "aggregate" => aggregate)
            .record(duration.as_secs_f64());
    }

    /// Record the acknowledgement sent for a delivery.
    pub fn record_delivery(consumer: &str, acked: bool) {
        let result = if acked { "ack" } else { "nack" };
        counter!("event_deliveries_total", "consumer" => consumer.to_string(), "result" => result)
            .increment(1);
    }
}

/// Query service metrics recorder.
pub struct QueryMetrics;

impl QueryMetrics {
    /// Record one read.
    pub fn record(aggregate: &'static str, duration: Duration) {
        histogram!("query_duration_seconds", "aggregate" => aggregate)
            .record(duration.as_secs_f64());
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn metrics_server_creation() {
        let server = MetricsServer::new("127.0.0.1:0".parse().unwrap());
        assert!(server.render().is_none());
    }

    #[test]
    fn metrics_server_start_is_repeatable() {
        let mut first = MetricsServer::new("127.0.0.1:0".parse().unwrap());
        assert!(first.start().is_ok());

        // A second recorder cannot be installed; start still succeeds.
        let mut second = MetricsServer::new("127.0.0.1:0".parse().unwrap());
        assert!(second.start().is_ok());
    }

    #[test]
    fn recording_without_recorder_is_a_no_op() {
        ConsumerMetrics::record("product", "created", Duration::from_millis(3));
        ConsumerMetrics::record_delivery("product-consumer", true);
        QueryMetrics::record("product", Duration::from_millis(1));
    }
}
