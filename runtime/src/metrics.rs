//! Prometheus metrics for the saga listeners.
//!
//! # Example
//!
//! ```rust,no_run
//! use shipkafka_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, histogram};

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

/// Prometheus scrape endpoint.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a metrics server bound to `addr` once started.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Install the global recorder and serve `/metrics` on the configured
    /// address. Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed. A recorder
    /// that is already installed is not an error.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let (recorder, exporter) = builder
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;
        let handle = recorder.handle();

        if metrics::set_global_recorder(recorder).is_err() {
            tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
            return Ok(());
        }

        tokio::spawn(async move {
            if let Err(e) = exporter.await {
                tracing::error!(error = ?e, "Metrics exporter stopped");
            }
        });

        self.handle = Some(handle);
        tracing::info!(
            addr = %self.addr,
            "Metrics server started - available at http://{}/metrics",
            self.addr
        );
        Ok(())
    }

    /// Current metrics in Prometheus text format, once started.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn register_metrics() {
    describe_counter!(
        "shipkafka_events_published_total",
        "Messages published, by topic"
    );
    describe_counter!(
        "shipkafka_messages_handled_total",
        "Messages settled by a listener, by topic and outcome"
    );
    describe_counter!(
        "shipkafka_redeliveries_total",
        "Redeliveries after a failed handler run, by topic"
    );
    describe_counter!(
        "shipkafka_dead_letters_total",
        "Messages routed to a dead-letter handler, by topic"
    );
    describe_counter!(
        "shipkafka_compensations_failed_total",
        "Dead-letter handlers that failed, by topic"
    );
    describe_counter!(
        "shipkafka_capacity_decisions_total",
        "Bookings decided by the capacity authority, by status"
    );
    describe_counter!(
        "shipkafka_bookings_canceled_total",
        "Bookings canceled by ship damage or compensation, by reason"
    );
    describe_histogram!(
        "shipkafka_publish_duration_seconds",
        "Time taken to publish one message"
    );
}

/// Publication metrics.
pub struct PublishMetrics;

impl PublishMetrics {
    /// Record a successful publish on `topic`.
    pub fn record(topic: &str, duration: Duration) {
        counter!("shipkafka_events_published_total", "topic" => topic.to_string()).increment(1);
        histogram!("shipkafka_publish_duration_seconds", "topic" => topic.to_string())
            .record(duration.as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::unwrap_used)] // Test code
    fn not_started_renders_nothing() {
        let server = MetricsServer::new("127.0.0.1:0".parse().unwrap());
        assert!(server.render().is_none());
    }

    #[test]
    fn recording_without_a_recorder_is_harmless() {
        PublishMetrics::record("booking-created", Duration::from_millis(3));
    }
}
