//! Prometheus metrics for the relay.
//!
//! The recorder is process-global. [`MetricsExporter::install`] registers the
//! metric descriptions and installs the Prometheus recorder; the web layer
//! serves [`MetricsExporter::render`] at `/metrics`.
//!
//! # Example
//!
//! ```rust,no_run
//! use availability_relay_runtime::metrics::MetricsExporter;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut exporter = MetricsExporter::new();
//! exporter.install()?;
//!
//! if let Some(text) = exporter.render() {
//!     println!("{text}");
//! }
//! # Ok(())
//! # }
//! ```

use crate::state::HubState;
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
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

/// Installs the Prometheus recorder and renders the scrape output.
#[derive(Default, Clone)]
pub struct MetricsExporter {
    handle: Option<PrometheusHandle>,
}

impl std::fmt::Debug for MetricsExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsExporter")
            .field("installed", &self.handle.is_some())
            .finish()
    }
}

impl MetricsExporter {
    /// Create an exporter that has not been installed yet.
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Describe all relay metrics and install the global recorder.
    ///
    /// # Errors
    ///
    /// Returns an error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// If a recorder is already installed (e.g., in tests), the call succeeds
    /// without a handle and [`render`](Self::render) returns `None`.
    pub fn install(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!("Prometheus recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Get the Prometheus handle.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus text format.
    ///
    /// Returns `None` if this exporter did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn register_metrics() {
    // Ingestion
    describe_counter!(
        "relay_updates_received_total",
        "Valid availability updates decoded from the bus"
    );
    describe_counter!(
        "relay_decode_errors_total",
        "Bus payloads dropped because they failed to decode or validate"
    );
    describe_counter!(
        "relay_upstream_errors_total",
        "Errors reported by the upstream subscription, by class"
    );

    // Fan-out
    describe_counter!(
        "relay_updates_delivered_total",
        "Updates handed to subscriber queues"
    );
    describe_counter!(
        "relay_delivery_overflow_total",
        "Updates discarded because a subscriber queue was full"
    );
    describe_gauge!(
        "relay_active_subscribers",
        "Currently registered subscribers"
    );

    // Connection lifecycle
    describe_gauge!(
        "relay_hub_state",
        "Hub state (0=disconnected, 1=connecting, 2=connected, 3=reconnecting, 4=exhausted)"
    );
    describe_counter!(
        "relay_reconnect_attempts_total",
        "Reconnect attempts scheduled after connection loss"
    );
    describe_counter!(
        "relay_retry_exhausted_total",
        "Times the reconnect budget was spent"
    );

    // Publish
    describe_counter!(
        "relay_messages_published_total",
        "Updates acknowledged by the bus"
    );
    describe_counter!(
        "relay_publish_errors_total",
        "Updates the bus failed to accept"
    );
    describe_histogram!(
        "relay_publish_duration_seconds",
        "Time taken to publish an update"
    );
}

/// Ingestion and connection-lifecycle metrics recorder.
pub struct HubMetrics;

impl HubMetrics {
    /// Record a decoded update.
    pub fn record_received() {
        counter!("relay_updates_received_total").increment(1);
    }

    /// Record a payload that failed to decode.
    pub fn record_decode_error() {
        counter!("relay_decode_errors_total").increment(1);
    }

    /// Record an error from the upstream subscription.
    pub fn record_upstream_error(connection_class: bool) {
        let class = if connection_class { "connection" } else { "message" };
        counter!("relay_upstream_errors_total", "class" => class).increment(1);
    }

    /// Record a scheduled reconnect.
    pub fn record_reconnect() {
        counter!("relay_reconnect_attempts_total").increment(1);
    }

    /// Record a spent reconnect budget.
    pub fn record_exhausted() {
        counter!("relay_retry_exhausted_total").increment(1);
    }

    /// Record a state transition.
    pub fn record_state(state: HubState) {
        gauge!("relay_hub_state").set(state.gauge_value());
    }
}

/// Subscriber fan-out metrics recorder.
pub struct DeliveryMetrics;

impl DeliveryMetrics {
    /// Record updates queued for subscribers.
    pub fn record_delivered(count: u64) {
        counter!("relay_updates_delivered_total").increment(count);
    }

    /// Record an update dropped for a slow subscriber.
    pub fn record_overflow() {
        counter!("relay_delivery_overflow_total").increment(1);
    }

    /// Record the current subscriber count.
    #[allow(clippy::cast_precision_loss)] // Subscriber counts are far below f64 precision limits
    pub fn record_subscribers(count: usize) {
        gauge!("relay_active_subscribers").set(count as f64);
    }
}

/// Publish metrics recorder.
pub struct PublishMetrics;

impl PublishMetrics {
    /// Record an acknowledged publish.
    pub fn record_publish(duration: Duration) {
        counter!("relay_messages_published_total").increment(1);
        histogram!("relay_publish_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a failed publish.
    pub fn record_publish_error() {
        counter!("relay_publish_errors_total").increment(1);
    }
}
