//! Application state for Axum handlers.

use availability_relay_runtime::BroadcastHub;
use availability_relay_runtime::metrics::MetricsExporter;

/// State shared by every handler.
///
/// Both fields are cheap to clone handles onto process-wide singletons.
#[derive(Clone, Debug)]
pub struct AppState {
    /// The process-wide broadcast hub
    pub hub: BroadcastHub,
    /// Prometheus exporter; renders nothing if metrics are disabled
    pub metrics: MetricsExporter,
}

impl AppState {
    /// Create state with metrics disabled.
    #[must_use]
    pub fn new(hub: BroadcastHub) -> Self {
        Self {
            hub,
            metrics: MetricsExporter::new(),
        }
    }

    /// Use an installed metrics exporter.
    #[must_use]
    pub fn with_metrics(mut self, metrics: MetricsExporter) -> Self {
        self.metrics = metrics;
        self
    }
}
