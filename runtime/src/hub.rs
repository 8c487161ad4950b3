//! The broadcast hub: one upstream subscription, many local subscribers.
//!
//! # Lifecycle
//!
//! The hub is constructed once at startup with [`BroadcastHub::new`] (or
//! [`BroadcastHub::builder`]) and started with [`BroadcastHub::start`], which
//! spawns the ingestion task and returns its [`IngestTask`] guard. Clones of
//! the hub are handed to request handlers; they all share the same state.
//!
//! ```rust,ignore
//! let hub = BroadcastHub::new(Arc::new(bus), HubConfig::default());
//! let ingest = hub.start()?;
//!
//! let mut updates = hub.subscribe("event-1")?.into_stream();
//! hub.publish(AvailabilityUpdate::new("event-1", 90, 10))?;
//!
//! ingest.shutdown().await;
//! ```
//!
//! # Ingestion
//!
//! The ingestion task subscribes to the hub's channel, decodes each message
//! and emits it to the [`SubscriberRegistry`]. Connection-class failures,
//! including the upstream stream ending, drive the [`ReconnectBudget`];
//! other stream errors and undecodable payloads are logged and skipped.

use crate::health::{HealthCheck, HealthStatus};
use crate::metrics::{HubMetrics, PublishMetrics};
use crate::registry::{SubscriberRegistry, Subscription};
use crate::retry::{Decision, ReconnectBudget, RetryClassifier, RetryPolicy};
use crate::state::HubState;
use crate::stats::{HubStats, StatsSnapshot};
use availability_relay_core::{
    AVAILABILITY_CHANNEL, AvailabilityUpdate, BusError, DecodeError, MessageBus,
    ValidationError, codec,
};
use futures::StreamExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

/// Errors returned by [`BroadcastHub`] operations.
#[derive(Error, Debug)]
pub enum HubError {
    /// `start()` was called on a hub that is already running or has run.
    #[error("Hub already started (state: {0})")]
    AlreadyStarted(HubState),

    /// A subscription was requested for an empty event id.
    #[error("eventId must not be empty")]
    InvalidEventId,

    /// The update failed validation.
    #[error("Invalid update: {0}")]
    InvalidUpdate(#[from] ValidationError),

    /// The update could not be encoded.
    #[error("Encoding failed: {0}")]
    Encode(#[from] DecodeError),

    /// The bus rejected the publish.
    #[error("Publish failed: {0}")]
    Publish(#[from] BusError),
}

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Bus channel used for both publish and subscribe
    pub channel: String,
    /// Reconnect policy for the upstream subscription
    pub retry: RetryPolicy,
    /// Per-subscriber queue bound
    pub subscriber_buffer: usize,
    /// How long [`IngestTask::shutdown`] waits before aborting
    pub shutdown_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            channel: AVAILABILITY_CHANNEL.to_string(),
            retry: RetryPolicy::default(),
            subscriber_buffer: 256,
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl HubConfig {
    /// Set the bus channel.
    #[must_use]
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    /// Set the reconnect policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the per-subscriber queue bound.
    #[must_use]
    pub const fn with_subscriber_buffer(mut self, subscriber_buffer: usize) -> Self {
        self.subscriber_buffer = subscriber_buffer;
        self
    }

    /// Set the graceful shutdown timeout.
    #[must_use]
    pub const fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Builder for [`BroadcastHub`].
pub struct HubBuilder {
    bus: Arc<dyn MessageBus>,
    config: HubConfig,
    classifier: RetryClassifier,
}

impl HubBuilder {
    /// Replace the configuration.
    #[must_use]
    pub fn config(mut self, config: HubConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the connection-class predicate used to decide reconnects.
    #[must_use]
    pub fn classifier(
        mut self,
        predicate: impl Fn(&BusError) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.classifier = RetryClassifier::new(predicate);
        self
    }

    /// Build the hub. It does nothing until [`BroadcastHub::start`].
    #[must_use]
    pub fn build(self) -> BroadcastHub {
        let stats = Arc::new(HubStats::default());
        let registry = SubscriberRegistry::new(self.config.subscriber_buffer, Arc::clone(&stats));
        let (state_tx, _) = watch::channel(HubState::Disconnected);

        BroadcastHub {
            inner: Arc::new(HubInner {
                bus: self.bus,
                config: self.config,
                classifier: self.classifier,
                registry,
                state_tx,
                started: AtomicBool::new(false),
                stats,
            }),
        }
    }
}

struct HubInner {
    bus: Arc<dyn MessageBus>,
    config: HubConfig,
    classifier: RetryClassifier,
    registry: SubscriberRegistry,
    state_tx: watch::Sender<HubState>,
    started: AtomicBool,
    stats: Arc<HubStats>,
}

impl HubInner {
    fn set_state(&self, state: HubState) {
        let previous = self.state_tx.send_replace(state);
        HubMetrics::record_state(state);
        if previous != state {
            tracing::debug!(from = %previous, to = %state, "Hub state changed");
        }
    }
}

/// Bridges one upstream bus subscription to any number of local subscribers.
///
/// Cloning is cheap; clones share the same subscription, registry and state.
#[derive(Clone)]
pub struct BroadcastHub {
    inner: Arc<HubInner>,
}

impl BroadcastHub {
    /// Create a hub with the default connection-class classifier.
    #[must_use]
    pub fn new(bus: Arc<dyn MessageBus>, config: HubConfig) -> Self {
        Self::builder(bus).config(config).build()
    }

    /// Start building a hub over `bus`.
    #[must_use]
    pub fn builder(bus: Arc<dyn MessageBus>) -> HubBuilder {
        HubBuilder {
            bus,
            config: HubConfig::default(),
            classifier: RetryClassifier::default(),
        }
    }

    /// Spawn the ingestion task.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::AlreadyStarted`] on every call after the first.
    pub fn start(&self) -> Result<IngestTask, HubError> {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return Err(HubError::AlreadyStarted(self.state()));
        }

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let ingest = Ingest {
            budget: ReconnectBudget::new(self.inner.config.retry.clone()),
            inner: Arc::clone(&self.inner),
            connected_at: None,
        };
        let handle = tokio::spawn(ingest.run(shutdown_rx));

        Ok(IngestTask {
            handle: Some(handle),
            shutdown_tx,
            hub: self.clone(),
        })
    }

    /// Subscribe to updates for one event, starting from now.
    ///
    /// Succeeds in every hub state. While the hub is not connected the
    /// subscription simply receives nothing.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::InvalidEventId`] if `event_id` is empty.
    pub fn subscribe(&self, event_id: &str) -> Result<Subscription, HubError> {
        if event_id.trim().is_empty() {
            return Err(HubError::InvalidEventId);
        }
        Ok(self.inner.registry.register(event_id))
    }

    /// Publish an update without waiting for the bus.
    ///
    /// The update is validated here; the bus round trip runs on a detached
    /// task whose outcome is only logged and counted. Subscribers see the
    /// update once it comes back through the hub's own subscription.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::InvalidUpdate`] if the update fails validation.
    pub fn publish(&self, update: AvailabilityUpdate) -> Result<(), HubError> {
        update.validate()?;
        let hub = self.clone();
        tokio::spawn(async move {
            // Outcome is logged and counted by try_publish.
            let _ = hub.try_publish(&update).await;
        });
        Ok(())
    }

    /// Publish an update and wait for the bus to acknowledge it.
    ///
    /// # Errors
    ///
    /// Returns an error if the update is invalid, cannot be encoded, or the
    /// bus rejects it.
    pub async fn try_publish(&self, update: &AvailabilityUpdate) -> Result<(), HubError> {
        update.validate()?;
        let payload = codec::encode(update)?;
        let channel = &self.inner.config.channel;

        let started = Instant::now();
        match self.inner.bus.publish(channel, &payload).await {
            Ok(()) => {
                self.inner.stats.record_published();
                PublishMetrics::record_publish(started.elapsed());
                tracing::debug!(
                    event_id = %update.event_id,
                    channel = %channel,
                    "Published availability update"
                );
                Ok(())
            }
            Err(e) => {
                self.inner.stats.record_publish_failure();
                PublishMetrics::record_publish_error();
                tracing::warn!(
                    event_id = %update.event_id,
                    channel = %channel,
                    error = %e,
                    "Failed to publish availability update"
                );
                Err(e.into())
            }
        }
    }

    /// Current hub state.
    #[must_use]
    pub fn state(&self) -> HubState {
        *self.inner.state_tx.borrow()
    }

    /// Receiver that observes every state change.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<HubState> {
        self.inner.state_tx.subscribe()
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// The bus channel this hub publishes to and subscribes on.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.inner.config.channel
    }

    /// Health of the upstream subscription, for readiness probes.
    #[must_use]
    pub fn health(&self) -> HealthCheck {
        const COMPONENT: &str = "broadcast_hub";

        let state = self.state();
        let check = match state.health() {
            HealthStatus::Healthy => HealthCheck::healthy(COMPONENT),
            HealthStatus::Degraded => {
                HealthCheck::degraded(COMPONENT, format!("upstream subscription {state}"))
            }
            HealthStatus::Unhealthy => HealthCheck::unhealthy(
                COMPONENT,
                "reconnect budget exhausted, restart required",
            ),
        };

        check
            .with_metadata("state", state.to_string())
            .with_metadata("channel", self.channel())
            .with_metadata("subscribers", self.subscriber_count().to_string())
    }

    /// End every live subscription so their streams finish.
    ///
    /// Used on shutdown so long-lived client streams do not hold the server
    /// open. Later subscriptions are closed immediately.
    pub fn close_subscriptions(&self) {
        self.inner.registry.close_all();
    }
}

impl std::fmt::Debug for BroadcastHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastHub")
            .field("channel", &self.inner.config.channel)
            .field("state", &self.state())
            .field("subscribers", &self.subscriber_count())
            .finish_non_exhaustive()
    }
}

/// Guard for the running ingestion task.
///
/// [`shutdown`](Self::shutdown) stops ingestion gracefully. Dropping the
/// guard on any other path aborts the task, which drops the upstream
/// subscription.
#[derive(Debug)]
pub struct IngestTask {
    handle: Option<JoinHandle<()>>,
    shutdown_tx: broadcast::Sender<()>,
    hub: BroadcastHub,
}

impl IngestTask {
    /// Whether the ingestion task has finished (shutdown or exhausted).
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Stop ingestion and close all subscriptions.
    ///
    /// Waits up to the configured shutdown timeout, then aborts.
    pub async fn shutdown(mut self) {
        let timeout = self.hub.inner.config.shutdown_timeout;
        tracing::info!(timeout_secs = timeout.as_secs(), "Stopping availability ingestion");

        // The task may already have exited after exhausting its budget.
        let _ = self.shutdown_tx.send(());

        if let Some(mut handle) = self.handle.take() {
            if tokio::time::timeout(timeout, &mut handle).await.is_err() {
                tracing::warn!("Ingestion task did not stop in time, aborting");
                handle.abort();
                self.hub.inner.set_state(HubState::Disconnected);
            }
        }

        self.hub.close_subscriptions();
    }
}

impl Drop for IngestTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// How one subscribe-and-pump session ended.
enum SessionEnd {
    /// Connection-class failure; consult the reconnect budget.
    Lost(BusError),
    /// Subscribe failed with an error the classifier does not retry.
    Fatal(BusError),
}

struct Ingest {
    inner: Arc<HubInner>,
    budget: ReconnectBudget,
    connected_at: Option<tokio::time::Instant>,
}

impl Ingest {
    async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let channel = self.inner.config.channel.clone();
        tracing::info!(channel = %channel, "Starting availability ingestion");
        self.inner.set_state(HubState::Connecting);

        loop {
            let end = tokio::select! {
                _ = shutdown.recv() => break,
                end = self.session(&channel) => end,
            };

            let error = match end {
                SessionEnd::Lost(error) => error,
                SessionEnd::Fatal(error) => {
                    self.inner.set_state(HubState::Exhausted);
                    HubMetrics::record_exhausted();
                    tracing::error!(
                        channel = %channel,
                        error = %error,
                        "Subscription failed with non-retryable error, ingestion stopped"
                    );
                    return;
                }
            };

            if let Some(since) = self.connected_at.take() {
                let uptime = since.elapsed();
                if self.budget.on_disconnect(uptime) {
                    tracing::debug!(
                        channel = %channel,
                        uptime_secs = uptime.as_secs(),
                        "Lost a stable connection, starting a fresh reconnect sequence"
                    );
                }
            }

            match self.budget.on_failure() {
                Decision::Retry { attempt, delay } => {
                    self.inner.set_state(HubState::Reconnecting { attempt });
                    self.inner.stats.record_reconnect();
                    HubMetrics::record_reconnect();
                    tracing::warn!(
                        channel = %channel,
                        attempt,
                        max_attempts = self.budget.policy().max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %error,
                        "Upstream connection lost, reconnecting"
                    );

                    tokio::select! {
                        _ = shutdown.recv() => break,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                Decision::Exhausted { failures } => {
                    self.inner.set_state(HubState::Exhausted);
                    HubMetrics::record_exhausted();
                    tracing::error!(
                        channel = %channel,
                        failures,
                        error = %error,
                        "Reconnect budget exhausted, no further updates will be relayed"
                    );
                    return;
                }
            }
        }

        self.inner.set_state(HubState::Disconnected);
        tracing::info!(channel = %channel, "Availability ingestion stopped");
    }

    async fn session(&mut self, channel: &str) -> SessionEnd {
        let mut stream = match self.inner.bus.subscribe(channel).await {
            Ok(stream) => stream,
            Err(e) if self.inner.classifier.is_retryable(&e) => {
                HubMetrics::record_upstream_error(true);
                return SessionEnd::Lost(e);
            }
            Err(e) => return SessionEnd::Fatal(e),
        };

        self.connected_at = Some(tokio::time::Instant::now());
        self.inner.set_state(HubState::Connected);
        tracing::info!(channel = %channel, "Subscribed to availability channel");

        while let Some(item) = stream.next().await {
            match item {
                Ok(message) => {
                    self.budget.on_message();
                    self.dispatch(&message.payload);
                }
                Err(e) if self.inner.classifier.is_retryable(&e) => {
                    HubMetrics::record_upstream_error(true);
                    return SessionEnd::Lost(e);
                }
                Err(e) => {
                    self.inner.stats.record_stream_error();
                    HubMetrics::record_upstream_error(false);
                    tracing::warn!(channel = %channel, error = %e, "Skipping upstream error");
                }
            }
        }

        HubMetrics::record_upstream_error(true);
        SessionEnd::Lost(BusError::ConnectionLost(
            "subscription stream ended".to_string(),
        ))
    }

    fn dispatch(&self, payload: &[u8]) {
        match codec::decode(payload) {
            Ok(update) => {
                self.inner.stats.record_received();
                HubMetrics::record_received();
                let delivered = self.inner.registry.emit(&update);
                tracing::debug!(
                    event_id = %update.event_id,
                    available_capacity = update.available_capacity,
                    reserved_count = update.reserved_count,
                    delivered,
                    "Relayed availability update"
                );
            }
            Err(e) => {
                self.inner.stats.record_decode_error();
                HubMetrics::record_decode_error();
                tracing::warn!(
                    error = %e,
                    bytes = payload.len(),
                    "Dropping undecodable availability message"
                );
            }
        }
    }
}
