//! # Availability Relay Runtime
//!
//! The fan-out engine of the availability relay.
//!
//! This crate turns one upstream bus subscription into any number of
//! independent, per-event client streams, and keeps that subscription alive
//! across connection loss.
//!
//! ## Core Components
//!
//! - **`BroadcastHub`**: owns the upstream subscription, decodes updates,
//!   drives the reconnect state machine and exposes the publish path
//! - **`SubscriberRegistry`**: the multicast point; bounded per-subscriber
//!   queues filtered by event id, cancellation-isolated
//! - **`ReconnectBudget`**: bounded exponential backoff with a pluggable
//!   connection-class classifier
//! - **`HubState`**: explicit lifecycle, observable through a watch channel
//!   and mapped to a readiness health signal
//!
//! ## Example
//!
//! ```ignore
//! use availability_relay_runtime::{BroadcastHub, HubConfig};
//! use std::sync::Arc;
//!
//! let hub = BroadcastHub::new(Arc::new(bus), HubConfig::default());
//! let ingest = hub.start()?;
//!
//! let mut subscription = hub.subscribe("event-1")?;
//! while let Some(update) = subscription.recv().await {
//!     println!("{update}");
//! }
//!
//! ingest.shutdown().await;
//! ```

/// Health status types for readiness reporting
pub mod health;

/// The broadcast hub and its ingestion task
pub mod hub;

/// Prometheus metrics for observability
pub mod metrics;

/// Subscriber registry (multicast point)
pub mod registry;

/// Reconnect policy with exponential backoff
pub mod retry;

/// Hub lifecycle state
pub mod state;

/// In-process hub counters
pub mod stats;

pub use health::{HealthCheck, HealthStatus};
pub use hub::{BroadcastHub, HubBuilder, HubConfig, HubError, IngestTask};
pub use registry::{AvailabilityStream, SubscriberId, SubscriberRegistry, Subscription};
pub use retry::{Decision, ReconnectBudget, RetryClassifier, RetryPolicy};
pub use state::HubState;
pub use stats::StatsSnapshot;
