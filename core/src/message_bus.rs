//! Message bus abstraction for the upstream publish/subscribe channel.
//!
//! This module provides the [`MessageBus`] trait: the capability the relay
//! needs from its upstream transport. It is deliberately small:
//!
//! - `subscribe(channel)` → a stream of raw messages
//! - `publish(channel, payload)` → ack or error
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐        ┌──────────────────┐
//! │  Instance A      │        │  Instance B      │
//! │  publish(update) │        │                  │
//! └────────┬─────────┘        └────────▲─────────┘
//!          │                           │
//!          ▼                           │
//! ┌────────────────────────────────────┴─────────┐
//! │   Bus channel "events:availability"          │◄─── every instance subscribes
//! └────────┬─────────────────────────────────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │  Instance A      │
//! │  (own subscriber)│
//! └──────────────────┘
//! ```
//!
//! # Delivery Semantics
//!
//! - **At-most-once**: messages published while a subscriber is not connected
//!   are lost to it. There is no replay.
//! - **Ordered per connection**: a subscriber sees messages in the order the
//!   bus delivered them on that connection.
//!
//! # Error Classes
//!
//! [`BusError`] distinguishes *connection-class* failures (the link is gone
//! or could not be established) from everything else. Only connection-class
//! failures should drive reconnect policies; see
//! [`BusError::is_connection_error`].
//!
//! # Implementations
//!
//! - `InMemoryBus` (testing crate) - deterministic, with fault injection
//! - `RedisBus` (redis crate) - Redis pub/sub for production

use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during message bus operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// Failed to establish a connection to the bus.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// An established connection was lost.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Failed to subscribe to a channel.
    #[error("Subscription failed for channel '{channel}': {reason}")]
    SubscriptionFailed {
        /// The channel that failed
        channel: String,
        /// The reason for failure
        reason: String,
        /// Whether the failure was caused by the transport
        transport: bool,
    },

    /// Failed to publish a message to a channel.
    #[error("Publish failed for channel '{channel}': {reason}")]
    PublishFailed {
        /// The channel that failed
        channel: String,
        /// The reason for failure
        reason: String,
    },

    /// The bus delivered something that is not a usable message.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Generic error for other failures.
    #[error("Message bus error: {0}")]
    Other(String),
}

impl BusError {
    /// Default connection-class classification.
    ///
    /// Connection-class failures mean the subscription itself is unusable and
    /// must be re-established. Protocol and other errors concern a single
    /// message or request and leave the subscription intact.
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        match self {
            Self::ConnectionFailed(_) | Self::ConnectionLost(_) => true,
            Self::SubscriptionFailed { transport, .. } => *transport,
            Self::PublishFailed { .. } | Self::Protocol(_) | Self::Other(_) => false,
        }
    }
}

/// A raw message received from a bus channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// The channel the message arrived on.
    pub channel: String,
    /// The undecoded payload.
    pub payload: Vec<u8>,
}

impl RawMessage {
    /// Create a new raw message.
    #[must_use]
    pub fn new(channel: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }
}

/// Stream of raw messages from a subscription.
///
/// Items are `Err` for failures reported by the transport. The stream ends
/// (`None`) when the subscription is gone for good; consumers treat that as
/// a lost connection.
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<RawMessage, BusError>> + Send>>;

/// Trait for message bus implementations.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; one instance is shared by the hub's
/// ingestion task and every publish call.
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
/// so it can be used as `Arc<dyn MessageBus>`.
///
/// # Example
///
/// ```rust,ignore
/// use futures::StreamExt;
///
/// bus.publish("events:availability", br#"{"eventId":"e1",...}"#).await?;
///
/// let mut stream = bus.subscribe("events:availability").await?;
/// while let Some(result) = stream.next().await {
///     match result {
///         Ok(message) => handle(message.payload),
///         Err(e) if e.is_connection_error() => break,
///         Err(e) => tracing::warn!(error = %e, "Skipping bad message"),
///     }
/// }
/// ```
pub trait MessageBus: Send + Sync {
    /// Publish a payload to a channel.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::PublishFailed`] (or a connection-class error) if the
    /// bus does not acknowledge the message.
    fn publish(
        &self,
        channel: &str,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + '_>>;

    /// Subscribe to a channel and receive a stream of raw messages.
    ///
    /// Only messages published after the subscription is established are
    /// delivered.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::ConnectionFailed`] or [`BusError::SubscriptionFailed`]
    /// if the subscription cannot be established.
    fn subscribe(
        &self,
        channel: &str,
    ) -> Pin<Box<dyn Future<Output = Result<MessageStream, BusError>> + Send + '_>>;
}
