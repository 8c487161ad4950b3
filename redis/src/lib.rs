//! Redis pub/sub message bus for the availability relay.
//!
//! This crate provides [`RedisBus`], the production implementation of the
//! [`MessageBus`] trait from `availability-relay-core`.
//!
//! # Connections
//!
//! - **Publish** goes through a shared [`ConnectionManager`], created on the
//!   first publish and reconnecting on its own afterwards.
//! - **Subscribe** opens a dedicated pub/sub connection per call. When that
//!   connection goes away the stream yields [`BusError::ConnectionLost`] and
//!   ends; re-subscribing is the caller's decision (the hub's reconnect
//!   policy).
//!
//! # Delivery Semantics
//!
//! Redis pub/sub is **at-most-once**: messages published while a subscriber
//! is disconnected are not delivered to it.
//!
//! # Example
//!
//! ```no_run
//! use availability_relay_core::MessageBus;
//! use availability_relay_redis::RedisBus;
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = RedisBus::new("redis://127.0.0.1:6379")?;
//!
//! let mut stream = bus.subscribe("events:availability").await?;
//! bus.publish("events:availability", br#"{"eventId":"e1","availableCapacity":1,"reservedCount":0}"#).await?;
//!
//! while let Some(result) = stream.next().await {
//!     match result {
//!         Ok(message) => println!("{} bytes", message.payload.len()),
//!         Err(e) => eprintln!("Error: {e}"),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use availability_relay_core::{BusError, MessageBus, MessageStream, RawMessage};
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::OnceCell;

/// Redis pub/sub bus.
///
/// # Example
///
/// ```no_run
/// use availability_relay_redis::RedisBus;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// // Basic configuration
/// let bus = RedisBus::new("redis://localhost:6379")?;
///
/// // Custom configuration
/// let bus = RedisBus::builder()
///     .url("redis://redis.internal:6379")
///     .connect_timeout(Duration::from_secs(2))
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RedisBus {
    client: Client,
    url: String,
    connect_timeout: Duration,
    publisher: OnceCell<ConnectionManager>,
}

impl RedisBus {
    /// Create a bus for the Redis server at `url`.
    ///
    /// No connection is made until the first publish or subscribe.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::ConnectionFailed`] if the URL is invalid.
    pub fn new(url: &str) -> Result<Self, BusError> {
        Self::builder().url(url).build()
    }

    /// Create a builder for custom configuration.
    #[must_use]
    pub fn builder() -> RedisBusBuilder {
        RedisBusBuilder::default()
    }

    /// The configured Redis URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn publisher(&self) -> Result<ConnectionManager, BusError> {
        let manager = self
            .publisher
            .get_or_try_init(|| async {
                let connect = ConnectionManager::new(self.client.clone());
                match tokio::time::timeout(self.connect_timeout, connect).await {
                    Ok(Ok(manager)) => {
                        tracing::info!("Redis publish connection established");
                        Ok(manager)
                    }
                    Ok(Err(e)) => Err(BusError::ConnectionFailed(e.to_string())),
                    Err(_) => Err(BusError::ConnectionFailed(format!(
                        "connect timed out after {:?}",
                        self.connect_timeout
                    ))),
                }
            })
            .await?;
        Ok(manager.clone())
    }
}

impl std::fmt::Debug for RedisBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBus")
            .field("connect_timeout", &self.connect_timeout)
            .field("publisher_ready", &self.publisher.initialized())
            .finish_non_exhaustive()
    }
}

/// Builder for configuring a [`RedisBus`].
#[derive(Debug, Default)]
pub struct RedisBusBuilder {
    url: Option<String>,
    connect_timeout: Option<Duration>,
}

impl RedisBusBuilder {
    /// Set the Redis URL (e.g., `redis://localhost:6379`).
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Set the timeout for establishing connections.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Build the [`RedisBus`].
    ///
    /// # Errors
    ///
    /// Returns [`BusError::ConnectionFailed`] if the URL is missing or invalid.
    pub fn build(self) -> Result<RedisBus, BusError> {
        let url = self
            .url
            .ok_or_else(|| BusError::ConnectionFailed("Redis URL not configured".to_string()))?;
        let client = Client::open(url.as_str())
            .map_err(|e| BusError::ConnectionFailed(format!("Invalid Redis URL: {e}")))?;

        Ok(RedisBus {
            client,
            url,
            connect_timeout: self.connect_timeout.unwrap_or(Duration::from_secs(5)),
            publisher: OnceCell::new(),
        })
    }
}

/// Whether a Redis error means the connection itself is unusable.
fn is_connection_class(error: &RedisError) -> bool {
    error.is_io_error()
        || error.is_connection_refusal()
        || error.is_timeout()
        || error.is_connection_dropped()
}

fn subscribe_error(channel: &str, error: &RedisError) -> BusError {
    BusError::SubscriptionFailed {
        channel: channel.to_string(),
        reason: error.to_string(),
        transport: is_connection_class(error),
    }
}

fn publish_error(channel: &str, error: &RedisError) -> BusError {
    if is_connection_class(error) {
        BusError::ConnectionLost(error.to_string())
    } else {
        BusError::PublishFailed {
            channel: channel.to_string(),
            reason: error.to_string(),
        }
    }
}

impl MessageBus for RedisBus {
    fn publish(
        &self,
        channel: &str,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + '_>> {
        let channel = channel.to_string();
        let payload = payload.to_vec();

        Box::pin(async move {
            let mut conn = self.publisher().await?;
            match conn.publish::<_, _, i64>(&channel, payload).await {
                Ok(receivers) => {
                    tracing::trace!(channel = %channel, receivers, "Published to Redis");
                    Ok(())
                }
                Err(e) => Err(publish_error(&channel, &e)),
            }
        })
    }

    fn subscribe(
        &self,
        channel: &str,
    ) -> Pin<Box<dyn Future<Output = Result<MessageStream, BusError>> + Send + '_>> {
        let channel = channel.to_string();

        Box::pin(async move {
            let mut pubsub =
                match tokio::time::timeout(self.connect_timeout, self.client.get_async_pubsub())
                    .await
                {
                    Ok(Ok(pubsub)) => pubsub,
                    Ok(Err(e)) => return Err(subscribe_error(&channel, &e)),
                    Err(_) => {
                        return Err(BusError::ConnectionFailed(format!(
                            "connect timed out after {:?}",
                            self.connect_timeout
                        )));
                    }
                };

            pubsub
                .subscribe(&channel)
                .await
                .map_err(|e| subscribe_error(&channel, &e))?;

            tracing::info!(channel = %channel, "Subscribed to Redis channel");

            let mut messages = Box::pin(pubsub.into_on_message());
            let stream = async_stream::stream! {
                while let Some(message) = messages.next().await {
                    yield Ok(RawMessage::new(
                        message.get_channel_name(),
                        message.get_payload_bytes(),
                    ));
                }
                tracing::debug!(channel = %channel, "Redis pub/sub connection closed");
                yield Err(BusError::ConnectionLost(format!(
                    "pub/sub connection for '{channel}' closed"
                )));
            };

            Ok(Box::pin(stream) as MessageStream)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redis_bus_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<RedisBus>();
        assert_sync::<RedisBus>();
    }

    #[test]
    fn builder_requires_url() {
        assert!(matches!(
            RedisBus::builder().build(),
            Err(BusError::ConnectionFailed(_))
        ));
    }

    #[test]
    fn invalid_url_is_rejected() {
        assert!(RedisBus::new("not-a-url").is_err());
    }

    #[test]
    fn new_does_not_connect() {
        let bus = RedisBus::new("redis://127.0.0.1:1").map_err(|e| e.to_string());
        assert_eq!(bus.map(|b| b.url().to_string()), Ok("redis://127.0.0.1:1".to_string()));
    }

    #[test]
    fn io_errors_are_connection_class() {
        let io = RedisError::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        ));
        assert!(is_connection_class(&io));
        assert!(subscribe_error("c", &io).is_connection_error());
        assert!(matches!(publish_error("c", &io), BusError::ConnectionLost(_)));
    }

    #[test]
    fn server_errors_are_not_connection_class() {
        let server = RedisError::from((redis::ErrorKind::ResponseError, "NOPERM"));
        assert!(!is_connection_class(&server));
        assert!(!subscribe_error("c", &server).is_connection_error());
        assert!(matches!(
            publish_error("c", &server),
            BusError::PublishFailed { .. }
        ));
    }

    #[tokio::test]
    async fn subscribe_to_unreachable_server_is_connection_class() {
        let bus = RedisBus::builder()
            .url("redis://127.0.0.1:1")
            .connect_timeout(Duration::from_millis(500))
            .build()
            .map_err(|e| e.to_string());
        let Ok(bus) = bus else {
            return;
        };

        // Nothing listens on port 1.
        let result = bus.subscribe("c").await;
        assert!(result.is_err_and(|e| e.is_connection_error()));
    }
}
