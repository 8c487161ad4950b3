//! # Availability Relay Testing
//!
//! Test doubles and helpers for the availability relay.
//!
//! This crate provides:
//! - [`InMemoryBus`]: a deterministic `MessageBus` with fault injection
//! - Fixtures for building and encoding updates
//! - Helpers for draining streams with timeouts
//! - proptest strategies for updates and event ids
//!
//! ## Example
//!
//! ```ignore
//! use availability_relay_testing::{InMemoryBus, fixtures};
//!
//! #[tokio::test]
//! async fn test_round_trip() {
//!     let bus = InMemoryBus::new();
//!     let hub = BroadcastHub::new(Arc::new(bus.clone()), HubConfig::default());
//!     let _ingest = hub.start().unwrap();
//!     bus.wait_for_subscribers(AVAILABILITY_CHANNEL, 1, Duration::from_secs(1)).await;
//!
//!     let mut sub = hub.subscribe("event-1").unwrap();
//!     hub.try_publish(&fixtures::update("event-1", 90, 10)).await.unwrap();
//!     assert_eq!(sub.recv().await, Some(fixtures::update("event-1", 90, 10)));
//! }
//! ```

mod bus;

pub use bus::InMemoryBus;

/// Update fixtures.
pub mod fixtures {
    use availability_relay_core::{AvailabilityUpdate, codec};

    /// Build an update.
    #[must_use]
    pub fn update(event_id: &str, available_capacity: u32, reserved_count: u32) -> AvailabilityUpdate {
        AvailabilityUpdate::new(event_id, available_capacity, reserved_count)
    }

    /// JSON payload for an update, as it appears on the bus.
    ///
    /// # Panics
    ///
    /// Panics if the update cannot be encoded, which cannot happen for a
    /// struct of strings and integers.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn payload(update: &AvailabilityUpdate) -> Vec<u8> {
        codec::encode(update).expect("availability updates always encode")
    }

    /// A payload that will never decode.
    #[must_use]
    pub fn garbage() -> Vec<u8> {
        b"{not json".to_vec()
    }
}

/// Test helpers and utilities.
pub mod helpers {
    use futures::{Stream, StreamExt};
    use std::time::Duration;

    /// Install a test-friendly tracing subscriber.
    ///
    /// Safe to call from every test; only the first call installs. The
    /// filter is taken from `RUST_LOG`.
    pub fn init_test_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    /// Collect the next `count` items, giving up after `timeout`.
    ///
    /// Returns whatever arrived before the timeout.
    pub async fn collect_n<S>(stream: &mut S, count: usize, timeout: Duration) -> Vec<S::Item>
    where
        S: Stream + Unpin,
    {
        let mut items = Vec::with_capacity(count);
        let _ = tokio::time::timeout(timeout, async {
            while items.len() < count {
                match stream.next().await {
                    Some(item) => items.push(item),
                    None => break,
                }
            }
        })
        .await;
        items
    }

    /// Whether the stream yields nothing within `window`.
    pub async fn stays_quiet<S>(stream: &mut S, window: Duration) -> bool
    where
        S: Stream + Unpin,
    {
        tokio::time::timeout(window, stream.next()).await.is_err()
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use availability_relay_core::AvailabilityUpdate;
    use proptest::prelude::*;

    /// Event ids drawn from a small pool so that generated updates collide.
    pub fn event_id() -> impl Strategy<Value = String> {
        prop::sample::select(vec!["event-1", "event-2", "event-3", "event-4"])
            .prop_map(str::to_string)
    }

    /// Arbitrary valid updates.
    pub fn update() -> impl Strategy<Value = AvailabilityUpdate> {
        (event_id(), 0u32..10_000, 0u32..10_000).prop_map(|(event_id, available, reserved)| {
            AvailabilityUpdate::new(event_id, available, reserved)
        })
    }

    /// Sequences of valid updates.
    pub fn updates(max_len: usize) -> impl Strategy<Value = Vec<AvailabilityUpdate>> {
        prop::collection::vec(update(), 0..max_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use availability_relay_core::codec;

    #[test]
    fn test_payload_decodes_back() {
        let update = fixtures::update("event-1", 90, 10);
        let decoded = codec::decode(&fixtures::payload(&update));
        assert_eq!(decoded.ok(), Some(update));
    }

    #[test]
    fn test_garbage_does_not_decode() {
        assert!(codec::decode(&fixtures::garbage()).is_err());
    }
}
