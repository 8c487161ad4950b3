//! In-process counters for the hub.
//!
//! These mirror the Prometheus metrics but are readable without an exporter,
//! which is what tests and the readiness endpoint use.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counters updated by the hub and the registry.
#[derive(Debug, Default)]
pub struct HubStats {
    received: AtomicU64,
    delivered: AtomicU64,
    decode_errors: AtomicU64,
    overflow_drops: AtomicU64,
    stream_errors: AtomicU64,
    reconnect_attempts: AtomicU64,
    published: AtomicU64,
    publish_failures: AtomicU64,
}

/// Point-in-time copy of [`HubStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Valid updates decoded from the bus
    pub received: u64,
    /// Updates handed to subscriber queues
    pub delivered: u64,
    /// Bus payloads that failed to decode or validate
    pub decode_errors: u64,
    /// Updates discarded because a subscriber queue was full
    pub overflow_drops: u64,
    /// Non-connection errors reported on the subscription stream
    pub stream_errors: u64,
    /// Reconnect attempts scheduled
    pub reconnect_attempts: u64,
    /// Updates acknowledged by the bus
    pub published: u64,
    /// Updates the bus rejected
    pub publish_failures: u64,
}

macro_rules! bump {
    ($($name:ident => $field:ident),* $(,)?) => {
        $(
            pub(crate) fn $name(&self) {
                self.$field.fetch_add(1, Ordering::Relaxed);
            }
        )*
    };
}

impl HubStats {
    bump! {
        record_received => received,
        record_decode_error => decode_errors,
        record_overflow => overflow_drops,
        record_stream_error => stream_errors,
        record_reconnect => reconnect_attempts,
        record_published => published,
        record_publish_failure => publish_failures,
    }

    pub(crate) fn record_delivered(&self, count: u64) {
        self.delivered.fetch_add(count, Ordering::Relaxed);
    }

    /// Copy the current counter values.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            overflow_drops: self.overflow_drops.load(Ordering::Relaxed),
            stream_errors: self.stream_errors.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_increments() {
        let stats = HubStats::default();
        stats.record_received();
        stats.record_delivered(3);
        stats.record_decode_error();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.received, 1);
        assert_eq!(snapshot.delivered, 3);
        assert_eq!(snapshot.decode_errors, 1);
        assert_eq!(snapshot.overflow_drops, 0);
    }
}
