//! Property tests for subscriber filtering, ordering and isolation.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use availability_relay_core::AvailabilityUpdate;
use availability_relay_runtime::stats::HubStats;
use availability_relay_runtime::{SubscriberRegistry, Subscription};
use availability_relay_testing::properties;
use proptest::prelude::*;
use std::sync::Arc;

fn drain(subscription: &mut Subscription) -> Vec<AvailabilityUpdate> {
    std::iter::from_fn(|| subscription.try_recv()).collect()
}

proptest! {
    /// A subscriber on one event never sees another event's updates, and sees
    /// its own in emit order.
    #[test]
    fn prop_filtered_in_order(updates in properties::updates(64), target in properties::event_id()) {
        let registry = SubscriberRegistry::new(1024, Arc::new(HubStats::default()));
        let mut subscription = registry.register(target.clone());

        for update in &updates {
            registry.emit(update);
        }

        let expected: Vec<_> = updates.iter().filter(|u| u.event_id == target).cloned().collect();
        prop_assert_eq!(drain(&mut subscription), expected);
    }

    /// Dropping one subscriber never changes what another receives.
    #[test]
    fn prop_cancel_is_isolated(
        before in properties::updates(16),
        after in properties::updates(16),
        target in properties::event_id(),
    ) {
        let registry = SubscriberRegistry::new(1024, Arc::new(HubStats::default()));
        let cancelled = registry.register(target.clone());
        let mut survivor = registry.register(target.clone());

        for update in &before {
            registry.emit(update);
        }
        drop(cancelled);
        for update in &after {
            registry.emit(update);
        }

        let expected: Vec<_> = before
            .iter()
            .chain(after.iter())
            .filter(|u| u.event_id == target)
            .cloned()
            .collect();
        prop_assert_eq!(drain(&mut survivor), expected);
    }

    /// With a bounded queue, a stalled subscriber keeps the newest updates in
    /// order and accounts for every one it lost.
    #[test]
    fn prop_overflow_keeps_newest(updates in properties::updates(64), capacity in 1usize..8) {
        let registry = SubscriberRegistry::new(capacity, Arc::new(HubStats::default()));
        let mut subscription = registry.register("event-1");

        for update in &updates {
            registry.emit(update);
        }

        let matching: Vec<_> = updates.iter().filter(|u| u.event_id == "event-1").cloned().collect();
        let kept = matching.len().min(capacity);
        let expected = matching[matching.len() - kept..].to_vec();

        prop_assert_eq!(subscription.dropped(), (matching.len() - kept) as u64);
        prop_assert_eq!(drain(&mut subscription), expected);
    }
}
