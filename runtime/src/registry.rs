//! Subscription registry: the hub's multicast point.
//!
//! One producer (the ingestion task) emits decoded updates; any number of
//! [`Subscription`]s consume them. Each subscription owns a bounded queue and
//! an `event_id` filter. Filtering happens at emit time, so a queue only ever
//! holds updates for its own event.
//!
//! # Overflow
//!
//! Queues are bounded. When a queue is full the **oldest** queued update is
//! discarded to make room, the subscription's [`dropped`](Subscription::dropped)
//! counter increments and a warning is logged once per overflow burst. The
//! emitter never waits on a consumer and other subscriptions are unaffected.
//!
//! # Locking
//!
//! The subscriber map and each queue have their own `std::sync::Mutex`; no
//! lock is held across an `.await`. The map lock is always taken before a
//! queue lock.

use crate::metrics::DeliveryMetrics;
use crate::stats::HubStats;
use availability_relay_core::AvailabilityUpdate;
use futures::Stream;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::Notify;

/// Stream of updates for a single event.
pub type AvailabilityStream = Pin<Box<dyn Stream<Item = AvailabilityUpdate> + Send>>;

/// Process-unique subscriber identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// The raw numeric id.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

struct Slot {
    event_id: String,
    capacity: usize,
    queue: Mutex<VecDeque<AvailabilityUpdate>>,
    notify: Notify,
    dropped: AtomicU64,
    overflowing: AtomicBool,
    closed: AtomicBool,
}

impl Slot {
    fn new(event_id: String, capacity: usize) -> Self {
        Self {
            event_id,
            capacity,
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
            overflowing: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Enqueue, discarding the oldest entry when full. Returns `true` if
    /// something was discarded.
    fn push(&self, update: AvailabilityUpdate) -> bool {
        let overflowed = {
            let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
            let overflowed = queue.len() >= self.capacity;
            if overflowed {
                queue.pop_front();
            }
            queue.push_back(update);
            overflowed
        };
        self.notify.notify_one();
        overflowed
    }

    fn pop(&self) -> Option<AvailabilityUpdate> {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

type SlotMap = HashMap<String, HashMap<SubscriberId, Arc<Slot>>>;

struct RegistryInner {
    slots: Mutex<SlotMap>,
    next_id: AtomicU64,
    active: AtomicUsize,
    capacity: usize,
    closed: AtomicBool,
    stats: Arc<HubStats>,
}

impl RegistryInner {
    fn lock(&self) -> std::sync::MutexGuard<'_, SlotMap> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn unregister(&self, event_id: &str, id: SubscriberId) {
        let remaining = {
            let mut slots = self.lock();
            let removed = slots
                .get_mut(event_id)
                .and_then(|subscribers| subscribers.remove(&id))
                .is_some();
            if slots.get(event_id).is_some_and(HashMap::is_empty) {
                slots.remove(event_id);
            }
            removed.then(|| self.active.fetch_sub(1, Ordering::AcqRel).saturating_sub(1))
        };

        if let Some(remaining) = remaining {
            DeliveryMetrics::record_subscribers(remaining);
            tracing::debug!(
                subscriber = %id,
                event_id = %event_id,
                remaining,
                "Subscriber disconnected"
            );
        }
    }
}

/// The set of live subscriptions. Cheap to clone.
#[derive(Clone)]
pub struct SubscriberRegistry {
    inner: Arc<RegistryInner>,
}

impl SubscriberRegistry {
    /// Create a registry whose subscriptions buffer at most `capacity`
    /// updates each. A capacity of zero is treated as one.
    #[must_use]
    pub fn new(capacity: usize, stats: Arc<HubStats>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                slots: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                active: AtomicUsize::new(0),
                capacity: capacity.max(1),
                closed: AtomicBool::new(false),
                stats,
            }),
        }
    }

    /// Register interest in `event_id`, starting from now.
    ///
    /// Updates emitted before this call returns are never delivered to the
    /// new subscription. After [`close_all`](Self::close_all) the returned
    /// subscription is already closed.
    #[must_use]
    pub fn register(&self, event_id: impl Into<String>) -> Subscription {
        let event_id = event_id.into();
        let id = SubscriberId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let slot = Arc::new(Slot::new(event_id.clone(), self.inner.capacity));

        let active = {
            let mut slots = self.inner.lock();
            if self.inner.closed.load(Ordering::Acquire) {
                slot.close();
                None
            } else {
                slots
                    .entry(event_id.clone())
                    .or_default()
                    .insert(id, Arc::clone(&slot));
                Some(self.inner.active.fetch_add(1, Ordering::AcqRel) + 1)
            }
        };

        if let Some(active) = active {
            DeliveryMetrics::record_subscribers(active);
            tracing::debug!(subscriber = %id, event_id = %event_id, active, "Subscriber registered");
        }

        Subscription {
            id,
            slot,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver `update` to every subscription registered for its event.
    ///
    /// Returns the number of subscriptions it was queued for.
    pub fn emit(&self, update: &AvailabilityUpdate) -> usize {
        let slots = self.inner.lock();
        let Some(subscribers) = slots.get(&update.event_id) else {
            return 0;
        };

        for (id, slot) in subscribers {
            if slot.push(update.clone()) {
                slot.dropped.fetch_add(1, Ordering::Relaxed);
                self.inner.stats.record_overflow();
                DeliveryMetrics::record_overflow();
                if !slot.overflowing.swap(true, Ordering::Relaxed) {
                    tracing::warn!(
                        subscriber = %id,
                        event_id = %slot.event_id,
                        capacity = slot.capacity,
                        "Subscriber queue full, dropping oldest updates"
                    );
                }
            } else {
                slot.overflowing.store(false, Ordering::Relaxed);
            }
        }

        let delivered = subscribers.len();
        drop(slots);

        self.inner.stats.record_delivered(delivered as u64);
        DeliveryMetrics::record_delivered(delivered as u64);
        delivered
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.active.load(Ordering::Acquire)
    }

    /// Whether there are no live subscriptions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of live subscriptions for one event.
    #[must_use]
    pub fn subscribers_for(&self, event_id: &str) -> usize {
        self.inner.lock().get(event_id).map_or(0, HashMap::len)
    }

    /// End every subscription and refuse new ones.
    ///
    /// Consumers drain what is already queued, then their streams finish.
    pub fn close_all(&self) {
        let slots = {
            let mut guard = self.inner.lock();
            self.inner.closed.store(true, Ordering::Release);
            let slots = std::mem::take(&mut *guard);
            let count: usize = slots.values().map(HashMap::len).sum();
            self.inner.active.fetch_sub(count, Ordering::AcqRel);
            slots
        };
        let closed: usize = slots.values().map(HashMap::len).sum();
        for slot in slots.values().flat_map(HashMap::values) {
            slot.close();
        }
        DeliveryMetrics::record_subscribers(self.len());
        tracing::info!(closed, "Closed all subscriptions");
    }
}

impl fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("active", &self.len())
            .field("capacity", &self.inner.capacity)
            .finish_non_exhaustive()
    }
}

/// One consumer's view of the registry, filtered to a single event.
///
/// Dropping the subscription unregisters it; nothing else is affected.
pub struct Subscription {
    id: SubscriberId,
    slot: Arc<Slot>,
    registry: Weak<RegistryInner>,
}

impl Subscription {
    /// This subscription's id.
    #[must_use]
    pub const fn id(&self) -> SubscriberId {
        self.id
    }

    /// The event this subscription is filtered to.
    #[must_use]
    pub fn event_id(&self) -> &str {
        &self.slot.event_id
    }

    /// Updates discarded from this subscription's queue because it was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.slot.dropped.load(Ordering::Relaxed)
    }

    /// Whether the registry has closed this subscription.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.slot.is_closed()
    }

    /// Wait for the next update.
    ///
    /// Returns `None` once the subscription is closed and its queue drained.
    pub async fn recv(&mut self) -> Option<AvailabilityUpdate> {
        loop {
            if let Some(update) = self.slot.pop() {
                return Some(update);
            }
            if self.slot.is_closed() {
                return None;
            }
            self.slot.notify.notified().await;
        }
    }

    /// Take the next queued update without waiting.
    #[must_use]
    pub fn try_recv(&mut self) -> Option<AvailabilityUpdate> {
        self.slot.pop()
    }

    /// Convert into a stream that ends when the subscription is closed.
    ///
    /// Dropping the stream unregisters the subscription.
    #[must_use]
    pub fn into_stream(self) -> AvailabilityStream {
        let mut subscription = self;
        Box::pin(async_stream::stream! {
            while let Some(update) = subscription.recv().await {
                yield update;
            }
        })
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("event_id", &self.slot.event_id)
            .field("dropped", &self.dropped())
            .finish_non_exhaustive()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unregister(&self.slot.event_id, self.id);
        }
    }
}
