//! In-memory [`MessageBus`] with fault injection.
//!
//! Publishes are delivered synchronously to every open subscription on the
//! same channel, which gives tests the same publish → own-subscription round
//! trip a real bus provides, without timing noise.
//!
//! # Fault Injection
//!
//! - [`InMemoryBus::fail_next_subscribes`]: the next `n` `subscribe` calls fail
//! - [`InMemoryBus::fail_next_publish`]: the next `publish` call fails
//! - [`InMemoryBus::drop_connections`]: end every open subscription stream,
//!   optionally reporting an error first
//! - [`InMemoryBus::inject`] / [`InMemoryBus::inject_error`]: push raw items
//!   into subscriptions without going through `publish`

use availability_relay_core::{BusError, MessageBus, MessageStream, RawMessage};
use std::collections::{HashMap, VecDeque};
use std::future::{Future, ready};
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;

type Sender = mpsc::UnboundedSender<Result<RawMessage, BusError>>;

#[derive(Default)]
struct BusState {
    subscribers: HashMap<String, Vec<Sender>>,
    published: Vec<RawMessage>,
    subscribe_failures: VecDeque<BusError>,
    publish_failures: VecDeque<BusError>,
    subscribe_calls: usize,
}

impl BusState {
    /// Send `item` to every open subscriber on `channel`, pruning closed ones.
    fn fan_out(&mut self, channel: &str, item: &Result<RawMessage, BusError>) -> usize {
        let Some(senders) = self.subscribers.get_mut(channel) else {
            return 0;
        };
        senders.retain(|tx| tx.send(item.clone()).is_ok());
        senders.len()
    }
}

/// Deterministic in-process bus for tests.
///
/// Cloning shares the underlying state.
#[derive(Clone, Default)]
pub struct InMemoryBus {
    state: Arc<Mutex<BusState>>,
}

impl InMemoryBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next `count` `subscribe` calls fail with `error`.
    pub fn fail_next_subscribes(&self, count: usize, error: &BusError) {
        let mut state = self.lock();
        state
            .subscribe_failures
            .extend(std::iter::repeat_n(error.clone(), count));
    }

    /// Make the next `publish` call fail with `error`.
    pub fn fail_next_publish(&self, error: BusError) {
        self.lock().publish_failures.push_back(error);
    }

    /// End every open subscription stream.
    ///
    /// When `error` is given, each stream yields it before ending.
    pub fn drop_connections(&self, error: Option<BusError>) {
        let mut state = self.lock();
        let subscribers = std::mem::take(&mut state.subscribers);
        if let Some(error) = error {
            for tx in subscribers.values().flatten() {
                let _ = tx.send(Err(error.clone()));
            }
        }
    }

    /// Deliver a raw payload to subscribers on `channel` without recording it
    /// as published. Returns the number of subscriptions reached.
    pub fn inject(&self, channel: &str, payload: impl Into<Vec<u8>>) -> usize {
        let item = Ok(RawMessage::new(channel, payload));
        self.lock().fan_out(channel, &item)
    }

    /// Deliver an error item to subscribers on `channel`.
    pub fn inject_error(&self, channel: &str, error: BusError) -> usize {
        self.lock().fan_out(channel, &Err(error))
    }

    /// Every message successfully published so far.
    #[must_use]
    pub fn published(&self) -> Vec<RawMessage> {
        self.lock().published.clone()
    }

    /// Open subscriptions on `channel`.
    #[must_use]
    pub fn subscriber_count(&self, channel: &str) -> usize {
        let mut state = self.lock();
        state.subscribers.get_mut(channel).map_or(0, |senders| {
            senders.retain(|tx| !tx.is_closed());
            senders.len()
        })
    }

    /// Total `subscribe` calls, including failed ones.
    #[must_use]
    pub fn subscribe_calls(&self) -> usize {
        self.lock().subscribe_calls
    }

    /// Poll until `channel` has at least `count` open subscriptions.
    ///
    /// Returns `false` if `timeout` elapses first. Under paused Tokio time the
    /// polling sleeps advance the clock, so pending backoff delays elapse too.
    pub async fn wait_for_subscribers(&self, channel: &str, count: usize, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            while self.subscriber_count(channel) < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .is_ok()
    }
}

impl std::fmt::Debug for InMemoryBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("InMemoryBus")
            .field("channels", &state.subscribers.len())
            .field("published", &state.published.len())
            .field("subscribe_calls", &state.subscribe_calls)
            .finish_non_exhaustive()
    }
}

impl MessageBus for InMemoryBus {
    fn publish(
        &self,
        channel: &str,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + '_>> {
        let mut state = self.lock();
        let result = if let Some(error) = state.publish_failures.pop_front() {
            Err(error)
        } else {
            let message = RawMessage::new(channel, payload);
            state.fan_out(channel, &Ok(message.clone()));
            state.published.push(message);
            Ok(())
        };
        Box::pin(ready(result))
    }

    fn subscribe(
        &self,
        channel: &str,
    ) -> Pin<Box<dyn Future<Output = Result<MessageStream, BusError>> + Send + '_>> {
        let mut state = self.lock();
        state.subscribe_calls += 1;

        let result = if let Some(error) = state.subscribe_failures.pop_front() {
            Err(error)
        } else {
            let (tx, mut rx) = mpsc::unbounded_channel();
            state
                .subscribers
                .entry(channel.to_string())
                .or_default()
                .push(tx);

            let stream = async_stream::stream! {
                while let Some(item) = rx.recv().await {
                    yield item;
                }
            };
            Ok(Box::pin(stream) as MessageStream)
        };
        Box::pin(ready(result))
    }
}
