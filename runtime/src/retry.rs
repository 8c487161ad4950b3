//! Reconnect policy: exponential backoff with a bounded attempt budget.
//!
//! The hub's ingestion loop uses a [`ReconnectBudget`] to decide, after each
//! connection-class failure, whether to wait and reconnect or give up. The
//! decision logic is pure so it can be tested without a transport.
//!
//! # Example
//!
//! ```rust
//! use availability_relay_runtime::retry::{Decision, ReconnectBudget, RetryPolicy};
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::builder()
//!     .max_attempts(3)
//!     .initial_delay(Duration::from_secs(2))
//!     .build();
//! let mut budget = ReconnectBudget::new(policy);
//!
//! assert_eq!(
//!     budget.on_failure(),
//!     Decision::Retry { attempt: 1, delay: Duration::from_secs(2) }
//! );
//! assert_eq!(
//!     budget.on_failure(),
//!     Decision::Retry { attempt: 2, delay: Duration::from_secs(4) }
//! );
//! assert_eq!(budget.on_failure(), Decision::Exhausted { failures: 3 });
//! ```

use availability_relay_core::BusError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Retry policy configuration for exponential backoff.
///
/// # Default Values
///
/// - `max_attempts`: 10
/// - `initial_delay`: 2 seconds
/// - `max_delay`: 60 seconds
/// - `multiplier`: 2.0 (delay doubles each retry)
/// - `stable_after`: 30 seconds
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Consecutive connection failures tolerated before giving up
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries (cap for exponential backoff)
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
    /// Uptime after which a lost connection no longer counts as consecutive
    /// with earlier failures
    pub stable_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            stable_after: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            policy: Self::default(),
        }
    }

    /// Calculate delay for a given zero-based retry index.
    ///
    /// Uses exponential backoff: delay = `initial_delay` * (multiplier ^ index)
    /// Capped at `max_delay`.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )] // Millisecond delays are far below f64 precision limits
    pub fn delay_for_attempt(&self, index: u32) -> Duration {
        if index == 0 {
            return self.initial_delay.min(self.max_delay);
        }

        let exponent = i32::try_from(index).unwrap_or(i32::MAX);
        let delay_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);

        if !delay_ms.is_finite() || delay_ms >= self.max_delay.as_millis() as f64 {
            return self.max_delay;
        }

        Duration::from_millis(delay_ms as u64)
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl RetryPolicyBuilder {
    /// Set the consecutive-failure budget.
    #[must_use]
    pub const fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.policy.max_attempts = max_attempts;
        self
    }

    /// Set initial delay before first retry.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.policy.initial_delay = delay;
        self
    }

    /// Set maximum delay (cap for exponential backoff).
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.policy.max_delay = delay;
        self
    }

    /// Set multiplier for exponential backoff.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.policy.multiplier = multiplier;
        self
    }

    /// Set how long a connection must stay up before its loss starts a
    /// fresh failure sequence.
    #[must_use]
    pub const fn stable_after(mut self, uptime: Duration) -> Self {
        self.policy.stable_after = uptime;
        self
    }

    /// Build the [`RetryPolicy`].
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        self.policy
    }
}

/// What to do after a connection-class failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Wait `delay`, then reconnect. `attempt` is 1-based.
    Retry {
        /// Retry attempt number
        attempt: u32,
        /// Backoff before reconnecting
        delay: Duration,
    },
    /// The budget is spent; stop reconnecting.
    Exhausted {
        /// Consecutive failures observed
        failures: u32,
    },
}

/// Tracks consecutive connection failures against a [`RetryPolicy`].
///
/// A failure count `n` below `max_attempts` yields [`Decision::Retry`] with
/// attempt `n`; reaching `max_attempts` yields [`Decision::Exhausted`], and
/// every later call keeps returning it.
///
/// Failures only count as consecutive while connections keep failing fast.
/// The count resets when a connection delivers a message
/// ([`on_message`](Self::on_message)) or stayed up for at least
/// [`RetryPolicy::stable_after`] before it was lost
/// ([`on_disconnect`](Self::on_disconnect)). A link that flaps without
/// carrying traffic therefore still exhausts the budget, while a quiet but
/// healthy connection survives any number of separate outages.
#[derive(Debug, Clone)]
pub struct ReconnectBudget {
    policy: RetryPolicy,
    failures: u32,
}

impl ReconnectBudget {
    /// Create a fresh budget.
    #[must_use]
    pub const fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            failures: 0,
        }
    }

    /// Record a connection-class failure and decide what to do next.
    pub fn on_failure(&mut self) -> Decision {
        self.failures = self.failures.saturating_add(1);

        if self.failures >= self.policy.max_attempts {
            return Decision::Exhausted {
                failures: self.failures,
            };
        }

        Decision::Retry {
            attempt: self.failures,
            delay: self.policy.delay_for_attempt(self.failures - 1),
        }
    }

    /// Record that the current connection delivered a message.
    pub const fn on_message(&mut self) {
        self.failures = 0;
    }

    /// Record that an established connection was lost after `uptime`.
    ///
    /// Returns `true` if the connection was stable and the count was reset.
    pub fn on_disconnect(&mut self, uptime: Duration) -> bool {
        let stable = uptime >= self.policy.stable_after;
        if stable {
            self.failures = 0;
        }
        stable
    }

    /// Consecutive failures since the last reset.
    #[must_use]
    pub const fn failures(&self) -> u32 {
        self.failures
    }

    /// The policy this budget enforces.
    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

/// Pluggable predicate deciding whether a bus error is connection-class.
///
/// Only errors for which the classifier returns `true` consume the reconnect
/// budget. Everything else is logged and skipped so that a corrupt message
/// cannot exhaust a budget meant for real connection loss.
#[derive(Clone)]
pub struct RetryClassifier(Arc<dyn Fn(&BusError) -> bool + Send + Sync>);

impl RetryClassifier {
    /// Wrap a custom predicate.
    pub fn new(predicate: impl Fn(&BusError) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(predicate))
    }

    /// Whether `error` should trigger a reconnect.
    #[must_use]
    pub fn is_retryable(&self, error: &BusError) -> bool {
        (self.0)(error)
    }
}

impl Default for RetryClassifier {
    fn default() -> Self {
        Self::new(BusError::is_connection_error)
    }
}

impl fmt::Debug for RetryClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryClassifier").finish_non_exhaustive()
    }
}
