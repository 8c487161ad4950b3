//! Lifecycle state of the hub's upstream subscription.

use crate::health::HealthStatus;
use serde::Serialize;
use std::fmt;

/// Where the ingestion loop currently stands.
///
/// ```text
/// Disconnected ──start──► Connecting ──ok──► Connected
///                             │                 │ connection lost
///                             ▼                 ▼
///                       Reconnecting{n} ◄───────┘
///                             │ budget spent
///                             ▼
///                         Exhausted
/// ```
///
/// `Exhausted` is terminal: no further reconnects happen and local fan-out
/// of bus traffic has stopped until the process restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum HubState {
    /// Not started, or stopped after shutdown.
    Disconnected,
    /// First subscription attempt in progress.
    Connecting,
    /// Subscribed and relaying.
    Connected,
    /// Waiting to retry after a connection-class failure.
    Reconnecting {
        /// 1-based retry attempt
        attempt: u32,
    },
    /// Reconnect budget spent; ingestion has stopped.
    Exhausted,
}

impl HubState {
    /// Whether updates from the bus are currently flowing to subscribers.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Whether the hub has given up reconnecting.
    #[must_use]
    pub const fn is_exhausted(self) -> bool {
        matches!(self, Self::Exhausted)
    }

    /// Health level for readiness probes.
    #[must_use]
    pub const fn health(self) -> HealthStatus {
        match self {
            Self::Connected => HealthStatus::Healthy,
            Self::Disconnected | Self::Connecting | Self::Reconnecting { .. } => {
                HealthStatus::Degraded
            }
            Self::Exhausted => HealthStatus::Unhealthy,
        }
    }

    /// Numeric encoding for the `relay_hub_state` gauge.
    ///
    /// 0 = disconnected, 1 = connecting, 2 = connected, 3 = reconnecting, 4 = exhausted
    #[must_use]
    pub const fn gauge_value(self) -> f64 {
        match self {
            Self::Disconnected => 0.0,
            Self::Connecting => 1.0,
            Self::Connected => 2.0,
            Self::Reconnecting { .. } => 3.0,
            Self::Exhausted => 4.0,
        }
    }
}

impl fmt::Display for HubState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting { attempt } => write!(f, "reconnecting (attempt {attempt})"),
            Self::Exhausted => write!(f, "exhausted"),
        }
    }
}
