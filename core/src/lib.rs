//! # Availability Relay Core
//!
//! Domain types and the upstream bus capability for the availability relay.
//!
//! The relay distributes capacity-availability updates for ticketed events to
//! many concurrently connected clients. This crate holds everything the other
//! crates agree on:
//!
//! - [`AvailabilityUpdate`]: the immutable payload carried on the bus
//! - [`codec`]: JSON encoding of the payload for the upstream channel
//! - [`message_bus`]: the [`MessageBus`] capability (`publish` / `subscribe`)
//!   and its typed [`BusError`]s
//!
//! ## Data Flow
//!
//! ```text
//! MessageBus ──► BroadcastHub (decode + reconnect) ──► per-client filtered view ──► client
//!     ▲                                                                            │
//!     └──────────────────────────── publish(update) ◄──────────────────────────────┘
//! ```
//!
//! The bus is treated as an external collaborator. This crate does not know
//! whether it is backed by Redis, an in-memory test double, or anything else.

pub mod codec;
pub mod message_bus;
pub mod update;

pub use codec::DecodeError;
pub use message_bus::{BusError, MessageBus, MessageStream, RawMessage};
pub use update::{AvailabilityUpdate, ValidationError};

/// The one well-known channel carrying availability updates.
///
/// Every process instance publishes to and subscribes from this channel, so
/// every instance observes every update.
pub const AVAILABILITY_CHANNEL: &str = "events:availability";
