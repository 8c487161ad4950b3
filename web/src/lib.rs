//! HTTP ingress for the availability relay.
//!
//! Wraps a [`BroadcastHub`](availability_relay_runtime::BroadcastHub) in an
//! Axum router:
//!
//! ```text
//! client ──GET /stream/:event_id──▶ stream_availability ──subscribe──▶ hub
//!        ◀──── text/event-stream ─────────────── Subscription::into_stream
//!
//! client ──POST /update──▶ publish_update ──publish (detached)──▶ bus
//! ```
//!
//! Handlers stay thin: they extract, call one hub operation, and map
//! [`HubError`](availability_relay_runtime::HubError) to a status through
//! [`AppError`].

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod state;

pub use error::AppError;
pub use middleware::{CORRELATION_ID_HEADER, CorrelationId, correlation_id_layer};
pub use router::{RouterOptions, relay_router};
pub use state::AppState;
