//! Availability relay server.
//!
//! Wires the Redis bus, the broadcast hub and the HTTP router together:
//!
//! ```text
//! tracing → Config::from_env → metrics recorder → RedisBus → BroadcastHub
//!   → hub.start() → axum::serve (graceful) → IngestTask::shutdown
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod lifecycle;
pub mod telemetry;

pub use config::Config;
pub use lifecycle::{Application, shutdown_signal};
pub use telemetry::init_tracing;
