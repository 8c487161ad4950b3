//! HTTP request handlers.

pub mod availability;
pub mod health;
pub mod metrics;

pub use availability::{publish_update, stats, stream_availability};
pub use health::{health_check, readiness};
pub use metrics::metrics;
