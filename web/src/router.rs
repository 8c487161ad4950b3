//! Router composition.

use crate::handlers::{availability, health, metrics};
use crate::middleware::correlation_id_layer;
use crate::state::AppState;
use axum::{
    Router,
    routing::{get, post},
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Options for [`relay_router`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RouterOptions {
    /// Allow cross-origin requests from any origin
    pub allow_any_origin: bool,
}

/// Create the relay router.
///
/// # Routes
///
/// ## Availability
/// - `GET /api/v1/availability/stream/:event_id` - SSE stream for one event
/// - `POST /api/v1/availability/update` - Publish an update (returns immediately)
/// - `GET /api/v1/availability/stats` - Hub state and counters
///
/// ## Operations
/// - `GET /health` - Liveness
/// - `GET /health/ready` - Readiness (503 once the reconnect budget is spent)
/// - `GET /metrics` - Prometheus scrape (404 if metrics are disabled)
///
/// # Example
///
/// ```rust,ignore
/// let hub = BroadcastHub::new(bus, HubConfig::default());
/// let app = relay_router(AppState::new(hub), RouterOptions::default());
/// axum::serve(listener, app).await?;
/// ```
pub fn relay_router(state: AppState, options: RouterOptions) -> Router {
    let router = Router::new()
        .route(
            "/api/v1/availability/stream/:event_id",
            get(availability::stream_availability),
        )
        .route(
            "/api/v1/availability/update",
            post(availability::publish_update),
        )
        .route("/api/v1/availability/stats", get(availability::stats))
        .route("/health", get(health::health_check))
        .route("/health/ready", get(health::readiness))
        .route("/metrics", get(metrics::metrics))
        .with_state(state)
        .layer(correlation_id_layer())
        .layer(TraceLayer::new_for_http());

    if options.allow_any_origin {
        router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else {
        router
    }
}
