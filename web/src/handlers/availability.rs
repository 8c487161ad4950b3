//! Availability stream and publish endpoints.
//!
//! ```text
//! GET  /api/v1/availability/stream/:event_id   → text/event-stream
//! POST /api/v1/availability/update             → 200, empty body
//! GET  /api/v1/availability/stats              → hub counters
//! ```
//!
//! The publish endpoint is a simulation seam standing in for a production
//! event source such as a change-data-capture pipeline.

use crate::error::AppError;
use crate::middleware::CorrelationId;
use crate::state::AppState;
use availability_relay_core::AvailabilityUpdate;
use availability_relay_runtime::{HubState, StatsSnapshot};
use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::{Stream, StreamExt};
use serde::Serialize;
use std::time::Duration;

/// SSE event name for availability updates.
pub const AVAILABILITY_EVENT: &str = "availability";

/// Interval between keep-alive comments on idle streams.
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Stream updates for one event as server-sent events.
///
/// Each update is an SSE event named `availability` whose data is the JSON
/// update. The stream stays open until the client disconnects or the server
/// shuts down; an upstream outage just means no events arrive.
///
/// # Errors
///
/// Returns 422 if `event_id` is blank.
#[allow(clippy::unused_async)] // Axum handlers must be async
pub async fn stream_availability(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
    correlation_id: CorrelationId,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, AppError> {
    let subscription = state.hub.subscribe(&event_id)?;

    tracing::info!(
        correlation_id = %correlation_id,
        subscriber = %subscription.id(),
        event_id = %event_id,
        hub_state = %state.hub.state(),
        "Client subscribed to availability stream"
    );

    let events = subscription.into_stream().map(|update| {
        Event::default()
            .event(AVAILABILITY_EVENT)
            .json_data(update)
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL)))
}

/// Publish an update to the bus.
///
/// Returns as soon as the update is validated; the bus round trip happens in
/// the background and its failure is only logged.
///
/// # Errors
///
/// Returns the extractor's status for an unreadable body, and 422 if
/// `eventId` is blank.
#[allow(clippy::unused_async)] // Axum handlers must be async
pub async fn publish_update(
    State(state): State<AppState>,
    correlation_id: CorrelationId,
    body: Result<Json<AvailabilityUpdate>, JsonRejection>,
) -> Result<StatusCode, AppError> {
    let Json(update) =
        body.map_err(|rejection| AppError::new(rejection.status(), "INVALID_BODY", rejection.body_text()))?;

    tracing::debug!(
        correlation_id = %correlation_id,
        event_id = %update.event_id,
        available_capacity = update.available_capacity,
        reserved_count = update.reserved_count,
        "Publishing availability update"
    );

    state.hub.publish(update)?;
    Ok(StatusCode::OK)
}

/// Hub state and counters.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    /// Current hub state
    pub hub: HubState,
    /// Live subscriber count
    pub subscribers: usize,
    /// Counter snapshot
    pub stats: StatsSnapshot,
}

/// Report hub state and counters.
#[allow(clippy::unused_async)] // Axum handlers must be async
pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        hub: state.hub.state(),
        subscribers: state.hub.subscriber_count(),
        stats: state.hub.stats(),
    })
}
