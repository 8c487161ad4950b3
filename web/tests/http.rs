//! End-to-end HTTP tests against the relay router over the in-memory bus.
//!
//! Bounded responses go through `axum-test`; SSE responses never finish, so
//! those requests use `oneshot` and read the body frame by frame.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use availability_relay_core::{AVAILABILITY_CHANNEL, BusError};
use availability_relay_runtime::metrics::MetricsExporter;
use availability_relay_runtime::{BroadcastHub, HubConfig, HubState, IngestTask, RetryPolicy};
use availability_relay_testing::{InMemoryBus, fixtures};
use availability_relay_web::{AppState, CORRELATION_ID_HEADER, RouterOptions, relay_router};
use axum::Router;
use axum::body::{Body, Bytes};
use axum::http::{HeaderValue, Request, StatusCode, header};
use axum_test::TestServer;
use futures::StreamExt;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    bus: InMemoryBus,
    hub: BroadcastHub,
    app: Router,
    _ingest: IngestTask,
}

async fn connected() -> Harness {
    let bus = InMemoryBus::new();
    let hub = BroadcastHub::new(Arc::new(bus.clone()), HubConfig::default());
    let ingest = hub.start().unwrap();
    wait_for_state(&hub, HubState::Connected).await;

    let app = relay_router(AppState::new(hub.clone()), RouterOptions::default());
    Harness {
        bus,
        hub,
        app,
        _ingest: ingest,
    }
}

async fn wait_for_state(hub: &BroadcastHub, target: HubState) {
    let mut rx = hub.watch_state();
    tokio::time::timeout(WAIT, rx.wait_for(|state| *state == target))
        .await
        .expect("timed out waiting for hub state")
        .expect("state channel closed");
}

/// Read SSE body frames until one contains `needle`.
async fn read_until(body: Body, needle: &str) -> String {
    let mut frames = body.into_data_stream();
    let mut seen = String::new();
    tokio::time::timeout(WAIT, async {
        while let Some(frame) = frames.next().await {
            seen.push_str(&String::from_utf8_lossy(&frame.unwrap()));
            if seen.contains(needle) {
                return;
            }
        }
        panic!("stream ended before {needle:?} arrived; saw {seen:?}");
    })
    .await
    .expect("timed out reading SSE body");
    seen
}

fn stream_request(event_id: &str) -> Request<Body> {
    Request::builder()
        .uri(format!("/api/v1/availability/stream/{event_id}"))
        .body(Body::empty())
        .unwrap()
}

// ============================================================================
// SSE stream
// ============================================================================

#[tokio::test]
async fn test_stream_is_event_stream_and_delivers_updates() {
    let h = connected().await;

    let response = h.app.clone().oneshot(stream_request("event-1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/event-stream"
    );
    assert!(response.headers().contains_key(CORRELATION_ID_HEADER));
    assert_eq!(h.hub.subscriber_count(), 1);

    h.bus.inject(
        AVAILABILITY_CHANNEL,
        fixtures::payload(&fixtures::update("event-2", 1, 1)),
    );
    h.bus.inject(
        AVAILABILITY_CHANNEL,
        fixtures::payload(&fixtures::update("event-1", 90, 10)),
    );

    let seen = read_until(response.into_body(), "\n\n").await;
    assert!(seen.contains("event: availability"));
    assert!(seen.contains(r#""eventId":"event-1""#));
    assert!(seen.contains(r#""availableCapacity":90"#));
    assert!(!seen.contains("event-2"));
}

#[tokio::test]
async fn test_stream_receives_updates_posted_through_publish() {
    let h = connected().await;
    let server = TestServer::new(h.app.clone()).unwrap();

    let response = h.app.clone().oneshot(stream_request("event-7")).await.unwrap();

    server
        .post("/api/v1/availability/update")
        .json(&json!({"eventId": "event-7", "availableCapacity": 3, "reservedCount": 97}))
        .await
        .assert_status_ok();

    let seen = read_until(response.into_body(), "reservedCount").await;
    assert!(seen.contains(r#""reservedCount":97"#));
}

#[tokio::test]
async fn test_disconnecting_client_unregisters_subscriber() {
    let h = connected().await;

    let response = h.app.clone().oneshot(stream_request("event-1")).await.unwrap();
    assert_eq!(h.hub.subscriber_count(), 1);

    drop(response);
    assert_eq!(h.hub.subscriber_count(), 0);
}

#[tokio::test]
async fn test_stream_opens_while_upstream_is_down() {
    let bus = InMemoryBus::new();
    let hub = BroadcastHub::new(Arc::new(bus), HubConfig::default());
    let app = relay_router(AppState::new(hub.clone()), RouterOptions::default());

    let response = app.oneshot(stream_request("event-1")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(hub.state(), HubState::Disconnected);
    assert_eq!(hub.subscriber_count(), 1);
}

#[tokio::test]
async fn test_stream_ends_when_subscriptions_close() {
    let h = connected().await;

    let response = h.app.clone().oneshot(stream_request("event-1")).await.unwrap();
    h.hub.close_subscriptions();

    let mut frames = response.into_body().into_data_stream();
    let end = tokio::time::timeout(WAIT, async {
        while let Some(frame) = frames.next().await {
            frame.unwrap();
        }
    })
    .await;
    assert!(end.is_ok(), "SSE body should finish once subscriptions close");
}

#[tokio::test]
async fn test_blank_event_id_is_rejected() {
    let h = connected().await;

    let response = h.app.clone().oneshot(stream_request("%20")).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(h.hub.subscriber_count(), 0);
}

// ============================================================================
// Publish
// ============================================================================

#[tokio::test]
async fn test_publish_reaches_the_bus() {
    let h = connected().await;
    let server = TestServer::new(h.app.clone()).unwrap();

    let response = server
        .post("/api/v1/availability/update")
        .json(&json!({"eventId": "event-1", "availableCapacity": 90, "reservedCount": 10}))
        .await;

    response.assert_status_ok();
    assert!(response.text().is_empty());

    tokio::time::timeout(WAIT, async {
        while h.bus.published().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("publish never reached the bus");

    let published = h.bus.published();
    assert_eq!(published[0].channel, AVAILABILITY_CHANNEL);
}

#[tokio::test]
async fn test_publish_succeeds_even_when_bus_rejects() {
    let h = connected().await;
    h.bus
        .fail_next_publish(BusError::ConnectionLost("broken pipe".into()));
    let server = TestServer::new(h.app.clone()).unwrap();

    server
        .post("/api/v1/availability/update")
        .json(&json!({"eventId": "event-1", "availableCapacity": 1, "reservedCount": 0}))
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn test_publish_rejects_blank_event_id() {
    let h = connected().await;
    let server = TestServer::new(h.app.clone()).unwrap();

    let response = server
        .post("/api/v1/availability/update")
        .json(&json!({"eventId": "  ", "availableCapacity": 1, "reservedCount": 0}))
        .expect_failure()
        .await;

    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(response.json::<Value>()["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_publish_rejects_malformed_json() {
    let h = connected().await;
    let server = TestServer::new(h.app.clone()).unwrap();

    let response = server
        .post("/api/v1/availability/update")
        .content_type("application/json")
        .bytes(Bytes::from_static(b"{not json"))
        .expect_failure()
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["code"], "INVALID_BODY");
}

#[tokio::test]
async fn test_publish_rejects_negative_counts() {
    let h = connected().await;
    let server = TestServer::new(h.app.clone()).unwrap();

    let response = server
        .post("/api/v1/availability/update")
        .json(&json!({"eventId": "event-1", "availableCapacity": -1, "reservedCount": 0}))
        .expect_failure()
        .await;

    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    assert!(h.bus.published().is_empty());
}

// ============================================================================
// Health, stats, metrics
// ============================================================================

#[tokio::test]
async fn test_liveness_ignores_upstream() {
    let hub = BroadcastHub::new(Arc::new(InMemoryBus::new()), HubConfig::default());
    let server = TestServer::new(relay_router(AppState::new(hub), RouterOptions::default())).unwrap();

    let response = server.get("/health").await;

    response.assert_status_ok();
    response.assert_text("ok");
}

#[tokio::test]
async fn test_readiness_healthy_when_connected() {
    let h = connected().await;
    let server = TestServer::new(h.app.clone()).unwrap();

    let response = server.get("/health/ready").await;

    response.assert_status_ok();
    let body = response.json::<Value>();
    assert_eq!(body["component"], "broadcast_hub");
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_readiness_unavailable_once_exhausted() {
    let bus = InMemoryBus::new();
    bus.fail_next_subscribes(1, &BusError::ConnectionFailed("connection refused".into()));
    let config = HubConfig::default().with_retry(RetryPolicy::builder().max_attempts(1).build());
    let hub = BroadcastHub::new(Arc::new(bus), config);
    let _ingest = hub.start().unwrap();
    wait_for_state(&hub, HubState::Exhausted).await;

    let server = TestServer::new(relay_router(AppState::new(hub), RouterOptions::default())).unwrap();
    let response = server.get("/health/ready").expect_failure().await;

    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.json::<Value>()["status"], "unhealthy");

    // Liveness is unaffected.
    server.get("/health").await.assert_status_ok();
}

#[tokio::test]
async fn test_stats_reports_state_and_counters() {
    let h = connected().await;
    let server = TestServer::new(h.app.clone()).unwrap();
    let _stream = h.app.clone().oneshot(stream_request("event-1")).await.unwrap();

    h.bus.inject(AVAILABILITY_CHANNEL, fixtures::garbage());
    tokio::time::timeout(WAIT, async {
        while h.hub.stats().decode_errors == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let body = server.get("/api/v1/availability/stats").await.json::<Value>();

    assert_eq!(body["hub"]["state"], "connected");
    assert_eq!(body["subscribers"], 1);
    assert_eq!(body["stats"]["decode_errors"], 1);
}

#[tokio::test]
async fn test_metrics_disabled_returns_not_found() {
    let hub = BroadcastHub::new(Arc::new(InMemoryBus::new()), HubConfig::default());
    let server = TestServer::new(relay_router(AppState::new(hub), RouterOptions::default())).unwrap();

    let response = server.get("/metrics").expect_failure().await;

    response.assert_status(StatusCode::NOT_FOUND);
    assert_eq!(response.json::<Value>()["code"], "METRICS_DISABLED");
}

#[tokio::test]
async fn test_metrics_enabled_renders_prometheus_text() {
    let mut metrics = MetricsExporter::new();
    metrics.install().unwrap();
    let hub = BroadcastHub::new(Arc::new(InMemoryBus::new()), HubConfig::default());
    let state = AppState::new(hub).with_metrics(metrics);
    let server = TestServer::new(relay_router(state, RouterOptions::default())).unwrap();

    let response = server.get("/metrics").await;

    response.assert_status_ok();
    assert!(
        response
            .header(header::CONTENT_TYPE)
            .to_str()
            .unwrap()
            .starts_with("text/plain")
    );
}

#[tokio::test]
async fn test_cors_is_opt_in() {
    let hub = BroadcastHub::new(Arc::new(InMemoryBus::new()), HubConfig::default());

    let closed = TestServer::new(relay_router(AppState::new(hub.clone()), RouterOptions::default())).unwrap();
    let response = closed.get("/health").add_header(header::ORIGIN, HeaderValue::from_static("https://shop.example")).await;
    assert!(response.maybe_header(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());

    let open = TestServer::new(relay_router(
        AppState::new(hub),
        RouterOptions {
            allow_any_origin: true,
        },
    ))
    .unwrap();
    let response = open.get("/health").add_header(header::ORIGIN, HeaderValue::from_static("https://shop.example")).await;
    assert_eq!(response.header(header::ACCESS_CONTROL_ALLOW_ORIGIN), "*");
}
