//! Lifecycle tests: serve over a real socket, then shut down gracefully.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use availability_relay_core::AVAILABILITY_CHANNEL;
use availability_relay_runtime::HubState;
use availability_relay_runtime::metrics::MetricsExporter;
use availability_relay_server::{Application, Config};
use availability_relay_testing::InMemoryBus;
use availability_relay_testing::helpers::init_test_tracing;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

const WAIT: Duration = Duration::from_secs(5);

async fn application(bus: &InMemoryBus) -> Application {
    init_test_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    Application::with_bus(
        Arc::new(bus.clone()),
        listener,
        &Config::default(),
        MetricsExporter::new(),
    )
    .unwrap()
}

async fn send(addr: SocketAddr, request: &str) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    stream
}

async fn read_headers(stream: &mut TcpStream) -> String {
    let mut seen = Vec::new();
    let mut buf = [0u8; 1024];
    tokio::time::timeout(WAIT, async {
        while !String::from_utf8_lossy(&seen).contains("\r\n\r\n") {
            let n = stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "connection closed before headers arrived");
            seen.extend_from_slice(&buf[..n]);
        }
    })
    .await
    .expect("timed out reading response headers");
    String::from_utf8_lossy(&seen).into_owned()
}

#[tokio::test]
async fn test_serves_health_over_tcp() {
    let bus = InMemoryBus::new();
    let app = application(&bus).await;
    let addr = app.local_addr().unwrap();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(app.run_until(async move {
        let _ = stop_rx.await;
    }));

    let mut stream = send(
        addr,
        "GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    )
    .await;
    let mut response = String::new();
    tokio::time::timeout(WAIT, stream.read_to_string(&mut response))
        .await
        .unwrap()
        .unwrap();

    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.ends_with("ok"));

    stop_tx.send(()).unwrap();
    tokio::time::timeout(WAIT, server).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn test_shutdown_ends_open_streams_and_releases_upstream() {
    let bus = InMemoryBus::new();
    let app = application(&bus).await;
    let addr = app.local_addr().unwrap();
    let hub = app.hub().clone();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(app.run_until(async move {
        let _ = stop_rx.await;
    }));

    assert!(bus.wait_for_subscribers(AVAILABILITY_CHANNEL, 1, WAIT).await);

    let mut sse = send(
        addr,
        "GET /api/v1/availability/stream/event-1 HTTP/1.1\r\nHost: localhost\r\n\r\n",
    )
    .await;
    let headers = read_headers(&mut sse).await;
    assert!(headers.starts_with("HTTP/1.1 200"));
    assert!(headers.contains("text/event-stream"));
    assert_eq!(hub.subscriber_count(), 1);

    stop_tx.send(()).unwrap();

    // The open SSE connection must not hold the server up.
    tokio::time::timeout(WAIT, server)
        .await
        .expect("server did not stop while a stream was open")
        .unwrap()
        .unwrap();

    assert_eq!(hub.state(), HubState::Disconnected);
    assert_eq!(hub.subscriber_count(), 0);
    assert_eq!(bus.subscriber_count(AVAILABILITY_CHANNEL), 0);

    let mut rest = Vec::new();
    let read = tokio::time::timeout(WAIT, sse.read_to_end(&mut rest)).await;
    assert!(read.is_ok(), "stream connection should be closed after shutdown");
}
