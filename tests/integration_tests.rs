mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use common::{FakeBackend, STATS, UNHEALTHY};
use jetson_exporter::{
    build_registry, web::create_app, ExporterError, SessionConfig, TelemetrySession,
};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const LIMIT: Duration = Duration::from_secs(5);

fn config_for(backend: &FakeBackend) -> SessionConfig {
    SessionConfig::new(backend.path())
        .with_refresh_interval(Duration::from_millis(100))
        .with_connect_timeout(Duration::from_secs(2))
        .with_reconnect_backoff(Duration::from_millis(10), Duration::from_millis(50))
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(LIMIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn scrape(session: Arc<TelemetrySession>) -> (StatusCode, String) {
    let registry = build_registry(session).expect("Should build registry");
    let response = create_app(registry)
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

/// Subscribing, handshaking and receiving the first snapshot
#[tokio::test]
async fn test_session_start_and_first_snapshot() {
    let backend = FakeBackend::bind();

    let accept = async {
        let mut client = backend.accept().await;
        let request = client.read_request().await;
        assert_eq!(request["request"], "subscribe");
        assert_eq!(request["interval_ms"], 100);
        client.send(common::HELLO).await;
        client
    };
    let (session, mut client) = tokio::join!(TelemetrySession::start(config_for(&backend)), accept);
    let session = session.expect("Should start session");

    assert_eq!(session.service(), "jtop 4.2.12");
    assert!(!session.is_ready());
    assert!(session.snapshot().is_none());

    client.send(STATS).await;
    let snapshot = session.wait_ready(LIMIT).await.expect("Should become ready");

    assert!(session.is_ready());
    assert_eq!(snapshot.board.machine.as_deref(), Some("aarch64"));
    assert_eq!(snapshot.cpu.len(), 1);
    assert_eq!(snapshot.uptime, Duration::from_secs(3661));
    assert_eq!(snapshot.memory.ram.total, 8_000_000.0);
}

/// A rejected subscription is a start failure
#[tokio::test]
async fn test_session_start_rejected() {
    let backend = FakeBackend::bind();

    let reject = async {
        let mut client = backend.accept().await;
        client.read_request().await;
        client
            .send(r#"{"type":"error","message":"service unavailable"}"#)
            .await;
        client
    };
    let (result, _client) = tokio::join!(TelemetrySession::start(config_for(&backend)), reject);

    match result {
        Err(ExporterError::SessionStart(message)) => assert!(message.contains("service unavailable")),
        Err(other) => panic!("unexpected error {}", other),
        Ok(_) => panic!("session should not start"),
    }
}

/// Stats in place of the handshake is a start failure
#[tokio::test]
async fn test_session_start_stats_before_hello() {
    let backend = FakeBackend::bind();

    let eager = async {
        let mut client = backend.accept().await;
        client.read_request().await;
        client.send(STATS).await;
        client
    };
    let (result, _client) = tokio::join!(TelemetrySession::start(config_for(&backend)), eager);

    match result {
        Err(ExporterError::SessionStart(message)) => assert!(message.contains("before handshake")),
        Err(other) => panic!("unexpected error {}", other),
        Ok(_) => panic!("session should not start"),
    }
}

/// A silent backend times out the handshake
#[tokio::test]
async fn test_session_start_handshake_timeout() {
    let backend = FakeBackend::bind();
    let config = config_for(&backend).with_connect_timeout(Duration::from_millis(100));

    let silent = async {
        let mut client = backend.accept().await;
        client.read_request().await;
        client
    };
    let (result, _client) = tokio::join!(TelemetrySession::start(config), silent);

    assert!(matches!(result, Err(ref e) if e.is_start_failure()));
}

/// Unhealthy frames clear readiness but keep the last snapshot
#[tokio::test]
async fn test_unhealthy_backend() {
    let backend = FakeBackend::bind();
    let (session, mut client) = tokio::join!(
        TelemetrySession::start(config_for(&backend)),
        backend.accept_subscriber()
    );
    let session = session.expect("Should start session");

    client.send(STATS).await;
    session.wait_ready(LIMIT).await.expect("Should become ready");

    client.send(UNHEALTHY).await;
    wait_until(|| !session.is_ready()).await;
    assert!(session.snapshot().is_some());

    client.send(STATS).await;
    session.wait_ready(LIMIT).await.expect("Should recover");
}

/// Losing the backend clears readiness and the session reconnects
#[tokio::test]
async fn test_reconnect_after_disconnect() {
    let backend = FakeBackend::bind();
    let (session, mut client) = tokio::join!(
        TelemetrySession::start(config_for(&backend)),
        backend.accept_subscriber()
    );
    let session = session.expect("Should start session");

    client.send(STATS).await;
    session.wait_ready(LIMIT).await.expect("Should become ready");

    drop(client);
    wait_until(|| !session.is_ready()).await;

    let mut client = tokio::time::timeout(LIMIT, backend.accept_subscriber())
        .await
        .expect("Session should reconnect");
    client.send(STATS).await;
    session.wait_ready(LIMIT).await.expect("Should be ready again");
}

/// Stopping twice releases the connection once
#[tokio::test]
async fn test_stop_is_idempotent() {
    let backend = FakeBackend::bind();
    let (session, mut client) = tokio::join!(
        TelemetrySession::start(config_for(&backend)),
        backend.accept_subscriber()
    );
    let session = Arc::new(session.expect("Should start session"));

    client.send(STATS).await;
    session.wait_ready(LIMIT).await.expect("Should become ready");

    {
        let _guard = session.stop_guard();
        assert!(!session.is_stopped());
    }
    assert!(session.is_stopped());
    assert!(!session.is_ready());
    assert!(!session.stop());

    tokio::time::timeout(LIMIT, client.closed())
        .await
        .expect("Connection should be released");
}

/// The endpoint serves the telemetry families once ready
#[tokio::test]
async fn test_metrics_endpoint() {
    let backend = FakeBackend::bind();
    let (session, mut client) = tokio::join!(
        TelemetrySession::start(config_for(&backend)),
        backend.accept_subscriber()
    );
    let session = Arc::new(session.expect("Should start session"));

    client.send(STATS).await;
    session.wait_ready(LIMIT).await.expect("Should become ready");

    let (status, body) = scrape(Arc::clone(&session)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("jetson_info_board_info{"));
    assert!(body.contains(r#"machine="aarch64""#));
    assert!(body.contains(r#"jetson_usage_cpu{core="0",statistic="freq"} 1510"#));
    assert!(body.contains(r#"jetson_cpu_usage_percent{core="0"}"#));
    assert!(body.contains(r#"jetson_gpu_usage_percent{gpu="gpu"} 35"#));
    assert!(body.contains("jetson_ram_usage_percent 50"));
    assert!(body.contains(r#"jetson_usage_disk{statistic="percent"} 31"#));
    assert!(body.contains("jetson_uptime_seconds 3661"));
    assert!(body.contains(r#"jetson_temperature_celsius{sensor="CPU"} 45.2"#));
}

/// Before the first snapshot the endpoint still answers, without telemetry
#[tokio::test]
async fn test_metrics_endpoint_not_ready() {
    let backend = FakeBackend::bind();
    let (session, _client) = tokio::join!(
        TelemetrySession::start(config_for(&backend)),
        backend.accept_subscriber()
    );
    let session = Arc::new(session.expect("Should start session"));

    let (status, body) = scrape(session).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!body.contains("jetson_"));
}
