//! Integration tests for the health check endpoint and general HTTP behaviour.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use compilify_broker::{BrokerError, BrokerGateway, InMemoryBroker, Subscription};
use compilify_core::job::ExecutionPayload;
use compilify_core::types::ConnectionId;
use compilify_api::relay::RelayService;
use common::{body_json, get, start_relay, test_settings};
use tower::ServiceExt;

async fn healthy_relay() -> Arc<RelayService> {
    start_relay(Arc::new(InMemoryBroker::new()), test_settings()).await
}

/// A broker that can never be subscribed to.
struct DownBroker;

#[async_trait]
impl BrokerGateway for DownBroker {
    async fn publish(&self, _channel: &str, _message: String) -> Result<(), BrokerError> {
        Err(BrokerError::Connection("connection refused".into()))
    }

    async fn subscribe(&self, _channel: &str) -> Result<Subscription, BrokerError> {
        Err(BrokerError::Connection("connection refused".into()))
    }

    fn backend_name(&self) -> &'static str {
        "down"
    }
}

// ---------------------------------------------------------------------------
// Test: GET /health returns 200 with expected JSON fields
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_check_returns_ok_with_json() {
    let app = common::build_test_app(healthy_relay().await);
    let response = get(app, "/health").await;

    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;

    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
    assert_eq!(json["broker"], "memory");
    assert_eq!(json["broker_subscribed"], true);
    assert_eq!(json["connections"], 0);
    assert_eq!(json["outstanding_jobs"], 0);
    assert_eq!(json["relay"]["delivered"], 0);
}

// ---------------------------------------------------------------------------
// Test: counts reflect live connections and outstanding jobs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_reports_connections_and_jobs() {
    let relay = healthy_relay().await;
    let conn = relay.registry().register(ConnectionId::new()).await.unwrap();
    relay
        .submitter()
        .submit(&conn.id, ExecutionPayload::new("return 1;"))
        .await
        .unwrap();

    let json = body_json(get(common::build_test_app(relay), "/health").await).await;

    assert_eq!(json["connections"], 1);
    assert_eq!(json["outstanding_jobs"], 1);
}

// ---------------------------------------------------------------------------
// Test: lost broker subscription reports degraded
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_is_degraded_without_subscription() {
    let relay = RelayService::start(Arc::new(DownBroker), test_settings());
    let app = common::build_test_app(relay);

    let response = get(app, "/health").await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["broker_subscribed"], false);
}

// ---------------------------------------------------------------------------
// Test: Unknown route returns 404
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_route_returns_404() {
    let app = common::build_test_app(healthy_relay().await);
    let response = get(app, "/this-route-does-not-exist").await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Test: plain GET on the WebSocket endpoint is refused
// ---------------------------------------------------------------------------

#[tokio::test]
async fn execute_without_upgrade_is_client_error() {
    let app = common::build_test_app(healthy_relay().await);
    let response = get(app, "/execute").await;

    assert!(
        response.status().is_client_error(),
        "expected 4xx, got {}",
        response.status()
    );
}

// ---------------------------------------------------------------------------
// Test: x-request-id header is present in response
// ---------------------------------------------------------------------------

#[tokio::test]
async fn response_contains_x_request_id_header() {
    let app = common::build_test_app(healthy_relay().await);
    let response = get(app, "/health").await;

    assert_eq!(response.status(), StatusCode::OK);

    let request_id = response
        .headers()
        .get("x-request-id")
        .expect("Response must contain an x-request-id header");

    // The value should be a valid UUID (36 chars with hyphens).
    let id_str = request_id.to_str().unwrap();
    assert_eq!(id_str.len(), 36, "x-request-id should be a UUID string");
}

// ---------------------------------------------------------------------------
// Test: CORS preflight OPTIONS request returns correct headers
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cors_preflight_returns_correct_headers() {
    let app = common::build_test_app(healthy_relay().await);

    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/execute")
        .header("Origin", "http://localhost:5173")
        .header("Access-Control-Request-Method", "GET")
        .header("Access-Control-Request-Headers", "content-type")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let headers = response.headers();

    let allow_origin = headers
        .get("access-control-allow-origin")
        .expect("Missing Access-Control-Allow-Origin header")
        .to_str()
        .unwrap();
    assert_eq!(allow_origin, "http://localhost:5173");

    let allow_methods = headers
        .get("access-control-allow-methods")
        .expect("Missing Access-Control-Allow-Methods header")
        .to_str()
        .unwrap();
    assert!(
        allow_methods.contains("GET"),
        "Allow-Methods should contain GET, got: {allow_methods}"
    );
}
