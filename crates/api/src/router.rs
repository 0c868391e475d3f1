//! HTTP surface of the relay: `/health`, `/execute` and their middleware.
//!
//! The binary and the integration tests both go through
//! [`build_app_router`], so tests exercise the served stack.

use std::time::Duration;

use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderName, HeaderValue, Method, Request, Response, StatusCode};
use axum::Router;
use tower::util::MapResponseLayer;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::config::ServerConfig;
use crate::routes;
use crate::state::AppState;

const REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Relay routes wrapped in the request pipeline, outermost first:
/// CORS, request id assignment, tracing, request id echo, timeout, panic
/// recovery.
///
/// The timeout covers the upgrade handshake of `/execute` only; an
/// upgraded socket lives outside the request.
pub fn build_app_router(state: AppState, config: &ServerConfig) -> Router {
    let pipeline = ServiceBuilder::new()
        .layer(cors_layer(&config.cors_origins))
        .layer(SetRequestIdLayer::new(REQUEST_ID, MakeRequestUuid))
        // Re-box the traced body: CorsLayer needs a `Default` response body.
        .layer(MapResponseLayer::new(|res: Response<_>| res.map(Body::new)))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(request_span::<Body>)
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(PropagateRequestIdLayer::new(REQUEST_ID))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(config.request_timeout_secs),
        ))
        .layer(CatchPanicLayer::new());

    Router::new()
        .merge(routes::health::router())
        .merge(routes::relay_routes())
        .layer(pipeline)
        .with_state(state)
}

/// Span for one HTTP request, tagged with its request id so the session
/// logs of an upgraded `/execute` can be tied back to the handshake.
fn request_span<B>(request: &Request<B>) -> tracing::Span {
    let request_id = request
        .headers()
        .get(&REQUEST_ID)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("-");
    tracing::info_span!(
        "request",
        method = %request.method(),
        uri = %request.uri(),
        request_id,
    )
}

/// CORS for browser clients opening the `/execute` socket.
///
/// Panics on an origin that is not a valid header value.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .map(|origin| {
            origin
                .parse()
                .unwrap_or_else(|e| panic!("CORS_ORIGINS entry '{origin}' is invalid: {e}"))
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET])
        .allow_headers([CONTENT_TYPE])
        .allow_credentials(true)
        .max_age(Duration::from_secs(3600))
}
