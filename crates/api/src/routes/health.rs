use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::relay::RelayStatsSnapshot;
use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// `ok` while the completion subscription is live, `degraded` otherwise.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    pub broker: &'static str,
    pub broker_subscribed: bool,
    /// Open client connections.
    pub connections: usize,
    /// Jobs still holding a correlation entry.
    pub outstanding_jobs: usize,
    pub relay: RelayStatsSnapshot,
}

/// GET /health -- returns service and broker subscription health.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let relay = state.relay.stats().snapshot();
    let registry = state.relay.registry();

    let status = if relay.subscribed { "ok" } else { "degraded" };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        broker: state.relay.backend(),
        broker_subscribed: relay.subscribed,
        connections: registry.connection_count().await,
        outstanding_jobs: registry.outstanding_jobs().await,
        relay,
    })
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
