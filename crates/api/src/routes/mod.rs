pub mod health;

use axum::routing::get;
use axum::Router;

use crate::state::AppState;
use crate::ws;

/// Build the relay routes (currently the WebSocket execute endpoint).
pub fn relay_routes() -> Router<AppState> {
    Router::new().route("/execute", get(ws::execute_handler))
}
