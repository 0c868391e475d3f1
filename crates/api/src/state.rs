use std::sync::Arc;

use crate::config::ServerConfig;
use crate::relay::RelayService;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    /// The job relay: registry, submitter and background tasks.
    pub relay: Arc<RelayService>,
}
