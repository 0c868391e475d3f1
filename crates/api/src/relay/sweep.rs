//! Periodic cleanup of orphaned job correlations.
//!
//! When a connection closes, its outstanding jobs keep their correlation
//! entries for a grace window so late completions are recognised and
//! absorbed. This task removes entries whose grace window has elapsed.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::relay::registry::ConnectionRegistry;

/// Floor for the sweep period; `tokio::time::interval` rejects zero.
const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Run the orphan sweep loop every `interval` until `cancel` is triggered.
pub async fn run(
    registry: Arc<ConnectionRegistry>,
    grace: Duration,
    interval: Duration,
    cancel: CancellationToken,
) {
    if interval < MIN_INTERVAL {
        tracing::warn!(
            requested_ms = interval.as_millis() as u64,
            min_ms = MIN_INTERVAL.as_millis() as u64,
            "Sweep interval too small, using minimum"
        );
    }
    let interval = interval.max(MIN_INTERVAL);

    tracing::info!(
        grace_secs = grace.as_secs(),
        interval_secs = interval.as_secs(),
        "Orphan sweep started"
    );

    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Orphan sweep stopping");
                break;
            }
            _ = ticker.tick() => {
                let removed = registry.sweep_orphans(grace).await;
                if removed > 0 {
                    tracing::info!(removed, "Orphan sweep: purged abandoned jobs");
                } else {
                    tracing::trace!("Orphan sweep: nothing to purge");
                }
            }
        }
    }
}
