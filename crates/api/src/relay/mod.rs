//! Job-submission / job-completion relay.
//!
//! - [`registry`]: the shared connection and job correlation table.
//! - [`submission`]: turns execute requests into published jobs.
//! - [`completion`]: routes completion events back to their connections.
//! - [`sweep`]: purges correlations abandoned by closed connections.
//!
//! [`RelayService`] owns all of them and their background tasks.

pub mod completion;
pub mod registry;
pub mod submission;
pub mod sweep;

use std::sync::Arc;
use std::time::Duration;

use compilify_broker::{BrokerGateway, ReconnectConfig};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use completion::{CompletionRelay, RelayOutcome, RelayStats, RelayStatsSnapshot};
pub use registry::{Connection, ConnectionRegistry, DeliveryOutcome};
pub use submission::JobSubmitter;

/// How long background tasks get to finish after cancellation.
const TASK_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Poll interval while draining outstanding deliveries.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Tunables for the relay, usually taken from
/// [`ServerConfig`](crate::config::ServerConfig).
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub jobs_channel: String,
    pub completions_channel: String,
    /// Upper bound on a single broker publish.
    pub publish_timeout: Duration,
    /// How long correlations of a closed connection are kept.
    pub orphan_grace: Duration,
    pub sweep_interval: Duration,
    /// Largest accepted snippet (code plus classes) in bytes.
    pub max_source_bytes: usize,
    pub reconnect: ReconnectConfig,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            jobs_channel: compilify_core::channels::JOBS_CHANNEL.to_string(),
            completions_channel: compilify_core::channels::COMPLETIONS_CHANNEL.to_string(),
            publish_timeout: Duration::from_secs(5),
            orphan_grace: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(15),
            max_source_bytes: 6144,
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// The relay as one explicitly owned component.
///
/// Created once at startup via [`RelayService::start`], which spawns the
/// completion relay and the orphan sweep. The returned `Arc` is cloned into
/// request handlers. Call [`drain`](Self::drain) then
/// [`shutdown`](Self::shutdown) when the server stops.
pub struct RelayService {
    registry: Arc<ConnectionRegistry>,
    submitter: Arc<JobSubmitter>,
    stats: Arc<RelayStats>,
    backend: &'static str,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RelayService {
    /// Build the relay around `broker` and spawn its background tasks.
    pub fn start(broker: Arc<dyn BrokerGateway>, settings: RelaySettings) -> Arc<Self> {
        let registry = Arc::new(ConnectionRegistry::new());
        let stats = Arc::new(RelayStats::default());
        let cancel = CancellationToken::new();

        let submitter = Arc::new(JobSubmitter::new(
            Arc::clone(&registry),
            Arc::clone(&broker),
            settings.jobs_channel.clone(),
            settings.publish_timeout,
            settings.max_source_bytes,
        ));

        let relay = CompletionRelay::new(
            Arc::clone(&registry),
            Arc::clone(&broker),
            settings.completions_channel.clone(),
            settings.reconnect.clone(),
            Arc::clone(&stats),
        );
        let relay_handle = tokio::spawn(relay.run(cancel.child_token()));

        let sweep_handle = tokio::spawn(sweep::run(
            Arc::clone(&registry),
            settings.orphan_grace,
            settings.sweep_interval,
            cancel.child_token(),
        ));

        tracing::info!(
            backend = broker.backend_name(),
            jobs_channel = %settings.jobs_channel,
            completions_channel = %settings.completions_channel,
            "Relay service started"
        );

        Arc::new(Self {
            registry,
            submitter,
            stats,
            backend: broker.backend_name(),
            cancel,
            tasks: Mutex::new(vec![relay_handle, sweep_handle]),
        })
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn submitter(&self) -> &Arc<JobSubmitter> {
        &self.submitter
    }

    pub fn stats(&self) -> &Arc<RelayStats> {
        &self.stats
    }

    /// Name of the broker backend in use.
    pub fn backend(&self) -> &'static str {
        self.backend
    }

    /// Wait until the completion subscription is live.
    ///
    /// Returns `false` if it is not live within `timeout`.
    pub async fn wait_subscribed(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while !self.stats.is_subscribed() {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        true
    }

    /// Stop admitting work and wait for outstanding deliveries.
    ///
    /// Returns `true` if every job owned by a live connection completed
    /// within `timeout`.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.registry.close_admissions().await;

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let pending = self.registry.deliverable_jobs().await;
            if pending == 0 {
                tracing::info!("Relay drained");
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(pending, "Drain timed out with jobs still outstanding");
                return false;
            }
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
    }

    /// Close every client connection, then stop the background tasks and
    /// drop the broker subscription.
    pub async fn shutdown(&self) {
        self.registry.close_all().await;
        self.cancel.cancel();

        let handles: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for handle in handles {
            if tokio::time::timeout(TASK_STOP_TIMEOUT, handle).await.is_err() {
                tracing::warn!("Relay background task did not stop in time");
            }
        }
        tracing::info!("Relay service shut down");
    }
}
