//! Completion relay: routes worker completions back to their connections.
//!
//! [`CompletionRelay`] subscribes to the broker's completion channel and,
//! for each event, hands the result to the connection that submitted the
//! job. Events for unknown or abandoned jobs are the expected steady-state
//! outcome for duplicates and late arrivals and are dropped quietly.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use compilify_broker::reconnect::{subscribe_with_backoff, ReconnectConfig};
use compilify_broker::BrokerGateway;
use compilify_core::job::CompletionEvent;
use futures::StreamExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::relay::registry::{ConnectionRegistry, DeliveryOutcome};

/// Counters and liveness for the relay loop, shared with the health route.
#[derive(Default)]
pub struct RelayStats {
    subscribed: AtomicBool,
    delivered: AtomicU64,
    parked: AtomicU64,
    orphaned: AtomicU64,
    unknown: AtomicU64,
    malformed: AtomicU64,
    resubscribes: AtomicU64,
}

/// Point-in-time copy of [`RelayStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RelayStatsSnapshot {
    pub subscribed: bool,
    pub delivered: u64,
    pub parked: u64,
    pub orphaned: u64,
    pub unknown: u64,
    pub malformed: u64,
    pub resubscribes: u64,
}

impl RelayStats {
    pub fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> RelayStatsSnapshot {
        RelayStatsSnapshot {
            subscribed: self.is_subscribed(),
            delivered: self.delivered.load(Ordering::Relaxed),
            parked: self.parked.load(Ordering::Relaxed),
            orphaned: self.orphaned.load(Ordering::Relaxed),
            unknown: self.unknown.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            resubscribes: self.resubscribes.load(Ordering::Relaxed),
        }
    }

    fn set_subscribed(&self, value: bool) {
        self.subscribed.store(value, Ordering::Relaxed);
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Result of handling one raw completion message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    Delivered,
    Parked,
    Orphaned,
    Unknown,
    Malformed,
}

/// Consumes the completion channel for the lifetime of the process.
pub struct CompletionRelay {
    registry: Arc<ConnectionRegistry>,
    broker: Arc<dyn BrokerGateway>,
    channel: String,
    reconnect: ReconnectConfig,
    stats: Arc<RelayStats>,
}

impl CompletionRelay {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        broker: Arc<dyn BrokerGateway>,
        channel: impl Into<String>,
        reconnect: ReconnectConfig,
        stats: Arc<RelayStats>,
    ) -> Self {
        Self {
            registry,
            broker,
            channel: channel.into(),
            reconnect,
            stats,
        }
    }

    /// Run the subscription loop until `cancel` fires.
    ///
    /// A lost subscription is re-established with exponential backoff;
    /// while it is down the stats report `subscribed = false`.
    pub async fn run(self, cancel: CancellationToken) {
        loop {
            let Some(mut subscription) = subscribe_with_backoff(
                self.broker.as_ref(),
                &self.channel,
                &self.reconnect,
                &cancel,
            )
            .await
            else {
                break;
            };
            self.stats.set_subscribed(true);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        self.stats.set_subscribed(false);
                        tracing::info!("Completion relay shutting down");
                        return;
                    }
                    item = subscription.next() => match item {
                        Some(Ok(raw)) => {
                            self.handle_message(&raw).await;
                        }
                        Some(Err(e)) if e.is_transient() => {
                            tracing::warn!(error = %e, "Completion subscription lagged");
                        }
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "Completion subscription failed");
                            break;
                        }
                        None => {
                            tracing::warn!("Completion subscription ended");
                            break;
                        }
                    }
                }
            }

            self.stats.set_subscribed(false);
            RelayStats::bump(&self.stats.resubscribes);
        }

        self.stats.set_subscribed(false);
        tracing::info!("Completion relay stopped");
    }

    /// Decode one raw completion message and route it.
    ///
    /// Never fails: a malformed message is logged and dropped so it cannot
    /// hold up deliveries to other connections.
    pub async fn handle_message(&self, raw: &str) -> RelayOutcome {
        let event: CompletionEvent = match serde_json::from_str(raw) {
            Ok(event) => event,
            Err(e) => {
                RelayStats::bump(&self.stats.malformed);
                tracing::warn!(
                    error = %e,
                    len = raw.len(),
                    "Discarding malformed completion message"
                );
                return RelayOutcome::Malformed;
            }
        };
        let job_id = event.job_id;

        match self.registry.claim_for_delivery(event).await {
            DeliveryOutcome::Delivered(conn_id) => {
                RelayStats::bump(&self.stats.delivered);
                tracing::info!(conn_id = %conn_id, job_id = %job_id, "Result delivered");
                RelayOutcome::Delivered
            }
            DeliveryOutcome::Parked(conn_id) => {
                RelayStats::bump(&self.stats.parked);
                tracing::debug!(conn_id = %conn_id, job_id = %job_id, "Result parked until accepted");
                RelayOutcome::Parked
            }
            DeliveryOutcome::Orphaned(conn_id) => {
                RelayStats::bump(&self.stats.orphaned);
                tracing::debug!(conn_id = %conn_id, job_id = %job_id, "Owner gone, result discarded");
                RelayOutcome::Orphaned
            }
            DeliveryOutcome::Unknown => {
                RelayStats::bump(&self.stats.unknown);
                tracing::debug!(job_id = %job_id, "No correlation for completion, discarded");
                RelayOutcome::Unknown
            }
        }
    }
}
