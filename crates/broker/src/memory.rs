//! In-process broker backed by one `tokio::sync::broadcast` channel per
//! broker channel name.
//!
//! [`InMemoryBroker`] gives publish/subscribe semantics inside a single
//! process. It is designed to be shared via `Arc<InMemoryBroker>` between
//! the relay and an embedded worker.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{broadcast, Mutex};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

use crate::gateway::{BrokerError, BrokerGateway, Subscription};

/// Default buffer capacity for each broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out broker.
///
/// Every subscriber of a channel independently receives every message
/// published on it after it subscribed. When a channel buffer is full the
/// oldest unconsumed messages are dropped and slow subscribers observe a
/// [`BrokerError::Lagged`] item.
pub struct InMemoryBroker {
    capacity: usize,
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a broker whose channels buffer `capacity` messages each.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            channels: Mutex::new(HashMap::new()),
        }
    }

    async fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        let mut channels = self.channels.lock().await;
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Number of live subscribers on `channel`.
    pub async fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .lock()
            .await
            .get(channel)
            .map_or(0, |tx| tx.receiver_count())
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerGateway for InMemoryBroker {
    async fn publish(&self, channel: &str, message: String) -> Result<(), BrokerError> {
        // A SendError only means nobody is subscribed, which pub/sub allows.
        let _ = self.sender(channel).await.send(message);
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, BrokerError> {
        let rx = self.sender(channel).await.subscribe();
        let stream = BroadcastStream::new(rx).map(|item| match item {
            Ok(message) => Ok(message),
            Err(BroadcastStreamRecvError::Lagged(n)) => Err(BrokerError::Lagged(n)),
        });
        Ok(stream.boxed())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
