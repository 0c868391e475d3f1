//! The narrow capability contract every broker backend implements.
//!
//! Messages are opaque UTF-8 text at this layer; encoding and decoding is
//! the caller's concern.

use async_trait::async_trait;
use futures::stream::BoxStream;

/// Stream of raw messages received on one channel.
///
/// The stream ends when the underlying connection is lost. An `Err` item
/// is either transient ([`BrokerError::Lagged`]) or immediately followed
/// by the end of the stream.
pub type Subscription = BoxStream<'static, Result<String, BrokerError>>;

/// Publish/subscribe access to a message broker.
#[async_trait]
pub trait BrokerGateway: Send + Sync {
    /// Publish `message` on `channel`.
    ///
    /// Returns once the backend has accepted the message.
    async fn publish(&self, channel: &str, message: String) -> Result<(), BrokerError>;

    /// Open a subscription to `channel`.
    ///
    /// Only messages published after this call returns are guaranteed to be
    /// observed.
    async fn subscribe(&self, channel: &str) -> Result<Subscription, BrokerError>;

    /// Short name used in logs and health output.
    fn backend_name(&self) -> &'static str;
}

/// Errors raised by broker backends.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// Could not establish or keep a connection to the backend.
    #[error("Broker connection error: {0}")]
    Connection(String),

    /// The backend refused or failed to accept a message.
    #[error("Broker publish error: {0}")]
    Publish(String),

    /// The message exceeds what the backend can carry.
    #[error("Message of {len} bytes exceeds the broker limit of {max} bytes")]
    PayloadTooLarge { len: usize, max: usize },

    /// A slow subscriber missed messages.
    #[error("Subscriber lagged, {0} messages skipped")]
    Lagged(u64),

    /// The operation did not finish within its time budget.
    #[error("Broker operation timed out after {0} ms")]
    Timeout(u64),
}

impl BrokerError {
    /// Whether the subscription that produced this error is still usable.
    pub fn is_transient(&self) -> bool {
        matches!(self, BrokerError::Lagged(_))
    }
}
