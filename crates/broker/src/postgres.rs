//! Cross-process broker over PostgreSQL `LISTEN`/`NOTIFY`.
//!
//! Publishing is a `SELECT pg_notify(channel, message)` on the shared pool;
//! each subscription holds its own dedicated [`PgListener`] connection.
//! Notifications are not persisted: a subscriber that is disconnected when
//! a message is published never sees it.

use async_trait::async_trait;
use futures::{stream, StreamExt};
use sqlx::postgres::{PgListener, PgPoolOptions};

use crate::gateway::{BrokerError, BrokerGateway, Subscription};

pub type DbPool = sqlx::PgPool;

/// Largest payload PostgreSQL accepts in a single notification.
pub const MAX_NOTIFY_PAYLOAD_BYTES: usize = 7999;

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
}

/// Check that the database answers a trivial query.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await.map(|_| ())
}

/// Reject messages PostgreSQL would refuse to deliver.
pub fn check_payload_size(message: &str) -> Result<(), BrokerError> {
    if message.len() > MAX_NOTIFY_PAYLOAD_BYTES {
        return Err(BrokerError::PayloadTooLarge {
            len: message.len(),
            max: MAX_NOTIFY_PAYLOAD_BYTES,
        });
    }
    Ok(())
}

/// Broker gateway backed by a PostgreSQL database.
#[derive(Clone)]
pub struct PgBroker {
    pool: DbPool,
}

impl PgBroker {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Connect a new pool to `database_url` and verify it.
    pub async fn connect(database_url: &str) -> Result<Self, BrokerError> {
        let pool = create_pool(database_url)
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        health_check(&pool)
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        tracing::info!("PostgreSQL broker connected");
        Ok(Self { pool })
    }
}

#[async_trait]
impl BrokerGateway for PgBroker {
    async fn publish(&self, channel: &str, message: String) -> Result<(), BrokerError> {
        check_payload_size(&message)?;
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(channel)
            .bind(&message)
            .execute(&self.pool)
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, BrokerError> {
        let mut listener = PgListener::connect_with(&self.pool)
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        listener
            .listen(channel)
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        tracing::info!(channel, "Listening on PostgreSQL channel");

        // End the stream on the first receive error so the caller resubscribes
        // through its own backoff instead of relying on the listener's
        // implicit reconnect.
        let notifications = stream::unfold(Some(listener), |state| async move {
            let mut listener = state?;
            match listener.recv().await {
                Ok(notification) => Some((Ok(notification.payload().to_string()), Some(listener))),
                Err(e) => Some((Err(BrokerError::Connection(e.to_string())), None)),
            }
        });
        Ok(notifications.boxed())
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}
