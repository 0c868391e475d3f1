//! Job submission path: validate, correlate, publish.

use std::sync::Arc;
use std::time::Duration;

use compilify_broker::{BrokerError, BrokerGateway};
use compilify_core::error::CoreError;
use compilify_core::job::{ExecutionPayload, JobMessage};
use compilify_core::types::{ConnectionId, JobId};

use crate::relay::registry::ConnectionRegistry;

/// Turns execute requests into published jobs.
///
/// A job is correlated to its connection *before* it is published, so a
/// completion can never arrive for a job the registry does not know. If the
/// publish fails the correlation is rolled back and the caller gets
/// [`CoreError::PublishFailed`], or [`CoreError::Validation`] when the
/// encoded job is larger than the broker can carry.
pub struct JobSubmitter {
    registry: Arc<ConnectionRegistry>,
    broker: Arc<dyn BrokerGateway>,
    channel: String,
    publish_timeout: Duration,
    max_source_bytes: usize,
}

impl JobSubmitter {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        broker: Arc<dyn BrokerGateway>,
        channel: impl Into<String>,
        publish_timeout: Duration,
        max_source_bytes: usize,
    ) -> Self {
        Self {
            registry,
            broker,
            channel: channel.into(),
            publish_timeout,
            max_source_bytes,
        }
    }

    /// Submit `payload` on behalf of `conn_id` and return the new job id.
    ///
    /// Returns as soon as the broker has accepted the job; execution happens
    /// later and its result is pushed by the completion relay.
    pub async fn submit(
        &self,
        conn_id: &ConnectionId,
        payload: ExecutionPayload,
    ) -> Result<JobId, CoreError> {
        self.submit_request(conn_id, None, payload).await
    }

    /// Like [`submit`](Self::submit), echoing `request_id` on the
    /// `accepted` frame queued for the connection.
    pub async fn submit_request(
        &self,
        conn_id: &ConnectionId,
        request_id: Option<String>,
        payload: ExecutionPayload,
    ) -> Result<JobId, CoreError> {
        payload.validate(self.max_source_bytes)?;

        let job_id = JobId::new();
        self.registry.add_job(conn_id, job_id).await?;

        let message = JobMessage::new(job_id, *conn_id, payload);
        if let Err(e) = self.publish(&message).await {
            self.registry.remove_job(&job_id).await;
            tracing::warn!(
                conn_id = %conn_id,
                job_id = %job_id,
                error = %e,
                "Job publish failed, correlation rolled back",
            );
            return Err(match e {
                // JSON escaping can grow a snippet past the broker limit.
                BrokerError::PayloadTooLarge { len, max } => CoreError::Validation(format!(
                    "encoded job is {len} bytes, the broker accepts at most {max}"
                )),
                other => CoreError::PublishFailed {
                    job_id,
                    reason: other.to_string(),
                },
            });
        }

        self.registry.confirm_job(&job_id, request_id).await;
        tracing::info!(conn_id = %conn_id, job_id = %job_id, "Job submitted");
        Ok(job_id)
    }

    async fn publish(&self, message: &JobMessage) -> Result<(), BrokerError> {
        let encoded =
            serde_json::to_string(message).map_err(|e| BrokerError::Publish(e.to_string()))?;
        tokio::time::timeout(
            self.publish_timeout,
            self.broker.publish(&self.channel, encoded),
        )
        .await
        .map_err(|_elapsed| BrokerError::Timeout(self.publish_timeout.as_millis() as u64))?
    }
}
