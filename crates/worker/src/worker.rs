//! Job-channel consumer.
//!
//! [`Worker`] subscribes to the job channel, keeps the jobs that belong to
//! its shard, runs them through a [`JobExecutor`] with bounded concurrency
//! and publishes exactly one [`CompletionEvent`] per job.

use std::sync::Arc;

use compilify_broker::reconnect::{publish_with_retry, subscribe_with_backoff};
use compilify_broker::{BrokerError, BrokerGateway, ReconnectConfig};
use compilify_core::channels::{COMPLETIONS_CHANNEL, JOBS_CHANNEL};
use compilify_core::job::{CompletionEvent, ExecutionResult, JobMessage};
use compilify_core::types::JobId;
use futures::StreamExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::executor::JobExecutor;

/// Which slice of the job stream this worker owns.
///
/// Every worker process sees every job on a broadcast channel; a job runs
/// only on the worker whose index matches `job_id % count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shard {
    pub index: u32,
    pub count: u32,
}

impl Shard {
    /// A single worker owning every job.
    pub const ALL: Shard = Shard { index: 0, count: 1 };

    pub fn owns(&self, job_id: &JobId) -> bool {
        let count = u128::from(self.count.max(1));
        job_id.as_uuid().as_u128() % count == u128::from(self.index)
    }
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub jobs_channel: String,
    pub completions_channel: String,
    /// Jobs executed at the same time.
    pub concurrency: usize,
    pub shard: Shard,
    /// Attempts per completion publish before giving up.
    pub publish_attempts: u32,
    pub reconnect: ReconnectConfig,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            jobs_channel: JOBS_CHANNEL.to_string(),
            completions_channel: COMPLETIONS_CHANNEL.to_string(),
            concurrency: 4,
            shard: Shard::ALL,
            publish_attempts: 5,
            reconnect: ReconnectConfig::default(),
        }
    }
}

pub struct Worker<E> {
    broker: Arc<dyn BrokerGateway>,
    executor: Arc<E>,
    settings: WorkerSettings,
}

impl<E: JobExecutor> Worker<E> {
    pub fn new(broker: Arc<dyn BrokerGateway>, executor: E, settings: WorkerSettings) -> Self {
        Self {
            broker,
            executor: Arc::new(executor),
            settings,
        }
    }

    /// Consume the job channel until `cancel` fires, then wait for running
    /// jobs to publish their completions.
    pub async fn run(self, cancel: CancellationToken) {
        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency.max(1)));
        let mut running = JoinSet::new();

        tracing::info!(
            shard_index = self.settings.shard.index,
            shard_count = self.settings.shard.count,
            concurrency = self.settings.concurrency,
            "Worker started"
        );

        'outer: loop {
            let Some(mut jobs) = subscribe_with_backoff(
                self.broker.as_ref(),
                &self.settings.jobs_channel,
                &self.settings.reconnect,
                &cancel,
            )
            .await
            else {
                break;
            };

            loop {
                // Reap finished jobs so the set does not grow unbounded.
                while running.try_join_next().is_some() {}

                let raw = tokio::select! {
                    _ = cancel.cancelled() => break 'outer,
                    item = jobs.next() => match item {
                        Some(Ok(raw)) => raw,
                        Some(Err(e)) if e.is_transient() => {
                            tracing::warn!(error = %e, "Job subscription lagged, jobs were lost");
                            continue;
                        }
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "Job subscription failed");
                            break;
                        }
                        None => {
                            tracing::warn!("Job subscription ended");
                            break;
                        }
                    }
                };

                let Some(job) = self.accept(&raw) else {
                    continue;
                };

                let permit = tokio::select! {
                    _ = cancel.cancelled() => break 'outer,
                    permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break 'outer,
                    },
                };

                let broker = Arc::clone(&self.broker);
                let executor = Arc::clone(&self.executor);
                let settings = self.settings.clone();
                running.spawn(async move {
                    let _permit = permit;
                    process_job(broker.as_ref(), executor.as_ref(), &settings, job).await;
                });
            }
        }

        let in_flight = running.len();
        if in_flight > 0 {
            tracing::info!(in_flight, "Worker stopping, waiting for running jobs");
        }
        while running.join_next().await.is_some() {}
        tracing::info!("Worker stopped");
    }

    /// Decode a raw job message and keep it if this shard owns it.
    fn accept(&self, raw: &str) -> Option<JobMessage> {
        let job: JobMessage = match serde_json::from_str(raw) {
            Ok(job) => job,
            Err(e) => {
                tracing::warn!(error = %e, len = raw.len(), "Discarding malformed job message");
                return None;
            }
        };
        if !self.settings.shard.owns(&job.job_id) {
            tracing::trace!(job_id = %job.job_id, "Job belongs to another shard");
            return None;
        }
        Some(job)
    }
}

/// Execute one job and publish its completion.
pub async fn process_job<E: JobExecutor>(
    broker: &dyn BrokerGateway,
    executor: &E,
    settings: &WorkerSettings,
    job: JobMessage,
) {
    tracing::debug!(job_id = %job.job_id, conn_id = %job.connection_id, "Executing job");
    let result = executor.execute(&job).await;
    tracing::info!(job_id = %job.job_id, status = ?result.status, "Job finished");

    match publish_completion(broker, settings, CompletionEvent::new(job.job_id, result)).await {
        Ok(()) => {}
        Err(BrokerError::PayloadTooLarge { len, max }) => {
            // Still owe the client a completion; send a small one instead.
            let fallback = ExecutionResult::errored(format!(
                "result of {len} bytes exceeds the broker limit of {max} bytes"
            ));
            if let Err(e) =
                publish_completion(broker, settings, CompletionEvent::new(job.job_id, fallback))
                    .await
            {
                tracing::error!(job_id = %job.job_id, error = %e, "Failed to publish completion");
            }
        }
        Err(e) => {
            tracing::error!(job_id = %job.job_id, error = %e, "Failed to publish completion");
        }
    }
}

async fn publish_completion(
    broker: &dyn BrokerGateway,
    settings: &WorkerSettings,
    event: CompletionEvent,
) -> Result<(), BrokerError> {
    let message =
        serde_json::to_string(&event).map_err(|e| BrokerError::Publish(e.to_string()))?;
    publish_with_retry(
        broker,
        &settings.completions_channel,
        message,
        settings.publish_attempts,
        &settings.reconnect,
    )
    .await
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use compilify_broker::{InMemoryBroker, Subscription};
    use compilify_core::job::{ExecutionPayload, ResultStatus};
    use compilify_core::types::ConnectionId;

    use super::*;

    /// Echoes the submitted code back as output.
    #[derive(Default)]
    struct EchoExecutor {
        calls: AtomicUsize,
    }

    impl JobExecutor for EchoExecutor {
        async fn execute(&self, job: &JobMessage) -> ExecutionResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            ExecutionResult::succeeded(job.payload.code.clone())
        }
    }

    fn fast_settings() -> WorkerSettings {
        WorkerSettings {
            reconnect: ReconnectConfig {
                initial_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(20),
                multiplier: 2.0,
            },
            ..WorkerSettings::default()
        }
    }

    fn job_message(code: &str) -> JobMessage {
        JobMessage::new(JobId::new(), ConnectionId::new(), ExecutionPayload::new(code))
    }

    async fn next_completion(stream: &mut Subscription) -> CompletionEvent {
        let raw = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .expect("completion not published in time")
            .expect("stream ended")
            .expect("stream error");
        serde_json::from_str(&raw).unwrap()
    }

    #[test]
    fn single_shard_owns_everything() {
        for _ in 0..50 {
            assert!(Shard::ALL.owns(&JobId::new()));
        }
    }

    #[test]
    fn each_job_is_owned_by_exactly_one_shard() {
        for _ in 0..50 {
            let id = JobId::new();
            let owners = (0..3)
                .filter(|index| Shard { index: *index, count: 3 }.owns(&id))
                .count();
            assert_eq!(owners, 1);
        }
    }

    #[tokio::test]
    async fn process_job_publishes_one_completion() {
        let broker = Arc::new(InMemoryBroker::new());
        let settings = fast_settings();
        let mut completions = broker.subscribe(&settings.completions_channel).await.unwrap();
        let job = job_message("return 42;");

        process_job(broker.as_ref(), &EchoExecutor::default(), &settings, job.clone()).await;

        let event = next_completion(&mut completions).await;
        assert_eq!(event.job_id, job.job_id);
        assert_eq!(event.result.status, ResultStatus::Succeeded);
        assert_eq!(event.result.output, "return 42;");
    }

    #[tokio::test]
    async fn run_skips_malformed_jobs() {
        let broker = Arc::new(InMemoryBroker::new());
        let settings = fast_settings();
        let mut completions = broker.subscribe(&settings.completions_channel).await.unwrap();

        let cancel = CancellationToken::new();
        let worker = Worker::new(broker.clone(), EchoExecutor::default(), settings.clone());
        let executor = Arc::clone(&worker.executor);
        let handle = tokio::spawn(worker.run(cancel.clone()));

        // Wait for the worker's subscription before publishing.
        while broker.subscriber_count(&settings.jobs_channel).await == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        broker
            .publish(&settings.jobs_channel, "{not json".into())
            .await
            .unwrap();
        let job = job_message("ok");
        broker
            .publish(&settings.jobs_channel, serde_json::to_string(&job).unwrap())
            .await
            .unwrap();

        let event = next_completion(&mut completions).await;
        assert_eq!(event.job_id, job.job_id);

        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn other_shard_does_not_execute() {
        let broker = Arc::new(InMemoryBroker::new());
        let mut settings = fast_settings();
        settings.shard = Shard { index: 0, count: 2 };

        let cancel = CancellationToken::new();
        let worker = Worker::new(broker.clone(), EchoExecutor::default(), settings.clone());
        let executor = Arc::clone(&worker.executor);
        let handle = tokio::spawn(worker.run(cancel.clone()));
        while broker.subscriber_count(&settings.jobs_channel).await == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let mut job = job_message("skip me");
        while settings.shard.owns(&job.job_id) {
            job.job_id = JobId::new();
        }
        broker
            .publish(&settings.jobs_channel, serde_json::to_string(&job).unwrap())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn oversized_result_is_replaced_by_errored_completion() {
        /// Rejects anything over 300 bytes, like a size-limited backend.
        struct TinyBroker(InMemoryBroker);

        #[async_trait]
        impl BrokerGateway for TinyBroker {
            async fn publish(&self, channel: &str, message: String) -> Result<(), BrokerError> {
                if message.len() > 300 {
                    return Err(BrokerError::PayloadTooLarge {
                        len: message.len(),
                        max: 300,
                    });
                }
                self.0.publish(channel, message).await
            }

            async fn subscribe(&self, channel: &str) -> Result<Subscription, BrokerError> {
                self.0.subscribe(channel).await
            }

            fn backend_name(&self) -> &'static str {
                "tiny"
            }
        }

        let broker = TinyBroker(InMemoryBroker::new());
        let settings = fast_settings();
        let mut completions = broker.subscribe(&settings.completions_channel).await.unwrap();

        let job = job_message(&"x".repeat(500));
        process_job(&broker, &EchoExecutor::default(), &settings, job.clone()).await;

        let event = next_completion(&mut completions).await;
        assert_eq!(event.job_id, job.job_id);
        assert_eq!(event.result.status, ResultStatus::Errored);
        assert!(event.result.diagnostics[0].contains("exceeds the broker limit"));
    }
}
