//! Exponential-backoff helpers for broker subscriptions and publishes.
//!
//! When a subscription drops, long-lived consumers call
//! [`subscribe_with_backoff`] to keep retrying with increasing delays until
//! either the subscription is restored or the [`CancellationToken`] is
//! triggered.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::gateway::{BrokerError, BrokerGateway, Subscription};

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

/// Calculate the next backoff delay from the current delay and config.
///
/// The result is clamped to [`ReconnectConfig::max_delay`].
pub fn next_delay(current: Duration, config: &ReconnectConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Subscribe to `channel`, retrying with exponential backoff.
///
/// Returns `Some(subscription)` once a subscribe call succeeds, or `None`
/// if `cancel` is triggered first.
pub async fn subscribe_with_backoff(
    broker: &dyn BrokerGateway,
    channel: &str,
    config: &ReconnectConfig,
    cancel: &CancellationToken,
) -> Option<Subscription> {
    let mut delay = config.initial_delay;
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(channel, "Subscribe cancelled");
                return None;
            }
            result = broker.subscribe(channel) => {
                match result {
                    Ok(subscription) => {
                        tracing::info!(
                            channel,
                            attempt,
                            backend = broker.backend_name(),
                            "Subscribed to broker channel",
                        );
                        return Some(subscription);
                    }
                    Err(e) => {
                        tracing::warn!(
                            channel,
                            error = %e,
                            delay_ms = delay.as_millis() as u64,
                            "Subscribe attempt {attempt} failed",
                        );
                    }
                }
            }
        }

        // Wait before the next attempt, respecting cancellation.
        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(delay) => {}
        }

        delay = next_delay(delay, config);
    }
}

/// Publish `message`, retrying failed attempts with exponential backoff.
///
/// Gives up after `max_attempts` attempts and returns the last error.
/// [`BrokerError::PayloadTooLarge`] is never retried.
pub async fn publish_with_retry(
    broker: &dyn BrokerGateway,
    channel: &str,
    message: String,
    max_attempts: u32,
    config: &ReconnectConfig,
) -> Result<(), BrokerError> {
    let mut delay = config.initial_delay;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match broker.publish(channel, message.clone()).await {
            Ok(()) => return Ok(()),
            Err(e @ BrokerError::PayloadTooLarge { .. }) => return Err(e),
            Err(e) if attempt >= max_attempts.max(1) => return Err(e),
            Err(e) => {
                tracing::warn!(
                    channel,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "Publish attempt {attempt} failed",
                );
            }
        }

        tokio::time::sleep(delay).await;
        delay = next_delay(delay, config);
    }
}
