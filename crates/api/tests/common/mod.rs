#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use compilify_broker::{BrokerError, BrokerGateway, InMemoryBroker, ReconnectConfig, Subscription};
use compilify_core::job::{ExecutionResult, JobMessage};
use compilify_worker::{JobExecutor, Worker, WorkerSettings};
use http_body_util::BodyExt;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use compilify_api::config::{BrokerKind, ServerConfig};
use compilify_api::relay::{RelayService, RelaySettings};
use compilify_api::router::build_app_router;
use compilify_api::state::AppState;

/// Build a test `ServerConfig` with safe defaults.
///
/// Uses `http://localhost:5173` as CORS origin (matching the dev default)
/// and a 30-second request timeout.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
        broker: BrokerKind::Memory,
        database_url: None,
        jobs_channel: "test_jobs".to_string(),
        completions_channel: "test_job_done".to_string(),
        publish_timeout_ms: 500,
        push_timeout_secs: 5,
        orphan_grace_secs: 60,
        sweep_interval_secs: 60,
        max_code_bytes: 6144,
    }
}

/// Relay settings for tests: fast reconnects, test channel names.
pub fn test_settings() -> RelaySettings {
    let config = test_config();
    RelaySettings {
        reconnect: fast_reconnect(),
        ..config.relay_settings()
    }
}

pub fn fast_reconnect() -> ReconnectConfig {
    ReconnectConfig {
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        multiplier: 2.0,
    }
}

/// Start a relay on `broker` and wait for its completion subscription.
pub async fn start_relay(broker: Arc<dyn BrokerGateway>, settings: RelaySettings) -> Arc<RelayService> {
    let relay = RelayService::start(broker, settings);
    assert!(
        relay.wait_subscribed(Duration::from_secs(2)).await,
        "relay did not subscribe in time"
    );
    relay
}

/// Build the full application router on top of `relay`.
///
/// Goes through [`build_app_router`] so integration tests exercise the same
/// middleware stack (CORS, request ID, timeout, tracing, panic recovery)
/// that production uses.
pub fn build_test_app(relay: Arc<RelayService>) -> Router {
    let config = test_config();
    let state = AppState {
        config: Arc::new(config.clone()),
        relay,
    };
    build_app_router(state, &config)
}

/// Send a GET request to `uri` through the router.
pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    app.oneshot(request).await.unwrap()
}

/// Collect a response body and parse it as JSON.
pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Answers `return <expr>;` snippets with `<expr>` as output.
pub struct ReturnExecutor;

impl JobExecutor for ReturnExecutor {
    async fn execute(&self, job: &JobMessage) -> ExecutionResult {
        let code = job.payload.code.trim();
        match code.strip_prefix("return ") {
            Some(rest) => ExecutionResult::succeeded(rest.trim_end_matches(';').trim()),
            None => ExecutionResult::failed("").with_duration_ms(0),
        }
    }
}

/// Run a [`Worker`] with [`ReturnExecutor`] on the test channels.
pub fn spawn_worker(broker: Arc<dyn BrokerGateway>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    let config = test_config();
    let settings = WorkerSettings {
        jobs_channel: config.jobs_channel,
        completions_channel: config.completions_channel,
        reconnect: fast_reconnect(),
        ..WorkerSettings::default()
    };
    tokio::spawn(Worker::new(broker, ReturnExecutor, settings).run(cancel))
}

/// Wait until `channel` on `broker` has at least one subscriber.
pub async fn wait_for_subscriber(broker: &InMemoryBroker, channel: &str) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while broker.subscriber_count(channel).await == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("no subscriber appeared");
}

/// A broker whose publishes always fail. Subscriptions work.
pub struct FailingBroker {
    pub inner: InMemoryBroker,
}

impl FailingBroker {
    pub fn new() -> Self {
        Self {
            inner: InMemoryBroker::new(),
        }
    }
}

#[async_trait]
impl BrokerGateway for FailingBroker {
    async fn publish(&self, _channel: &str, _message: String) -> Result<(), BrokerError> {
        Err(BrokerError::Publish("broker unreachable".into()))
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, BrokerError> {
        self.inner.subscribe(channel).await
    }

    fn backend_name(&self) -> &'static str {
        "failing"
    }
}
