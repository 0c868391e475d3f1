use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use compilify_broker::{BrokerGateway, InMemoryBroker, PgBroker};
use compilify_worker::{Worker, WorkerConfig};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use compilify_api::config::{BrokerKind, ServerConfig};
use compilify_api::relay::RelayService;
use compilify_api::router::build_app_router;
use compilify_api::state::AppState;
use compilify_api::ws;

/// How long startup waits for the completion subscription before serving.
const SUBSCRIBE_WAIT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "compilify_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(
        host = %config.host,
        port = %config.port,
        broker = ?config.broker,
        "Loaded server configuration"
    );

    // --- Broker ---
    let broker: Arc<dyn BrokerGateway> = match config.broker {
        BrokerKind::Memory => Arc::new(InMemoryBroker::new()),
        BrokerKind::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .expect("DATABASE_URL must be set when BROKER=postgres");
            let broker = PgBroker::connect(url)
                .await
                .expect("Failed to connect to the broker database");
            tracing::info!("Postgres broker connected");
            Arc::new(broker)
        }
    };

    // --- Embedded worker (memory broker only) ---
    let worker_cancel = CancellationToken::new();
    let worker_handle = if config.broker == BrokerKind::Memory {
        spawn_embedded_worker(&config, Arc::clone(&broker), worker_cancel.clone())
    } else {
        None
    };

    // --- Relay ---
    let relay = RelayService::start(Arc::clone(&broker), config.relay_settings());
    if !relay.wait_subscribed(SUBSCRIBE_WAIT).await {
        tracing::warn!("Completion subscription not live yet, serving in degraded mode");
    }

    // --- Heartbeat ---
    let heartbeat_handle = ws::start_heartbeat(Arc::clone(relay.registry()));

    // --- App state ---
    let state = AppState {
        config: Arc::new(config.clone()),
        relay: Arc::clone(&relay),
    };
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    // Drain before the server stops so open sessions still receive their
    // results; new sessions are refused once admissions close.
    let drain_relay = Arc::clone(&relay);
    let drain_timeout = Duration::from_secs(config.shutdown_timeout_secs);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            if !drain_relay.drain(drain_timeout).await {
                tracing::warn!("Shutting down with undelivered results");
            }
            drain_relay.registry().close_all().await;
        })
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    relay.shutdown().await;

    heartbeat_handle.abort();
    tracing::info!("Heartbeat task stopped");

    worker_cancel.cancel();
    if let Some(handle) = worker_handle {
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
        tracing::info!("Embedded worker stopped");
    }

    tracing::info!("Graceful shutdown complete");
}

/// Run a worker in-process against the in-memory broker.
///
/// Returns `None` when no `EXECUTOR_COMMAND` is configured; jobs then stay
/// outstanding until an executor is available.
fn spawn_embedded_worker(
    config: &ServerConfig,
    broker: Arc<dyn BrokerGateway>,
    cancel: CancellationToken,
) -> Option<tokio::task::JoinHandle<()>> {
    let mut worker_config = WorkerConfig::from_env();
    worker_config.jobs_channel = config.jobs_channel.clone();
    worker_config.completions_channel = config.completions_channel.clone();

    let Some(executor) = worker_config.command_executor() else {
        tracing::warn!("EXECUTOR_COMMAND not set, no embedded worker; jobs will not complete");
        return None;
    };

    let worker = Worker::new(broker, executor, worker_config.settings());
    tracing::info!("Embedded worker started");
    Some(tokio::spawn(worker.run(cancel)))
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server
/// shuts down cleanly whether stopped interactively or by a process
/// manager (e.g. systemd, Docker, Kubernetes).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
