use std::sync::Arc;

use anyhow::Context;
use compilify_broker::PgBroker;
use compilify_worker::{Worker, WorkerConfig};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "compilify_worker=debug,compilify_broker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = WorkerConfig::from_env();
    let database_url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL must be set for a standalone worker")?;
    let executor = config
        .command_executor()
        .context("EXECUTOR_COMMAND must be set")?;

    let broker = PgBroker::connect(database_url)
        .await
        .context("Failed to connect to the broker database")?;
    tracing::info!(
        shard_index = config.shard_index,
        shard_count = config.shard_count,
        "Broker connected"
    );

    let cancel = CancellationToken::new();
    let worker = Worker::new(Arc::new(broker), executor, config.settings());
    let handle = tokio::spawn(worker.run(cancel.clone()));

    shutdown_signal().await;
    cancel.cancel();
    handle.await.context("Worker task panicked")?;

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
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
        () = ctrl_c => tracing::info!("Received SIGINT, stopping worker"),
        () = terminate => tracing::info!("Received SIGTERM, stopping worker"),
    }
}
