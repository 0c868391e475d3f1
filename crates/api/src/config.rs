use std::time::Duration;

use compilify_core::channels::{COMPLETIONS_CHANNEL, JOBS_CHANNEL};

use crate::relay::RelaySettings;

/// Which broker backend the server talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerKind {
    /// In-process broadcast channels; an embedded worker executes jobs.
    Memory,
    /// Postgres `LISTEN`/`NOTIFY`; workers run as separate processes.
    Postgres,
}

impl std::str::FromStr for BrokerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            other => Err(format!("unknown broker '{other}', expected 'memory' or 'postgres'")),
        }
    }
}

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// How long shutdown waits for outstanding results (default: `30`).
    pub shutdown_timeout_secs: u64,
    pub broker: BrokerKind,
    /// Required when `broker` is [`BrokerKind::Postgres`].
    pub database_url: Option<String>,
    pub jobs_channel: String,
    pub completions_channel: String,
    pub publish_timeout_ms: u64,
    /// Slowest acceptable write of one frame to a client (default: `10`).
    pub push_timeout_secs: u64,
    pub orphan_grace_secs: u64,
    pub sweep_interval_secs: u64,
    /// Largest accepted snippet in bytes (default: `6144`).
    pub max_code_bytes: usize,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default                  |
    /// |-------------------------|--------------------------|
    /// | `HOST`                  | `0.0.0.0`                |
    /// | `PORT`                  | `3000`                   |
    /// | `CORS_ORIGINS`          | `http://localhost:5173`  |
    /// | `REQUEST_TIMEOUT_SECS`  | `30`                     |
    /// | `SHUTDOWN_TIMEOUT_SECS` | `30`                     |
    /// | `BROKER`                | `memory`                 |
    /// | `DATABASE_URL`          | unset                    |
    /// | `JOBS_CHANNEL`          | `compilify_jobs`         |
    /// | `COMPLETIONS_CHANNEL`   | `compilify_job_done`     |
    /// | `PUBLISH_TIMEOUT_MS`    | `5000`                   |
    /// | `PUSH_TIMEOUT_SECS`     | `10`                     |
    /// | `ORPHAN_GRACE_SECS`     | `60`                     |
    /// | `SWEEP_INTERVAL_SECS`   | `15`                     |
    /// | `MAX_CODE_BYTES`        | `6144`                   |
    ///
    /// Panics on unparseable values, and on zero for the timeouts and the
    /// sweep interval, so misconfiguration fails at startup.
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let broker: BrokerKind = std::env::var("BROKER")
            .unwrap_or_else(|_| "memory".into())
            .parse()
            .unwrap_or_else(|e| panic!("BROKER is invalid: {e}"));

        let database_url = std::env::var("DATABASE_URL").ok().filter(|s| !s.is_empty());
        if broker == BrokerKind::Postgres && database_url.is_none() {
            panic!("DATABASE_URL must be set when BROKER=postgres");
        }

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs: env_u64("REQUEST_TIMEOUT_SECS", 30),
            shutdown_timeout_secs: env_u64("SHUTDOWN_TIMEOUT_SECS", 30),
            broker,
            database_url,
            jobs_channel: std::env::var("JOBS_CHANNEL").unwrap_or_else(|_| JOBS_CHANNEL.into()),
            completions_channel: std::env::var("COMPLETIONS_CHANNEL")
                .unwrap_or_else(|_| COMPLETIONS_CHANNEL.into()),
            publish_timeout_ms: non_zero("PUBLISH_TIMEOUT_MS", env_u64("PUBLISH_TIMEOUT_MS", 5000)),
            push_timeout_secs: non_zero("PUSH_TIMEOUT_SECS", env_u64("PUSH_TIMEOUT_SECS", 10)),
            orphan_grace_secs: env_u64("ORPHAN_GRACE_SECS", 60),
            sweep_interval_secs: non_zero(
                "SWEEP_INTERVAL_SECS",
                env_u64("SWEEP_INTERVAL_SECS", 15),
            ),
            max_code_bytes: env_u64("MAX_CODE_BYTES", 6144) as usize,
        }
    }

    /// Relay tunables derived from this configuration.
    pub fn relay_settings(&self) -> RelaySettings {
        RelaySettings {
            jobs_channel: self.jobs_channel.clone(),
            completions_channel: self.completions_channel.clone(),
            publish_timeout: Duration::from_millis(self.publish_timeout_ms),
            orphan_grace: Duration::from_secs(self.orphan_grace_secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
            max_source_bytes: self.max_code_bytes,
            ..RelaySettings::default()
        }
    }
}

/// Read a `u64` env var, falling back to `default` when unset.
fn env_u64(name: &str, default: u64) -> u64 {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .unwrap_or_else(|_| panic!("{name} must be a valid u64")),
        Err(_) => default,
    }
}

/// Panic unless `value` is positive.
fn non_zero(name: &str, value: u64) -> u64 {
    if value == 0 {
        panic!("{name} must be greater than zero");
    }
    value
}
