use std::time::Duration;

use compilify_core::channels::{COMPLETIONS_CHANNEL, JOBS_CHANNEL};

use crate::subprocess::CommandExecutor;
use crate::worker::{Shard, WorkerSettings};

/// Worker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Postgres connection string. Only the standalone binary requires it.
    pub database_url: Option<String>,
    pub jobs_channel: String,
    pub completions_channel: String,
    /// Sandbox entry point, program followed by arguments.
    pub executor_command: Option<String>,
    pub execution_timeout_secs: u64,
    pub concurrency: usize,
    pub shard_index: u32,
    pub shard_count: u32,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                  | Default              |
    /// |--------------------------|----------------------|
    /// | `DATABASE_URL`           | unset                |
    /// | `JOBS_CHANNEL`           | `compilify_jobs`     |
    /// | `COMPLETIONS_CHANNEL`    | `compilify_job_done` |
    /// | `EXECUTOR_COMMAND`       | unset                |
    /// | `EXECUTION_TIMEOUT_SECS` | `10`                 |
    /// | `WORKER_CONCURRENCY`     | `4`                  |
    /// | `WORKER_SHARD_INDEX`     | `0`                  |
    /// | `WORKER_SHARD_COUNT`     | `1`                  |
    pub fn from_env() -> Self {
        let shard_index = env_parse("WORKER_SHARD_INDEX", 0u32);
        let shard_count = env_parse("WORKER_SHARD_COUNT", 1u32);
        assert!(shard_count > 0, "WORKER_SHARD_COUNT must be at least 1");
        assert!(
            shard_index < shard_count,
            "WORKER_SHARD_INDEX must be less than WORKER_SHARD_COUNT"
        );

        Self {
            database_url: non_empty_var("DATABASE_URL"),
            jobs_channel: std::env::var("JOBS_CHANNEL").unwrap_or_else(|_| JOBS_CHANNEL.into()),
            completions_channel: std::env::var("COMPLETIONS_CHANNEL")
                .unwrap_or_else(|_| COMPLETIONS_CHANNEL.into()),
            executor_command: non_empty_var("EXECUTOR_COMMAND"),
            execution_timeout_secs: env_parse("EXECUTION_TIMEOUT_SECS", 10u64),
            concurrency: env_parse("WORKER_CONCURRENCY", 4usize),
            shard_index,
            shard_count,
        }
    }

    pub fn settings(&self) -> WorkerSettings {
        WorkerSettings {
            jobs_channel: self.jobs_channel.clone(),
            completions_channel: self.completions_channel.clone(),
            concurrency: self.concurrency,
            shard: Shard {
                index: self.shard_index,
                count: self.shard_count,
            },
            ..WorkerSettings::default()
        }
    }

    /// The configured executor, or `None` when `EXECUTOR_COMMAND` is unset.
    pub fn command_executor(&self) -> Option<CommandExecutor> {
        let line = self.executor_command.as_deref()?;
        CommandExecutor::from_command_line(
            line,
            Duration::from_secs(self.execution_timeout_secs),
        )
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.trim().is_empty())
}

/// Parse an env var, falling back to `default` when unset. Panics on
/// unparseable values.
fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .unwrap_or_else(|_| panic!("{name} has an invalid value: {raw}")),
        Err(_) => default,
    }
}
