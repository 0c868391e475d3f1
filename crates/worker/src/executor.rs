//! Job execution interface and shared types.
//!
//! Defines [`JobExecutor`], the trait the worker drives for every job, and
//! [`ExecError`], the failures that keep a job from running at all.

use std::future::Future;

use compilify_core::job::{ExecutionResult, JobMessage};

/// Errors that prevent an executor from producing program output.
///
/// These become [`ResultStatus::Errored`](compilify_core::job::ResultStatus)
/// completions; a program that runs and fails is not an `ExecError`.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// The executor program could not be started.
    #[error("failed to start executor: {0}")]
    Spawn(#[source] std::io::Error),

    /// The run exceeded its time limit and was killed.
    #[error("execution timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    /// An I/O error occurred while communicating with the process.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ExecError> for ExecutionResult {
    fn from(err: ExecError) -> Self {
        let elapsed = match &err {
            ExecError::Timeout { elapsed_ms } => Some(*elapsed_ms),
            _ => None,
        };
        let result = ExecutionResult::errored(err.to_string());
        match elapsed {
            Some(ms) => result.with_duration_ms(ms),
            None => result,
        }
    }
}

/// Runs one job to completion.
///
/// Implementations always produce a result; failures to execute are
/// reported as an `Errored` result rather than an error so the worker can
/// publish exactly one completion per job.
pub trait JobExecutor: Send + Sync + 'static {
    fn execute(&self, job: &JobMessage) -> impl Future<Output = ExecutionResult> + Send;
}
