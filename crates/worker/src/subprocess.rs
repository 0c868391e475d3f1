//! Subprocess-backed executor.
//!
//! [`CommandExecutor`] hands each job to an external program (the sandbox
//! entry point). [`run_command`] does the spawn, stdin, output capture and
//! timeout handling.

use std::process::Stdio;
use std::time::{Duration, Instant};

use compilify_core::job::{ExecutionResult, JobMessage};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

use crate::executor::{ExecError, JobExecutor};

/// Maximum stdout or stderr size captured per stream (10 MiB).
///
/// Output exceeding this limit is truncated.
const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// Captured output from a finished process.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// Process exit code (`-1` if killed by signal).
    pub exit_code: i32,
    pub duration_ms: u64,
}

/// Spawn `cmd`, write `stdin` to it, capture stdout/stderr, and enforce
/// `timeout`.
///
/// The caller sets the program and arguments before calling this.
pub async fn run_command(
    cmd: &mut Command,
    stdin: Vec<u8>,
    timeout: Duration,
) -> Result<CommandOutput, ExecError> {
    // `kill_on_drop(true)` kills the child when it is dropped on timeout.
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let start = Instant::now();

    let mut child = cmd.spawn().map_err(ExecError::Spawn)?;

    if let Some(mut pipe) = child.stdin.take() {
        // The program may close stdin without reading it all.
        let _ = pipe.write_all(&stdin).await;
        drop(pipe);
    }

    // Read stdout/stderr in spawned tasks so `child.wait()` can borrow
    // `&mut child` meanwhile.
    let stdout_task = tokio::spawn(read_stream(child.stdout.take()));
    let stderr_task = tokio::spawn(read_stream(child.stderr.take()));

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => {
            let duration_ms = start.elapsed().as_millis() as u64;
            let stdout_bytes = stdout_task.await.unwrap_or_default();
            let stderr_bytes = stderr_task.await.unwrap_or_default();

            Ok(CommandOutput {
                stdout: String::from_utf8_lossy(&stdout_bytes).into_owned(),
                stderr: String::from_utf8_lossy(&stderr_bytes).into_owned(),
                exit_code: status.code().unwrap_or(-1),
                duration_ms,
            })
        }
        Ok(Err(e)) => Err(ExecError::Io(e)),
        Err(_elapsed) => {
            stdout_task.abort();
            stderr_task.abort();
            Err(ExecError::Timeout {
                elapsed_ms: start.elapsed().as_millis() as u64,
            })
        }
    }
}

/// Read an entire output stream into a byte buffer, capped at [`MAX_OUTPUT_BYTES`].
async fn read_stream<R: AsyncRead + Unpin>(handle: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut h) = handle {
        let _ = (&mut h)
            .take(MAX_OUTPUT_BYTES as u64)
            .read_to_end(&mut buf)
            .await;
    }
    buf
}

/// Runs each job through an external program.
///
/// The program receives the whole [`JobMessage`] as JSON on stdin. Exit
/// code 0 yields a `Succeeded` result with stdout as output; any other exit
/// code yields `Failed` with stderr lines as diagnostics.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandExecutor {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    /// Build from a whitespace-separated command line. `None` if blank.
    pub fn from_command_line(line: &str, timeout: Duration) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect(), timeout))
    }

    /// The job's own limit, if any, capped at the configured timeout.
    fn timeout_for(&self, job: &JobMessage) -> Duration {
        job.payload
            .time_limit_ms
            .map(Duration::from_millis)
            .map_or(self.timeout, |limit| limit.min(self.timeout))
    }

    async fn run(&self, job: &JobMessage) -> Result<CommandOutput, ExecError> {
        let stdin = serde_json::to_vec(job).map_err(|e| ExecError::Io(e.into()))?;
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        run_command(&mut cmd, stdin, self.timeout_for(job)).await
    }
}

impl JobExecutor for CommandExecutor {
    async fn execute(&self, job: &JobMessage) -> ExecutionResult {
        match self.run(job).await {
            Ok(out) if out.exit_code == 0 => {
                ExecutionResult::succeeded(out.stdout).with_duration_ms(out.duration_ms)
            }
            Ok(out) => {
                let mut result =
                    ExecutionResult::failed(out.stdout).with_duration_ms(out.duration_ms);
                result.diagnostics = out
                    .stderr
                    .lines()
                    .map(str::trim_end)
                    .filter(|l| !l.is_empty())
                    .map(str::to_string)
                    .collect();
                if result.diagnostics.is_empty() {
                    result
                        .diagnostics
                        .push(format!("exited with code {}", out.exit_code));
                }
                result
            }
            Err(e) => {
                tracing::warn!(job_id = %job.job_id, error = %e, "Executor could not run job");
                e.into()
            }
        }
    }
}
