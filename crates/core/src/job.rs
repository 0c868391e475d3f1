//! Job and completion messages exchanged with the worker pool.
//!
//! Both message kinds travel through the broker as JSON text. A
//! [`JobMessage`] goes out on the jobs channel; exactly one
//! [`CompletionEvent`] comes back per job on the completions channel.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{ConnectionId, JobId, Timestamp};

/// What the client asked to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPayload {
    /// The snippet to compile and execute.
    pub code: String,
    /// Supporting class definitions compiled alongside the snippet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classes: Option<String>,
    /// Requested execution limit; the worker may clamp it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_limit_ms: Option<u64>,
}

impl ExecutionPayload {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            classes: None,
            time_limit_ms: None,
        }
    }

    /// Total source size in bytes (snippet plus classes).
    pub fn source_len(&self) -> usize {
        self.code.len() + self.classes.as_deref().map_or(0, str::len)
    }

    /// Reject payloads that no worker could run.
    ///
    /// `max_source_bytes` bounds [`source_len`](Self::source_len).
    pub fn validate(&self, max_source_bytes: usize) -> Result<(), CoreError> {
        if self.code.trim().is_empty() {
            return Err(CoreError::Validation("code must not be empty".into()));
        }
        let len = self.source_len();
        if len > max_source_bytes {
            return Err(CoreError::Validation(format!(
                "source is {len} bytes, limit is {max_source_bytes}"
            )));
        }
        Ok(())
    }
}

/// A submitted job as published to the worker channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMessage {
    pub job_id: JobId,
    pub connection_id: ConnectionId,
    pub submitted_at: Timestamp,
    pub payload: ExecutionPayload,
}

impl JobMessage {
    pub fn new(job_id: JobId, connection_id: ConnectionId, payload: ExecutionPayload) -> Self {
        Self {
            job_id,
            connection_id,
            submitted_at: Utc::now(),
            payload,
        }
    }
}

/// Outcome class of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    /// The program ran and exited cleanly.
    Succeeded,
    /// The program ran but reported an error.
    Failed,
    /// The worker could not run the program at all.
    Errored,
}

/// Result payload carried by a [`CompletionEvent`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ResultStatus,
    /// Program output (stdout for successful runs, error output otherwise).
    pub output: String,
    /// Compiler or worker diagnostics.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl ExecutionResult {
    pub fn succeeded(output: impl Into<String>) -> Self {
        Self {
            status: ResultStatus::Succeeded,
            output: output.into(),
            diagnostics: Vec::new(),
            duration_ms: None,
        }
    }

    pub fn failed(output: impl Into<String>) -> Self {
        Self {
            status: ResultStatus::Failed,
            output: output.into(),
            diagnostics: Vec::new(),
            duration_ms: None,
        }
    }

    /// The worker could not execute the job; `diagnostic` says why.
    pub fn errored(diagnostic: impl Into<String>) -> Self {
        Self {
            status: ResultStatus::Errored,
            output: String::new(),
            diagnostics: vec![diagnostic.into()],
            duration_ms: None,
        }
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}

/// The one-time notification that a job finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionEvent {
    pub job_id: JobId,
    pub result: ExecutionResult,
    pub completed_at: Timestamp,
}

impl CompletionEvent {
    pub fn new(job_id: JobId, result: ExecutionResult) -> Self {
        Self {
            job_id,
            result,
            completed_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_blank_code() {
        let payload = ExecutionPayload::new("   \n");
        assert!(matches!(
            payload.validate(1024),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn validate_counts_classes_toward_limit() {
        let mut payload = ExecutionPayload::new("return 1;");
        payload.classes = Some("x".repeat(100));
        assert!(payload.validate(200).is_ok());
        assert!(payload.validate(100).is_err());
    }

    #[test]
    fn payload_omits_empty_optional_fields() {
        let json = serde_json::to_value(ExecutionPayload::new("1 + 1")).unwrap();
        assert_eq!(json, serde_json::json!({ "code": "1 + 1" }));
    }

    #[test]
    fn completion_event_decodes_from_worker_json() {
        let job_id = JobId::new();
        let raw = format!(
            r#"{{"job_id":"{job_id}","result":{{"status":"succeeded","output":"42"}},"completed_at":"2024-05-01T12:00:00Z"}}"#
        );
        let event: CompletionEvent = serde_json::from_str(&raw).unwrap();
        assert_eq!(event.job_id, job_id);
        assert_eq!(event.result.status, ResultStatus::Succeeded);
        assert_eq!(event.result.output, "42");
        assert!(event.result.diagnostics.is_empty());
    }

    #[test]
    fn errored_result_carries_diagnostic() {
        let result = ExecutionResult::errored("compiler crashed");
        assert_eq!(result.status, ResultStatus::Errored);
        assert_eq!(result.diagnostics, vec!["compiler crashed".to_string()]);
        assert!(result.output.is_empty());
    }
}
