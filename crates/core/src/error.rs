use crate::types::{ConnectionId, JobId};

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Connection {0} is already registered")]
    DuplicateConnection(ConnectionId),

    #[error("Connection {0} is not registered")]
    UnknownConnection(ConnectionId),

    #[error("Job {0} is already registered")]
    DuplicateJob(JobId),

    #[error("Failed to publish job {job_id}: {reason}")]
    PublishFailed { job_id: JobId, reason: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Stable machine-readable code sent to clients alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::DuplicateConnection(_) => "DUPLICATE_CONNECTION",
            CoreError::UnknownConnection(_) => "UNKNOWN_CONNECTION",
            CoreError::DuplicateJob(_) => "DUPLICATE_JOB",
            CoreError::PublishFailed { .. } => "PUBLISH_FAILED",
            CoreError::Validation(_) => "VALIDATION_ERROR",
            CoreError::Unavailable(_) => "UNAVAILABLE",
            CoreError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}
