//! Default broker channel names.
//!
//! Both names are valid PostgreSQL identifiers so they can be used with
//! `LISTEN`/`NOTIFY` as well as the in-memory broker.

/// Channel carrying [`JobMessage`](crate::job::JobMessage)s to workers.
pub const JOBS_CHANNEL: &str = "compilify_jobs";

/// Channel carrying [`CompletionEvent`](crate::job::CompletionEvent)s back
/// to relays.
pub const COMPLETIONS_CHANNEL: &str = "compilify_job_done";
