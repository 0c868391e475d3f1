//! Shared domain types for the Compilify execution relay.
//!
//! Everything that crosses a process boundary lives here: identifiers,
//! the job message published to workers, and the completion event the
//! workers publish back.

pub mod channels;
pub mod error;
pub mod job;
pub mod types;
