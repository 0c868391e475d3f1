//! Reference worker for the Compilify execution relay.
//!
//! Consumes jobs from the broker, runs each through a [`JobExecutor`] and
//! publishes one completion per job. The sandbox itself lives behind the
//! executor program configured with `EXECUTOR_COMMAND`.

pub mod config;
pub mod executor;
pub mod subprocess;
pub mod worker;

pub use config::WorkerConfig;
pub use executor::{ExecError, JobExecutor};
pub use subprocess::CommandExecutor;
pub use worker::{Shard, Worker, WorkerSettings};
