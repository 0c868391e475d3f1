//! Publish/subscribe broker gateway for the Compilify execution relay.
//!
//! The relay and the workers never talk to each other directly; every job
//! and every completion passes through a [`BrokerGateway`]:
//!
//! - [`InMemoryBroker`]: single-process fan-out backed by
//!   `tokio::sync::broadcast`, for development and tests.
//! - [`PgBroker`]: cross-process delivery over PostgreSQL
//!   `LISTEN`/`NOTIFY`.
//! - [`reconnect`]: exponential-backoff helpers for subscribing and
//!   publishing through an unreliable backend.

pub mod gateway;
pub mod memory;
pub mod postgres;
pub mod reconnect;

pub use gateway::{BrokerError, BrokerGateway, Subscription};
pub use memory::InMemoryBroker;
pub use postgres::PgBroker;
pub use reconnect::ReconnectConfig;
