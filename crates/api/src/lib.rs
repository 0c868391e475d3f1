//! Compilify API server library.
//!
//! Exposes the relay, WebSocket session handling, config, state, error
//! handling and routes so integration tests and the binary entrypoint can
//! both access them.

pub mod config;
pub mod error;
pub mod relay;
pub mod router;
pub mod routes;
pub mod state;
pub mod ws;
