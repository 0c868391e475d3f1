//! WebSocket surface of the relay.
//!
//! The wire protocol, the per-connection session state machine, the
//! heartbeat task and the HTTP upgrade handler used by Axum routes.

mod handler;
mod heartbeat;
pub mod protocol;
pub mod session;

pub use handler::execute_handler;
pub use heartbeat::start_heartbeat;
pub use protocol::{ClientMessage, OutboundFrame, ServerMessage};
pub use session::{EndpointSession, SessionState};
