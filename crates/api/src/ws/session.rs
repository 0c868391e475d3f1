//! Per-connection protocol state machine.
//!
//! [`EndpointSession`] owns one connection's identity and lifecycle,
//! independent of the socket it runs on. The WebSocket handler feeds it
//! inbound text frames; replies and pushed results reach the socket through
//! the connection's outbound queue.

use std::sync::Arc;

use compilify_core::error::CoreError;
use compilify_core::job::ExecutionPayload;
use compilify_core::types::{ConnectionId, JobId};

use crate::relay::registry::{ConnectionRegistry, OutboundReceiver};
use crate::relay::submission::JobSubmitter;
use crate::ws::protocol::{ClientMessage, ServerMessage};

/// Lifecycle of one client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Registered, welcome sent, nothing received yet.
    Open,
    /// Accepting `execute` requests and receiving pushed results.
    Active,
    /// Close started; new `execute` requests are rejected.
    Closing,
    /// Unregistered. Terminal.
    Closed,
}

pub struct EndpointSession {
    id: ConnectionId,
    state: SessionState,
    registry: Arc<ConnectionRegistry>,
    submitter: Arc<JobSubmitter>,
}

impl EndpointSession {
    /// Register a fresh connection and queue its `welcome` frame.
    ///
    /// Returns the session and the receiver of its outbound queue.
    pub async fn open(
        registry: Arc<ConnectionRegistry>,
        submitter: Arc<JobSubmitter>,
    ) -> Result<(Self, OutboundReceiver), CoreError> {
        let connection = registry.register(ConnectionId::new()).await?;
        let id = connection.id;
        registry
            .send_to(&id, ServerMessage::Welcome { connection_id: id })
            .await;

        let session = Self {
            id,
            state: SessionState::Open,
            registry,
            submitter,
        };
        Ok((session, connection.outbound))
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Handle one inbound text frame.
    ///
    /// Unparseable frames get an `error` frame back and leave the session
    /// state untouched.
    pub async fn handle_text(&mut self, text: &str) {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => {
                let _ = self.handle(message).await;
            }
            Err(e) => {
                tracing::debug!(conn_id = %self.id, error = %e, "Unparseable client frame");
                self.registry
                    .send_to(&self.id, ServerMessage::bad_frame(e.to_string()))
                    .await;
            }
        }
    }

    /// Handle one decoded client message.
    ///
    /// On success the `accepted` frame has already been queued. On failure a
    /// `rejected` frame has been queued and the error is returned as well.
    pub async fn handle(&mut self, message: ClientMessage) -> Result<JobId, CoreError> {
        match message {
            ClientMessage::Execute {
                request_id,
                payload,
            } => self.execute(request_id, payload).await,
        }
    }

    async fn execute(
        &mut self,
        request_id: Option<String>,
        payload: ExecutionPayload,
    ) -> Result<JobId, CoreError> {
        match self.state {
            SessionState::Open => self.state = SessionState::Active,
            SessionState::Active => {}
            SessionState::Closing | SessionState::Closed => {
                let err = CoreError::Unavailable("session is closing".into());
                self.reject(request_id, &err).await;
                return Err(err);
            }
        }

        match self
            .submitter
            .submit_request(&self.id, request_id.clone(), payload)
            .await
        {
            Ok(job_id) => Ok(job_id),
            Err(err) => {
                self.reject(request_id, &err).await;
                Err(err)
            }
        }
    }

    async fn reject(&self, request_id: Option<String>, err: &CoreError) {
        tracing::debug!(conn_id = %self.id, error = %err, "Execute rejected");
        self.registry
            .send_to(&self.id, ServerMessage::rejected(request_id, err))
            .await;
    }

    /// Stop accepting new `execute` requests.
    ///
    /// In-flight jobs are not cancelled; their completions are absorbed by
    /// the registry once the session is closed.
    pub fn begin_close(&mut self) {
        if matches!(self.state, SessionState::Open | SessionState::Active) {
            self.state = SessionState::Closing;
        }
    }

    /// Unregister the connection. Idempotent.
    pub async fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.begin_close();
        self.registry.unregister(&self.id).await;
        self.state = SessionState::Closed;
    }
}
