//! Frames exchanged with clients over the `/execute` WebSocket.
//!
//! Every frame is a JSON text message tagged by its `type` field.

use axum::body::Bytes;
use axum::extract::ws::Message;
use compilify_core::error::CoreError;
use compilify_core::job::{CompletionEvent, ExecutionPayload, ExecutionResult};
use compilify_core::types::{ConnectionId, JobId, Timestamp};
use serde::{Deserialize, Serialize};

/// A frame sent by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Ask for `payload` to be compiled and run.
    Execute {
        /// Opaque client token echoed back on `accepted` / `rejected`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        payload: ExecutionPayload,
    },
}

/// A frame sent by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// First frame on every connection.
    Welcome { connection_id: ConnectionId },
    /// The job was published; its result follows later as a `result` frame.
    Accepted {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        job_id: JobId,
    },
    /// The execute request failed before a job was created.
    Rejected {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        code: String,
        message: String,
    },
    /// Completion of a job owned by this connection.
    Result {
        job_id: JobId,
        result: ExecutionResult,
        completed_at: Timestamp,
    },
    /// The client sent something the server could not understand.
    Error { code: String, message: String },
}

impl ServerMessage {
    pub fn rejected(request_id: Option<String>, err: &CoreError) -> Self {
        ServerMessage::Rejected {
            request_id,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }

    pub fn bad_frame(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            code: "BAD_FRAME".to_string(),
            message: message.into(),
        }
    }

    /// Encode as a WebSocket text message.
    pub fn to_ws(&self) -> Message {
        // Infallible: no variant contains a map with non-string keys.
        let text = serde_json::to_string(self).unwrap_or_default();
        Message::Text(text.into())
    }
}

impl From<CompletionEvent> for ServerMessage {
    fn from(event: CompletionEvent) -> Self {
        ServerMessage::Result {
            job_id: event.job_id,
            result: event.result,
            completed_at: event.completed_at,
        }
    }
}

/// An item in a connection's outbound queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Push(ServerMessage),
    Ping,
    Close,
}

impl OutboundFrame {
    pub fn into_ws(self) -> Message {
        match self {
            OutboundFrame::Push(msg) => msg.to_ws(),
            OutboundFrame::Ping => Message::Ping(Bytes::new()),
            OutboundFrame::Close => Message::Close(None),
        }
    }
}
