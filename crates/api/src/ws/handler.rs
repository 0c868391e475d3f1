use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use compilify_core::error::CoreError;
use futures::{SinkExt, StreamExt};

use crate::error::AppResult;
use crate::relay::registry::OutboundReceiver;
use crate::state::AppState;
use crate::ws::protocol::{OutboundFrame, ServerMessage};
use crate::ws::session::EndpointSession;

/// HTTP handler that upgrades `GET /execute` to a WebSocket session.
///
/// Refuses the upgrade with 503 once the relay has stopped admitting work.
pub async fn execute_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> AppResult<impl IntoResponse> {
    if !state.relay.registry().is_accepting().await {
        return Err(CoreError::Unavailable("server is shutting down".into()).into());
    }
    let push_timeout = Duration::from_secs(state.config.push_timeout_secs);
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, push_timeout)))
}

/// Drive a single WebSocket connection after upgrade.
///
/// Splits the socket into a sink (outbound) and stream (inbound), then:
///   1. Opens an [`EndpointSession`], which registers the connection.
///   2. Spawns a sender task that drains the connection's outbound queue.
///   3. Feeds inbound text frames to the session on the current task.
///   4. Closes the session when either side stops.
async fn handle_socket(socket: WebSocket, state: AppState, push_timeout: Duration) {
    let (mut sink, mut stream) = socket.split();

    let (mut session, rx) = match EndpointSession::open(
        state.relay.registry().clone(),
        state.relay.submitter().clone(),
    )
    .await
    {
        Ok(opened) => opened,
        Err(e) => {
            tracing::warn!(error = %e, "Refusing WebSocket session");
            let _ = sink.send(ServerMessage::rejected(None, &e).to_ws()).await;
            let _ = sink.send(Message::Close(None)).await;
            return;
        }
    };
    let conn_id = session.id();
    tracing::info!(conn_id = %conn_id, "WebSocket connected");

    let mut send_task = tokio::spawn(forward_outbound(sink, rx, push_timeout, conn_id));

    loop {
        tokio::select! {
            _ = &mut send_task => {
                tracing::debug!(conn_id = %conn_id, "Outbound side finished");
                break;
            }
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    session.handle_text(text.as_str()).await;
                }
                Some(Ok(Message::Binary(_))) => {
                    state
                        .relay
                        .registry()
                        .send_to(&conn_id, ServerMessage::bad_frame("binary frames are not supported"))
                        .await;
                }
                Some(Ok(Message::Pong(_))) => {
                    tracing::trace!(conn_id = %conn_id, "Pong received");
                }
                Some(Ok(Message::Ping(_))) => {}
                Some(Ok(Message::Close(_))) => {
                    tracing::debug!(conn_id = %conn_id, "Client sent Close");
                    session.begin_close();
                    break;
                }
                None => break,
                Some(Err(e)) => {
                    tracing::debug!(conn_id = %conn_id, error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
    }

    session.close().await;
    send_task.abort();
    tracing::info!(conn_id = %conn_id, "WebSocket disconnected");
}

/// Forward queued frames to the socket until the queue closes, a push
/// times out, or a `Close` frame has been written.
async fn forward_outbound<S>(
    mut sink: S,
    mut rx: OutboundReceiver,
    push_timeout: Duration,
    conn_id: compilify_core::types::ConnectionId,
) where
    S: futures::Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    while let Some(frame) = rx.recv().await {
        let closing = matches!(frame, OutboundFrame::Close);
        match tokio::time::timeout(push_timeout, sink.send(frame.into_ws())).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(conn_id = %conn_id, error = %e, "WebSocket sink closed");
                break;
            }
            Err(_) => {
                tracing::warn!(
                    conn_id = %conn_id,
                    timeout_secs = push_timeout.as_secs(),
                    "Push timed out, dropping connection"
                );
                break;
            }
        }
        if closing {
            break;
        }
    }
}
