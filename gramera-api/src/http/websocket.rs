//! WebSocket transport with JSON text frames
//!
//! Each connection becomes one presence session. Inbound frames are decoded
//! here and handed to `SessionHandler::run`; outbound events are drained from
//! the session's outbox by a dedicated writer task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::stream::SplitStream;
use futures::{Sink, SinkExt, StreamExt};
use gramera_core::models::SessionId;
use gramera_presence::{outbox_channel, ClientEvent, PresenceError, PresenceHub, ServerEvent};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::http::{AppResult, AppState};
use crate::impls::{JsonCodec, SessionHandler, StreamError, StreamMessage};

/// Time the writer gets to flush queued events after the session ends
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// WebSocket implementation of `StreamMessage`
struct WebSocketStream {
    receiver: SplitStream<WebSocket>,
    hub: Arc<PresenceHub>,
    session_id: SessionId,
    is_alive: Arc<AtomicBool>,
}

#[async_trait::async_trait]
impl StreamMessage for WebSocketStream {
    async fn recv(&mut self) -> Option<Result<ClientEvent, StreamError>> {
        loop {
            match self.receiver.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Some(
                        JsonCodec::decode_client_event(text.as_str())
                            .map_err(|e| StreamError::Malformed(e.to_string())),
                    );
                }
                Some(Ok(Message::Close(_))) | None => return None,
                Some(Err(e)) => return Some(Err(StreamError::Transport(e.to_string()))),
                Some(Ok(_)) => {
                    // Binary, ping and pong frames carry no events but still
                    // count as activity
                    self.hub.lifecycle().touch(&self.session_id);
                }
            }
        }
    }

    fn is_alive(&self) -> bool {
        self.is_alive.load(Ordering::Relaxed)
    }
}

/// Upgrade to a presence session
///
/// <ws://host/ws>
pub async fn websocket_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> AppResult<impl IntoResponse> {
    if let Err(e) = state.hub.lifecycle().check_capacity() {
        warn!(
            open_sessions = state.hub.open_sessions(),
            "Rejecting WebSocket upgrade at capacity"
        );
        return Err(e.into());
    }

    let max_message_bytes = state.hub.max_message_bytes();
    Ok(ws
        .max_message_size(max_message_bytes)
        .max_frame_size(max_message_bytes)
        .on_upgrade(move |socket| handle_socket(socket, state)))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let hub = state.hub;
    let session_id = SessionId::new();

    let (tx, rx) = outbox_channel(hub.outbound_buffer());
    let closed = match hub.lifecycle().open(session_id.clone(), tx) {
        Ok(token) => token,
        Err(e @ PresenceError::Capacity(_)) => {
            warn!(session_id = %session_id, error = %e, "Session refused after upgrade");
            return;
        }
        Err(e) => {
            error!(session_id = %session_id, error = %e, "Failed to open session");
            return;
        }
    };

    info!(session_id = %session_id, "WebSocket connection established");

    let (sink, receiver) = socket.split();
    let is_alive = Arc::new(AtomicBool::new(true));
    let mut writer = tokio::spawn(write_events(
        sink,
        rx,
        hub.clone(),
        session_id.clone(),
        is_alive.clone(),
    ));

    let mut stream = WebSocketStream {
        receiver,
        hub: hub.clone(),
        session_id: session_id.clone(),
        is_alive,
    };
    SessionHandler::new(hub, session_id.clone(), closed)
        .run(&mut stream)
        .await;

    // The outbox sender went away with the session, so the writer ends once
    // it has flushed whatever is still queued
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer)
        .await
        .is_err()
    {
        warn!(session_id = %session_id, "Writer did not drain in time");
        writer.abort();
    }

    info!(session_id = %session_id, "WebSocket connection closed");
}

/// Drain the outbox into text frames.
///
/// A failed write closes the session, which ends its message loop and frees
/// its presence entry.
async fn write_events<S>(
    mut sink: S,
    mut rx: mpsc::Receiver<ServerEvent>,
    hub: Arc<PresenceHub>,
    session_id: SessionId,
    is_alive: Arc<AtomicBool>,
) where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    while let Some(event) = rx.recv().await {
        let text = match JsonCodec::encode_server_event(&event) {
            Ok(text) => text,
            Err(e) => {
                error!(session_id = %session_id, error = %e, "Failed to encode server event");
                continue;
            }
        };

        if let Err(e) = sink.send(Message::Text(text.into())).await {
            warn!(session_id = %session_id, error = %e, "Failed to send WebSocket message");
            is_alive.store(false, Ordering::Relaxed);
            hub.lifecycle().close(&session_id);
            return;
        }
    }

    let _ = sink.send(Message::Close(None)).await;
}
