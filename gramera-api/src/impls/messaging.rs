//! Per-session message loop
//!
//! Transports implement [`StreamMessage`] for the inbound side; outbound
//! events travel through the session's outbox, which the transport drains on
//! its own writer task. [`SessionHandler::run`] owns everything in between:
//! dispatching client events to the lifecycle and relay, honouring
//! server-side closes, and closing the session when the transport ends.

use std::sync::Arc;
use std::time::Duration;

use gramera_core::models::SessionId;
use gramera_presence::{ClientEvent, PresenceError, PresenceHub, RelayOutcome};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum StreamError {
    /// Frame could not be decoded; the connection stays usable
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// Underlying transport failed; the connection is finished
    #[error("transport error: {0}")]
    Transport(String),
}

/// Inbound side of a session transport
#[async_trait::async_trait]
pub trait StreamMessage: Send {
    /// Receive the next client event
    ///
    /// Returns None when the connection is closed
    async fn recv(&mut self) -> Option<Result<ClientEvent, StreamError>>;

    /// Check if connection is still alive
    fn is_alive(&self) -> bool;
}

/// Drives one open session until either side ends it
pub struct SessionHandler {
    hub: Arc<PresenceHub>,
    session_id: SessionId,
    closed: CancellationToken,
}

impl SessionHandler {
    /// `closed` is the token returned when the session was opened
    #[must_use]
    pub const fn new(hub: Arc<PresenceHub>, session_id: SessionId, closed: CancellationToken) -> Self {
        Self {
            hub,
            session_id,
            closed,
        }
    }

    /// Run the message loop, closing the session on exit.
    ///
    /// Events are handled one at a time in arrival order. Malformed frames
    /// and rejected events are logged and skipped.
    pub async fn run<S: StreamMessage>(&self, stream: &mut S) {
        loop {
            // Checked in order: once the session is closed, buffered frames
            // are not dispatched
            tokio::select! {
                biased;

                () = self.closed.cancelled() => {
                    tracing::info!(session_id = %self.session_id, "Session closed by server");
                    break;
                }

                incoming = stream.recv() => {
                    match incoming {
                        Some(Ok(event)) => {
                            self.hub.lifecycle().touch(&self.session_id);
                            if let Err(e) = self.handle_event(event) {
                                tracing::warn!(
                                    session_id = %self.session_id,
                                    error = %e,
                                    "Rejected client event"
                                );
                            }
                        }
                        Some(Err(StreamError::Malformed(reason))) => {
                            self.hub.lifecycle().touch(&self.session_id);
                            tracing::warn!(
                                session_id = %self.session_id,
                                reason = %reason,
                                "Skipping malformed frame"
                            );
                        }
                        Some(Err(e @ StreamError::Transport(_))) => {
                            tracing::error!(session_id = %self.session_id, error = %e, "Error receiving frame");
                            break;
                        }
                        None => {
                            tracing::info!(session_id = %self.session_id, "Client disconnected");
                            break;
                        }
                    }
                }

                () = tokio::time::sleep(HEARTBEAT_INTERVAL) => {
                    if !stream.is_alive() {
                        tracing::info!(session_id = %self.session_id, "Connection no longer alive");
                        break;
                    }
                }
            }
        }

        self.hub.lifecycle().close(&self.session_id);
    }

    fn handle_event(&self, event: ClientEvent) -> Result<(), PresenceError> {
        let event_type = event.event_type();

        let outcome = match event {
            ClientEvent::Identify { identity } => {
                return self.hub.lifecycle().identify(&self.session_id, identity);
            }
            ClientEvent::Message(msg) => self.hub.relay().relay_message(
                &msg.sender_identity,
                &msg.recipient_identity,
                msg.content,
            )?,
            ClientEvent::TypingStart(signal) => self.hub.relay().relay_typing(
                &signal.sender_identity,
                &signal.recipient_identity,
                true,
            )?,
            ClientEvent::TypingStop(signal) => self.hub.relay().relay_typing(
                &signal.sender_identity,
                &signal.recipient_identity,
                false,
            )?,
        };

        if outcome == RelayOutcome::RecipientOffline {
            tracing::debug!(
                session_id = %self.session_id,
                event_type,
                "Recipient offline"
            );
        }

        Ok(())
    }
}
