use gramera_core::models::{SessionId, UserId};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{PresenceError, Result};
use crate::events::{IncomingMessage, ServerEvent};
use crate::registry::ConnectionRegistry;
use crate::sessions::{DeliveryError, SessionTable};

/// What happened to a relayed event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Queued on the recipient's current session
    Delivered(SessionId),

    /// Recipient has no session; the event is dropped
    RecipientOffline,

    /// Recipient's queue was full or its writer had gone away
    DeliveryFailed(SessionId),
}

/// Relay counters
#[derive(Debug, Default)]
pub struct RelayMetrics {
    messages_relayed: AtomicU64,
    typing_relayed: AtomicU64,
    dropped_offline: AtomicU64,
    delivery_failures: AtomicU64,
}

/// Point-in-time copy of [`RelayMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RelayCounters {
    pub messages_relayed: u64,
    pub typing_relayed: u64,
    pub dropped_offline: u64,
    pub delivery_failures: u64,
}

impl RelayMetrics {
    #[must_use]
    pub fn counters(&self) -> RelayCounters {
        RelayCounters {
            messages_relayed: self.messages_relayed.load(Ordering::Relaxed),
            typing_relayed: self.typing_relayed.load(Ordering::Relaxed),
            dropped_offline: self.dropped_offline.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
        }
    }
}

/// Forwards chat and typing events to whichever session currently speaks
/// for the recipient. Fire-and-forget: no acknowledgment, no queueing for
/// offline users, no retries.
pub struct MessageRelay {
    registry: Arc<ConnectionRegistry>,
    sessions: Arc<SessionTable>,
    metrics: RelayMetrics,
}

impl MessageRelay {
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>, sessions: Arc<SessionTable>) -> Self {
        Self {
            registry,
            sessions,
            metrics: RelayMetrics::default(),
        }
    }

    pub fn relay_message(
        &self,
        sender: &UserId,
        recipient: &UserId,
        content: String,
    ) -> Result<RelayOutcome> {
        validate_route(sender, recipient)?;

        let event = ServerEvent::Message(IncomingMessage {
            sender_identity: sender.clone(),
            content,
        });
        let outcome = self.forward(recipient, event);

        if matches!(outcome, RelayOutcome::Delivered(_)) {
            self.metrics.messages_relayed.fetch_add(1, Ordering::Relaxed);
        }
        Ok(outcome)
    }

    pub fn relay_typing(
        &self,
        sender: &UserId,
        recipient: &UserId,
        starting: bool,
    ) -> Result<RelayOutcome> {
        validate_route(sender, recipient)?;

        let outcome = self.forward(recipient, ServerEvent::typing(sender.clone(), starting));

        if matches!(outcome, RelayOutcome::Delivered(_)) {
            self.metrics.typing_relayed.fetch_add(1, Ordering::Relaxed);
        }
        Ok(outcome)
    }

    #[must_use]
    pub const fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    fn forward(&self, recipient: &UserId, event: ServerEvent) -> RelayOutcome {
        let Some(session_id) = self.registry.find(recipient) else {
            return self.drop_offline(recipient, &event);
        };

        match self.sessions.deliver(&session_id, event.clone()) {
            Ok(()) => {
                debug!(
                    recipient = %recipient,
                    session_id = %session_id,
                    event_type = %event.event_type(),
                    "Event relayed"
                );
                RelayOutcome::Delivered(session_id)
            }
            // Session closed between lookup and delivery
            Err(DeliveryError::NotOpen) => self.drop_offline(recipient, &event),
            Err(err) => {
                self.metrics.delivery_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    recipient = %recipient,
                    session_id = %session_id,
                    event_type = %event.event_type(),
                    error = %err,
                    "Failed to relay event"
                );
                RelayOutcome::DeliveryFailed(session_id)
            }
        }
    }

    fn drop_offline(&self, recipient: &UserId, event: &ServerEvent) -> RelayOutcome {
        self.metrics.dropped_offline.fetch_add(1, Ordering::Relaxed);
        debug!(
            recipient = %recipient,
            event_type = %event.event_type(),
            "Recipient offline, event dropped"
        );
        RelayOutcome::RecipientOffline
    }
}

fn validate_route(sender: &UserId, recipient: &UserId) -> Result<()> {
    if sender.is_blank() {
        return Err(PresenceError::Malformed("missing sender identity".to_string()));
    }
    if recipient.is_blank() {
        return Err(PresenceError::Malformed(
            "missing recipient identity".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::SessionLifecycle;
    use crate::sessions::outbox_channel;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Fixture {
        lifecycle: SessionLifecycle,
        relay: MessageRelay,
    }

    fn setup() -> Fixture {
        let registry = Arc::new(ConnectionRegistry::new());
        let sessions = Arc::new(SessionTable::new());
        Fixture {
            lifecycle: SessionLifecycle::new(registry.clone(), sessions.clone(), 0),
            relay: MessageRelay::new(registry, sessions),
        }
    }

    /// Open and identify a session, discarding the presence broadcasts so far
    fn connect(
        fixture: &Fixture,
        session: &str,
        identity: &str,
        others: &mut [&mut mpsc::Receiver<ServerEvent>],
    ) -> mpsc::Receiver<ServerEvent> {
        let (tx, mut rx) = outbox_channel(16);
        let session_id = SessionId::from(session);
        fixture.lifecycle.open(session_id.clone(), tx).unwrap();
        fixture
            .lifecycle
            .identify(&session_id, UserId::from(identity))
            .unwrap();
        while rx.try_recv().is_ok() {}
        for other in others.iter_mut() {
            while other.try_recv().is_ok() {}
        }
        rx
    }

    #[tokio::test]
    async fn test_relay_delivers_to_recipient_only() {
        let fixture = setup();
        let mut rx_a = connect(&fixture, "s1", "a", &mut []);
        let mut rx_b = connect(&fixture, "s2", "b", &mut [&mut rx_a]);

        let outcome = fixture
            .relay
            .relay_message(&UserId::from("a"), &UserId::from("b"), "hi".to_string())
            .unwrap();

        assert_eq!(outcome, RelayOutcome::Delivered(SessionId::from("s2")));
        assert_eq!(
            rx_b.recv().await.unwrap(),
            ServerEvent::Message(IncomingMessage {
                sender_identity: UserId::from("a"),
                content: "hi".to_string(),
            })
        );
        assert!(rx_b.try_recv().is_err(), "exactly one delivery");
        assert!(
            tokio::time::timeout(Duration::from_millis(50), rx_a.recv())
                .await
                .is_err(),
            "sender must not receive its own message"
        );
        assert_eq!(fixture.relay.metrics().counters().messages_relayed, 1);
    }

    #[tokio::test]
    async fn test_relay_to_offline_recipient_is_dropped() {
        let fixture = setup();
        let mut rx_a = connect(&fixture, "s1", "a", &mut []);

        let outcome = fixture
            .relay
            .relay_message(&UserId::from("a"), &UserId::from("ghost"), "hi".to_string())
            .unwrap();

        assert_eq!(outcome, RelayOutcome::RecipientOffline);
        assert!(rx_a.try_recv().is_err());
        assert_eq!(fixture.relay.metrics().counters().dropped_offline, 1);
    }

    #[tokio::test]
    async fn test_relay_follows_latest_session() {
        let fixture = setup();
        let mut old = connect(&fixture, "s1", "b", &mut []);
        let mut new = connect(&fixture, "s2", "b", &mut [&mut old]);

        fixture
            .relay
            .relay_message(&UserId::from("a"), &UserId::from("b"), "hi".to_string())
            .unwrap();

        assert!(matches!(new.recv().await, Some(ServerEvent::Message(_))));
        assert!(old.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_relay_after_recipient_disconnects() {
        let fixture = setup();
        let _rx_b = connect(&fixture, "s2", "b", &mut []);
        fixture.lifecycle.close(&SessionId::from("s2"));

        let outcome = fixture
            .relay
            .relay_typing(&UserId::from("a"), &UserId::from("b"), true)
            .unwrap();

        assert_eq!(outcome, RelayOutcome::RecipientOffline);
    }

    #[tokio::test]
    async fn test_typing_start_and_stop() {
        let fixture = setup();
        let mut rx_b = connect(&fixture, "s2", "b", &mut []);
        let a = UserId::from("a");
        let b = UserId::from("b");

        fixture.relay.relay_typing(&a, &b, true).unwrap();
        fixture.relay.relay_typing(&a, &b, false).unwrap();

        assert_eq!(rx_b.recv().await.unwrap(), ServerEvent::typing(a.clone(), true));
        assert_eq!(rx_b.recv().await.unwrap(), ServerEvent::typing(a, false));
        assert_eq!(fixture.relay.metrics().counters().typing_relayed, 2);
    }

    #[tokio::test]
    async fn test_events_from_one_sender_arrive_in_order() {
        let fixture = setup();
        let mut rx_b = connect(&fixture, "s2", "b", &mut []);
        let a = UserId::from("a");
        let b = UserId::from("b");

        for i in 0..10 {
            fixture
                .relay
                .relay_message(&a, &b, format!("m{i}"))
                .unwrap();
        }

        for i in 0..10 {
            match rx_b.recv().await.unwrap() {
                ServerEvent::Message(msg) => assert_eq!(msg.content, format!("m{i}")),
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[test]
    fn test_missing_recipient_is_malformed() {
        let fixture = setup();

        let err = fixture
            .relay
            .relay_message(&UserId::from("a"), &UserId::from(""), "hi".to_string())
            .unwrap_err();
        assert!(matches!(err, PresenceError::Malformed(_)));

        let err = fixture
            .relay
            .relay_typing(&UserId::from(""), &UserId::from("b"), true)
            .unwrap_err();
        assert!(matches!(err, PresenceError::Malformed(_)));
    }

    #[test]
    fn test_full_outbox_reports_failure() {
        let fixture = setup();
        let (tx, _rx) = outbox_channel(1);
        let session_id = SessionId::from("s2");
        fixture.lifecycle.open(session_id.clone(), tx).unwrap();
        // The presence broadcast from identify fills the single slot
        fixture
            .lifecycle
            .identify(&session_id, UserId::from("b"))
            .unwrap();

        let outcome = fixture
            .relay
            .relay_message(&UserId::from("a"), &UserId::from("b"), "hi".to_string())
            .unwrap();

        assert_eq!(outcome, RelayOutcome::DeliveryFailed(session_id));
        assert_eq!(fixture.relay.metrics().counters().delivery_failures, 1);
    }
}
