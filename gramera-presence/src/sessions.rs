use dashmap::DashMap;
use gramera_core::models::{SessionId, UserId};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{PresenceError, Result};
use crate::events::ServerEvent;

/// Outbound queue of one session, drained by its transport writer
pub type Outbox = mpsc::Sender<ServerEvent>;

/// Create a bounded outbox and its receiving end
#[must_use]
pub fn outbox_channel(capacity: usize) -> (Outbox, mpsc::Receiver<ServerEvent>) {
    mpsc::channel(capacity.max(1))
}

/// Per-session lifecycle state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unidentified,
    Identified(UserId),
    Closed,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("session is not open")]
    NotOpen,

    #[error("outbound queue full")]
    Full,

    #[error("transport writer gone")]
    Disconnected,
}

/// One open transport session
#[derive(Debug)]
pub struct SessionHandle {
    pub session_id: SessionId,
    pub state: SessionState,
    pub connected_at: Instant,
    pub last_activity: Instant,
    pub events_received: u64,
    outbox: Outbox,
    cancel: CancellationToken,
}

impl SessionHandle {
    #[must_use]
    pub fn new(session_id: SessionId, outbox: Outbox) -> Self {
        let now = Instant::now();
        Self {
            session_id,
            state: SessionState::Unidentified,
            connected_at: now,
            last_activity: now,
            events_received: 0,
            outbox,
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn idle_duration(&self) -> Duration {
        self.last_activity.elapsed()
    }

    fn deliver(&self, event: ServerEvent) -> std::result::Result<(), DeliveryError> {
        self.outbox.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Disconnected,
        })
    }
}

/// Result of a fan-out to every open session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub sent: usize,
    pub failed: usize,
}

/// Every open transport session, identified or not
#[derive(Default)]
pub struct SessionTable {
    sessions: DashMap<SessionId, SessionHandle>,

    /// Slots held by open sessions and inserts in flight
    reserved: AtomicUsize,
    total_opened: AtomicU64,
}

impl SessionTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a newly accepted session, returning its cancellation token.
    ///
    /// At most `max_sessions` sessions are open at once (`0` is unlimited).
    /// The slot is reserved before the map entry is touched, so concurrent
    /// inserts cannot overshoot the limit.
    pub(crate) fn insert(
        &self,
        handle: SessionHandle,
        max_sessions: usize,
    ) -> Result<CancellationToken> {
        use dashmap::mapref::entry::Entry;

        self.reserve_slot(max_sessions)?;

        match self.sessions.entry(handle.session_id.clone()) {
            Entry::Occupied(entry) => {
                self.reserved.fetch_sub(1, Ordering::AcqRel);
                Err(PresenceError::DuplicateSession(entry.key().clone()))
            }
            Entry::Vacant(entry) => {
                let token = handle.cancel.clone();
                entry.insert(handle);
                self.total_opened.fetch_add(1, Ordering::Relaxed);
                Ok(token)
            }
        }
    }

    fn reserve_slot(&self, max_sessions: usize) -> Result<()> {
        self.reserved
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |held| {
                (max_sessions == 0 || held < max_sessions).then_some(held + 1)
            })
            .map(|_| ())
            .map_err(|_| PresenceError::Capacity(max_sessions))
    }

    /// Whether an insert would currently find a free slot
    #[must_use]
    pub fn has_slot(&self, max_sessions: usize) -> bool {
        max_sessions == 0 || self.reserved.load(Ordering::Acquire) < max_sessions
    }

    /// Remove a session, running `f` on it before its slot is released.
    ///
    /// Like [`Self::with_session`], this lets the caller drop the session's
    /// registry entry while no other operation can reach the same session.
    pub(crate) fn remove_with<R>(
        &self,
        session_id: &SessionId,
        f: impl FnOnce(&SessionHandle) -> R,
    ) -> Option<(SessionHandle, R)> {
        let mut released = None;
        let removed = self.sessions.remove_if(session_id, |_, handle| {
            released = Some(f(handle));
            true
        });

        removed.zip(released).map(|((_, handle), released)| {
            self.reserved.fetch_sub(1, Ordering::AcqRel);
            handle.cancel.cancel();
            (handle, released)
        })
    }

    /// Run `f` against an open session while holding its slot.
    ///
    /// A concurrent [`Self::remove_with`] for the same session waits until `f`
    /// returns, which lets callers pair a state change with a registry write.
    pub(crate) fn with_session<R>(
        &self,
        session_id: &SessionId,
        f: impl FnOnce(&mut SessionHandle) -> R,
    ) -> Option<R> {
        self.sessions
            .get_mut(session_id)
            .map(|mut handle| f(&mut *handle))
    }

    /// Queue an event on one session without waiting
    pub fn deliver(
        &self,
        session_id: &SessionId,
        event: ServerEvent,
    ) -> std::result::Result<(), DeliveryError> {
        let handle = self
            .sessions
            .get(session_id)
            .ok_or(DeliveryError::NotOpen)?;
        handle.deliver(event)
    }

    /// Queue an event on every open session.
    ///
    /// A failing session is logged and skipped; the rest still receive it.
    pub fn broadcast(&self, event: &ServerEvent) -> BroadcastReport {
        let mut report = BroadcastReport::default();

        for handle in self.sessions.iter() {
            match handle.deliver(event.clone()) {
                Ok(()) => report.sent += 1,
                Err(err) => {
                    report.failed += 1;
                    warn!(
                        session_id = %handle.session_id,
                        event_type = %event.event_type(),
                        error = %err,
                        "Failed to queue broadcast event"
                    );
                }
            }
        }

        debug!(
            event_type = %event.event_type(),
            sent = report.sent,
            failed = report.failed,
            "Broadcast complete"
        );

        report
    }

    /// Record inbound activity on a session
    pub fn touch(&self, session_id: &SessionId) {
        if let Some(mut handle) = self.sessions.get_mut(session_id) {
            handle.last_activity = Instant::now();
            handle.events_received += 1;
        }
    }

    #[must_use]
    pub fn state(&self, session_id: &SessionId) -> SessionState {
        self.sessions
            .get(session_id)
            .map_or(SessionState::Closed, |handle| handle.state.clone())
    }

    /// Sessions with no inbound activity for longer than `timeout`
    #[must_use]
    pub fn idle_sessions(&self, timeout: Duration) -> Vec<SessionId> {
        self.sessions
            .iter()
            .filter(|handle| handle.idle_duration() > timeout)
            .map(|handle| handle.session_id.clone())
            .collect()
    }

    #[must_use]
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|h| h.session_id.clone()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Sessions ever accepted by this table
    #[must_use]
    pub fn total_opened(&self) -> u64 {
        self.total_opened.load(Ordering::Relaxed)
    }
}
