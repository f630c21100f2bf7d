use gramera_core::models::{SessionId, UserId};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{PresenceError, Result};
use crate::events::{PresenceEntry, ServerEvent};
use crate::registry::ConnectionRegistry;
use crate::sessions::{BroadcastReport, Outbox, SessionHandle, SessionState, SessionTable};

/// Drives each session through `Unidentified -> Identified -> Closed` and
/// keeps the registry in step, broadcasting presence on every change.
pub struct SessionLifecycle {
    registry: Arc<ConnectionRegistry>,
    sessions: Arc<SessionTable>,
    max_sessions: usize,

    /// Serializes snapshot + fan-out so every session sees presence lists
    /// in registry order
    presence_lock: Mutex<()>,
}

impl SessionLifecycle {
    #[must_use]
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        sessions: Arc<SessionTable>,
        max_sessions: usize,
    ) -> Self {
        Self {
            registry,
            sessions,
            max_sessions,
            presence_lock: Mutex::new(()),
        }
    }

    /// Fail with `Capacity` when no further session may be opened
    /// (`max_sessions = 0` is unlimited)
    pub fn check_capacity(&self) -> Result<()> {
        if self.sessions.has_slot(self.max_sessions) {
            Ok(())
        } else {
            Err(PresenceError::Capacity(self.max_sessions))
        }
    }

    /// Accept a new transport session in the unidentified state.
    ///
    /// The returned token is cancelled when the session is closed from any
    /// path (disconnect, idle eviction, shutdown).
    pub fn open(&self, session_id: SessionId, outbox: Outbox) -> Result<CancellationToken> {
        let token = self
            .sessions
            .insert(SessionHandle::new(session_id.clone(), outbox), self.max_sessions)?;

        info!(
            session_id = %session_id,
            open_sessions = self.sessions.len(),
            "Session opened"
        );

        Ok(token)
    }

    /// Bind `identity` to an open session and rebroadcast presence.
    ///
    /// Re-identifying is an overwrite. Closed or unknown sessions are
    /// rejected without touching the registry.
    pub fn identify(&self, session_id: &SessionId, identity: UserId) -> Result<()> {
        if identity.is_blank() {
            return Err(PresenceError::Malformed(
                "identify requires a non-empty identity".to_string(),
            ));
        }

        let displaced = self
            .sessions
            .with_session(session_id, |handle| {
                handle.state = SessionState::Identified(identity.clone());
                self.registry.upsert(identity.clone(), session_id.clone())
            })
            .ok_or_else(|| PresenceError::SessionClosed(session_id.clone()))?;

        if let Some(previous) = displaced {
            // `previous` may have identified again since the upsert; only the
            // registry under its slot knows whether it still owns `identity`
            self.sessions.with_session(&previous, |handle| {
                let still_owner = self.registry.identity_of(&previous).as_ref() == Some(&identity);
                if !still_owner && handle.state == SessionState::Identified(identity.clone()) {
                    handle.state = SessionState::Unidentified;
                }
            });
            info!(
                identity = %identity,
                session_id = %session_id,
                previous_session_id = %previous,
                "Identity moved to a new session"
            );
        } else {
            info!(identity = %identity, session_id = %session_id, "Session identified");
        }

        self.broadcast_presence();
        Ok(())
    }

    /// Close a session, dropping the registry entry it owns.
    ///
    /// Returns `false` when the session was already closed; repeated closes
    /// have no effect and do not rebroadcast.
    pub fn close(&self, session_id: &SessionId) -> bool {
        let Some((handle, released)) = self
            .sessions
            .remove_with(session_id, |_| self.registry.remove_by_session(session_id))
        else {
            debug!(session_id = %session_id, "Close for session that is not open");
            return false;
        };

        info!(
            session_id = %session_id,
            identity = ?released.as_ref().map(UserId::as_str),
            duration = ?handle.connected_at.elapsed(),
            events_received = handle.events_received,
            open_sessions = self.sessions.len(),
            "Session closed"
        );

        self.broadcast_presence();
        true
    }

    /// Close every open session, returning how many were closed
    pub fn close_all(&self) -> usize {
        self.sessions
            .session_ids()
            .iter()
            .filter(|id| self.close(id))
            .count()
    }

    /// Close sessions idle for longer than `timeout`
    pub fn evict_idle(&self, timeout: Duration) -> Vec<SessionId> {
        self.sessions
            .idle_sessions(timeout)
            .into_iter()
            .filter(|id| self.close(id))
            .collect()
    }

    /// Record inbound activity
    pub fn touch(&self, session_id: &SessionId) {
        self.sessions.touch(session_id);
    }

    #[must_use]
    pub fn state(&self, session_id: &SessionId) -> SessionState {
        self.sessions.state(session_id)
    }

    #[must_use]
    pub fn is_open(&self, session_id: &SessionId) -> bool {
        self.state(session_id) != SessionState::Closed
    }

    /// Current presence set as wire entries
    #[must_use]
    pub fn presence(&self) -> Vec<PresenceEntry> {
        self.registry
            .snapshot()
            .into_iter()
            .map(PresenceEntry::from)
            .collect()
    }

    fn broadcast_presence(&self) -> BroadcastReport {
        let _guard = self.presence_lock.lock();
        let event = ServerEvent::PresenceList(self.presence());
        self.sessions.broadcast(&event)
    }
}
