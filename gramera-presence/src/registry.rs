use gramera_core::models::{SessionId, UserId};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Default)]
struct RegistryInner {
    /// identity -> current session, in first-identify order
    by_identity: IndexMap<UserId, SessionId>,

    /// session -> identity it currently owns
    by_session: HashMap<SessionId, UserId>,
}

/// Live mapping from user identity to the session currently speaking for it.
///
/// Holds at most one entry per identity and at most one per session. Both
/// indexes sit behind a single mutex so every operation sees them agree.
/// Only [`crate::SessionLifecycle`] mutates the registry; everyone else reads.
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: Mutex<RegistryInner>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Point `identity` at `session`, replacing any earlier session.
    ///
    /// If `session` previously spoke for a different identity, that entry is
    /// dropped. Returns the session that used to own `identity`, if it was a
    /// different one.
    pub(crate) fn upsert(&self, identity: UserId, session: SessionId) -> Option<SessionId> {
        let mut inner = self.inner.lock();

        if let Some(previous_identity) = inner.by_session.get(&session).cloned() {
            if previous_identity != identity {
                inner.by_identity.shift_remove(&previous_identity);
            }
        }

        let displaced = inner
            .by_identity
            .insert(identity.clone(), session.clone())
            .filter(|previous| *previous != session);

        if let Some(previous_session) = &displaced {
            inner.by_session.remove(previous_session);
        }

        inner.by_session.insert(session, identity);
        displaced
    }

    /// Remove the entry owned by `session`, returning its identity.
    ///
    /// A session that was displaced by a later identify no longer owns
    /// anything, so removing it leaves the identity's current entry alone.
    pub(crate) fn remove_by_session(&self, session: &SessionId) -> Option<UserId> {
        let mut inner = self.inner.lock();

        let identity = inner.by_session.remove(session)?;
        if inner.by_identity.get(&identity) == Some(session) {
            inner.by_identity.shift_remove(&identity);
        }

        Some(identity)
    }

    #[must_use]
    pub fn find(&self, identity: &UserId) -> Option<SessionId> {
        self.inner.lock().by_identity.get(identity).cloned()
    }

    /// Current (identity, session) pairs, no duplicates
    #[must_use]
    pub fn snapshot(&self) -> Vec<(UserId, SessionId)> {
        self.inner
            .lock()
            .by_identity
            .iter()
            .map(|(identity, session)| (identity.clone(), session.clone()))
            .collect()
    }

    #[must_use]
    pub fn identity_of(&self, session: &SessionId) -> Option<UserId> {
        self.inner.lock().by_session.get(session).cloned()
    }

    #[must_use]
    pub fn contains_session(&self, session: &SessionId) -> bool {
        self.inner.lock().by_session.contains_key(session)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().by_identity.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn user(id: &str) -> UserId {
        UserId::from(id)
    }

    fn session(id: &str) -> SessionId {
        SessionId::from(id)
    }

    #[test]
    fn test_upsert_and_find() {
        let registry = ConnectionRegistry::new();

        assert!(registry.upsert(user("a"), session("s1")).is_none());

        assert_eq!(registry.find(&user("a")), Some(session("s1")));
        assert_eq!(registry.identity_of(&session("s1")), Some(user("a")));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let registry = ConnectionRegistry::new();

        registry.upsert(user("a"), session("s1"));
        assert!(registry.upsert(user("a"), session("s1")).is_none());

        assert_eq!(registry.snapshot(), vec![(user("a"), session("s1"))]);
    }

    #[test]
    fn test_last_upsert_wins() {
        let registry = ConnectionRegistry::new();

        registry.upsert(user("a"), session("s1"));
        let displaced = registry.upsert(user("a"), session("s2"));

        assert_eq!(displaced, Some(session("s1")));
        assert_eq!(registry.find(&user("a")), Some(session("s2")));
        assert!(!registry.contains_session(&session("s1")));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_uniqueness_over_many_upserts() {
        let registry = ConnectionRegistry::new();
        let mut expected = std::collections::HashMap::new();

        for round in 0..50 {
            let identity = user(&format!("u{}", round % 7));
            let sess = session(&format!("s{}", round % 11));
            registry.upsert(identity.clone(), sess.clone());

            // The session now speaks only for `identity`
            expected.retain(|_, s: &mut SessionId| *s != sess);
            expected.insert(identity, sess);
        }

        let snapshot = registry.snapshot();
        let identities: HashSet<_> = snapshot.iter().map(|(i, _)| i.clone()).collect();
        let sessions: HashSet<_> = snapshot.iter().map(|(_, s)| s.clone()).collect();

        assert_eq!(identities.len(), snapshot.len());
        assert_eq!(sessions.len(), snapshot.len());
        assert_eq!(snapshot.len(), expected.len());
        for (identity, sess) in &expected {
            assert_eq!(registry.find(identity).as_ref(), Some(sess));
        }
    }

    #[test]
    fn test_churn_removes_only_closed_session() {
        let registry = ConnectionRegistry::new();

        registry.upsert(user("a"), session("s1"));
        registry.upsert(user("b"), session("s2"));
        assert_eq!(registry.remove_by_session(&session("s1")), Some(user("a")));

        assert!(registry.find(&user("a")).is_none());
        assert_eq!(registry.find(&user("b")), Some(session("s2")));
    }

    #[test]
    fn test_displaced_session_does_not_own_identity() {
        let registry = ConnectionRegistry::new();

        registry.upsert(user("a"), session("s1"));
        registry.upsert(user("a"), session("s2"));

        assert!(registry.remove_by_session(&session("s1")).is_none());
        assert_eq!(registry.find(&user("a")), Some(session("s2")));

        assert_eq!(registry.remove_by_session(&session("s2")), Some(user("a")));
        assert!(registry.find(&user("a")).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_reidentify_session_as_other_identity() {
        let registry = ConnectionRegistry::new();

        registry.upsert(user("a"), session("s1"));
        registry.upsert(user("b"), session("s1"));

        assert!(registry.find(&user("a")).is_none());
        assert_eq!(registry.find(&user("b")), Some(session("s1")));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_unknown_session_is_noop() {
        let registry = ConnectionRegistry::new();
        registry.upsert(user("a"), session("s1"));

        assert!(registry.remove_by_session(&session("ghost")).is_none());
        assert!(registry.remove_by_session(&session("ghost")).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_snapshot_reflects_current_contents() {
        let registry = ConnectionRegistry::new();

        registry.upsert(user("a"), session("s1"));
        registry.upsert(user("b"), session("s2"));
        registry.upsert(user("c"), session("s3"));
        registry.remove_by_session(&session("s2"));

        assert_eq!(
            registry.snapshot(),
            vec![(user("a"), session("s1")), (user("c"), session("s3"))]
        );
    }
}
