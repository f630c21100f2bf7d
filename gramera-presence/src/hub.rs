use gramera_core::config::PresenceConfig;
use serde::Serialize;
use std::sync::Arc;

use crate::events::PresenceEntry;
use crate::lifecycle::SessionLifecycle;
use crate::registry::ConnectionRegistry;
use crate::relay::{MessageRelay, RelayCounters};
use crate::sessions::SessionTable;

/// Presence relay statistics
#[derive(Debug, Clone, Serialize)]
pub struct PresenceStats {
    pub open_sessions: usize,
    pub identified_sessions: usize,
    pub total_sessions: u64,
    #[serde(flatten)]
    pub relay: RelayCounters,
}

/// Owns the registry and session table and the two components allowed to
/// touch them. One instance per process, shared by reference.
pub struct PresenceHub {
    registry: Arc<ConnectionRegistry>,
    sessions: Arc<SessionTable>,
    lifecycle: SessionLifecycle,
    relay: MessageRelay,
    outbound_buffer: usize,
    max_message_bytes: usize,
}

impl PresenceHub {
    #[must_use]
    pub fn new(config: &PresenceConfig) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let sessions = Arc::new(SessionTable::new());

        Self {
            lifecycle: SessionLifecycle::new(
                registry.clone(),
                sessions.clone(),
                config.max_sessions,
            ),
            relay: MessageRelay::new(registry.clone(), sessions.clone()),
            registry,
            sessions,
            outbound_buffer: config.outbound_buffer,
            max_message_bytes: config.max_message_bytes,
        }
    }

    #[must_use]
    pub const fn lifecycle(&self) -> &SessionLifecycle {
        &self.lifecycle
    }

    #[must_use]
    pub const fn relay(&self) -> &MessageRelay {
        &self.relay
    }

    /// Read-only view of who is online
    #[must_use]
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Capacity for each session's outbound queue
    #[must_use]
    pub const fn outbound_buffer(&self) -> usize {
        self.outbound_buffer
    }

    /// Largest inbound frame a transport should accept
    #[must_use]
    pub const fn max_message_bytes(&self) -> usize {
        self.max_message_bytes
    }

    #[must_use]
    pub fn online(&self) -> Vec<PresenceEntry> {
        self.lifecycle.presence()
    }

    #[must_use]
    pub fn open_sessions(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn stats(&self) -> PresenceStats {
        PresenceStats {
            open_sessions: self.sessions.len(),
            identified_sessions: self.registry.len(),
            total_sessions: self.sessions.total_opened(),
            relay: self.relay.metrics().counters(),
        }
    }
}

impl Default for PresenceHub {
    fn default() -> Self {
        Self::new(&PresenceConfig::default())
    }
}
