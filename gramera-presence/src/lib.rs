//! In-memory presence tracking and point-to-point relay for connected users.
//!
//! A [`PresenceHub`] owns one [`ConnectionRegistry`] (identity to session),
//! one [`SessionTable`] (open transports and their outbound queues), the
//! [`SessionLifecycle`] that mutates both, and the [`MessageRelay`] that reads
//! the registry to forward events.

pub mod error;
pub mod events;
pub mod hub;
pub mod lifecycle;
pub mod registry;
pub mod relay;
pub mod sessions;
pub mod sweeper;

pub use error::{PresenceError, Result};
pub use events::{
    ClientEvent, DirectMessage, IncomingMessage, PresenceEntry, ServerEvent, TypingNotice,
    TypingSignal,
};
pub use hub::{PresenceHub, PresenceStats};
pub use lifecycle::SessionLifecycle;
pub use registry::ConnectionRegistry;
pub use relay::{MessageRelay, RelayCounters, RelayMetrics, RelayOutcome};
pub use sessions::{
    outbox_channel, BroadcastReport, DeliveryError, Outbox, SessionState, SessionTable,
};
pub use sweeper::spawn_idle_sweeper;
