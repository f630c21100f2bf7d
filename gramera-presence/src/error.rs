//! Error types for the presence relay

use gramera_core::models::SessionId;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PresenceError {
    /// Event is missing a required identity or recipient
    #[error("Malformed event: {0}")]
    Malformed(String),

    /// Session is unknown or already closed
    #[error("Session closed: {0}")]
    SessionClosed(SessionId),

    #[error("Session already open: {0}")]
    DuplicateSession(SessionId),

    #[error("Server at capacity ({0} sessions)")]
    Capacity(usize),
}

pub type Result<T> = std::result::Result<T, PresenceError>;
