use gramera_core::models::{SessionId, UserId};
use serde::{Deserialize, Serialize};

/// Point-to-point chat payload sent by a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectMessage {
    pub sender_identity: UserId,
    pub recipient_identity: UserId,
    pub content: String,
}

/// Typing indicator addressed to one recipient
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingSignal {
    pub sender_identity: UserId,
    pub recipient_identity: UserId,
}

/// Events a client sends over its session
///
/// Wire shape: `{"event": "typing-start", "data": {...}}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    Identify { identity: UserId },
    Message(DirectMessage),
    TypingStart(TypingSignal),
    TypingStop(TypingSignal),
}

impl ClientEvent {
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::Identify { .. } => "identify",
            Self::Message(_) => "message",
            Self::TypingStart(_) => "typing-start",
            Self::TypingStop(_) => "typing-stop",
        }
    }
}

/// One online (identity, session) pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEntry {
    pub identity: UserId,
    pub session_id: SessionId,
}

impl From<(UserId, SessionId)> for PresenceEntry {
    fn from((identity, session_id): (UserId, SessionId)) -> Self {
        Self {
            identity,
            session_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingMessage {
    pub sender_identity: UserId,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingNotice {
    pub sender_identity: UserId,
}

/// Events the server pushes to a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Full current online set
    PresenceList(Vec<PresenceEntry>),
    Message(IncomingMessage),
    TypingStart(TypingNotice),
    TypingStop(TypingNotice),
}

impl ServerEvent {
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::PresenceList(_) => "presence-list",
            Self::Message(_) => "message",
            Self::TypingStart(_) => "typing-start",
            Self::TypingStop(_) => "typing-stop",
        }
    }

    #[must_use]
    pub fn typing(sender_identity: UserId, starting: bool) -> Self {
        let notice = TypingNotice { sender_identity };
        if starting {
            Self::TypingStart(notice)
        } else {
            Self::TypingStop(notice)
        }
    }
}
