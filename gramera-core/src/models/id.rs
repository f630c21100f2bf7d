use nanoid::nanoid;
use serde::{Deserialize, Serialize};

/// Length of transport-assigned session identifiers
pub const SESSION_ID_LEN: usize = 16;

/// Generate a fresh session identifier
pub fn generate_session_id() -> String {
    nanoid!(SESSION_ID_LEN)
}

/// Logical user identity asserted by a client after connecting.
///
/// The relay does not own user existence; this is whatever stable key the
/// client sends (an account id in practice).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the identity carries no usable key
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Opaque identifier of one live transport connection
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    #[must_use]
    pub fn new() -> Self {
        Self(generate_session_id())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_session_id() {
        let id = generate_session_id();
        assert_eq!(id.len(), SESSION_ID_LEN);
    }

    #[test]
    fn test_session_ids_are_unique() {
        let id1 = SessionId::new();
        let id2 = SessionId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_blank_user_id() {
        assert!(UserId::from("").is_blank());
        assert!(UserId::from("   ").is_blank());
        assert!(!UserId::from("u1").is_blank());
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let user = UserId::from("alice");
        assert_eq!(serde_json::to_string(&user).unwrap(), "\"alice\"");

        let session: SessionId = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(session.as_str(), "abc");
    }
}
