use gramera_core::Result;
use gramera_presence::{ClientEvent, ServerEvent};

/// JSON text-frame codec for the session protocol
pub struct JsonCodec;

impl JsonCodec {
    /// Decode a `ClientEvent` from a text frame
    pub fn decode_client_event(text: &str) -> Result<ClientEvent> {
        Ok(serde_json::from_str(text)?)
    }

    /// Encode a `ServerEvent` as a text frame
    pub fn encode_server_event(event: &ServerEvent) -> Result<String> {
        Ok(serde_json::to_string(event)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gramera_core::models::UserId;
    use gramera_presence::TypingSignal;

    #[test]
    fn test_decode_typing_stop() {
        let event = JsonCodec::decode_client_event(
            r#"{"event":"typing-stop","data":{"senderIdentity":"a","recipientIdentity":"b"}}"#,
        )
        .unwrap();

        assert_eq!(
            event,
            ClientEvent::TypingStop(TypingSignal {
                sender_identity: UserId::from("a"),
                recipient_identity: UserId::from("b"),
            })
        );
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = JsonCodec::decode_client_event("not json").unwrap_err();
        assert!(matches!(err, gramera_core::Error::Serialization(_)));

        assert!(JsonCodec::decode_client_event(r#"{"event":"identify"}"#).is_err());
    }

    #[test]
    fn test_encode_typing_start() {
        let text = JsonCodec::encode_server_event(&ServerEvent::typing(UserId::from("a"), true))
            .unwrap();
        assert_eq!(text, r#"{"event":"typing-start","data":{"senderIdentity":"a"}}"#);
    }
}
