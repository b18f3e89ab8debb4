//! `{ type, content }` envelopes carried over a frame link

use crate::error::ProtocolError;
use crate::message::{HostMessage, InteractiveMessage, InteractiveMessageKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Handshake message type, sent by both sides
pub const HELLO: &str = "hello";

/// One message on a frame link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message type
    #[serde(rename = "type")]
    pub kind: String,
    /// Payload; absent content decodes as `null`
    #[serde(default)]
    pub content: Value,
}

impl Envelope {
    /// Raw envelope
    #[inline]
    #[must_use]
    pub fn new(kind: impl Into<String>, content: Value) -> Self {
        Self {
            kind: kind.into(),
            content,
        }
    }

    /// Handshake envelope
    #[inline]
    #[must_use]
    pub fn hello() -> Self {
        Self::new(HELLO, Value::Null)
    }

    /// Whether this is a handshake envelope
    #[inline]
    #[must_use]
    pub fn is_hello(&self) -> bool {
        self.kind == HELLO
    }

    /// Encode a typed message
    ///
    /// # Errors
    /// - `ProtocolError::Malformed` if the message does not serialize to an object with a `type`
    pub fn encode<T: Serialize>(message: &T) -> Result<Self, ProtocolError> {
        let value = serde_json::to_value(message)?;
        let Value::Object(mut map) = value else {
            return Err(ProtocolError::Malformed("expected an object".to_string()));
        };
        let kind = match map.remove("type") {
            Some(Value::String(kind)) => kind,
            _ => return Err(ProtocolError::Malformed("missing type".to_string())),
        };
        let content = map.remove("content").unwrap_or(Value::Null);
        Ok(Self { kind, content })
    }

    /// Decode an inbound message from an interactive
    ///
    /// # Errors
    /// - `ProtocolError::UnknownType` for types the host does not handle
    /// - `ProtocolError::InvalidPayload` when the content does not fit the type
    pub fn decode_inbound(&self) -> Result<InteractiveMessage, ProtocolError> {
        if InteractiveMessageKind::from_wire(&self.kind).is_none() {
            return Err(ProtocolError::UnknownType(self.kind.clone()));
        }
        self.decode_as()
    }

    /// Decode an outbound message sent by the host
    ///
    /// # Errors
    /// - `ProtocolError::InvalidPayload` when the envelope is not a host message
    pub fn decode_outbound(&self) -> Result<HostMessage, ProtocolError> {
        self.decode_as()
    }

    fn decode_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        let mut map = serde_json::Map::new();
        map.insert("type".to_string(), Value::String(self.kind.clone()));
        map.insert("content".to_string(), self.content.clone());
        serde_json::from_value(Value::Object(map)).map_err(|source| ProtocolError::InvalidPayload {
            kind: self.kind.clone(),
            source,
        })
    }

    /// Serialize to JSON text for string-based transports
    ///
    /// # Errors
    /// Propagates serde failures
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse from JSON text
    ///
    /// # Errors
    /// Propagates serde failures
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}

impl TryFrom<&HostMessage> for Envelope {
    type Error = ProtocolError;

    fn try_from(message: &HostMessage) -> Result<Self, Self::Error> {
        Self::encode(message)
    }
}

impl TryFrom<&InteractiveMessage> for Envelope {
    type Error = ProtocolError;

    fn try_from(message: &InteractiveMessage) -> Result<Self, Self::Error> {
        Self::encode(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{ListenerId, RequestId};
    use crate::message::{AttachmentOperation, LinkedStateListenerRequest};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn state_request_without_options_encodes_null_content() {
        let env = Envelope::encode(&HostMessage::GetInteractiveState(None)).unwrap();
        assert_eq!(env, Envelope::new("getInteractiveState", Value::Null));
        assert_eq!(
            env.decode_outbound().unwrap(),
            HostMessage::GetInteractiveState(None)
        );
    }

    #[test]
    fn inbound_missing_content_defaults_to_null() {
        let env = Envelope::from_json(r#"{"type":"interactiveState"}"#).unwrap();
        assert_eq!(
            env.decode_inbound().unwrap(),
            InteractiveMessage::InteractiveState(Value::Null)
        );
    }

    #[test]
    fn unknown_types_are_reported_as_such() {
        let err = Envelope::new("showModal", json!({})).decode_inbound().unwrap_err();
        assert!(err.is_unknown_type());
    }

    #[test]
    fn invalid_payload_names_the_type() {
        let err = Envelope::new("height", json!("tall")).decode_inbound().unwrap_err();
        assert!(err.to_string().contains("height"));
    }

    #[test]
    fn attachment_request_decodes() {
        let env = Envelope::new(
            "getAttachmentUrl",
            json!({"requestId": 1, "name": "audio.mp3", "operation": "write", "contentType": "audio/mpeg"}),
        );
        let InteractiveMessage::GetAttachmentUrl(req) = env.decode_inbound().unwrap() else {
            panic!("wrong variant");
        };
        assert_eq!(req.request_id, RequestId(1));
        assert_eq!(req.operation, AttachmentOperation::Write);
        assert_eq!(req.expires_in, None);
    }

    #[test]
    fn listener_request_round_trips_through_json_text() {
        let msg = InteractiveMessage::AddLinkedInteractiveStateListener(LinkedStateListenerRequest {
            listener_id: ListenerId::from("watch-1"),
            interactive_item_id: "interactive_2".into(),
        });
        let text = Envelope::try_from(&msg).unwrap().to_json().unwrap();
        let back = Envelope::from_json(&text).unwrap().decode_inbound().unwrap();
        assert_eq!(back, msg);
    }
}
