//! Typed protocol messages
//!
//! Both directions serialize as `{ "type": <name>, "content": <payload> }`
//! with camelCase names, matching the `postMessage` traffic interactives
//! already speak.

use crate::ids::{InteractiveId, ListenerId, Mode, RequestId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Sentinel payload meaning "nothing changed, do not save"
pub const NO_CHANGE: &str = "no-change";

/// Sentinel payload meaning "re-save the current state with a fresh timestamp"
pub const TOUCH: &str = "touch";

/// Messages sent by the host to an interactive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "camelCase")]
pub enum HostMessage {
    /// Handshake / (re)initialization payload
    InitInteractive(InitInteractive),
    /// Ask the interactive to report its current state
    GetInteractiveState(Option<Value>),
    /// Response to `getFirebaseJWT`
    #[serde(rename = "firebaseJWT")]
    FirebaseJwt(JwtResponse),
    /// Response to `getAttachmentUrl`
    AttachmentUrl(AttachmentUrlResponse),
    /// Push of another interactive's persisted state
    LinkedInteractiveState(LinkedInteractiveState),
    /// Extension envelope (dynamic text and future sub-protocols)
    CustomMessage(CustomMessage),
}

impl HostMessage {
    /// Wire name of this message
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InitInteractive(_) => "initInteractive",
            Self::GetInteractiveState(_) => "getInteractiveState",
            Self::FirebaseJwt(_) => "firebaseJWT",
            Self::AttachmentUrl(_) => "attachmentUrl",
            Self::LinkedInteractiveState(_) => "linkedInteractiveState",
            Self::CustomMessage(_) => "customMessage",
        }
    }
}

/// Messages sent by an interactive to the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "camelCase")]
pub enum InteractiveMessage {
    /// State update, possibly one of the sentinels
    InteractiveState(Value),
    /// Proposed render height
    Height(f64),
    /// Capability negotiation
    SupportedFeatures(SupportedFeatures),
    /// Credential request
    #[serde(rename = "getFirebaseJWT")]
    GetFirebaseJwt(JwtRequest),
    /// Signed attachment URL request
    GetAttachmentUrl(AttachmentUrlRequest),
    /// Start watching another interactive's state
    AddLinkedInteractiveStateListener(LinkedStateListenerRequest),
    /// Stop watching another interactive's state
    RemoveLinkedInteractiveStateListener(RemoveLinkedStateListener),
    /// Hint text for the host UI
    Hint(String),
    /// Telemetry event
    Log(LogEvent),
    /// Extension envelope (dynamic text and future sub-protocols)
    CustomMessage(CustomMessage),
}

impl InteractiveMessage {
    /// Discriminant used for handler registration
    #[must_use]
    pub fn kind(&self) -> InteractiveMessageKind {
        match self {
            Self::InteractiveState(_) => InteractiveMessageKind::InteractiveState,
            Self::Height(_) => InteractiveMessageKind::Height,
            Self::SupportedFeatures(_) => InteractiveMessageKind::SupportedFeatures,
            Self::GetFirebaseJwt(_) => InteractiveMessageKind::GetFirebaseJwt,
            Self::GetAttachmentUrl(_) => InteractiveMessageKind::GetAttachmentUrl,
            Self::AddLinkedInteractiveStateListener(_) => {
                InteractiveMessageKind::AddLinkedInteractiveStateListener
            }
            Self::RemoveLinkedInteractiveStateListener(_) => {
                InteractiveMessageKind::RemoveLinkedInteractiveStateListener
            }
            Self::Hint(_) => InteractiveMessageKind::Hint,
            Self::Log(_) => InteractiveMessageKind::Log,
            Self::CustomMessage(_) => InteractiveMessageKind::CustomMessage,
        }
    }
}

/// Inbound message types a handler can be registered for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InteractiveMessageKind {
    /// `interactiveState`
    InteractiveState,
    /// `height`
    Height,
    /// `supportedFeatures`
    SupportedFeatures,
    /// `getFirebaseJWT`
    GetFirebaseJwt,
    /// `getAttachmentUrl`
    GetAttachmentUrl,
    /// `addLinkedInteractiveStateListener`
    AddLinkedInteractiveStateListener,
    /// `removeLinkedInteractiveStateListener`
    RemoveLinkedInteractiveStateListener,
    /// `hint`
    Hint,
    /// `log`
    Log,
    /// `customMessage`
    CustomMessage,
}

impl InteractiveMessageKind {
    /// Every inbound kind
    pub const ALL: [Self; 10] = [
        Self::InteractiveState,
        Self::Height,
        Self::SupportedFeatures,
        Self::GetFirebaseJwt,
        Self::GetAttachmentUrl,
        Self::AddLinkedInteractiveStateListener,
        Self::RemoveLinkedInteractiveStateListener,
        Self::Hint,
        Self::Log,
        Self::CustomMessage,
    ];

    /// Wire name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InteractiveState => "interactiveState",
            Self::Height => "height",
            Self::SupportedFeatures => "supportedFeatures",
            Self::GetFirebaseJwt => "getFirebaseJWT",
            Self::GetAttachmentUrl => "getAttachmentUrl",
            Self::AddLinkedInteractiveStateListener => "addLinkedInteractiveStateListener",
            Self::RemoveLinkedInteractiveStateListener => "removeLinkedInteractiveStateListener",
            Self::Hint => "hint",
            Self::Log => "log",
            Self::CustomMessage => "customMessage",
        }
    }

    /// Look up a kind by wire name
    #[must_use]
    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }
}

impl fmt::Display for InteractiveMessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded `interactiveState` payload
#[derive(Debug, Clone, PartialEq)]
pub enum StateUpdate {
    /// `"no-change"`: ignore entirely
    NoChange,
    /// `"touch"`: re-save the last known state
    Touch,
    /// A real state value
    State(Value),
}

impl StateUpdate {
    /// Classify a raw payload
    #[must_use]
    pub fn from_payload(payload: Value) -> Self {
        match payload.as_str() {
            Some(NO_CHANGE) => Self::NoChange,
            Some(TOUCH) => Self::Touch,
            _ => Self::State(payload),
        }
    }
}

/// Payload of `initInteractive`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitInteractive {
    /// Rendering mode
    pub mode: Mode,
    /// Authored configuration (opaque)
    pub authored_state: Value,
    /// Last persisted runtime state, `null` when there is none
    pub interactive_state: Value,
    /// Interactives this one may observe
    pub linked_interactives: Vec<LinkedInteractive>,
    /// Capabilities the host offers
    pub host_features: HostFeatures,
}

/// Reference to a linked interactive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkedInteractive {
    /// Target interactive
    pub id: InteractiveId,
    /// Authored label for the link
    pub label: String,
}

/// Host capability flags sent with `initInteractive`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostFeatures {
    /// `getAttachmentUrl` is served
    pub attachments: bool,
    /// `getFirebaseJWT` is served
    pub firebase_jwt: bool,
    /// Dynamic-text custom messages are served
    pub dynamic_text: bool,
}

/// Payload of `supportedFeatures`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedFeatures {
    /// API version the interactive speaks
    #[serde(default)]
    pub api_version: Option<u32>,
    /// Feature flags keyed by name
    #[serde(default)]
    pub features: Map<String, Value>,
}

impl SupportedFeatures {
    /// Declared aspect ratio, if any
    #[must_use]
    pub fn aspect_ratio(&self) -> Option<f64> {
        self.features.get("aspectRatio").and_then(Value::as_f64)
    }
}

/// Payload of `getFirebaseJWT`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JwtRequest {
    /// Correlates the response
    pub request_id: RequestId,
    /// Firebase app the token is requested for
    #[serde(rename = "firebase_app", default)]
    pub firebase_app: Option<String>,
    /// Additional claims/parameters forwarded verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Payload of `firebaseJWT`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JwtResponse {
    /// Echo of the request id
    pub request_id: RequestId,
    /// Issued token on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// `"ERROR"` on failure
    #[serde(rename = "response_type", default, skip_serializing_if = "Option::is_none")]
    pub response_type: Option<String>,
    /// Error text on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl JwtResponse {
    /// Successful response
    #[must_use]
    pub fn token(request_id: RequestId, token: impl Into<String>) -> Self {
        Self {
            request_id,
            token: Some(token.into()),
            response_type: None,
            message: None,
        }
    }

    /// Error response
    #[must_use]
    pub fn error(request_id: RequestId, message: impl Into<String>) -> Self {
        Self {
            request_id,
            token: None,
            response_type: Some("ERROR".to_string()),
            message: Some(message.into()),
        }
    }
}

/// Attachment operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentOperation {
    /// Signed GET
    Read,
    /// Signed PUT
    Write,
}

/// Payload of `getAttachmentUrl`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentUrlRequest {
    /// Correlates the response
    pub request_id: RequestId,
    /// Logical attachment name
    pub name: String,
    /// Read or write
    pub operation: AttachmentOperation,
    /// MIME type for writes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Requested URL lifetime in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
}

/// Payload of `attachmentUrl`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentUrlResponse {
    /// Echo of the request id
    pub request_id: RequestId,
    /// Signed URL on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Error text on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AttachmentUrlResponse {
    /// Successful response
    #[must_use]
    pub fn url(request_id: RequestId, url: impl Into<String>) -> Self {
        Self {
            request_id,
            url: Some(url.into()),
            error: None,
        }
    }

    /// Error response
    #[must_use]
    pub fn error(request_id: RequestId, error: impl Into<String>) -> Self {
        Self {
            request_id,
            url: None,
            error: Some(error.into()),
        }
    }
}

/// Payload of `addLinkedInteractiveStateListener`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkedStateListenerRequest {
    /// Listener chosen by the interactive
    pub listener_id: ListenerId,
    /// Interactive whose state is observed
    pub interactive_item_id: InteractiveId,
}

/// Payload of `removeLinkedInteractiveStateListener`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveLinkedStateListener {
    /// Listener to cancel
    pub listener_id: ListenerId,
}

/// Payload of `linkedInteractiveState`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkedInteractiveState {
    /// Listener the push belongs to
    pub listener_id: ListenerId,
    /// New persisted state of the target
    pub interactive_state: Value,
}

/// Payload of `log`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    /// Event name
    #[serde(alias = "action")]
    pub event: String,
    /// Scalar value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Structured data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Typed extension envelope carried inside `customMessage`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomMessage {
    /// Sub-protocol message type (e.g. `dynamicText:registerComponent`)
    #[serde(rename = "type")]
    pub kind: String,
    /// Sub-protocol payload
    #[serde(default)]
    pub content: Value,
}

impl CustomMessage {
    /// Create a custom message
    #[must_use]
    pub fn new(kind: impl Into<String>, content: Value) -> Self {
        Self {
            kind: kind.into(),
            content,
        }
    }
}
