//! Core types for the host
//!
//! Defines:
//! - Interactive instances as embedded by the host
//! - Learner identity and the folder access strategy derived from it
//! - Attachment folders, references, and signing requests
//! - Telemetry events

use chrono::{DateTime, Utc};
use ih_protocol::{InteractiveId, LinkedInteractive, Mode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use ulid::Ulid;

/// Learner session identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Ulid);

impl SessionId {
    /// Generate new session ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
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

/// One embedded interactive as the host knows it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractiveInstance {
    /// Stable identifier
    pub id: InteractiveId,
    /// Human-readable name used in notices and timeout messages
    pub label: String,
    /// Source URL loaded into the frame
    pub url: String,
    /// Authored configuration (opaque)
    pub authored_state: Value,
    /// Runtime state known before mounting, if any
    pub interactive_state: Option<Value>,
    /// Interactives this one may observe
    pub linked_interactives: Vec<LinkedInteractive>,
    /// Runtime or report rendering
    pub mode: Mode,
}

impl InteractiveInstance {
    /// Create new instance in runtime mode
    #[must_use]
    pub fn new(id: impl Into<InteractiveId>, url: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            label: id.to_string(),
            id,
            url: url.into(),
            authored_state: Value::Null,
            interactive_state: None,
            linked_interactives: Vec::new(),
            mode: Mode::Runtime,
        }
    }

    /// With label
    #[inline]
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// With authored state
    #[inline]
    #[must_use]
    pub fn with_authored_state(mut self, state: Value) -> Self {
        self.authored_state = state;
        self
    }

    /// With runtime state
    #[inline]
    #[must_use]
    pub fn with_interactive_state(mut self, state: Value) -> Self {
        self.interactive_state = Some(state);
        self
    }

    /// With a linked interactive
    #[inline]
    #[must_use]
    pub fn with_link(mut self, id: impl Into<InteractiveId>, label: impl Into<String>) -> Self {
        self.linked_interactives.push(LinkedInteractive {
            id: id.into(),
            label: label.into(),
        });
        self
    }

    /// With mode
    #[inline]
    #[must_use]
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }
}

/// Who the learner is, as far as storage access is concerned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LearnerIdentity {
    /// Anonymous run identified by a secret run key
    Anonymous {
        /// Run key doubling as the folder access token
        run_key: String,
    },
    /// Learner signed in through the hosting platform
    Authenticated {
        /// Platform user id
        user_id: String,
    },
    /// Preview/authoring context without a learner session
    Preview,
}

impl LearnerIdentity {
    /// Namespace prefix for storage folders
    #[must_use]
    pub fn namespace(&self) -> String {
        match self {
            Self::Anonymous { run_key } => format!("anonymous/{run_key}"),
            Self::Authenticated { user_id } => format!("user/{user_id}"),
            Self::Preview => "preview".to_string(),
        }
    }

    /// Access-control strategy for folders, `None` when writes are impossible
    #[must_use]
    pub fn access_strategy(&self) -> Option<AccessStrategy> {
        match self {
            Self::Anonymous { run_key } => Some(AccessStrategy::Token {
                token: run_key.clone(),
            }),
            Self::Authenticated { user_id } => Some(AccessStrategy::Identity {
                user_id: user_id.clone(),
            }),
            Self::Preview => None,
        }
    }
}

/// How a folder's access is controlled
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AccessStrategy {
    /// Possession of a secret token grants access
    Token {
        /// Read/write token
        token: String,
    },
    /// Access follows the authenticated identity
    Identity {
        /// Platform user id
        user_id: String,
    },
}

/// Owner of an attachment folder
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FolderOwner {
    /// Learner namespace
    pub namespace: String,
    /// Interactive instance
    pub interactive: InteractiveId,
}

/// Write credential scoped to one folder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteCredential {
    /// Opaque credential material
    pub token: String,
    /// Expiry reported by the issuer
    pub expires_at: DateTime<Utc>,
}

impl WriteCredential {
    /// Still valid `margin` from now
    #[must_use]
    pub fn is_valid_for(&self, margin: chrono::Duration) -> bool {
        self.expires_at - margin > Utc::now()
    }
}

/// Namespace in object storage for one interactive instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentFolder {
    /// Storage-assigned folder id
    pub id: String,
    /// Owner the folder was created for
    pub owner: FolderOwner,
    /// Write credential, once issued
    pub write_credential: Option<WriteCredential>,
}

/// Durable pointer to one stored attachment
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentReference {
    /// Folder holding the object
    pub folder_id: String,
    /// Object path inside the folder (embeds the session id)
    pub path: String,
}

/// HTTP method a URL is signed for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignMethod {
    /// Read
    Get,
    /// Write
    Put,
}

impl SignMethod {
    /// Method name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Put => "PUT",
        }
    }
}

/// Request to the signing service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignRequest {
    /// GET or PUT
    pub method: SignMethod,
    /// Target object
    pub reference: AttachmentReference,
    /// Folder access strategy
    pub access: AccessStrategy,
    /// Write credential for PUT
    pub credential: Option<WriteCredential>,
    /// MIME type for PUT
    pub content_type: Option<String>,
    /// URL lifetime
    pub expires_in: Duration,
}

/// Fire-and-forget telemetry record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    /// Interactive that emitted the event
    pub interactive: InteractiveId,
    /// Event name
    pub event: String,
    /// Scalar value
    pub value: Option<Value>,
    /// Structured data
    pub data: Option<Value>,
    /// When the host received it
    pub received_at: DateTime<Utc>,
}
