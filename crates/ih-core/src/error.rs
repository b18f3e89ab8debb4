//! Error types for the Interactive Host core
//!
//! Provides error handling for:
//! - Durable store reads/writes
//! - Object storage folder, credential, and signing failures
//! - Credential (JWT) issuance
//! - Attachment URL brokering
//! - Configuration loading
//!
//! None of these cross the host/interactive boundary as failures: requests
//! from a frame are always answered with a response message carrying the
//! error text.

use ih_protocol::InteractiveId;
use std::sync::Arc;

/// Main host error type
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// Durable store failure
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Attachment brokering failure
    #[error("attachment error: {0}")]
    Attachment(#[from] AttachmentError),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Interactive is not mounted in this session
    #[error("interactive not mounted: {0}")]
    NotMounted(InteractiveId),

    /// Runtime asked to take over an instance with a different id
    #[error("runtime for {expected} cannot host {found}")]
    InstanceMismatch {
        /// Id the runtime was created for
        expected: InteractiveId,
        /// Id of the offered instance
        found: InteractiveId,
    },
}

/// Durable answer store errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// Store could not be reached
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Write was refused
    #[error("write rejected for {id}: {reason}")]
    Rejected {
        /// Interactive whose write failed
        id: InteractiveId,
        /// Store-provided reason
        reason: String,
    },
}

/// Object storage errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum StorageError {
    /// Folder could not be created or found
    #[error("folder error: {0}")]
    Folder(String),

    /// Credential issuance failed
    #[error("credential error: {0}")]
    Credential(String),

    /// URL signing failed
    #[error("signing error: {0}")]
    Signing(String),
}

/// Credential service errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum CredentialError {
    /// No learner session to issue a token for
    #[error("no authenticated session")]
    NoSession,

    /// Upstream token request failed
    #[error("token request failed: {0}")]
    Failed(String),
}

/// Attachment URL broker errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum AttachmentError {
    /// Read requested before any write recorded a reference
    #[error("attachment \"{0}\" has not been written")]
    MissingReference(String),

    /// Session or mode cannot write attachments
    #[error("attachment writes are not supported {0}")]
    Unsupported(&'static str),

    /// Underlying storage service failed
    #[error("{0}")]
    Storage(Arc<StorageError>),
}

impl From<StorageError> for AttachmentError {
    fn from(err: StorageError) -> Self {
        Self::Storage(Arc::new(err))
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        /// Path that failed
        path: String,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// TOML did not parse
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range
    #[error("invalid value for {field}: {reason}")]
    Invalid {
        /// Offending key
        field: &'static str,
        /// Why it is invalid
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_reference_names_the_attachment() {
        let err = AttachmentError::MissingReference("recording.webm".to_string());
        assert_eq!(err.to_string(), "attachment \"recording.webm\" has not been written");
    }

    #[test]
    fn storage_errors_convert_into_attachment_errors() {
        let err: AttachmentError = StorageError::Credential("expired".to_string()).into();
        assert_eq!(err.to_string(), "credential error: expired");
    }

    #[test]
    fn host_error_wraps_sources() {
        let err: HostError = StoreError::Unavailable("offline".to_string()).into();
        assert!(err.to_string().contains("offline"));
    }
}
