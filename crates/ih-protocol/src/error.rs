//! Error types for the wire protocol

/// Encoding/decoding failures for envelopes
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Message did not serialize to a `{ type, content }` object
    #[error("malformed message: {0}")]
    Malformed(String),

    /// Payload did not match the shape expected for its type
    #[error("invalid payload for {kind}: {source}")]
    InvalidPayload {
        /// Wire type of the offending message
        kind: String,
        /// Underlying serde error
        #[source]
        source: serde_json::Error,
    },

    /// Message type this side does not understand
    #[error("unknown message type: {0}")]
    UnknownType(String),

    /// Raw JSON could not be parsed
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProtocolError {
    /// Whether the error concerns an unrecognised message type
    #[inline]
    #[must_use]
    pub fn is_unknown_type(&self) -> bool {
        matches!(self, Self::UnknownType(_))
    }
}
