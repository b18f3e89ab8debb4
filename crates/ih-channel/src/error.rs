//! Error types for channels and state requests

use ih_protocol::ProtocolError;
use std::time::Duration;

/// Transport-level channel errors
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The other end of the link is gone
    #[error("frame link closed")]
    Closed,

    /// Envelope could not be encoded or decoded
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Rejection of a pending state request
///
/// `Clone` because every caller sharing one pending request receives the
/// same settlement.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateRequestError {
    /// No state update arrived before the deadline
    #[error("{label} did not report its state within {}ms", .timeout.as_millis())]
    Timeout {
        /// Human-readable name of the interactive
        label: String,
        /// Deadline that elapsed
        timeout: Duration,
    },
}

impl StateRequestError {
    /// Label of the interactive that failed to answer
    #[inline]
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Timeout { label, .. } => label,
        }
    }
}
