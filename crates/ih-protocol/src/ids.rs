//! Identifiers used on the wire and inside the host

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier of one embedded interactive (e.g. `interactive_42`)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InteractiveId(pub String);

impl InteractiveId {
    /// Create new interactive ID
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for InteractiveId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for InteractiveId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for InteractiveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Listener identifier chosen by the interactive for a linked-state watch
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListenerId(pub String);

impl ListenerId {
    /// Create new listener ID
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl From<&str> for ListenerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Request identifier chosen by the interactive, echoed back in the response
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Channel generation for one interactive slot
///
/// Incremented every time the slot is reconnected; work tagged with an
/// older generation is ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Generation(pub u64);

impl Generation {
    /// The generation after this one
    #[inline]
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

/// Rendering mode of an interactive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Learner is working in the interactive
    #[default]
    Runtime,
    /// Read-only rendering of saved work
    Report,
}

impl Mode {
    /// Whether the mode may change persisted state
    #[inline]
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        matches!(self, Self::Report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_next_increments() {
        let g = Generation::default();
        assert_eq!(g.next(), Generation(1));
        assert_eq!(g.next().to_string(), "g1");
    }

    #[test]
    fn ids_are_transparent_on_the_wire() {
        let id = InteractiveId::from("interactive_7");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"interactive_7\"");
        let mode: Mode = serde_json::from_str("\"report\"").unwrap();
        assert!(mode.is_read_only());
    }
}
