//! Host event bus
//!
//! Typed publish/subscribe channel for everything the host UI layer reacts
//! to. Subscribing returns a receiver; dropping it unsubscribes.

use ih_protocol::{CustomMessage, Generation, InteractiveId, LogEvent, SupportedFeatures};
use tokio::sync::broadcast;

/// Events published to the host UI layer
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    /// Handshake completed for a generation
    Connected {
        /// Interactive
        id: InteractiveId,
        /// Channel generation
        generation: Generation,
    },
    /// Generation torn down
    Disconnected {
        /// Interactive
        id: InteractiveId,
        /// Channel generation
        generation: Generation,
    },
    /// Proposed render height
    Height {
        /// Interactive
        id: InteractiveId,
        /// Height in CSS pixels
        height: f64,
    },
    /// Capability negotiation result
    SupportedFeatures {
        /// Interactive
        id: InteractiveId,
        /// Declared features
        features: SupportedFeatures,
    },
    /// Hint text for the learner
    Hint {
        /// Interactive
        id: InteractiveId,
        /// Hint text
        text: String,
    },
    /// Log event, also forwarded to telemetry
    Log {
        /// Interactive
        id: InteractiveId,
        /// Event as sent
        event: LogEvent,
    },
    /// Custom message no host bridge consumed
    CustomMessage {
        /// Interactive
        id: InteractiveId,
        /// Message
        message: CustomMessage,
    },
    /// State write reached the durable store
    StatePersisted {
        /// Interactive
        id: InteractiveId,
    },
    /// State write failed
    PersistFailed {
        /// Interactive
        id: InteractiveId,
        /// Store error text
        message: String,
    },
    /// At least one save request is overdue
    SavesSlow,
    /// Every overdue save request has now settled
    SavesFinishedLate,
    /// Some items did not save
    SaveFailed {
        /// Labels of the interactives that did not answer
        labels: Vec<String>,
    },
}

/// Broadcast bus for [`HostEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<HostEvent>,
}

impl EventBus {
    /// Create bus with a buffer of `capacity` events per subscriber
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish to every current subscriber
    pub fn publish(&self, event: HostEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("host event published with no subscribers");
        }
    }

    /// New subscription
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
        self.tx.subscribe()
    }

    /// Number of live subscriptions
    #[inline]
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
