//! Linked-state subscriptions
//!
//! Lets an interactive observe another interactive's persisted state. Each
//! watch is keyed by the listener id the interactive chose, since two
//! listeners may watch the same target independently.

use crate::collaborators::{DurableStore, StateCallback, Unsubscribe};
use ih_channel::Outbound;
use ih_protocol::{HostMessage, InteractiveId, LinkedInteractiveState, ListenerId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

struct Subscription {
    target: InteractiveId,
    unsubscribe: Unsubscribe,
}

/// Per-channel registry of linked-state watches
pub struct LinkedStateRegistry {
    store: Arc<dyn DurableStore>,
    outbound: Outbound,
    watches: Mutex<HashMap<ListenerId, Subscription>>,
}

impl std::fmt::Debug for LinkedStateRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let watches = self.watches.lock();
        f.debug_struct("LinkedStateRegistry")
            .field(
                "watches",
                &watches.iter().map(|(l, s)| (l, &s.target)).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

impl LinkedStateRegistry {
    /// Create registry posting pushes through `outbound`
    #[must_use]
    pub fn new(store: Arc<dyn DurableStore>, outbound: Outbound) -> Self {
        Self {
            store,
            outbound,
            watches: Mutex::new(HashMap::new()),
        }
    }

    /// Watch `target` and push every change to the frame tagged with `listener_id`
    ///
    /// Re-using a listener id replaces its previous watch.
    pub fn add_listener(&self, listener_id: ListenerId, target: InteractiveId) {
        let outbound = self.outbound.clone();
        let tag = listener_id.clone();
        let callback: StateCallback = Arc::new(move |state| {
            outbound.post(&HostMessage::LinkedInteractiveState(LinkedInteractiveState {
                listener_id: tag.clone(),
                interactive_state: state,
            }));
        });

        let unsubscribe = self.store.watch(&target, callback);
        tracing::debug!(listener = %listener_id, target = %target, "linked state listener added");

        let previous = self.watches.lock().insert(
            listener_id,
            Subscription {
                target,
                unsubscribe,
            },
        );
        if let Some(previous) = previous {
            (previous.unsubscribe)();
        }
    }

    /// Cancel one watch; unknown ids are ignored
    ///
    /// Returns whether a watch was removed.
    pub fn remove_listener(&self, listener_id: &ListenerId) -> bool {
        let removed = self.watches.lock().remove(listener_id);
        match removed {
            Some(subscription) => {
                (subscription.unsubscribe)();
                tracing::debug!(listener = %listener_id, target = %subscription.target, "linked state listener removed");
                true
            }
            None => false,
        }
    }

    /// Cancel every watch still registered
    pub fn remove_all(&self) {
        for listener_id in self.listener_ids() {
            self.remove_listener(&listener_id);
        }
    }

    /// Listener ids currently registered
    #[must_use]
    pub fn listener_ids(&self) -> Vec<ListenerId> {
        self.watches.lock().keys().cloned().collect()
    }

    /// Number of active watches
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.watches.lock().len()
    }

    /// Whether no watch is active
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.watches.lock().is_empty()
    }
}

impl Drop for LinkedStateRegistry {
    fn drop(&mut self) {
        self.remove_all();
    }
}
