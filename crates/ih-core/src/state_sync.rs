//! State synchronization
//!
//! Owns the authoritative state of one interactive and decides which
//! updates reach the durable store:
//! - `"no-change"` is ignored
//! - `"touch"` re-saves the last known state
//! - anything else is saved only if it differs (deep equality) from the last known state
//!
//! Writes go through a single queue per interactive so they reach the store
//! in the order the updates arrived.
//!
//! A state loaded from the store never replaces one the frame already
//! reported in the current generation.

use crate::collaborators::DurableStore;
use crate::events::{EventBus, HostEvent};
use ih_protocol::message::NO_CHANGE;
use ih_protocol::{InteractiveId, Mode, StateUpdate};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// What an update did
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// `"no-change"`, or `"touch"` with no known state
    Ignored,
    /// Same value as the last known state
    Unchanged,
    /// Value queued for persistence
    Persisted(Value),
    /// Report mode never writes
    ReadOnly,
}

enum WriteOp {
    Write(Value),
    Flush(oneshot::Sender<()>),
}

#[derive(Debug, Default)]
struct Known {
    state: Option<Value>,
    reported: bool,
}

/// Authoritative state for one interactive
pub struct StateSync {
    id: InteractiveId,
    mode: Mutex<Mode>,
    known: Mutex<Known>,
    writes: mpsc::UnboundedSender<WriteOp>,
}

impl std::fmt::Debug for StateSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateSync")
            .field("id", &self.id)
            .field("mode", &*self.mode.lock())
            .field("known", &*self.known.lock())
            .finish_non_exhaustive()
    }
}

impl StateSync {
    /// Create manager seeded with a previously known state
    ///
    /// Spawns the write queue; must be called inside a tokio runtime.
    #[must_use]
    pub fn new(
        id: InteractiveId,
        mode: Mode,
        initial: Option<Value>,
        store: Arc<dyn DurableStore>,
        events: EventBus,
    ) -> Self {
        let (writes, rx) = mpsc::unbounded_channel();
        tokio::spawn(write_queue(id.clone(), store, events, rx));
        Self {
            id,
            mode: Mutex::new(mode),
            known: Mutex::new(Known {
                state: sanitize_loaded(initial),
                reported: false,
            }),
            writes,
        }
    }

    /// Last known state, without suspending
    #[must_use]
    pub fn current_state(&self) -> Option<Value> {
        self.known.lock().state.clone()
    }

    /// Replace the known state with one loaded from the store
    ///
    /// Returns `false`, leaving the known state alone, when the frame has
    /// already reported a state since [`begin_generation`](Self::begin_generation).
    pub fn reload(&self, loaded: Option<Value>) -> bool {
        let mut known = self.known.lock();
        if known.reported {
            tracing::debug!(interactive = %self.id, "frame reported state first, stored state not applied");
            return false;
        }
        known.state = sanitize_loaded(loaded);
        true
    }

    /// A new channel generation starts; stored state may be applied again
    pub fn begin_generation(&self) {
        self.known.lock().reported = false;
    }

    /// Current rendering mode
    #[must_use]
    pub fn mode(&self) -> Mode {
        *self.mode.lock()
    }

    /// Switch rendering mode for later updates
    pub fn set_mode(&self, mode: Mode) {
        *self.mode.lock() = mode;
    }

    /// Apply one `interactiveState` payload
    pub fn handle_update(&self, payload: Value) -> SyncOutcome {
        let outcome = self.apply(StateUpdate::from_payload(payload));
        if let SyncOutcome::Persisted(state) = &outcome {
            if self.writes.send(WriteOp::Write(state.clone())).is_err() {
                tracing::warn!(interactive = %self.id, "write queue closed, state not persisted");
            }
        }
        outcome
    }

    fn apply(&self, update: StateUpdate) -> SyncOutcome {
        if self.mode().is_read_only() {
            return SyncOutcome::ReadOnly;
        }
        let mut known = self.known.lock();
        match update {
            StateUpdate::NoChange => SyncOutcome::Ignored,
            StateUpdate::Touch => match known.state.as_ref() {
                Some(state) => SyncOutcome::Persisted(state.clone()),
                None => {
                    tracing::debug!(interactive = %self.id, "touch without known state");
                    SyncOutcome::Ignored
                }
            },
            StateUpdate::State(state) => {
                known.reported = true;
                if known.state.as_ref() == Some(&state) {
                    return SyncOutcome::Unchanged;
                }
                known.state = Some(state.clone());
                SyncOutcome::Persisted(state)
            }
        }
    }

    /// Wait until every queued write has been attempted
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.writes.send(WriteOp::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Interactive this manager belongs to
    #[inline]
    #[must_use]
    pub fn id(&self) -> &InteractiveId {
        &self.id
    }
}

/// Old recordings stored the literal `"no-change"` sentinel as state
fn sanitize_loaded(state: Option<Value>) -> Option<Value> {
    match state {
        Some(Value::String(s)) if s == NO_CHANGE => None,
        Some(Value::Null) => None,
        other => other,
    }
}

async fn write_queue(
    id: InteractiveId,
    store: Arc<dyn DurableStore>,
    events: EventBus,
    mut rx: mpsc::UnboundedReceiver<WriteOp>,
) {
    while let Some(op) = rx.recv().await {
        match op {
            WriteOp::Write(state) => match store.write(&id, &state).await {
                Ok(()) => {
                    tracing::debug!(interactive = %id, "state persisted");
                    events.publish(HostEvent::StatePersisted { id: id.clone() });
                }
                Err(e) => {
                    tracing::warn!(interactive = %id, "failed to persist state: {}", e);
                    events.publish(HostEvent::PersistFailed {
                        id: id.clone(),
                        message: e.to_string(),
                    });
                }
            },
            WriteOp::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::MockDurableStore;
    use proptest::prelude::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_store(count: Arc<AtomicUsize>, written: Arc<Mutex<Vec<Value>>>) -> MockDurableStore {
        let mut store = MockDurableStore::new();
        store.expect_write().returning(move |_, state| {
            count.fetch_add(1, Ordering::SeqCst);
            written.lock().push(state.clone());
            Ok(())
        });
        store
    }

    fn sync_with(store: MockDurableStore, mode: Mode, initial: Option<Value>) -> StateSync {
        StateSync::new(
            InteractiveId::from("interactive_1"),
            mode,
            initial,
            Arc::new(store),
            EventBus::new(16),
        )
    }

    #[tokio::test]
    async fn sentinels_and_duplicates_do_not_persist() {
        let count = Arc::new(AtomicUsize::new(0));
        let written = Arc::new(Mutex::new(Vec::new()));
        let sync = sync_with(
            counting_store(Arc::clone(&count), Arc::clone(&written)),
            Mode::Runtime,
            None,
        );

        assert_eq!(sync.handle_update(json!("no-change")), SyncOutcome::Ignored);
        assert_eq!(sync.handle_update(json!("touch")), SyncOutcome::Ignored);
        assert_eq!(
            sync.handle_update(json!({"a": [1, 2]})),
            SyncOutcome::Persisted(json!({"a": [1, 2]}))
        );
        assert_eq!(sync.handle_update(json!({"a": [1, 2]})), SyncOutcome::Unchanged);
        assert_eq!(sync.handle_update(json!("no-change")), SyncOutcome::Ignored);
        sync.flush().await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(sync.current_state(), Some(json!({"a": [1, 2]})));
    }

    #[tokio::test]
    async fn touch_resaves_last_real_state() {
        let count = Arc::new(AtomicUsize::new(0));
        let written = Arc::new(Mutex::new(Vec::new()));
        let sync = sync_with(
            counting_store(Arc::clone(&count), Arc::clone(&written)),
            Mode::Runtime,
            None,
        );

        sync.handle_update(json!({"answer": "B"}));
        assert_eq!(
            sync.handle_update(json!("touch")),
            SyncOutcome::Persisted(json!({"answer": "B"}))
        );
        sync.flush().await;

        assert_eq!(*written.lock(), vec![json!({"answer": "B"}), json!({"answer": "B"})]);
        assert_eq!(sync.current_state(), Some(json!({"answer": "B"})));
    }

    #[tokio::test]
    async fn legacy_no_change_state_is_treated_as_empty() {
        let sync = sync_with(MockDurableStore::new(), Mode::Runtime, Some(json!("no-change")));
        assert_eq!(sync.current_state(), None);

        assert!(sync.reload(Some(json!({"x": 1}))));
        assert_eq!(sync.current_state(), Some(json!({"x": 1})));
        assert!(sync.reload(Some(json!("no-change"))));
        assert_eq!(sync.current_state(), None);
    }

    #[tokio::test]
    async fn stored_state_never_replaces_a_reported_one() {
        let count = Arc::new(AtomicUsize::new(0));
        let written = Arc::new(Mutex::new(Vec::new()));
        let sync = sync_with(
            counting_store(Arc::clone(&count), Arc::clone(&written)),
            Mode::Runtime,
            None,
        );

        sync.begin_generation();
        sync.handle_update(json!({"v": "fresh"}));
        assert!(!sync.reload(Some(json!({"v": "stored"}))));
        assert_eq!(sync.current_state(), Some(json!({"v": "fresh"})));
        assert_eq!(sync.handle_update(json!({"v": "fresh"})), SyncOutcome::Unchanged);

        sync.begin_generation();
        assert!(sync.reload(Some(json!({"v": "stored"}))));
        assert_eq!(sync.current_state(), Some(json!({"v": "stored"})));
        sync.flush().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn switching_to_report_mode_stops_writes() {
        let sync = sync_with(MockDurableStore::new(), Mode::Runtime, Some(json!({"x": 1})));
        sync.set_mode(Mode::Report);
        assert_eq!(sync.mode(), Mode::Report);
        assert_eq!(sync.handle_update(json!({"x": 2})), SyncOutcome::ReadOnly);
        sync.flush().await;
    }

    #[tokio::test]
    async fn report_mode_never_writes() {
        // no expectations: any write would panic the mock
        let sync = sync_with(MockDurableStore::new(), Mode::Report, Some(json!({"x": 1})));
        assert_eq!(sync.handle_update(json!({"x": 2})), SyncOutcome::ReadOnly);
        assert_eq!(sync.handle_update(json!("touch")), SyncOutcome::ReadOnly);
        sync.flush().await;
        assert_eq!(sync.current_state(), Some(json!({"x": 1})));
    }

    #[tokio::test]
    async fn failed_write_is_published() {
        let mut store = MockDurableStore::new();
        store.expect_write().returning(|id, _| {
            Err(crate::error::StoreError::Rejected {
                id: id.clone(),
                reason: "quota".to_string(),
            })
        });
        let events = EventBus::new(16);
        let mut rx = events.subscribe();
        let sync = StateSync::new(
            InteractiveId::from("interactive_1"),
            Mode::Runtime,
            None,
            Arc::new(store),
            events,
        );

        sync.handle_update(json!(1));
        sync.flush().await;
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, HostEvent::PersistFailed { ref message, .. } if message.contains("quota")));
    }

    fn payload() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(json!("no-change")),
            Just(json!("touch")),
            (0u8..4).prop_map(|n| json!({ "n": n })),
        ]
    }

    proptest! {
        #[test]
        fn prop_persists_once_per_actual_change(updates in proptest::collection::vec(payload(), 0..40)) {
            let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            runtime.block_on(async {
                let count = Arc::new(AtomicUsize::new(0));
                let written = Arc::new(Mutex::new(Vec::new()));
                let sync = sync_with(
                    counting_store(Arc::clone(&count), Arc::clone(&written)),
                    Mode::Runtime,
                    None,
                );

                let mut last: Option<Value> = None;
                let mut expected = 0usize;
                for update in updates {
                    match update.as_str() {
                        Some("no-change") => {}
                        Some("touch") => {
                            if last.is_some() {
                                expected += 1;
                            }
                        }
                        _ => {
                            if last.as_ref() != Some(&update) {
                                expected += 1;
                                last = Some(update.clone());
                            }
                        }
                    }
                    sync.handle_update(update);
                }
                sync.flush().await;
                assert_eq!(count.load(Ordering::SeqCst), expected);
                assert_eq!(sync.current_state(), last);
            });
        }
    }
}
