//! In-memory durable answer store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use ih_core::{AttachmentReference, DurableStore, StateCallback, StoreError, Unsubscribe};
use ih_protocol::InteractiveId;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// One recorded write
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRecord {
    pub id: InteractiveId,
    pub state: Value,
    pub at: DateTime<Utc>,
}

type Watchers = DashMap<InteractiveId, Vec<(u64, StateCallback)>>;

/// Durable store backed by maps; watches fire synchronously on write
#[derive(Default)]
pub struct MemoryStore {
    states: DashMap<InteractiveId, Value>,
    attachments: DashMap<InteractiveId, HashMap<String, AttachmentReference>>,
    watchers: Arc<Watchers>,
    writes: Mutex<Vec<WriteRecord>>,
    next_watch: AtomicU64,
    fail_writes: AtomicBool,
    fail_loads: AtomicBool,
    load_delay: Mutex<Option<Duration>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Seed a persisted state without recording a write
    pub fn seed(&self, id: impl Into<InteractiveId>, state: Value) {
        self.states.insert(id.into(), state);
    }

    /// Seed an attachment reference
    pub fn seed_attachment(
        &self,
        id: impl Into<InteractiveId>,
        name: &str,
        reference: AttachmentReference,
    ) {
        self.attachments
            .entry(id.into())
            .or_default()
            .insert(name.to_string(), reference);
    }

    pub fn state(&self, id: &InteractiveId) -> Option<Value> {
        self.states.get(id).map(|v| v.value().clone())
    }

    pub fn writes(&self) -> Vec<WriteRecord> {
        self.writes.lock().clone()
    }

    pub fn writes_for(&self, id: &InteractiveId) -> Vec<Value> {
        self.writes
            .lock()
            .iter()
            .filter(|w| &w.id == id)
            .map(|w| w.state.clone())
            .collect()
    }

    pub fn attachment(&self, id: &InteractiveId, name: &str) -> Option<AttachmentReference> {
        self.attachments.get(id).and_then(|m| m.get(name).cloned())
    }

    pub fn watcher_count(&self, id: &InteractiveId) -> usize {
        self.watchers.get(id).map_or(0, |w| w.len())
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }

    /// Make every `load` take `delay` to answer
    pub fn set_load_delay(&self, delay: Duration) {
        *self.load_delay.lock() = Some(delay);
    }

    fn notify(&self, id: &InteractiveId, state: &Value) {
        let callbacks: Vec<StateCallback> = self
            .watchers
            .get(id)
            .map(|w| w.iter().map(|(_, cb)| Arc::clone(cb)).collect())
            .unwrap_or_default();
        for callback in callbacks {
            callback(state.clone());
        }
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn load(&self, id: &InteractiveId) -> Result<Option<Value>, StoreError> {
        let result = if self.fail_loads.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("memory store offline".to_string()))
        } else {
            Ok(self.state(id))
        };
        // answers with the value as of the query
        let delay = *self.load_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        result
    }

    async fn write(&self, id: &InteractiveId, state: &Value) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Rejected {
                id: id.clone(),
                reason: "writes disabled".to_string(),
            });
        }
        self.states.insert(id.clone(), state.clone());
        self.writes.lock().push(WriteRecord {
            id: id.clone(),
            state: state.clone(),
            at: Utc::now(),
        });
        self.notify(id, state);
        Ok(())
    }

    fn watch(&self, id: &InteractiveId, callback: StateCallback) -> Unsubscribe {
        let token = self.next_watch.fetch_add(1, Ordering::Relaxed);
        self.watchers
            .entry(id.clone())
            .or_default()
            .push((token, Arc::clone(&callback)));
        if let Some(current) = self.state(id) {
            callback(current);
        }

        let watchers = Arc::clone(&self.watchers);
        let id = id.clone();
        Box::new(move || {
            if let Some(mut list) = watchers.get_mut(&id) {
                list.retain(|(t, _)| *t != token);
            }
        })
    }

    async fn load_attachments(
        &self,
        id: &InteractiveId,
    ) -> Result<HashMap<String, AttachmentReference>, StoreError> {
        Ok(self
            .attachments
            .get(id)
            .map(|m| m.value().clone())
            .unwrap_or_default())
    }

    async fn write_attachment(
        &self,
        id: &InteractiveId,
        name: &str,
        reference: &AttachmentReference,
    ) -> Result<(), StoreError> {
        self.seed_attachment(id.clone(), name, reference.clone());
        Ok(())
    }
}
