//! Host session
//!
//! Registry of every mounted interactive for one learner session, plus the
//! navigation save: before leaving a page the host asks every connected
//! interactive for its state and waits, watched by a batched tracker.

use crate::context::SessionContext;
use crate::error::HostError;
use crate::events::{EventBus, HostEvent};
use crate::runtime::InteractiveRuntime;
use crate::types::InteractiveInstance;
use dashmap::DashMap;
use ih_channel::{BatchedRequestTracker, FrameLink, StateRequestError};
use ih_protocol::{Generation, InteractiveId};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Result of saving every interactive
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveSummary {
    /// Interactives that reported their state
    pub saved: Vec<InteractiveId>,
    /// Interactives skipped (report mode or not connected)
    pub skipped: Vec<InteractiveId>,
    /// Failures, each naming the interactive
    pub failed: Vec<StateRequestError>,
}

impl SaveSummary {
    /// Every requested interactive answered
    #[inline]
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Labels of interactives that did not save
    #[must_use]
    pub fn failed_labels(&self) -> Vec<String> {
        self.failed.iter().map(|e| e.label().to_string()).collect()
    }
}

/// All interactives of one learner session
pub struct HostSession {
    context: SessionContext,
    runtimes: DashMap<InteractiveId, Arc<InteractiveRuntime>>,
    saves: BatchedRequestTracker,
}

impl std::fmt::Debug for HostSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostSession")
            .field("context", &self.context)
            .field("mounted", &self.runtimes.len())
            .finish_non_exhaustive()
    }
}

impl HostSession {
    /// Create session
    #[must_use]
    pub fn new(context: SessionContext) -> Self {
        let (slow, late) = (context.events.clone(), context.events.clone());
        let saves = BatchedRequestTracker::new(
            context.config.save_watchdog(),
            move || slow.publish(HostEvent::SavesSlow),
            move || late.publish(HostEvent::SavesFinishedLate),
        );
        tracing::info!(session = %context.session_id, "host session started");
        Self {
            context,
            runtimes: DashMap::new(),
            saves,
        }
    }

    /// Mount an interactive on a frame
    ///
    /// Re-mounting an id already present reuses its runtime and starts a
    /// new generation with the given instance (new URL, authored state,
    /// mode); state known to the runtime is kept.
    pub fn mount_interactive(&self, instance: InteractiveInstance, link: FrameLink) -> Generation {
        let runtime = self
            .runtimes
            .entry(instance.id.clone())
            .or_insert_with(|| InteractiveRuntime::new(instance.clone(), self.context.clone()))
            .clone();
        runtime.rebind(instance, link)
    }

    /// Tear down and forget one interactive
    ///
    /// # Errors
    /// - `HostError::NotMounted` for unknown ids
    pub fn unmount(&self, id: &InteractiveId) -> Result<(), HostError> {
        let (_, runtime) = self
            .runtimes
            .remove(id)
            .ok_or_else(|| HostError::NotMounted(id.clone()))?;
        runtime.unmount();
        Ok(())
    }

    /// Runtime for one interactive
    #[must_use]
    pub fn runtime(&self, id: &InteractiveId) -> Option<Arc<InteractiveRuntime>> {
        self.runtimes.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Ids of every mounted interactive
    #[must_use]
    pub fn interactive_ids(&self) -> Vec<InteractiveId> {
        let mut ids: Vec<InteractiveId> = self.runtimes.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Subscribe to host UI events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
        self.context.events.subscribe()
    }

    /// Event bus
    #[inline]
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.context.events
    }

    /// Session context
    #[inline]
    #[must_use]
    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    /// Ask every connected interactive for its state and wait for the writes
    ///
    /// Publishes `SavesSlow`/`SavesFinishedLate` around overdue requests and
    /// `SaveFailed` when any interactive timed out.
    pub async fn save_all(&self) -> SaveSummary {
        let mut summary = SaveSummary::default();
        let runtimes: Vec<Arc<InteractiveRuntime>> =
            self.runtimes.iter().map(|e| Arc::clone(e.value())).collect();

        let mut requests = Vec::new();
        for runtime in runtimes {
            if runtime.mode().is_read_only() || !runtime.is_connected() {
                summary.skipped.push(runtime.id().clone());
                continue;
            }
            let pending = match runtime.request_state(None) {
                Ok(pending) => pending,
                Err(e) => {
                    tracing::debug!(interactive = %runtime.id(), "skipping save: {}", e);
                    summary.skipped.push(runtime.id().clone());
                    continue;
                }
            };
            let id = runtime.id().clone();
            let handle = self.saves.register_request(async move {
                pending.await?;
                runtime.flush().await;
                Ok::<(), StateRequestError>(())
            });
            requests.push((id, handle));
        }

        for (id, handle) in requests {
            match handle.await {
                Ok(Ok(())) => summary.saved.push(id),
                Ok(Err(e)) => {
                    tracing::warn!(interactive = %id, "save failed: {}", e);
                    summary.failed.push(e);
                }
                Err(e) => tracing::warn!(interactive = %id, "save task failed: {}", e),
            }
        }

        if !summary.is_complete() {
            self.context.events.publish(HostEvent::SaveFailed {
                labels: summary.failed_labels(),
            });
        }
        tracing::info!(
            saved = summary.saved.len(),
            skipped = summary.skipped.len(),
            failed = summary.failed.len(),
            "save all finished"
        );
        summary
    }

    /// Unmount every interactive
    pub fn clear(&self) {
        let ids = self.interactive_ids();
        for id in ids {
            if let Some((_, runtime)) = self.runtimes.remove(&id) {
                runtime.unmount();
            }
        }
        self.context.folders.clear();
    }
}

impl Drop for HostSession {
    fn drop(&mut self) {
        self.clear();
    }
}
