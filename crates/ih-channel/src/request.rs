//! State request correlation
//!
//! The wire format carries no request id for `getInteractiveState`, so a
//! request is answered by the *next* `interactiveState` message on the same
//! channel, whatever its payload. At most one request is in flight per
//! channel; concurrent callers share it.

use crate::error::StateRequestError;
use crate::link::Outbound;
use futures::future::{BoxFuture, FutureExt, Shared};
use ih_protocol::HostMessage;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Deadline used by the reference deployment
pub const DEFAULT_STATE_REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Settlement shared by every caller of one request
///
/// Resolves on the next state update, rejects on timeout, and stays pending
/// forever if the channel is torn down first.
pub type PendingState = Shared<BoxFuture<'static, Result<(), StateRequestError>>>;

struct Pending {
    id: u64,
    future: PendingState,
    resolver: oneshot::Sender<Result<(), StateRequestError>>,
    timer: JoinHandle<()>,
}

/// "Report your current state, with a deadline" for one channel
pub struct StateRequestTracker {
    label: String,
    timeout: Duration,
    outbound: Outbound,
    slot: Arc<Mutex<Option<Pending>>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for StateRequestTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateRequestTracker")
            .field("label", &self.label)
            .field("timeout", &self.timeout)
            .field("pending", &self.is_pending())
            .finish_non_exhaustive()
    }
}

impl StateRequestTracker {
    /// Create a tracker posting through `outbound`
    #[must_use]
    pub fn new(label: impl Into<String>, timeout: Duration, outbound: Outbound) -> Self {
        Self {
            label: label.into(),
            timeout,
            outbound,
            slot: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(0),
        }
    }

    /// Ask the interactive for its state
    ///
    /// Sends `getInteractiveState` only when no request is pending; otherwise
    /// returns the pending request. Must be called inside a tokio runtime.
    pub fn request(&self, options: Option<Value>) -> PendingState {
        let mut slot = self.slot.lock();
        if let Some(pending) = slot.as_ref() {
            return pending.future.clone();
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (resolver, rx) = oneshot::channel();
        let future = async move {
            match rx.await {
                Ok(settled) => settled,
                // resolver dropped by cancel(): never settle
                Err(_) => futures::future::pending().await,
            }
        }
        .boxed()
        .shared();

        let timer = tokio::spawn(expire(
            Arc::clone(&self.slot),
            id,
            self.label.clone(),
            self.timeout,
        ));

        *slot = Some(Pending {
            id,
            future: future.clone(),
            resolver,
            timer,
        });
        drop(slot);

        tracing::debug!(interactive = %self.label, "requesting interactive state");
        self.outbound.post(&HostMessage::GetInteractiveState(options));
        future
    }

    /// Resolve the pending request, if any; `true` when one was resolved
    pub fn resolve(&self) -> bool {
        let Some(pending) = self.slot.lock().take() else {
            return false;
        };
        pending.timer.abort();
        let _ = pending.resolver.send(Ok(()));
        tracing::debug!(interactive = %self.label, "state request answered");
        true
    }

    /// Drop the pending request without settling it
    ///
    /// Used on teardown and reconnect. Callers still awaiting it never wake.
    pub fn cancel(&self) {
        if let Some(pending) = self.slot.lock().take() {
            pending.timer.abort();
            tracing::debug!(interactive = %self.label, "state request abandoned");
        }
    }

    /// Whether a request is in flight
    #[inline]
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Label used in timeout messages
    #[inline]
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl Drop for StateRequestTracker {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn expire(slot: Arc<Mutex<Option<Pending>>>, id: u64, label: String, timeout: Duration) {
    tokio::time::sleep(timeout).await;
    let expired = {
        let mut slot = slot.lock();
        if slot.as_ref().is_some_and(|p| p.id == id) {
            slot.take()
        } else {
            None
        }
    };
    if let Some(pending) = expired {
        tracing::warn!(interactive = %label, "state request timed out");
        let _ = pending
            .resolver
            .send(Err(StateRequestError::Timeout { label, timeout }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::FrameLink;
    use tokio::time::Instant;

    fn tracker(timeout: Duration) -> (StateRequestTracker, FrameLink, FrameLink) {
        let (host, frame) = FrameLink::pair();
        let (tx, rx) = host.split();
        let outbound = Outbound::new(tx.clone(), "Graph");
        assert!(outbound.mark_connected());
        let keep = FrameLink::new(tx, rx);
        (StateRequestTracker::new("Graph", timeout, outbound), frame, keep)
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_requests_share_one_wire_message() {
        let (tracker, mut frame, _keep) = tracker(Duration::from_secs(20));

        let first = tracker.request(None);
        let second = tracker.request(None);

        assert_eq!(frame.try_recv().unwrap().kind, "getInteractiveState");
        assert!(frame.try_recv().is_none());

        assert!(tracker.resolve());
        assert_eq!(first.await, Ok(()));
        assert_eq!(second.await, Ok(()));
        assert!(!tracker.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_rejects_with_label_and_clears_slot() {
        let (tracker, _frame, _keep) = tracker(Duration::from_millis(3));
        let start = Instant::now();

        let first = tracker.request(None);
        let second = tracker.request(None);
        let err = first.await.unwrap_err();

        assert!(start.elapsed() >= Duration::from_millis(3));
        assert!(start.elapsed() < Duration::from_millis(5));
        assert!(err.to_string().contains("Graph"));
        assert_eq!(second.await, Err(err));
        assert!(!tracker.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn late_update_after_timeout_does_not_resolve_again() {
        let (tracker, _frame, _keep) = tracker(Duration::from_millis(3));
        let pending = tracker.request(None);
        assert!(pending.clone().await.is_err());

        assert!(!tracker.resolve());
        assert!(pending.await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_timeout_sends_a_new_request() {
        let (tracker, mut frame, _keep) = tracker(Duration::from_millis(3));
        assert!(tracker.request(None).await.is_err());
        let retry = tracker.request(None);

        assert_eq!(frame.try_recv().unwrap().kind, "getInteractiveState");
        assert_eq!(frame.try_recv().unwrap().kind, "getInteractiveState");
        tracker.resolve();
        assert_eq!(retry.await, Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_request_never_settles() {
        let (tracker, _frame, _keep) = tracker(Duration::from_millis(3));
        let pending = tracker.request(None);
        tracker.cancel();

        let outcome = tokio::time::timeout(Duration::from_secs(60), pending).await;
        assert!(outcome.is_err(), "cancelled request must stay pending");
        assert!(!tracker.resolve());
    }
}
