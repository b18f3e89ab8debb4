//! Batched request tracking
//!
//! Watches many in-flight requests that belong to one host action (e.g.
//! saving every interactive before navigation). Each request gets its own
//! watchdog; the tracker reports the first overdue request and the moment
//! the last overdue request finally settles:
//! - `on_slow` fires on the 0→1 transition of the overdue count
//! - `on_finished_late` fires on the 1→0 transition
//! - requests that settle before their watchdog are invisible

use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Watchdog duration used when none is configured
pub const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_secs(10);

type Callback = Arc<dyn Fn() + Send + Sync>;

struct BatchInner {
    overdue: Mutex<usize>,
    on_slow: Callback,
    on_finished_late: Callback,
}

impl BatchInner {
    fn overdue(&self) {
        let first = {
            let mut overdue = self.overdue.lock();
            *overdue += 1;
            *overdue == 1
        };
        if first {
            tracing::info!("requests are slow to complete");
            (self.on_slow)();
        }
    }

    fn settled_late(&self) {
        let last = {
            let mut overdue = self.overdue.lock();
            *overdue = overdue.saturating_sub(1);
            *overdue == 0
        };
        if last {
            tracing::info!("late requests finished");
            (self.on_finished_late)();
        }
    }
}

/// Edge-triggered watchdog over a batch of requests
#[derive(Clone)]
pub struct BatchedRequestTracker {
    timeout: Duration,
    inner: Arc<BatchInner>,
}

impl std::fmt::Debug for BatchedRequestTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchedRequestTracker")
            .field("timeout", &self.timeout)
            .field("overdue", &self.overdue_count())
            .finish_non_exhaustive()
    }
}

impl BatchedRequestTracker {
    /// Create tracker with callbacks
    #[must_use]
    pub fn new(
        timeout: Duration,
        on_slow: impl Fn() + Send + Sync + 'static,
        on_finished_late: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        Self {
            timeout,
            inner: Arc::new(BatchInner {
                overdue: Mutex::new(0),
                on_slow: Arc::new(on_slow),
                on_finished_late: Arc::new(on_finished_late),
            }),
        }
    }

    /// Create tracker with the default 10 second watchdog
    #[must_use]
    pub fn with_default_timeout(
        on_slow: impl Fn() + Send + Sync + 'static,
        on_finished_late: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        Self::new(DEFAULT_BATCH_TIMEOUT, on_slow, on_finished_late)
    }

    /// Watch one request
    ///
    /// The returned handle yields the request's own output once it settles.
    pub fn register_request<F>(&self, request: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let timeout = self.timeout;
        tokio::spawn(async move {
            tokio::pin!(request);
            tokio::select! {
                biased;
                output = &mut request => return output,
                () = tokio::time::sleep(timeout) => {}
            }
            inner.overdue();
            let output = request.await;
            inner.settled_late();
            output
        })
    }

    /// Requests currently past their watchdog
    #[inline]
    #[must_use]
    pub fn overdue_count(&self) -> usize {
        *self.inner.overdue.lock()
    }

    /// Configured watchdog duration
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}
