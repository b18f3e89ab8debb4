//! Message channel bound to one interactive frame
//!
//! A channel is one *generation* of the connection to a frame. Creating it
//! starts the `hello` handshake; once the frame answers, queued posts are
//! flushed, `on_ready` fires, and inbound messages are dispatched to the one
//! handler registered for their type. A frame that never answers leaves the
//! channel silently pending: nothing is dispatched and no error is raised.

use crate::link::{FrameLink, Outbound};
use crate::request::{PendingState, StateRequestTracker, DEFAULT_STATE_REQUEST_TIMEOUT};
use ih_protocol::{Envelope, Generation, HostMessage, InteractiveMessage, InteractiveMessageKind};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Inbound message handler
pub type Handler = Arc<dyn Fn(InteractiveMessage) + Send + Sync>;

type HandlerMap = Arc<Mutex<HashMap<InteractiveMessageKind, Handler>>>;

/// Channel construction options
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    /// Human-readable interactive name used in logs and timeout messages
    pub label: String,
    /// Generation this channel represents
    pub generation: Generation,
    /// Interval between `hello` re-posts until the frame answers
    pub handshake_retry: Duration,
    /// Deadline for state requests
    pub state_request_timeout: Duration,
}

impl ChannelOptions {
    /// Options with defaults for everything but the label
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            generation: Generation::default(),
            handshake_retry: Duration::from_millis(200),
            state_request_timeout: DEFAULT_STATE_REQUEST_TIMEOUT,
        }
    }

    /// With generation
    #[inline]
    #[must_use]
    pub fn with_generation(mut self, generation: Generation) -> Self {
        self.generation = generation;
        self
    }

    /// With handshake retry interval
    #[inline]
    #[must_use]
    pub fn with_handshake_retry(mut self, retry: Duration) -> Self {
        self.handshake_retry = retry;
        self
    }

    /// With state request deadline
    #[inline]
    #[must_use]
    pub fn with_state_request_timeout(mut self, timeout: Duration) -> Self {
        self.state_request_timeout = timeout;
        self
    }
}

/// One generation of the host↔frame connection
pub struct MessageChannel {
    options: ChannelOptions,
    outbound: Outbound,
    handlers: HandlerMap,
    task: Mutex<Option<JoinHandle<()>>>,
    state_request: OnceLock<Arc<StateRequestTracker>>,
}

impl std::fmt::Debug for MessageChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageChannel")
            .field("label", &self.options.label)
            .field("generation", &self.options.generation)
            .field("connected", &self.is_connected())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl MessageChannel {
    /// Bind to a frame and start the handshake
    ///
    /// `on_ready` fires once, after the frame acknowledges, unless the channel
    /// is disconnected first. Must be called inside a tokio runtime.
    pub fn create<F>(link: FrameLink, options: ChannelOptions, on_ready: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let (tx, rx) = link.split();
        let outbound = Outbound::new(tx, &options.label);
        let handlers: HandlerMap = Arc::new(Mutex::new(HashMap::new()));

        let task = tokio::spawn(run(
            rx,
            outbound.clone(),
            Arc::clone(&handlers),
            options.clone(),
            on_ready,
        ));

        tracing::debug!(
            interactive = %options.label,
            generation = %options.generation,
            "channel created"
        );

        Self {
            options,
            outbound,
            handlers,
            task: Mutex::new(Some(task)),
            state_request: OnceLock::new(),
        }
    }

    /// Fire-and-forget send
    #[inline]
    pub fn post(&self, message: &HostMessage) {
        self.outbound.post(message);
    }

    /// Posting handle that outlives borrows of the channel
    #[inline]
    #[must_use]
    pub fn outbound(&self) -> Outbound {
        self.outbound.clone()
    }

    /// Register the handler for one message type, replacing any previous one
    pub fn add_listener<F>(&self, kind: InteractiveMessageKind, handler: F)
    where
        F: Fn(InteractiveMessage) + Send + Sync + 'static,
    {
        if self.handlers.lock().insert(kind, Arc::new(handler)).is_some() {
            tracing::debug!(interactive = %self.options.label, %kind, "replaced handler");
        }
    }

    /// Remove the handler for one message type
    pub fn remove_listener(&self, kind: InteractiveMessageKind) {
        self.handlers.lock().remove(&kind);
    }

    /// Lazily created state request tracker for this generation
    pub fn state_request(&self) -> Arc<StateRequestTracker> {
        Arc::clone(self.state_request.get_or_init(|| {
            Arc::new(StateRequestTracker::new(
                self.options.label.clone(),
                self.options.state_request_timeout,
                self.outbound.clone(),
            ))
        }))
    }

    /// Ask the interactive for its current state
    pub fn request_state(&self, options: Option<Value>) -> PendingState {
        self.state_request().request(options)
    }

    /// Release everything; safe to call repeatedly
    ///
    /// Any pending state request is abandoned without settling.
    pub fn disconnect(&self) {
        let Some(task) = self.task.lock().take() else {
            return;
        };
        self.outbound.close();
        task.abort();
        if let Some(tracker) = self.state_request.get() {
            tracker.cancel();
        }
        self.handlers.lock().clear();
        tracing::debug!(
            interactive = %self.options.label,
            generation = %self.options.generation,
            "channel disconnected"
        );
    }

    /// Handshake completed
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.outbound.is_connected()
    }

    /// Torn down
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }

    /// Generation of this channel
    #[inline]
    #[must_use]
    pub fn generation(&self) -> Generation {
        self.options.generation
    }

    /// Interactive label
    #[inline]
    #[must_use]
    pub fn label(&self) -> &str {
        &self.options.label
    }
}

impl Drop for MessageChannel {
    fn drop(&mut self) {
        self.disconnect();
    }
}

async fn run<F>(
    mut inbound: mpsc::UnboundedReceiver<Envelope>,
    outbound: Outbound,
    handlers: HandlerMap,
    options: ChannelOptions,
    on_ready: F,
) where
    F: FnOnce() + Send + 'static,
{
    let label = options.label.as_str();
    let mut retry = tokio::time::interval(options.handshake_retry);
    retry.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = retry.tick() => outbound.send_hello(),
            envelope = inbound.recv() => match envelope {
                Some(envelope) if envelope.is_hello() => break,
                Some(envelope) => {
                    tracing::debug!(interactive = %label, kind = %envelope.kind, "dropping message before handshake");
                }
                None => {
                    tracing::debug!(interactive = %label, "frame link closed before handshake");
                    return;
                }
            },
        }
    }

    if !outbound.mark_connected() {
        return;
    }
    tracing::info!(interactive = %label, generation = %options.generation, "interactive connected");
    on_ready();

    while let Some(envelope) = inbound.recv().await {
        dispatch(label, &handlers, &envelope);
    }
    tracing::debug!(interactive = %label, "frame link closed");
}

fn dispatch(label: &str, handlers: &HandlerMap, envelope: &Envelope) {
    if envelope.is_hello() {
        return;
    }
    let message = match envelope.decode_inbound() {
        Ok(message) => message,
        Err(e) if e.is_unknown_type() => {
            tracing::debug!(interactive = %label, kind = %envelope.kind, "ignoring unknown message type");
            return;
        }
        Err(e) => {
            tracing::warn!(interactive = %label, "dropping malformed message: {}", e);
            return;
        }
    };
    let handler = handlers.lock().get(&message.kind()).cloned();
    match handler {
        Some(handler) => handler(message),
        None => {
            tracing::debug!(interactive = %label, kind = %envelope.kind, "no handler registered");
        }
    }
}
