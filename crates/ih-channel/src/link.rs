//! Frame links and the host's outbound posting handle

use crate::error::ChannelError;
use ih_protocol::{Envelope, HostMessage};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

/// One end of an ordered, bidirectional frame connection
///
/// Messages sent on one end arrive at the other in send order. The host
/// hands its end to [`crate::MessageChannel::create`]; the frame (or a test
/// peer) keeps the other.
#[derive(Debug)]
pub struct FrameLink {
    tx: mpsc::UnboundedSender<Envelope>,
    rx: mpsc::UnboundedReceiver<Envelope>,
}

impl FrameLink {
    /// Build a link from raw halves
    #[inline]
    #[must_use]
    pub fn new(tx: mpsc::UnboundedSender<Envelope>, rx: mpsc::UnboundedReceiver<Envelope>) -> Self {
        Self { tx, rx }
    }

    /// Two connected ends
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (Self::new(a_tx, b_rx), Self::new(b_tx, a_rx))
    }

    /// Send one envelope
    ///
    /// # Errors
    /// - `ChannelError::Closed` if the other end was dropped
    pub fn send(&self, envelope: Envelope) -> Result<(), ChannelError> {
        self.tx.send(envelope).map_err(|_| ChannelError::Closed)
    }

    /// Receive the next envelope, `None` once the other end is gone
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }

    /// Non-blocking receive
    pub fn try_recv(&mut self) -> Option<Envelope> {
        self.rx.try_recv().ok()
    }

    pub(crate) fn split(
        self,
    ) -> (mpsc::UnboundedSender<Envelope>, mpsc::UnboundedReceiver<Envelope>) {
        (self.tx, self.rx)
    }
}

#[derive(Debug, Default)]
struct OutboundState {
    connected: bool,
    closed: bool,
    queued: Vec<Envelope>,
}

/// Cloneable fire-and-forget posting handle for one channel generation
///
/// Messages posted before the handshake completes are queued and flushed in
/// order once the frame acknowledges. After [`Outbound::close`] every post is
/// dropped.
#[derive(Debug, Clone)]
pub struct Outbound {
    tx: mpsc::UnboundedSender<Envelope>,
    state: Arc<Mutex<OutboundState>>,
    label: Arc<str>,
}

impl Outbound {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Envelope>, label: &str) -> Self {
        Self {
            tx,
            state: Arc::new(Mutex::new(OutboundState::default())),
            label: Arc::from(label),
        }
    }

    /// Post a typed message; never fails from the caller's point of view
    pub fn post(&self, message: &HostMessage) {
        match Envelope::encode(message) {
            Ok(envelope) => self.post_envelope(envelope),
            Err(e) => tracing::warn!(interactive = %self.label, "failed to encode {}: {}", message.kind(), e),
        }
    }

    /// Post a raw envelope
    pub fn post_envelope(&self, envelope: Envelope) {
        let mut state = self.state.lock();
        if state.closed {
            tracing::debug!(interactive = %self.label, kind = %envelope.kind, "dropping post on closed channel");
            return;
        }
        if !state.connected {
            state.queued.push(envelope);
            return;
        }
        drop(state);
        self.send_now(envelope);
    }

    /// Whether the handshake completed
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    /// Whether the channel was torn down
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Handshake envelopes bypass the queue
    pub(crate) fn send_hello(&self) {
        if !self.is_closed() {
            self.send_now(Envelope::hello());
        }
    }

    /// Mark connected and flush queued posts; `false` if already closed
    pub(crate) fn mark_connected(&self) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        state.connected = true;
        let queued = std::mem::take(&mut state.queued);
        // flush while holding the lock so later posts cannot overtake the queue
        for envelope in queued {
            self.send_now(envelope);
        }
        true
    }

    /// Stop delivering; idempotent
    pub(crate) fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.queued.clear();
    }

    fn send_now(&self, envelope: Envelope) {
        if self.tx.send(envelope).is_err() {
            tracing::debug!(interactive = %self.label, "frame link dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn posts_before_handshake_are_flushed_in_order() {
        let (host, mut frame) = FrameLink::pair();
        let (tx, _rx) = host.split();
        let out = Outbound::new(tx, "test");

        out.post(&HostMessage::GetInteractiveState(None));
        out.post_envelope(Envelope::new("second", serde_json::Value::Null));
        assert!(frame.try_recv().is_none());

        assert!(out.mark_connected());
        assert_eq!(frame.try_recv().unwrap().kind, "getInteractiveState");
        assert_eq!(frame.try_recv().unwrap().kind, "second");
    }

    #[test]
    fn closed_outbound_drops_everything() {
        let (host, mut frame) = FrameLink::pair();
        let (tx, _rx) = host.split();
        let out = Outbound::new(tx, "test");
        out.post(&HostMessage::GetInteractiveState(None));
        out.close();
        out.close();
        assert!(!out.mark_connected());
        out.post(&HostMessage::GetInteractiveState(None));
        assert!(frame.try_recv().is_none());
    }
}
