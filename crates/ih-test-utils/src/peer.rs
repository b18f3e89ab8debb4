//! Scripted frame-side peer

use ih_channel::FrameLink;
use ih_protocol::{Envelope, HostMessage, InteractiveMessage};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

/// Plays the interactive's side of a frame link
#[derive(Debug)]
pub struct ScriptedPeer {
    link: FrameLink,
}

impl ScriptedPeer {
    pub fn new(link: FrameLink) -> Self {
        Self { link }
    }

    /// Wait for the host's hello and answer it
    pub async fn handshake(&mut self) {
        loop {
            let envelope = tokio::time::timeout(WAIT, self.link.recv())
                .await
                .expect("host never said hello")
                .expect("host link closed before hello");
            if envelope.is_hello() {
                break;
            }
        }
        self.link
            .send(Envelope::hello())
            .expect("host link closed during handshake");
    }

    pub fn send(&self, message: &InteractiveMessage) {
        let envelope = Envelope::try_from(message).expect("message encodes");
        self.link.send(envelope).expect("host link closed");
    }

    pub fn send_raw(&self, envelope: Envelope) {
        self.link.send(envelope).expect("host link closed");
    }

    /// Next non-hello host message; panics after five seconds of silence
    pub async fn next_message(&mut self) -> HostMessage {
        loop {
            let envelope = tokio::time::timeout(WAIT, self.link.recv())
                .await
                .expect("no host message within timeout")
                .expect("host link closed");
            if !envelope.is_hello() {
                return envelope.decode_outbound().expect("host message decodes");
            }
        }
    }

    /// Next non-hello message already queued, without waiting
    pub fn try_next_message(&mut self) -> Option<HostMessage> {
        while let Some(envelope) = self.link.try_recv() {
            if !envelope.is_hello() {
                return envelope.decode_outbound().ok();
            }
        }
        None
    }

    /// Skip messages until one matches
    pub async fn next_matching<F>(&mut self, mut predicate: F) -> HostMessage
    where
        F: FnMut(&HostMessage) -> bool,
    {
        loop {
            let message = self.next_message().await;
            if predicate(&message) {
                return message;
            }
        }
    }
}
