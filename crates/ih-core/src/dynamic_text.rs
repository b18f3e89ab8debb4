//! Dynamic-text bridge
//!
//! Proxies text-to-speech component registration between one channel and
//! the page-wide reading coordinator. The sub-protocol rides inside
//! `customMessage` envelopes whose type starts with `dynamicText:`.
//!
//! Every component registered through a channel is unregistered when the
//! bridge is torn down, so the coordinator never points at a dead frame.

use crate::collaborators::{CoordinatorHandler, TextCoordinator};
use ih_channel::Outbound;
use ih_protocol::{CustomMessage, HostMessage};
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;

/// Prefix of every dynamic-text message type
pub const PREFIX: &str = "dynamicText:";
/// Frame registers a readable component
pub const REGISTER: &str = "dynamicText:registerComponent";
/// Frame unregisters a component
pub const UNREGISTER: &str = "dynamicText:unregisterComponent";
/// Frame asks the coordinator to read a component
pub const SELECT: &str = "dynamicText:selectComponent";

#[derive(Deserialize)]
struct ComponentRef {
    id: String,
}

/// Per-channel dynamic-text proxy
pub struct DynamicTextBridge {
    coordinator: Arc<dyn TextCoordinator>,
    outbound: Outbound,
    owned: Mutex<HashSet<String>>,
}

impl std::fmt::Debug for DynamicTextBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicTextBridge")
            .field("owned", &*self.owned.lock())
            .finish_non_exhaustive()
    }
}

impl DynamicTextBridge {
    /// Create bridge answering through `outbound`
    #[must_use]
    pub fn new(coordinator: Arc<dyn TextCoordinator>, outbound: Outbound) -> Self {
        Self {
            coordinator,
            outbound,
            owned: Mutex::new(HashSet::new()),
        }
    }

    /// Handle a custom message; returns `false` if it is not dynamic-text traffic
    pub fn handle(&self, message: &CustomMessage) -> bool {
        if !message.kind.starts_with(PREFIX) {
            return false;
        }
        let component = match serde_json::from_value::<ComponentRef>(message.content.clone()) {
            Ok(component) => component.id,
            Err(e) => {
                tracing::warn!(kind = %message.kind, "malformed dynamic text message: {}", e);
                return true;
            }
        };
        match message.kind.as_str() {
            REGISTER => self.register(&component),
            UNREGISTER => self.unregister(&component),
            SELECT => self.coordinator.select(&component),
            other => tracing::debug!(kind = other, "unknown dynamic text message"),
        }
        true
    }

    /// Register `component_id` as owned by this channel
    pub fn register(&self, component_id: &str) {
        self.owned.lock().insert(component_id.to_string());
        let outbound = self.outbound.clone();
        let handler: CoordinatorHandler = Arc::new(move |message| {
            outbound.post(&HostMessage::CustomMessage(message));
        });
        self.coordinator.register(component_id, handler);
        tracing::debug!(component = component_id, "dynamic text component registered");
    }

    /// Forget `component_id`
    pub fn unregister(&self, component_id: &str) {
        self.owned.lock().remove(component_id);
        self.coordinator.unregister(component_id);
    }

    /// Unregister every component still owned by this channel
    pub fn unregister_all(&self) {
        let owned: Vec<String> = self.owned.lock().drain().collect();
        for component_id in owned {
            self.coordinator.unregister(&component_id);
            tracing::debug!(component = %component_id, "dynamic text component released");
        }
    }

    /// Components currently owned
    #[must_use]
    pub fn owned(&self) -> Vec<String> {
        let mut owned: Vec<String> = self.owned.lock().iter().cloned().collect();
        owned.sort();
        owned
    }
}

impl Drop for DynamicTextBridge {
    fn drop(&mut self) {
        self.unregister_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ih_channel::{ChannelOptions, FrameLink, MessageChannel};
    use ih_protocol::Envelope;
    use serde_json::json;
    use std::collections::HashMap;

    #[derive(Default)]
    struct Coordinator {
        registered: Mutex<HashMap<String, CoordinatorHandler>>,
        selected: Mutex<Vec<String>>,
    }

    impl TextCoordinator for Coordinator {
        fn register(&self, component_id: &str, handler: CoordinatorHandler) {
            self.registered.lock().insert(component_id.to_string(), handler);
        }

        fn unregister(&self, component_id: &str) {
            self.registered.lock().remove(component_id);
        }

        fn select(&self, component_id: &str) {
            self.selected.lock().push(component_id.to_string());
        }
    }

    async fn connected() -> (MessageChannel, FrameLink) {
        let (host, mut frame) = FrameLink::pair();
        let channel = MessageChannel::create(host, ChannelOptions::new("Text"), || {});
        let _ = frame.recv().await;
        frame.send(Envelope::hello()).unwrap();
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        (channel, frame)
    }

    fn register(id: &str) -> CustomMessage {
        CustomMessage::new(REGISTER, json!({ "id": id }))
    }

    #[tokio::test]
    async fn teardown_releases_every_owned_component() {
        let (channel, _frame) = connected().await;
        let coordinator = Arc::new(Coordinator::default());
        let bridge = DynamicTextBridge::new(coordinator.clone(), channel.outbound());

        assert!(bridge.handle(&register("a")));
        assert!(bridge.handle(&register("b")));
        assert!(bridge.handle(&CustomMessage::new(UNREGISTER, json!({"id": "a"}))));
        assert_eq!(bridge.owned(), vec!["b".to_string()]);

        drop(bridge);
        assert!(coordinator.registered.lock().is_empty());
    }

    #[tokio::test]
    async fn coordinator_messages_are_reposted_to_the_frame() {
        let (channel, mut frame) = connected().await;
        let coordinator = Arc::new(Coordinator::default());
        let bridge = DynamicTextBridge::new(coordinator.clone(), channel.outbound());
        bridge.handle(&register("p1"));

        let handler = coordinator.registered.lock()["p1"].clone();
        let reading = CustomMessage::new("dynamicText:readAloud", json!({"id": "p1"}));
        handler(reading.clone());

        let pushed = loop {
            let envelope = frame.recv().await.unwrap();
            if !envelope.is_hello() {
                break envelope.decode_outbound().unwrap();
            }
        };
        assert_eq!(pushed, HostMessage::CustomMessage(reading));
    }

    #[tokio::test]
    async fn select_and_foreign_messages() {
        let (channel, _frame) = connected().await;
        let coordinator = Arc::new(Coordinator::default());
        let bridge = DynamicTextBridge::new(coordinator.clone(), channel.outbound());

        assert!(bridge.handle(&CustomMessage::new(SELECT, json!({"id": "p2"}))));
        assert_eq!(*coordinator.selected.lock(), vec!["p2".to_string()]);

        assert!(!bridge.handle(&CustomMessage::new("graph:zoom", json!({}))));
        assert!(bridge.handle(&CustomMessage::new(REGISTER, json!("not an object"))));
        assert!(bridge.owned().is_empty());
    }
}
