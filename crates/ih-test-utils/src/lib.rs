//! Testing utilities for the Interactive Host workspace
//!
//! In-memory collaborators, a scripted frame peer, and a ready-made
//! session fixture.

#![allow(missing_docs)]

pub mod peer;
pub mod services;
pub mod storage;
pub mod store;

pub use peer::ScriptedPeer;
pub use services::{RecordingCoordinator, RecordingTelemetry, StaticCredentials};
pub use storage::{MemoryObjectStorage, BASE_URL};
pub use store::{MemoryStore, WriteRecord};

use ih_channel::FrameLink;
use ih_core::{
    HostConfig, HostSession, InteractiveInstance, LearnerIdentity, SessionContext, SessionId,
};
use ih_protocol::Generation;
use std::sync::Arc;
use std::time::Duration;

/// Session wired to in-memory collaborators
pub struct TestSession {
    pub session: HostSession,
    pub store: Arc<MemoryStore>,
    pub storage: Arc<MemoryObjectStorage>,
    pub credentials: Arc<StaticCredentials>,
    pub coordinator: Arc<RecordingCoordinator>,
    pub telemetry: Arc<RecordingTelemetry>,
}

impl TestSession {
    /// Mount an instance and return the frame-side peer
    pub fn mount(&self, instance: InteractiveInstance) -> (Generation, ScriptedPeer) {
        let (host, frame) = FrameLink::pair();
        let generation = self.session.mount_interactive(instance, host);
        (generation, ScriptedPeer::new(frame))
    }

    /// Mount, complete the handshake, and consume `initInteractive`
    pub async fn connect(&self, instance: InteractiveInstance) -> ScriptedPeer {
        let (_, mut peer) = self.mount(instance);
        peer.handshake().await;
        peer.next_matching(|m| matches!(m, ih_protocol::HostMessage::InitInteractive(_)))
            .await;
        peer
    }
}

/// Builder for [`TestSession`]
pub struct TestSessionBuilder {
    config: HostConfig,
    identity: LearnerIdentity,
    credentials: Arc<StaticCredentials>,
    store: Arc<MemoryStore>,
}

impl Default for TestSessionBuilder {
    fn default() -> Self {
        Self {
            config: HostConfig::default().with_handshake_retry(Duration::from_millis(10)),
            identity: LearnerIdentity::Anonymous {
                run_key: "run-key".to_string(),
            },
            credentials: StaticCredentials::new("test-jwt"),
            store: MemoryStore::new(),
        }
    }
}

impl TestSessionBuilder {
    pub fn config(mut self, config: HostConfig) -> Self {
        self.config = config;
        self
    }

    pub fn identity(mut self, identity: LearnerIdentity) -> Self {
        self.identity = identity;
        self
    }

    pub fn credentials(mut self, credentials: Arc<StaticCredentials>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn store(mut self, store: Arc<MemoryStore>) -> Self {
        self.store = store;
        self
    }

    pub fn build(self) -> TestSession {
        let storage = MemoryObjectStorage::new();
        let coordinator = RecordingCoordinator::new();
        let telemetry = RecordingTelemetry::new();
        let context = SessionContext::builder(
            self.store.clone(),
            storage.clone(),
            self.credentials.clone(),
            coordinator.clone(),
        )
        .config(self.config)
        .identity(self.identity)
        .session_id(SessionId::new())
        .telemetry(telemetry.clone())
        .build();
        TestSession {
            session: HostSession::new(context),
            store: self.store,
            storage,
            credentials: self.credentials,
            coordinator,
            telemetry,
        }
    }
}

/// Session with default in-memory collaborators
pub fn test_session() -> TestSession {
    TestSessionBuilder::default().build()
}
