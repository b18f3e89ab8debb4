//! Learner session context
//!
//! Collaborators and settings shared by every interactive of one learner
//! session. Cheap to clone.

use crate::attachments::FolderCache;
use crate::collaborators::{
    CredentialService, DurableStore, NoopTelemetry, ObjectStorage, TelemetrySink, TextCoordinator,
};
use crate::config::HostConfig;
use crate::events::EventBus;
use crate::types::{LearnerIdentity, SessionId};
use std::sync::Arc;

/// Shared collaborators for one learner session
#[derive(Clone)]
pub struct SessionContext {
    /// Host configuration
    pub config: HostConfig,
    /// Who the learner is
    pub identity: LearnerIdentity,
    /// Session id, embedded in attachment paths
    pub session_id: SessionId,
    /// Durable answer store
    pub store: Arc<dyn DurableStore>,
    /// Object storage
    pub storage: Arc<dyn ObjectStorage>,
    /// JWT issuance
    pub credentials: Arc<dyn CredentialService>,
    /// Page-wide text reading coordinator
    pub coordinator: Arc<dyn TextCoordinator>,
    /// Telemetry sink
    pub telemetry: Arc<dyn TelemetrySink>,
    /// Attachment folders created this session
    pub folders: FolderCache,
    /// Host UI event bus
    pub events: EventBus,
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("config", &self.config)
            .field("identity", &self.identity)
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

impl SessionContext {
    /// Start building a context from its required collaborators
    #[must_use]
    pub fn builder(
        store: Arc<dyn DurableStore>,
        storage: Arc<dyn ObjectStorage>,
        credentials: Arc<dyn CredentialService>,
        coordinator: Arc<dyn TextCoordinator>,
    ) -> SessionContextBuilder {
        SessionContextBuilder {
            config: HostConfig::default(),
            identity: LearnerIdentity::Preview,
            session_id: None,
            store,
            storage,
            credentials,
            coordinator,
            telemetry: Arc::new(NoopTelemetry),
        }
    }
}

/// Builder for [`SessionContext`]
pub struct SessionContextBuilder {
    config: HostConfig,
    identity: LearnerIdentity,
    session_id: Option<SessionId>,
    store: Arc<dyn DurableStore>,
    storage: Arc<dyn ObjectStorage>,
    credentials: Arc<dyn CredentialService>,
    coordinator: Arc<dyn TextCoordinator>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl SessionContextBuilder {
    /// With configuration
    #[must_use]
    pub fn config(mut self, config: HostConfig) -> Self {
        self.config = config;
        self
    }

    /// With learner identity
    #[must_use]
    pub fn identity(mut self, identity: LearnerIdentity) -> Self {
        self.identity = identity;
        self
    }

    /// With a fixed session id
    #[must_use]
    pub fn session_id(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    /// With telemetry sink
    #[must_use]
    pub fn telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Finish
    #[must_use]
    pub fn build(self) -> SessionContext {
        let events = EventBus::new(self.config.event_capacity);
        SessionContext {
            config: self.config,
            identity: self.identity,
            session_id: self.session_id.unwrap_or_default(),
            store: self.store,
            storage: self.storage,
            credentials: self.credentials,
            coordinator: self.coordinator,
            telemetry: self.telemetry,
            folders: FolderCache::default(),
            events,
        }
    }
}
