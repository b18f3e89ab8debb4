//! External collaborators the protocol layer depends on
//!
//! Only their boundary is defined here; implementations live with the
//! hosting platform (and in `ih-test-utils` for tests).

use crate::error::{CredentialError, StorageError, StoreError};
use crate::types::{
    AccessStrategy, AttachmentFolder, AttachmentReference, FolderOwner, SignRequest,
    TelemetryEvent, WriteCredential,
};
use async_trait::async_trait;
use ih_protocol::{CustomMessage, InteractiveId};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Callback invoked with a watched interactive's new persisted state
pub type StateCallback = Arc<dyn Fn(Value) + Send + Sync>;

/// Cancels a watch; consumed on use so it runs at most once
pub type Unsubscribe = Box<dyn FnOnce() + Send>;

/// Callback the text coordinator uses to talk back to a component
pub type CoordinatorHandler = Arc<dyn Fn(CustomMessage) + Send + Sync>;

/// Durable per-learner answer store
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Last persisted state of an interactive
    async fn load(&self, id: &InteractiveId) -> Result<Option<Value>, StoreError>;

    /// Persist a new state; the store stamps the modification time
    async fn write(&self, id: &InteractiveId, state: &Value) -> Result<(), StoreError>;

    /// Observe persisted-state changes of an interactive
    fn watch(&self, id: &InteractiveId, callback: StateCallback) -> Unsubscribe;

    /// Attachment references recorded in the interactive's answer metadata
    async fn load_attachments(
        &self,
        id: &InteractiveId,
    ) -> Result<HashMap<String, AttachmentReference>, StoreError>;

    /// Record the reference for one named attachment
    async fn write_attachment(
        &self,
        id: &InteractiveId,
        name: &str,
        reference: &AttachmentReference,
    ) -> Result<(), StoreError>;
}

/// Object storage folder, credential, and signing service
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Create (or find) the folder for an owner
    async fn create_folder(
        &self,
        owner: &FolderOwner,
        access: &AccessStrategy,
    ) -> Result<AttachmentFolder, StorageError>;

    /// Issue a write credential scoped to a folder
    async fn issue_write_credential(
        &self,
        folder: &AttachmentFolder,
        access: &AccessStrategy,
    ) -> Result<WriteCredential, StorageError>;

    /// Mint a presigned URL
    async fn sign_url(&self, request: &SignRequest) -> Result<String, StorageError>;
}

/// JWT issuance for interactives that talk to their own backends
#[async_trait]
pub trait CredentialService: Send + Sync {
    /// Issue a token for `app` with extra request parameters
    async fn firebase_jwt(
        &self,
        app: Option<&str>,
        params: &Map<String, Value>,
    ) -> Result<String, CredentialError>;
}

/// Page-wide text-reading coordinator
pub trait TextCoordinator: Send + Sync {
    /// Register a component; `handler` receives coordinator messages for it
    fn register(&self, component_id: &str, handler: CoordinatorHandler);

    /// Forget a component
    fn unregister(&self, component_id: &str);

    /// Mark a component as the current reading target
    fn select(&self, component_id: &str);
}

/// Fire-and-forget telemetry
pub trait TelemetrySink: Send + Sync {
    /// Record one event
    fn log(&self, event: TelemetryEvent);
}

/// Telemetry sink that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn log(&self, event: TelemetryEvent) {
        tracing::trace!(interactive = %event.interactive, event = %event.event, "telemetry discarded");
    }
}
