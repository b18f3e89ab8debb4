//! Attachment URL brokering
//!
//! Turns `getAttachmentUrl` requests into signed, time-limited URLs without
//! handing storage credentials to the frame:
//! - writes lazily create the instance's folder (cached for the session),
//!   renew the folder's write credential once it nears expiry, sign a PUT
//!   for `{session}/{name}`, and record the reference when it changes
//! - reads sign a GET from the previously recorded reference
//!
//! Every request yields a response; failures become the response's error text.

use crate::collaborators::ObjectStorage;
use crate::error::{AttachmentError, StorageError};
use crate::types::{
    AttachmentFolder, AttachmentReference, FolderOwner, LearnerIdentity, SignMethod, SignRequest,
};
use ih_protocol::{
    AttachmentOperation, AttachmentUrlRequest, AttachmentUrlResponse, InteractiveId, Mode,
};
use moka::future::Cache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Credentials this close to expiry are renewed before signing
const CREDENTIAL_RENEW_MARGIN_SECS: i64 = 60;

/// Called when the durable reference for a named attachment changes
pub type ReferenceSink = Arc<dyn Fn(&str, &AttachmentReference) + Send + Sync>;

/// Session-wide attachment folder cache keyed by interactive instance
#[derive(Debug, Clone)]
pub struct FolderCache {
    inner: Cache<InteractiveId, AttachmentFolder>,
}

impl FolderCache {
    /// Create cache holding at most `max_capacity` folders
    ///
    /// An evicted folder is looked up again through `create_folder` on the
    /// next write, so storage must return the existing folder for an owner.
    #[inline]
    #[must_use]
    pub fn new(max_capacity: u64) -> Self {
        Self {
            inner: Cache::new(max_capacity),
        }
    }

    /// Create cache that keeps every folder until invalidated
    #[must_use]
    pub fn unbounded() -> Self {
        Self {
            inner: Cache::builder().build(),
        }
    }

    /// Cached folder or the result of `create`
    ///
    /// Concurrent callers for the same instance share one `create` call.
    pub async fn get_or_create<F>(
        &self,
        instance: &InteractiveId,
        create: F,
    ) -> Result<AttachmentFolder, AttachmentError>
    where
        F: Future<Output = Result<AttachmentFolder, StorageError>>,
    {
        self.inner
            .try_get_with(instance.clone(), create)
            .await
            .map_err(AttachmentError::Storage)
    }

    /// Cached folder, if one was created
    #[inline]
    pub async fn get(&self, instance: &InteractiveId) -> Option<AttachmentFolder> {
        self.inner.get(instance).await
    }

    /// Replace the cached folder for one instance
    #[inline]
    pub async fn insert(&self, instance: &InteractiveId, folder: AttachmentFolder) {
        self.inner.insert(instance.clone(), folder).await;
    }

    /// Forget one instance's folder
    #[inline]
    pub async fn invalidate(&self, instance: &InteractiveId) {
        self.inner.invalidate(instance).await;
    }

    /// Forget every folder
    #[inline]
    pub fn clear(&self) {
        self.inner.invalidate_all();
    }
}

impl Default for FolderCache {
    /// Folders live for the whole session
    fn default() -> Self {
        Self::unbounded()
    }
}

/// Options accompanying a URL request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UrlOptions {
    /// MIME type for writes
    pub content_type: Option<String>,
    /// URL lifetime override
    pub expires_in: Option<Duration>,
}

/// Attachment URL broker for one interactive instance
pub struct AttachmentBroker {
    instance: InteractiveId,
    session: String,
    identity: LearnerIdentity,
    mode: Mutex<Mode>,
    storage: Arc<dyn ObjectStorage>,
    folders: FolderCache,
    references: Mutex<HashMap<String, AttachmentReference>>,
    on_reference_change: ReferenceSink,
    default_expires_in: Duration,
}

impl std::fmt::Debug for AttachmentBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachmentBroker")
            .field("instance", &self.instance)
            .field("session", &self.session)
            .field("references", &*self.references.lock())
            .finish_non_exhaustive()
    }
}

/// Everything a broker needs besides the instance itself
#[derive(Clone)]
pub struct BrokerContext {
    /// Session id embedded in written object paths
    pub session: String,
    /// Learner identity deciding the access strategy
    pub identity: LearnerIdentity,
    /// Storage service
    pub storage: Arc<dyn ObjectStorage>,
    /// Shared folder cache
    pub folders: FolderCache,
    /// Default URL lifetime
    pub default_expires_in: Duration,
}

impl AttachmentBroker {
    /// Create broker for one instance
    #[must_use]
    pub fn new(
        instance: InteractiveId,
        mode: Mode,
        context: BrokerContext,
        references: HashMap<String, AttachmentReference>,
        on_reference_change: ReferenceSink,
    ) -> Self {
        Self {
            instance,
            session: context.session,
            identity: context.identity,
            mode: Mutex::new(mode),
            storage: context.storage,
            folders: context.folders,
            references: Mutex::new(references),
            on_reference_change,
            default_expires_in: context.default_expires_in,
        }
    }

    /// Switch rendering mode for later requests
    pub fn set_mode(&self, mode: Mode) {
        *self.mode.lock() = mode;
    }

    /// Answer a wire request; never fails
    pub async fn handle(&self, request: &AttachmentUrlRequest) -> AttachmentUrlResponse {
        let options = UrlOptions {
            content_type: request.content_type.clone(),
            expires_in: request.expires_in.map(Duration::from_secs),
        };
        match self.request_url(request.operation, &request.name, options).await {
            Ok(url) => AttachmentUrlResponse::url(request.request_id, url),
            Err(e) => {
                tracing::warn!(interactive = %self.instance, name = %request.name, "attachment request failed: {}", e);
                AttachmentUrlResponse::error(request.request_id, e.to_string())
            }
        }
    }

    /// Signed URL for reading or writing `name`
    ///
    /// # Errors
    /// - `AttachmentError::Unsupported` for writes without write capability
    /// - `AttachmentError::MissingReference` for reads before any write
    /// - `AttachmentError::Storage` for folder, credential, or signing failures
    pub async fn request_url(
        &self,
        operation: AttachmentOperation,
        name: &str,
        options: UrlOptions,
    ) -> Result<String, AttachmentError> {
        match operation {
            AttachmentOperation::Write => self.write_url(name, options).await,
            AttachmentOperation::Read => self.read_url(name, options).await,
        }
    }

    async fn write_url(&self, name: &str, options: UrlOptions) -> Result<String, AttachmentError> {
        let read_only = self.mode.lock().is_read_only();
        if read_only {
            return Err(AttachmentError::Unsupported("in report mode"));
        }
        let access = self
            .identity
            .access_strategy()
            .ok_or(AttachmentError::Unsupported("without a learner session"))?;

        let owner = FolderOwner {
            namespace: self.identity.namespace(),
            interactive: self.instance.clone(),
        };
        let storage = Arc::clone(&self.storage);
        let folder_access = access.clone();
        let folder = self
            .folders
            .get_or_create(&self.instance, async move {
                let mut folder = storage.create_folder(&owner, &folder_access).await?;
                let credential = storage
                    .issue_write_credential(&folder, &folder_access)
                    .await?;
                folder.write_credential = Some(credential);
                tracing::info!(folder = %folder.id, "attachment folder created");
                Ok(folder)
            })
            .await?;

        let margin = chrono::Duration::seconds(CREDENTIAL_RENEW_MARGIN_SECS);
        let credential = match folder.write_credential.clone() {
            Some(credential) if credential.is_valid_for(margin) => credential,
            _ => {
                let credential = self.storage.issue_write_credential(&folder, &access).await?;
                tracing::debug!(folder = %folder.id, expires_at = %credential.expires_at, "write credential renewed");
                self.folders
                    .insert(
                        &self.instance,
                        AttachmentFolder {
                            write_credential: Some(credential.clone()),
                            ..folder.clone()
                        },
                    )
                    .await;
                credential
            }
        };

        let reference = AttachmentReference {
            folder_id: folder.id.clone(),
            path: format!("{}/{}", self.session, name),
        };
        let url = self
            .storage
            .sign_url(&SignRequest {
                method: SignMethod::Put,
                reference: reference.clone(),
                access,
                credential: Some(credential),
                content_type: options.content_type,
                expires_in: options.expires_in.unwrap_or(self.default_expires_in),
            })
            .await?;

        let changed = {
            let mut references = self.references.lock();
            if references.get(name) == Some(&reference) {
                false
            } else {
                references.insert(name.to_string(), reference.clone());
                true
            }
        };
        if changed {
            tracing::debug!(interactive = %self.instance, name, path = %reference.path, "attachment reference updated");
            (self.on_reference_change)(name, &reference);
        }
        Ok(url)
    }

    async fn read_url(&self, name: &str, options: UrlOptions) -> Result<String, AttachmentError> {
        let reference = self
            .references
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| AttachmentError::MissingReference(name.to_string()))?;
        let access = self
            .identity
            .access_strategy()
            .ok_or(AttachmentError::Unsupported("without a learner session"))?;

        let url = self
            .storage
            .sign_url(&SignRequest {
                method: SignMethod::Get,
                reference,
                access,
                credential: None,
                content_type: None,
                expires_in: options.expires_in.unwrap_or(self.default_expires_in),
            })
            .await?;
        Ok(url)
    }

    /// Recorded reference for `name`
    #[must_use]
    pub fn reference(&self, name: &str) -> Option<AttachmentReference> {
        self.references.lock().get(name).cloned()
    }

    /// Merge references loaded from answer metadata
    ///
    /// References recorded in this session win over loaded ones.
    pub fn merge_references(&self, loaded: HashMap<String, AttachmentReference>) {
        let mut references = self.references.lock();
        for (name, reference) in loaded {
            references.entry(name).or_insert(reference);
        }
    }
}
