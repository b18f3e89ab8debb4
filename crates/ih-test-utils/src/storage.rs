//! In-memory object storage with hash-signed URLs

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use ih_core::{
    AccessStrategy, AttachmentFolder, FolderOwner, ObjectStorage, SignRequest, StorageError,
    WriteCredential,
};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

pub const BASE_URL: &str = "https://storage.test";

/// Object storage that signs URLs with SHA-256 over a shared secret
pub struct MemoryObjectStorage {
    secret: String,
    folders: DashMap<String, AttachmentFolder>,
    folders_created: AtomicUsize,
    credentials_issued: AtomicUsize,
    fail_folders: AtomicBool,
}

impl MemoryObjectStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            secret: "test-secret".to_string(),
            folders: DashMap::new(),
            folders_created: AtomicUsize::new(0),
            credentials_issued: AtomicUsize::new(0),
            fail_folders: AtomicBool::new(false),
        })
    }

    pub fn folders_created(&self) -> usize {
        self.folders_created.load(Ordering::SeqCst)
    }

    pub fn credentials_issued(&self) -> usize {
        self.credentials_issued.load(Ordering::SeqCst)
    }

    pub fn set_fail_folders(&self, fail: bool) {
        self.fail_folders.store(fail, Ordering::SeqCst);
    }

    fn digest(&self, parts: &[&str]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.secret.as_bytes());
        for part in parts {
            hasher.update(b"|");
            hasher.update(part.as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

#[async_trait]
impl ObjectStorage for MemoryObjectStorage {
    async fn create_folder(
        &self,
        owner: &FolderOwner,
        _access: &AccessStrategy,
    ) -> Result<AttachmentFolder, StorageError> {
        if self.fail_folders.load(Ordering::SeqCst) {
            return Err(StorageError::Folder("storage offline".to_string()));
        }
        let key = format!("{}/{}", owner.namespace, owner.interactive);
        let folder = self
            .folders
            .entry(key)
            .or_insert_with(|| {
                self.folders_created.fetch_add(1, Ordering::SeqCst);
                AttachmentFolder {
                    id: uuid::Uuid::new_v4().simple().to_string(),
                    owner: owner.clone(),
                    write_credential: None,
                }
            })
            .clone();
        Ok(folder)
    }

    async fn issue_write_credential(
        &self,
        folder: &AttachmentFolder,
        access: &AccessStrategy,
    ) -> Result<WriteCredential, StorageError> {
        self.credentials_issued.fetch_add(1, Ordering::SeqCst);
        let principal = match access {
            AccessStrategy::Token { token } => token.as_str(),
            AccessStrategy::Identity { user_id } => user_id.as_str(),
        };
        Ok(WriteCredential {
            token: self.digest(&[&folder.id, principal]),
            expires_at: Utc::now() + chrono::Duration::hours(1),
        })
    }

    async fn sign_url(&self, request: &SignRequest) -> Result<String, StorageError> {
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let expires = request.expires_in.as_secs().to_string();
        let method = request.method.as_str();
        let signature = self.digest(&[
            method,
            &request.reference.folder_id,
            &request.reference.path,
            &expires,
            &nonce,
        ]);
        Ok(format!(
            "{BASE_URL}/{}/{}?method={method}&expires={expires}&nonce={nonce}&signature={signature}",
            request.reference.folder_id, request.reference.path
        ))
    }
}
