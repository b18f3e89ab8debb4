//! Interactive Host Core
//!
//! Everything that sits between a host page and the channels to its
//! embedded interactives:
//! - Keeps each interactive's authoritative state and persists real changes
//! - Pushes linked interactives' persisted state to subscribers
//! - Brokers signed attachment URLs without exposing storage credentials
//! - Proxies dynamic-text component registration to the page coordinator
//! - Saves every interactive before navigation, reporting slow and failed saves
//!
//! # Example
//!
//! ```rust,ignore
//! use ih_core::prelude::*;
//!
//! # async fn example(context: SessionContext, link: ih_channel::FrameLink) {
//! let session = HostSession::new(context);
//! session.mount_interactive(InteractiveInstance::new("interactive_1", "https://example.test/graph"), link);
//!
//! let summary = session.save_all().await;
//! if !summary.is_complete() {
//!     eprintln!("some items did not save: {:?}", summary.failed_labels());
//! }
//! # }
//! ```

#![warn(unreachable_pub)]

pub mod attachments;
pub mod collaborators;
pub mod config;
pub mod context;
pub mod dynamic_text;
pub mod error;
pub mod events;
pub mod jwt;
pub mod linked_state;
pub mod runtime;
pub mod session;
pub mod state_sync;
pub mod types;

pub use attachments::{AttachmentBroker, BrokerContext, FolderCache, ReferenceSink, UrlOptions};
pub use collaborators::{
    CoordinatorHandler, CredentialService, DurableStore, NoopTelemetry, ObjectStorage,
    StateCallback, TelemetrySink, TextCoordinator, Unsubscribe,
};
pub use config::HostConfig;
pub use context::{SessionContext, SessionContextBuilder};
pub use dynamic_text::DynamicTextBridge;
pub use error::{
    AttachmentError, ConfigError, CredentialError, HostError, StorageError, StoreError,
};
pub use events::{EventBus, HostEvent};
pub use linked_state::LinkedStateRegistry;
pub use runtime::InteractiveRuntime;
pub use session::{HostSession, SaveSummary};
pub use state_sync::{StateSync, SyncOutcome};
pub use types::{
    AccessStrategy, AttachmentFolder, AttachmentReference, FolderOwner, InteractiveInstance,
    LearnerIdentity, SessionId, SignMethod, SignRequest, TelemetryEvent, WriteCredential,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for embedding interactives
    pub use crate::{
        HostConfig, HostEvent, HostSession, InteractiveInstance, InteractiveRuntime,
        LearnerIdentity, SaveSummary, SessionContext,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
