//! Interactive Host Protocol
//!
//! Wire-level vocabulary shared by the host and the embedded interactives:
//! - Identifiers (interactives, listeners, requests, channel generations)
//! - Typed host→interactive and interactive→host messages
//! - The `{ type, content }` envelope carried over a frame link
//!
//! # Example
//!
//! ```rust,ignore
//! use ih_protocol::{Envelope, HostMessage};
//!
//! let envelope = Envelope::encode(&HostMessage::GetInteractiveState(None))?;
//! assert_eq!(envelope.kind, "getInteractiveState");
//! ```

#![warn(unreachable_pub)]

pub mod error;
pub mod ids;
pub mod message;
pub mod wire;

pub use error::ProtocolError;
pub use ids::{Generation, InteractiveId, ListenerId, Mode, RequestId};
pub use message::{
    AttachmentOperation, AttachmentUrlRequest, AttachmentUrlResponse, CustomMessage, HostFeatures,
    HostMessage, InitInteractive, InteractiveMessage, InteractiveMessageKind, JwtRequest,
    JwtResponse, LinkedInteractive, LinkedInteractiveState, LinkedStateListenerRequest, LogEvent,
    RemoveLinkedStateListener, StateUpdate, SupportedFeatures,
};
pub use wire::{Envelope, HELLO};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
