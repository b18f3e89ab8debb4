//! Interactive Host Channels
//!
//! The live, generation-scoped binding between the host and one
//! interactive's frame:
//! - [`MessageChannel`]: handshake, typed dispatch, idempotent teardown
//! - [`StateRequestTracker`]: one deadline-bound "report your state" request per channel
//! - [`BatchedRequestTracker`]: watchdog over many requests for one host action
//!
//! # Example
//!
//! ```rust,ignore
//! use ih_channel::{ChannelOptions, FrameLink, MessageChannel};
//!
//! let (host_side, frame_side) = FrameLink::pair();
//! let channel = MessageChannel::create(host_side, ChannelOptions::new("Graph"), || {
//!     tracing::info!("interactive connected");
//! });
//! let pending = channel.request_state(None);
//! ```

#![warn(unreachable_pub)]

pub mod batch;
pub mod channel;
pub mod error;
pub mod link;
pub mod request;

pub use batch::{BatchedRequestTracker, DEFAULT_BATCH_TIMEOUT};
pub use channel::{ChannelOptions, Handler, MessageChannel};
pub use error::{ChannelError, StateRequestError};
pub use link::{FrameLink, Outbound};
pub use request::{PendingState, StateRequestTracker, DEFAULT_STATE_REQUEST_TIMEOUT};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
