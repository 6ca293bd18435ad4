//! formsync document lifecycle
//!
//! Server-side state of open forms and the rules for touching it.
//!
//! # Core Concepts
//!
//! - [`DocumentRegistry`]: live documents by [`DocumentKey`], with idle expiry and reload from a [`DocumentStore`]
//! - [`DocumentSlot`]: one document behind a bounded lock, plus its memoized [`StoredResponse`]
//! - [`SequenceCheck`]: process, replay or reject a request by sequence number
//! - [`PendingActions`]: side effects waiting for the next response
//!
//! # Example
//!
//! ```rust
//! use formsync_session::SequenceCheck;
//!
//! assert_eq!(SequenceCheck::classify(4, 4, Some(3)), SequenceCheck::Process);
//! assert_eq!(SequenceCheck::classify(4, 3, Some(3)), SequenceCheck::Replay);
//! ```

#![warn(unreachable_pub)]

mod actions;
mod document;
mod error;
mod registry;
mod response;
mod sequence;
mod store;

pub use actions::{
    DeferredSubmission, LoadDirective, LoadTarget, Message, MessageLevel, PendingActions,
    ScriptCall, ServerEvent,
};
pub use document::{DocumentKey, DocumentState, PersistedDocument, PersistedResponse};
pub use error::{LifecycleError, StoreError};
pub use registry::{DocumentGuard, DocumentRegistry, DocumentSlot, LockWait, RegistryConfig};
pub use response::StoredResponse;
pub use sequence::{DocumentPhase, SequenceCheck};
pub use store::{decode_dynamic_state, encode_dynamic_state, DocumentStore, MemoryDocumentStore};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
