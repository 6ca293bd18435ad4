//! Error types for document lifecycle

use crate::sequence::DocumentPhase;
use formsync_control::ControlError;

/// Errors acquiring, checking or restoring a document
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// No live or persisted document for the key
    #[error("session expired: no document for {0}")]
    SessionExpired(String),

    /// Sequence number outside the accepted window
    #[error("sequence violation: expected {expected}, received {received}")]
    SequenceViolation {
        /// Sequence number the document expects next
        expected: u64,
        /// Sequence number carried by the request
        received: u64,
    },

    /// Document lock not acquired within the allowed wait
    #[error("document {key} busy after waiting {waited_ms}ms")]
    LockTimeout {
        /// Document key
        key: String,
        /// Milliseconds waited
        waited_ms: u64,
    },

    /// Document dropped from memory while the caller held it; look it up again
    #[error("document {0} was evicted from memory")]
    Evicted(String),

    /// Form definition not registered
    #[error("unknown form definition: {0}")]
    UnknownForm(String),

    /// Illegal lifecycle transition
    #[error("illegal document transition: {from:?} -> {to:?}")]
    IllegalTransition {
        /// Current phase
        from: DocumentPhase,
        /// Requested phase
        to: DocumentPhase,
    },

    /// Persisted state unavailable or corrupt
    #[error("document store error: {0}")]
    Store(#[from] StoreError),

    /// Snapshot could not be addressed
    #[error("control error: {0}")]
    Control(#[from] ControlError),
}

impl LifecycleError {
    /// Whether the client can recover without operator action
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::SessionExpired(_) | Self::LockTimeout { .. } | Self::Evicted(_)
        )
    }

    /// Whether the client should simply resend the same request
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockTimeout { .. } | Self::Evicted(_))
    }
}

/// Errors reading or writing persisted document state
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// State could not be (de)serialized
    #[error("state serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Dynamic-state blob is not valid hex
    #[error("dynamic state is not valid hex: {0}")]
    Encoding(#[from] hex::FromHexError),

    /// Backend failure
    #[error("store unavailable: {0}")]
    Unavailable(String),
}
