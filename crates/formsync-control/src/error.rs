//! Error types for the control model

/// Errors building or addressing control snapshots
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControlError {
    /// Malformed effective id
    #[error("invalid effective id: '{0}'")]
    InvalidId(String),

    /// Two controls in one snapshot share an effective id
    #[error("duplicate effective id in snapshot: {0}")]
    DuplicateId(String),

    /// Control not present in the snapshot
    #[error("control not found: {0}")]
    NotFound(String),

    /// Operation not supported by the control's variant
    #[error("control {id} is a {kind}, expected {expected}")]
    WrongKind {
        /// Effective id of the control
        id: String,
        /// Actual kind
        kind: &'static str,
        /// Expected kind
        expected: &'static str,
    },

    /// Repeat index outside the iteration range
    #[error("repeat index {index} out of range for {id} with {size} iterations")]
    IndexOutOfRange {
        /// Effective id of the repeat
        id: String,
        /// Requested index
        index: usize,
        /// Current iteration count
        size: usize,
    },

    /// Markup recording is unbalanced or malformed
    #[error("malformed markup recording: {0}")]
    MalformedMark(String),
}

/// Errors raised by markup handlers during replay
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MarkupError {
    /// Placeholder or control reference without a matching control
    #[error("no control in scope for '{0}'")]
    UnboundControl(String),

    /// Unbalanced element structure
    #[error("unbalanced markup: {0}")]
    Unbalanced(String),

    /// Handler-specific failure
    #[error("markup handler failed: {0}")]
    Handler(String),
}
