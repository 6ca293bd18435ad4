//! Error types for comparison and rendering

use formsync_control::{ControlKind, MarkupError};

/// Errors raised while regenerating markup for a full update
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    /// Replay failed inside a pipeline stage
    #[error(transparent)]
    Markup(#[from] MarkupError),

    /// Recording does not start with the control it was looked up for
    #[error("mark for '{expected}' starts with '{found}'")]
    MarkMismatch {
        /// Static id the mark was looked up by
        expected: String,
        /// Static id found at the start of the mark
        found: String,
    },
}

/// Errors raised by the comparator
///
/// Every variant denotes a violated snapshot contract; the request is
/// aborted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiffError {
    /// Sibling lists of different non-zero lengths
    #[error("sibling lists under {parent} differ in length: {before} vs {after}")]
    LengthMismatch {
        /// Effective id of the parent, or `<root>`
        parent: String,
        /// Length in the "before" snapshot
        before: usize,
        /// Length in the "after" snapshot
        after: usize,
    },

    /// Paired controls do not share an effective id
    #[error("paired controls differ in id: {before} vs {after}")]
    IdMismatch {
        /// Id in the "before" snapshot
        before: String,
        /// Id in the "after" snapshot
        after: String,
    },

    /// Paired controls changed variant without a structural-change flag
    #[error("control {id} changed from {before} to {after} without a structural change")]
    KindMismatch {
        /// Effective id
        id: String,
        /// Variant in the "before" snapshot
        before: ControlKind,
        /// Variant in the "after" snapshot
        after: ControlKind,
    },

    /// A full update is required but no recording exists
    #[error("full update of {0} requires a markup recording")]
    MissingMark(String),

    /// Full-update rendering failed
    #[error("full update of {id} failed: {source}")]
    Render {
        /// Effective id of the regenerated control
        id: String,
        /// Underlying failure
        #[source]
        source: RenderError,
    },
}

impl DiffError {
    /// Create render error for a control
    pub fn render(id: impl ToString, source: RenderError) -> Self {
        Self::Render {
            id: id.to_string(),
            source,
        }
    }

    /// Whether the two snapshots themselves are inconsistent
    #[must_use]
    pub fn is_snapshot_contract(&self) -> bool {
        matches!(
            self,
            Self::LengthMismatch { .. } | Self::IdMismatch { .. } | Self::KindMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_mismatch_display() {
        let err = DiffError::LengthMismatch {
            parent: "g".to_string(),
            before: 2,
            after: 3,
        };
        assert_eq!(err.to_string(), "sibling lists under g differ in length: 2 vs 3");
        assert!(err.is_snapshot_contract());
    }

    #[test]
    fn render_error_keeps_source() {
        let err = DiffError::render("g", MarkupError::Handler("boom".to_string()).into());
        assert!(!err.is_snapshot_contract());
        assert!(err.to_string().contains("boom"));
    }
}
