//! Static form definition
//!
//! The parts of the analyzed form markup the comparator needs at runtime:
//! which controls asked for `update="full"` and the recorded marks.

use crate::mark::{Mark, MarkStore};
use std::collections::HashSet;
use std::sync::Arc;

/// Runtime view of a statically analyzed form
#[derive(Debug, Clone, Default)]
pub struct FormDefinition {
    marks: MarkStore,
    full_update: HashSet<String>,
}

impl FormDefinition {
    /// Create definition without marks
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With recorded marks
    #[inline]
    #[must_use]
    pub fn with_marks(mut self, marks: MarkStore) -> Self {
        self.marks = marks;
        self
    }

    /// Declare `update="full"` on a control
    #[inline]
    #[must_use]
    pub fn with_full_update(mut self, static_id: impl Into<String>) -> Self {
        self.full_update.insert(static_id.into());
        self
    }

    /// Whether the control declared `update="full"`
    #[inline]
    #[must_use]
    pub fn has_full_update_directive(&self, static_id: &str) -> bool {
        self.full_update.contains(static_id)
    }

    /// Mark recorded for a control
    #[inline]
    #[must_use]
    pub fn mark(&self, static_id: &str) -> Option<&Arc<Mark>> {
        self.marks.get(static_id)
    }

    /// All recorded marks
    #[inline]
    #[must_use]
    pub fn marks(&self) -> &MarkStore {
        &self.marks
    }
}
