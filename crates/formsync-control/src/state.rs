//! Model item state and external representation
//!
//! The client only sees a control through its external attributes. Two
//! snapshots of the same control need an update exactly when those differ.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Relevance, read-only, required and validity flags ("MIVR")
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ControlState {
    /// Control is shown
    pub relevant: bool,
    /// Value cannot be edited
    pub readonly: bool,
    /// Value must be provided
    pub required: bool,
    /// Value passes validation
    pub valid: bool,
}

impl ControlState {
    /// State of a freshly bound, editable, valid control
    pub const DEFAULT: Self = Self {
        relevant: true,
        readonly: false,
        required: false,
        valid: true,
    };

    /// Non-relevant state
    #[inline]
    #[must_use]
    pub fn non_relevant() -> Self {
        Self {
            relevant: false,
            ..Self::DEFAULT
        }
    }

    /// With read-only flag
    #[inline]
    #[must_use]
    pub fn with_readonly(mut self, readonly: bool) -> Self {
        self.readonly = readonly;
        self
    }

    /// With required flag
    #[inline]
    #[must_use]
    pub fn with_required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    /// With validity flag
    #[inline]
    #[must_use]
    pub fn with_valid(mut self, valid: bool) -> Self {
        self.valid = valid;
        self
    }

    pub(crate) fn write_attributes(&self, out: &mut ExternalAttributes) {
        out.insert("relevant".to_string(), self.relevant.to_string());
        out.insert("readonly".to_string(), self.readonly.to_string());
        out.insert("required".to_string(), self.required.to_string());
        out.insert("valid".to_string(), self.valid.to_string());
    }
}

impl Default for ControlState {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Ordered attribute map forming a control's external representation
pub type ExternalAttributes = IndexMap<String, String>;

/// Attributes whose value differs between two representations
///
/// When `before` is `None` every attribute of `after` is reported. Attributes
/// that disappeared are reported with an empty value.
#[must_use]
pub fn changed_attributes(
    before: Option<&ExternalAttributes>,
    after: &ExternalAttributes,
) -> Vec<(String, String)> {
    let Some(before) = before else {
        return after
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
    };

    let mut changes: Vec<(String, String)> = after
        .iter()
        .filter(|(name, value)| before.get(*name) != Some(*value))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();

    changes.extend(
        before
            .keys()
            .filter(|name| !after.contains_key(*name))
            .map(|name| (name.clone(), String::new())),
    );

    changes
}
