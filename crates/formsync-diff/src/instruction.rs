//! Protocol instructions
//!
//! The comparator's output: what the client must do to bring its DOM in line
//! with the "after" snapshot.

use formsync_control::{EffectiveId, ExternalAttributes};
use serde::{Deserialize, Serialize};

/// Attribute and value changes for one control
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlDiff {
    /// Effective id of the control
    pub id: EffectiveId,
    /// Control was absent from the "before" snapshot
    pub newly_visible: bool,
    /// Changed external attributes
    #[serde(default, skip_serializing_if = "ExternalAttributes::is_empty")]
    pub attributes: ExternalAttributes,
    /// New value, when it changed or must be echoed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// One wire instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Instruction {
    /// Update or create one control
    Control(ControlDiff),

    /// Clone the repeat template for iterations `start..=end`
    CopyTemplate {
        /// Prefixed id of the repeat
        repeat_id: String,
        /// Iteration suffix of the repeat itself
        parent_indexes: String,
        /// First new iteration (1-based)
        start: usize,
        /// Last new iteration (1-based, inclusive)
        end: usize,
    },

    /// Remove the trailing `count` iterations (or the template instance)
    DeleteTemplate {
        /// Prefixed id of the repeat
        repeat_id: String,
        /// Iteration suffix of the repeat itself
        parent_indexes: String,
        /// Number of trailing iterations to remove
        count: usize,
    },

    /// Replace the whole content of a control with a markup fragment
    InnerHtml {
        /// Effective id of the regenerated control
        id: EffectiveId,
        /// Serialized fragment, no root wrapper
        html: String,
    },

    /// Move the current index of a repeat
    RepeatIndex {
        /// Effective id of the repeat
        repeat_id: EffectiveId,
        /// New 1-based index, 0 when empty
        index: usize,
    },
}

impl Instruction {
    /// Number of wire attributes this instruction carries
    ///
    /// Used to measure buffered output against the full-update threshold.
    #[must_use]
    pub fn attribute_count(&self) -> usize {
        match self {
            Self::Control(diff) => 1 + diff.attributes.len() + usize::from(diff.newly_visible),
            Self::CopyTemplate { .. } => 4,
            Self::DeleteTemplate { .. } => 3,
            Self::InnerHtml { .. } => 1,
            Self::RepeatIndex { .. } => 2,
        }
    }

    /// Control diff, if this is one
    #[inline]
    #[must_use]
    pub fn as_control(&self) -> Option<&ControlDiff> {
        match self {
            Self::Control(diff) => Some(diff),
            _ => None,
        }
    }

    /// Effective id of the control this instruction targets, if any
    #[must_use]
    pub fn control_id(&self) -> Option<&EffectiveId> {
        match self {
            Self::Control(diff) => Some(&diff.id),
            Self::InnerHtml { id, .. } => Some(id),
            Self::RepeatIndex { repeat_id, .. } => Some(repeat_id),
            Self::CopyTemplate { .. } | Self::DeleteTemplate { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diff(attributes: &[(&str, &str)], newly_visible: bool) -> Instruction {
        Instruction::Control(ControlDiff {
            id: EffectiveId::new("c1"),
            newly_visible,
            attributes: attributes
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            value: Some("v".to_string()),
        })
    }

    #[test]
    fn attribute_count_of_control_diff() {
        assert_eq!(diff(&[], false).attribute_count(), 1);
        assert_eq!(diff(&[("readonly", "true")], false).attribute_count(), 2);
        assert_eq!(diff(&[("readonly", "true")], true).attribute_count(), 3);
    }

    #[test]
    fn serde_tags_instruction_type() {
        let copy = Instruction::CopyTemplate {
            repeat_id: "r1".to_string(),
            parent_indexes: String::new(),
            start: 3,
            end: 3,
        };
        let json = serde_json::to_value(&copy).unwrap();
        assert_eq!(json["type"], "copy-template");
        assert_eq!(json["start"], 3);
    }

    #[test]
    fn control_id_accessor() {
        let inst = diff(&[], false);
        assert_eq!(inst.control_id().map(ToString::to_string).as_deref(), Some("c1"));
        assert!(inst.as_control().is_some());
    }
}
