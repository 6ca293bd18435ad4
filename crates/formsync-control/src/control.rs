//! Control nodes
//!
//! A closed set of variants ([`ControlNode`]) sharing a common
//! [`ControlCore`]. Consumers match exhaustively on the variant instead of
//! probing runtime types.

use crate::error::ControlError;
use crate::id::EffectiveId;
use crate::state::{ControlState, ExternalAttributes};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Variant tag of a control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlKind {
    /// No children, value and state only
    Leaf,
    /// Ordered children
    Container,
    /// One child subtree per repeated item
    Repeat,
    /// Subtree swapped at runtime from external configuration
    Dynamic,
}

impl ControlKind {
    /// Short lowercase name
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Leaf => "leaf",
            Self::Container => "container",
            Self::Repeat => "repeat",
            Self::Dynamic => "dynamic",
        }
    }

    /// Whether a control of this kind may be regenerated as a whole subtree
    #[inline]
    #[must_use]
    pub fn supports_full_update(&self) -> bool {
        !matches!(self, Self::Leaf)
    }
}

impl Display for ControlKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Data common to every control variant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlCore {
    id: EffectiveId,
    #[serde(default)]
    state: ControlState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    label: Option<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    extensions: IndexMap<String, String>,
    #[serde(default)]
    static_readonly: bool,
    #[serde(default)]
    structural_change: bool,
}

impl ControlCore {
    /// Create core with default state and no value
    #[inline]
    #[must_use]
    pub fn new(id: EffectiveId) -> Self {
        Self {
            id,
            state: ControlState::default(),
            value: None,
            label: None,
            extensions: IndexMap::new(),
            static_readonly: false,
            structural_change: false,
        }
    }

    /// With value
    #[inline]
    #[must_use]
    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// With label
    #[inline]
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// With model item state
    #[inline]
    #[must_use]
    pub fn with_state(mut self, state: ControlState) -> Self {
        self.state = state;
        self
    }

    /// With an extension attribute (hint, help, alert, appearance...)
    #[inline]
    #[must_use]
    pub fn with_extension(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extensions.insert(name.into(), value.into());
        self
    }

    /// Rendered once as static markup, never updated incrementally
    #[inline]
    #[must_use]
    pub fn with_static_readonly(mut self, static_readonly: bool) -> Self {
        self.static_readonly = static_readonly;
        self
    }

    /// Effective id
    #[inline]
    #[must_use]
    pub fn id(&self) -> &EffectiveId {
        &self.id
    }

    /// Prefixed static id
    #[inline]
    #[must_use]
    pub fn prefixed_id(&self) -> &str {
        self.id.prefixed_id()
    }

    /// Model item state
    #[inline]
    #[must_use]
    pub fn state(&self) -> ControlState {
        self.state
    }

    /// Externally supplied value
    #[inline]
    #[must_use]
    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    /// Label
    #[inline]
    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Extension attribute by name
    #[inline]
    #[must_use]
    pub fn extension(&self, name: &str) -> Option<&str> {
        self.extensions.get(name).map(String::as_str)
    }

    /// Whether the control changed shape since the last comparison
    #[inline]
    #[must_use]
    pub fn has_structural_change(&self) -> bool {
        self.structural_change
    }

    /// Whether incremental updates may be sent for this control
    #[inline]
    #[must_use]
    pub fn supports_incremental_updates(&self) -> bool {
        !self.static_readonly
    }

    /// Set value
    pub fn set_value(&mut self, value: Option<String>) {
        self.value = value;
    }

    /// Set label
    pub fn set_label(&mut self, label: Option<String>) {
        self.label = label;
    }

    /// Set model item state
    pub fn set_state(&mut self, state: ControlState) {
        self.state = state;
    }

    /// Set or remove an extension attribute
    pub fn set_extension(&mut self, name: impl Into<String>, value: Option<String>) {
        let name = name.into();
        match value {
            Some(value) => {
                self.extensions.insert(name, value);
            }
            None => {
                self.extensions.shift_remove(&name);
            }
        }
    }

    /// Flag or clear a structural change
    pub fn set_structural_change(&mut self, structural_change: bool) {
        self.structural_change = structural_change;
    }

    /// External representation, excluding the value
    #[must_use]
    pub fn external_attributes(&self) -> ExternalAttributes {
        let mut out = ExternalAttributes::new();
        self.state.write_attributes(&mut out);
        if let Some(label) = &self.label {
            out.insert("label".to_string(), label.clone());
        }
        for (name, value) in &self.extensions {
            out.insert(name.clone(), value.clone());
        }
        out
    }

    /// Whether the client-visible representation differs from `other`
    #[must_use]
    pub fn differs_externally(&self, other: &Self) -> bool {
        self.value != other.value
            || self.state != other.state
            || self.label != other.label
            || self.extensions != other.extensions
    }
}

/// Control without children
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafControl {
    /// Common data
    pub core: ControlCore,
}

/// Control with an ordered, statically known set of children
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerControl {
    /// Common data
    pub core: ControlCore,
    /// Child controls
    #[serde(default)]
    pub children: Vec<ControlNode>,
}

/// Container whose children are one subtree per iterated item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepeatControl {
    /// Common data
    pub core: ControlCore,
    /// One iteration subtree per item, in item order
    #[serde(default)]
    pub iterations: Vec<ControlNode>,
    /// Current 1-based repeat index, 0 when empty
    #[serde(default)]
    pub index: usize,
}

impl RepeatControl {
    /// Number of iterations
    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        self.iterations.len()
    }

    /// Move the current index
    ///
    /// # Errors
    /// Returns [`ControlError::IndexOutOfRange`] unless `index` is 0 for an
    /// empty repeat or within `1..=size`.
    pub fn set_index(&mut self, index: usize) -> Result<(), ControlError> {
        let size = self.size();
        let valid = if size == 0 { index == 0 } else { (1..=size).contains(&index) };
        if !valid {
            return Err(ControlError::IndexOutOfRange {
                id: self.core.id().to_string(),
                index,
                size,
            });
        }
        self.index = index;
        Ok(())
    }
}

/// Container whose subtree is replaced at runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicControl {
    /// Common data
    pub core: ControlCore,
    /// Current subtree
    #[serde(default)]
    pub children: Vec<ControlNode>,
    /// Identifies the configuration the subtree was built from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// One control instance in a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ControlNode {
    /// See [`LeafControl`]
    Leaf(LeafControl),
    /// See [`ContainerControl`]
    Container(ContainerControl),
    /// See [`RepeatControl`]
    Repeat(RepeatControl),
    /// See [`DynamicControl`]
    Dynamic(DynamicControl),
}

impl ControlNode {
    /// Leaf control with a value
    #[must_use]
    pub fn leaf(id: EffectiveId, value: impl Into<String>) -> Self {
        Self::Leaf(LeafControl {
            core: ControlCore::new(id).with_value(value),
        })
    }

    /// Leaf control from a prepared core
    #[must_use]
    pub fn leaf_with(core: ControlCore) -> Self {
        Self::Leaf(LeafControl { core })
    }

    /// Container control
    #[must_use]
    pub fn container(core: ControlCore, children: Vec<ControlNode>) -> Self {
        Self::Container(ContainerControl { core, children })
    }

    /// Repeat control, index set to the first iteration when non-empty
    #[must_use]
    pub fn repeat(core: ControlCore, iterations: Vec<ControlNode>) -> Self {
        let index = usize::from(!iterations.is_empty());
        Self::Repeat(RepeatControl {
            core,
            iterations,
            index,
        })
    }

    /// Dynamic control
    #[must_use]
    pub fn dynamic(core: ControlCore, children: Vec<ControlNode>, source: Option<String>) -> Self {
        Self::Dynamic(DynamicControl {
            core,
            children,
            source,
        })
    }

    /// Variant tag
    #[inline]
    #[must_use]
    pub fn kind(&self) -> ControlKind {
        match self {
            Self::Leaf(_) => ControlKind::Leaf,
            Self::Container(_) => ControlKind::Container,
            Self::Repeat(_) => ControlKind::Repeat,
            Self::Dynamic(_) => ControlKind::Dynamic,
        }
    }

    /// Common data
    #[inline]
    #[must_use]
    pub fn core(&self) -> &ControlCore {
        match self {
            Self::Leaf(c) => &c.core,
            Self::Container(c) => &c.core,
            Self::Repeat(c) => &c.core,
            Self::Dynamic(c) => &c.core,
        }
    }

    /// Common data, mutable
    #[inline]
    pub fn core_mut(&mut self) -> &mut ControlCore {
        match self {
            Self::Leaf(c) => &mut c.core,
            Self::Container(c) => &mut c.core,
            Self::Repeat(c) => &mut c.core,
            Self::Dynamic(c) => &mut c.core,
        }
    }

    /// Effective id
    #[inline]
    #[must_use]
    pub fn id(&self) -> &EffectiveId {
        self.core().id()
    }

    /// Children in order; empty for leaves
    #[inline]
    #[must_use]
    pub fn children(&self) -> &[ControlNode] {
        match self {
            Self::Leaf(_) => &[],
            Self::Container(c) => &c.children,
            Self::Repeat(c) => &c.iterations,
            Self::Dynamic(c) => &c.children,
        }
    }

    /// Children, mutable; `None` for leaves
    #[inline]
    pub fn children_mut(&mut self) -> Option<&mut Vec<ControlNode>> {
        match self {
            Self::Leaf(_) => None,
            Self::Container(c) => Some(&mut c.children),
            Self::Repeat(c) => Some(&mut c.iterations),
            Self::Dynamic(c) => Some(&mut c.children),
        }
    }

    /// Repeat view of this control
    ///
    /// # Errors
    /// Returns [`ControlError::WrongKind`] for other variants.
    pub fn as_repeat_mut(&mut self) -> Result<&mut RepeatControl, ControlError> {
        match self {
            Self::Repeat(repeat) => Ok(repeat),
            other => Err(ControlError::WrongKind {
                id: other.id().to_string(),
                kind: other.kind().as_str(),
                expected: ControlKind::Repeat.as_str(),
            }),
        }
    }

    /// Number of controls in this subtree, including this one
    #[must_use]
    pub fn subtree_len(&self) -> usize {
        1 + self.children().iter().map(Self::subtree_len).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> EffectiveId {
        EffectiveId::new(s)
    }

    #[test]
    fn external_attributes_include_state_label_and_extensions() {
        let core = ControlCore::new(id("c1"))
            .with_label("Name")
            .with_extension("hint", "Your name");
        let attrs = core.external_attributes();

        assert_eq!(attrs.get("relevant").map(String::as_str), Some("true"));
        assert_eq!(attrs.get("label").map(String::as_str), Some("Name"));
        assert_eq!(attrs.get("hint").map(String::as_str), Some("Your name"));
        assert!(!attrs.contains_key("value"));
    }

    #[test]
    fn differs_externally_detects_value_change() {
        let a = ControlCore::new(id("c1")).with_value("a");
        let b = ControlCore::new(id("c1")).with_value("b");
        assert!(a.differs_externally(&b));
        assert!(!a.differs_externally(&a.clone()));
    }

    #[test]
    fn structural_change_is_not_external() {
        let a = ControlCore::new(id("c1"));
        let mut b = a.clone();
        b.set_structural_change(true);
        assert!(!a.differs_externally(&b));
    }

    #[test]
    fn repeat_index_bounds() {
        let mut node = ControlNode::repeat(
            ControlCore::new(id("r1")),
            vec![ControlNode::container(ControlCore::new(id("r1").child_iteration(1)), vec![])],
        );
        let repeat = node.as_repeat_mut().unwrap();
        assert_eq!(repeat.index, 1);
        assert!(repeat.set_index(2).is_err());
        assert!(repeat.set_index(1).is_ok());
    }

    #[test]
    fn as_repeat_rejects_leaf() {
        let mut node = ControlNode::leaf(id("c1"), "a");
        assert!(matches!(
            node.as_repeat_mut(),
            Err(ControlError::WrongKind { kind: "leaf", .. })
        ));
    }

    #[test]
    fn subtree_len_counts_descendants() {
        let node = ControlNode::container(
            ControlCore::new(id("g")),
            vec![
                ControlNode::leaf(id("a"), "1"),
                ControlNode::leaf(id("b"), "2"),
            ],
        );
        assert_eq!(node.subtree_len(), 3);
    }

    #[test]
    fn serde_tags_variants() {
        let node = ControlNode::leaf(id("c1"), "a");
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["kind"], "leaf");
        assert_eq!(json["core"]["id"], "c1");
    }
}
