//! Control tree snapshots
//!
//! [`ControlTree`] is the ordered forest of top-level controls captured for
//! one request. [`TreeBuilder`] constructs snapshots and keeps iteration
//! context so effective ids come out right inside repeats.

use crate::control::{ControlCore, ControlNode};
use crate::error::ControlError;
use crate::id::{EffectiveId, IdGenerator, IterationPath};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Ordered snapshot of a document's controls
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlTree {
    roots: Vec<ControlNode>,
}

impl ControlTree {
    /// Create snapshot from top-level controls
    ///
    /// # Errors
    /// Returns [`ControlError::DuplicateId`] if two controls share an
    /// effective id.
    pub fn new(roots: Vec<ControlNode>) -> Result<Self, ControlError> {
        let tree = Self { roots };
        tree.check_unique_ids()?;
        Ok(tree)
    }

    /// Empty snapshot
    #[inline]
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Top-level controls
    #[inline]
    #[must_use]
    pub fn roots(&self) -> &[ControlNode] {
        &self.roots
    }

    /// Top-level controls, mutable
    #[inline]
    pub fn roots_mut(&mut self) -> &mut Vec<ControlNode> {
        &mut self.roots
    }

    /// Total number of controls
    #[must_use]
    pub fn len(&self) -> usize {
        self.roots.iter().map(ControlNode::subtree_len).sum()
    }

    /// Whether the snapshot has no controls
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Depth-first, pre-order iteration over every control
    pub fn iter(&self) -> impl Iterator<Item = &ControlNode> {
        let mut stack: Vec<&ControlNode> = self.roots.iter().rev().collect();
        std::iter::from_fn(move || {
            let node = stack.pop()?;
            stack.extend(node.children().iter().rev());
            Some(node)
        })
    }

    /// Find control by effective id
    #[must_use]
    pub fn find(&self, id: &EffectiveId) -> Option<&ControlNode> {
        self.iter().find(|node| node.id() == id)
    }

    /// Find control by effective id, mutable
    pub fn find_mut(&mut self, id: &EffectiveId) -> Option<&mut ControlNode> {
        fn walk<'a>(nodes: &'a mut [ControlNode], id: &EffectiveId) -> Option<&'a mut ControlNode> {
            for node in nodes {
                if node.id() == id {
                    return Some(node);
                }
                if let Some(children) = node.children_mut() {
                    if let Some(found) = walk(children, id) {
                        return Some(found);
                    }
                }
            }
            None
        }
        walk(&mut self.roots, id)
    }

    /// Find control by effective id or fail
    ///
    /// # Errors
    /// Returns [`ControlError::NotFound`] if absent.
    pub fn require_mut(&mut self, id: &EffectiveId) -> Result<&mut ControlNode, ControlError> {
        self.find_mut(id)
            .ok_or_else(|| ControlError::NotFound(id.to_string()))
    }

    /// Current index of every repeat in the snapshot
    #[must_use]
    pub fn repeat_indexes(&self) -> BTreeMap<EffectiveId, usize> {
        self.iter()
            .filter_map(|node| match node {
                ControlNode::Repeat(repeat) => Some((repeat.core.id().clone(), repeat.index)),
                _ => None,
            })
            .collect()
    }

    /// Whether any control carries a structural-change flag
    #[must_use]
    pub fn has_structural_changes(&self) -> bool {
        self.iter().any(|node| node.core().has_structural_change())
    }

    /// Reset structural-change flags once a comparison consumed them
    pub fn clear_structural_changes(&mut self) {
        fn walk(nodes: &mut [ControlNode]) {
            for node in nodes {
                node.core_mut().set_structural_change(false);
                if let Some(children) = node.children_mut() {
                    walk(children);
                }
            }
        }
        walk(&mut self.roots);
    }

    fn check_unique_ids(&self) -> Result<(), ControlError> {
        let mut seen = HashSet::new();
        for node in self.iter() {
            if !seen.insert(node.id()) {
                return Err(ControlError::DuplicateId(node.id().to_string()));
            }
        }
        Ok(())
    }
}

/// Builds snapshots with the right iteration context
///
/// # Example
///
/// ```rust
/// use formsync_control::{IdGenerator, TreeBuilder};
///
/// let mut ids = IdGenerator::new();
/// let mut builder = TreeBuilder::new(&mut ids);
/// let roots = vec![
///     builder.leaf(Some("c1"), "a"),
///     builder.repeat(Some("r1"), 2, |b, _| vec![b.leaf(Some("v"), "")]),
/// ];
/// assert_eq!(roots[1].children()[1].children()[0].id().to_string(), "v·2");
/// ```
#[derive(Debug)]
pub struct TreeBuilder<'a> {
    ids: &'a mut IdGenerator,
    iterations: IterationPath,
}

impl<'a> TreeBuilder<'a> {
    /// Create builder allocating missing ids from `ids`
    #[inline]
    #[must_use]
    pub fn new(ids: &'a mut IdGenerator) -> Self {
        Self {
            ids,
            iterations: IterationPath::new(),
        }
    }

    /// Create builder positioned inside existing iterations
    #[inline]
    #[must_use]
    pub fn within(ids: &'a mut IdGenerator, iterations: &[u32]) -> Self {
        Self {
            ids,
            iterations: IterationPath::from_slice(iterations),
        }
    }

    /// Effective id for a static id in the current iteration context
    pub fn effective_id(&mut self, static_id: Option<&str>) -> EffectiveId {
        let prefixed = match static_id {
            Some(id) => id.to_string(),
            None => self.ids.next_id(),
        };
        EffectiveId::with_iterations(prefixed, &self.iterations)
    }

    /// Core for a static id in the current iteration context
    pub fn core(&mut self, static_id: Option<&str>) -> ControlCore {
        ControlCore::new(self.effective_id(static_id))
    }

    /// Leaf control
    pub fn leaf(&mut self, static_id: Option<&str>, value: impl Into<String>) -> ControlNode {
        ControlNode::leaf(self.effective_id(static_id), value)
    }

    /// Container control with children built by `children`
    pub fn container<F>(&mut self, static_id: Option<&str>, children: F) -> ControlNode
    where
        F: FnOnce(&mut Self) -> Vec<ControlNode>,
    {
        let core = self.core(static_id);
        let children = children(self);
        ControlNode::container(core, children)
    }

    /// Repeat control with `count` iterations
    ///
    /// `iteration` receives the builder positioned inside the iteration and
    /// the 1-based iteration position.
    pub fn repeat<F>(&mut self, static_id: Option<&str>, count: u32, mut iteration: F) -> ControlNode
    where
        F: FnMut(&mut Self, u32) -> Vec<ControlNode>,
    {
        let core = self.core(static_id);
        let iterations = (1..=count)
            .map(|position| self.iteration(core.id(), position, &mut iteration))
            .collect();
        ControlNode::repeat(core, iterations)
    }

    /// One iteration subtree of the repeat `repeat_id`
    pub fn iteration<F>(&mut self, repeat_id: &EffectiveId, position: u32, iteration: &mut F) -> ControlNode
    where
        F: FnMut(&mut Self, u32) -> Vec<ControlNode>,
    {
        let iteration_id = repeat_id.child_iteration(position);
        self.iterations.push(position);
        let children = iteration(self, position);
        self.iterations.pop();
        ControlNode::container(ControlCore::new(iteration_id), children)
    }

    /// Dynamic control with a subtree built from `source`
    pub fn dynamic<F>(&mut self, static_id: Option<&str>, source: Option<String>, children: F) -> ControlNode
    where
        F: FnOnce(&mut Self) -> Vec<ControlNode>,
    {
        let core = self.core(static_id);
        let children = children(self);
        ControlNode::dynamic(core, children, source)
    }
}
