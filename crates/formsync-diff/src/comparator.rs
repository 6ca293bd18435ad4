//! Control tree comparator
//!
//! Provides [`Comparator`], which walks two snapshots in lockstep and emits
//! the minimal set of [`Instruction`]s turning "before" into "after".
//!
//! # Full updates
//!
//! A control eligible for a full update (a `full_update` directive or the
//! dynamic variant, plus a recorded [`Mark`]) opens a [`BufferedSink`] for its
//! subtree. Incremental output goes into that buffer; if it grows past the
//! threshold, or a descendant changed structure, the buffer is discarded and
//! the control is regenerated from its mark instead. Descendants never open
//! nested buffers.

use crate::error::DiffError;
use crate::instruction::{ControlDiff, Instruction};
use crate::render::FullUpdateRenderer;
use crate::sink::{BufferedSink, InstructionSink};
use formsync_control::{
    changed_attributes, ControlKind, ControlNode, EffectiveId, FormDefinition, Mark,
};
use std::collections::HashSet;
use std::sync::Arc;

/// Attribute count above which buffered output is replaced by a full update
pub const DEFAULT_FULL_UPDATE_THRESHOLD: usize = 20;

/// Result of comparing one control or sibling list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffOutcome {
    /// Output was emitted, or nothing needed emitting
    Done,
    /// The enclosing buffering ancestor must regenerate its subtree
    NeedsFullUpdate,
}

/// Where the current subtree writes
enum Target<'s> {
    /// Straight to the caller's sink
    Direct(&'s mut dyn InstructionSink),
    /// Into the buffer of an ancestor considering a full update
    Buffered(&'s mut BufferedSink),
}

impl Target<'_> {
    fn reborrow(&mut self) -> Target<'_> {
        match self {
            Target::Direct(sink) => Target::Direct(&mut **sink),
            Target::Buffered(buffer) => Target::Buffered(&mut **buffer),
        }
    }

    fn buffered_attributes(&self) -> Option<usize> {
        match self {
            Target::Direct(_) => None,
            Target::Buffered(buffer) => Some(buffer.attribute_count()),
        }
    }

    fn is_buffered(&self) -> bool {
        matches!(self, Target::Buffered(_))
    }
}

impl InstructionSink for Target<'_> {
    fn emit(&mut self, instruction: Instruction) {
        match self {
            Target::Direct(sink) => sink.emit(instruction),
            Target::Buffered(buffer) => buffer.emit(instruction),
        }
    }
}

/// Compares two control snapshots
///
/// # Example
///
/// ```rust
/// use formsync_control::{ControlNode, EffectiveId, FormDefinition};
/// use formsync_diff::{Comparator, Instruction, MarkupRenderer};
///
/// let definition = FormDefinition::new();
/// let renderer = MarkupRenderer::default();
/// let comparator = Comparator::new(&definition, &renderer);
///
/// let before = vec![ControlNode::leaf(EffectiveId::new("c1"), "a")];
/// let after = vec![ControlNode::leaf(EffectiveId::new("c1"), "b")];
/// let mut out: Vec<Instruction> = Vec::new();
/// comparator.diff(Some(before.as_slice()), Some(after.as_slice()), &mut out).unwrap();
/// assert_eq!(out.len(), 1);
/// ```
#[derive(Debug)]
pub struct Comparator<'a> {
    definition: &'a FormDefinition,
    renderer: &'a dyn FullUpdateRenderer,
    value_changed: HashSet<EffectiveId>,
    threshold: usize,
}

impl<'a> Comparator<'a> {
    /// Create comparator with the default threshold
    #[must_use]
    pub fn new(definition: &'a FormDefinition, renderer: &'a dyn FullUpdateRenderer) -> Self {
        Self {
            definition,
            renderer,
            value_changed: HashSet::new(),
            threshold: DEFAULT_FULL_UPDATE_THRESHOLD,
        }
    }

    /// With full-update threshold (attribute count)
    #[inline]
    #[must_use]
    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold;
        self
    }

    /// With controls whose value the client changed in this request
    ///
    /// Their value is echoed even when unchanged, so the client can drop a
    /// stale optimistic edit.
    #[must_use]
    pub fn with_value_changed(mut self, ids: impl IntoIterator<Item = EffectiveId>) -> Self {
        self.value_changed.extend(ids);
        self
    }

    /// Full-update threshold
    #[inline]
    #[must_use]
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Compare two top-level control lists, writing into `sink`
    ///
    /// `None` and an empty list both mean "nothing visible". Controls that
    /// vanish outside a repeat shrink break lockstep and are rejected.
    ///
    /// # Errors
    /// Returns [`DiffError`] when the snapshots violate their contract or a
    /// full update cannot be rendered. Output already written to `sink` must
    /// then be discarded by the caller.
    #[tracing::instrument(level = "debug", skip_all, fields(threshold = self.threshold))]
    pub fn diff(
        &self,
        before: Option<&[ControlNode]>,
        after: Option<&[ControlNode]>,
        sink: &mut dyn InstructionSink,
    ) -> Result<DiffOutcome, DiffError> {
        let mut target = Target::Direct(sink);
        self.diff_list("<root>", before, after, &mut target)
    }

    fn diff_list(
        &self,
        parent: &str,
        before: Option<&[ControlNode]>,
        after: Option<&[ControlNode]>,
        target: &mut Target<'_>,
    ) -> Result<DiffOutcome, DiffError> {
        let before = before.filter(|list| !list.is_empty());
        let after = after.filter(|list| !list.is_empty());
        let after = match (before, after) {
            (_, Some(after)) => after,
            (None, None) => return Ok(DiffOutcome::Done),
            (Some(before), None) => {
                return Err(DiffError::LengthMismatch {
                    parent: parent.to_string(),
                    before: before.len(),
                    after: 0,
                })
            }
        };

        if let Some(before) = before {
            if before.len() != after.len() {
                return Err(DiffError::LengthMismatch {
                    parent: parent.to_string(),
                    before: before.len(),
                    after: after.len(),
                });
            }
        }

        for (position, control) in after.iter().enumerate() {
            let previous = before.map(|list| &list[position]);
            if self.diff_control(previous, control, target)? == DiffOutcome::NeedsFullUpdate {
                return Ok(DiffOutcome::NeedsFullUpdate);
            }
        }
        Ok(DiffOutcome::Done)
    }

    fn diff_control(
        &self,
        before: Option<&ControlNode>,
        after: &ControlNode,
        target: &mut Target<'_>,
    ) -> Result<DiffOutcome, DiffError> {
        if let Some(before) = before {
            if before.id() != after.id() {
                return Err(DiffError::IdMismatch {
                    before: before.id().to_string(),
                    after: after.id().to_string(),
                });
            }
        }

        let core = after.core();
        let is_dynamic = after.kind() == ControlKind::Dynamic;
        let mark = self.definition.mark(core.prefixed_id());

        if is_dynamic && mark.is_none() && !target.is_buffered() {
            return Err(DiffError::MissingMark(after.id().to_string()));
        }

        if core.has_structural_change() {
            if target.is_buffered() {
                return Ok(DiffOutcome::NeedsFullUpdate);
            }
            tracing::debug!(control = %after.id(), "Structural change, regenerating subtree");
            return self.full_update(before, after, mark, target);
        }

        let opens_buffer = !target.is_buffered() && self.is_eligible(after, mark.is_some());
        let mut own_buffer = opens_buffer.then(BufferedSink::new);

        let needs_full_update = {
            let mut local = match own_buffer.as_mut() {
                Some(buffer) => Target::Buffered(buffer),
                None => target.reborrow(),
            };
            let baseline = local.buffered_attributes().unwrap_or_default();

            self.emit_control_diff(before, after, &mut local);
            let mut promote = self.exceeds(&local, baseline, is_dynamic);
            if !promote {
                promote = self.diff_descendants(before, after, &mut local)?
                    == DiffOutcome::NeedsFullUpdate
                    || self.exceeds(&local, baseline, is_dynamic);
            }
            promote
        };

        match (needs_full_update, own_buffer) {
            (false, Some(buffer)) => {
                buffer.replay_into(target);
                Ok(DiffOutcome::Done)
            }
            (false, None) => Ok(DiffOutcome::Done),
            (true, Some(discarded)) => {
                tracing::debug!(
                    control = %after.id(),
                    buffered = discarded.attribute_count(),
                    "Promoting to full update"
                );
                self.full_update(before, after, mark, target)
            }
            (true, None) => Ok(DiffOutcome::NeedsFullUpdate),
        }
    }

    fn is_eligible(&self, control: &ControlNode, has_mark: bool) -> bool {
        has_mark
            && control.kind().supports_full_update()
            && (control.kind() == ControlKind::Dynamic
                || self.definition.has_full_update_directive(control.core().prefixed_id()))
    }

    /// Whether buffered output calls for a full update
    ///
    /// Dynamic controls promote on any output of their own subtree.
    fn exceeds(&self, target: &Target<'_>, baseline: usize, is_dynamic: bool) -> bool {
        match target.buffered_attributes() {
            None => false,
            Some(count) if is_dynamic => count > baseline,
            Some(count) => count > self.threshold,
        }
    }

    fn emit_control_diff(&self, before: Option<&ControlNode>, after: &ControlNode, sink: &mut dyn InstructionSink) {
        let core = after.core();
        if !core.supports_incremental_updates() {
            return;
        }

        let previous = before.map(ControlNode::core);
        let echo_value = self.value_changed.contains(core.id());
        let differs = previous.map_or(true, |previous| previous.differs_externally(core));
        if !differs && !echo_value {
            return;
        }

        let after_attributes = core.external_attributes();
        let before_attributes = previous.map(|previous| previous.external_attributes());
        let attributes = changed_attributes(before_attributes.as_ref(), &after_attributes)
            .into_iter()
            .collect();
        let value_changed = previous.map_or(true, |previous| previous.value() != core.value());
        let value = if value_changed || echo_value {
            core.value().map(str::to_string)
        } else {
            None
        };

        sink.emit(Instruction::Control(ControlDiff {
            id: core.id().clone(),
            newly_visible: before.is_none(),
            attributes,
            value,
        }));
    }

    fn diff_descendants(
        &self,
        before: Option<&ControlNode>,
        after: &ControlNode,
        target: &mut Target<'_>,
    ) -> Result<DiffOutcome, DiffError> {
        if let Some(before) = before {
            if before.kind() != after.kind() {
                return Err(DiffError::KindMismatch {
                    id: after.id().to_string(),
                    before: before.kind(),
                    after: after.kind(),
                });
            }
        }

        let parent = after.id().to_string();
        match after {
            ControlNode::Leaf(_) => Ok(DiffOutcome::Done),
            ControlNode::Container(_) | ControlNode::Dynamic(_) => {
                self.diff_list(&parent, before.map(ControlNode::children), Some(after.children()), target)
            }
            ControlNode::Repeat(repeat) => {
                let repeat_id = repeat.core.prefixed_id().to_string();
                let parent_indexes = repeat.core.id().iteration_suffix();
                let new_size = repeat.size();
                let iterations = repeat.iterations.as_slice();

                let Some(before) = before else {
                    if new_size > 1 {
                        target.emit(Instruction::CopyTemplate {
                            repeat_id,
                            parent_indexes,
                            start: 2,
                            end: new_size,
                        });
                    } else if new_size == 0 {
                        target.emit(Instruction::DeleteTemplate {
                            repeat_id,
                            parent_indexes,
                            count: 1,
                        });
                    }
                    return self.diff_list(&parent, None, Some(iterations), target);
                };

                let previous = before.children();
                let old_size = previous.len();
                if new_size > old_size {
                    target.emit(Instruction::CopyTemplate {
                        repeat_id,
                        parent_indexes,
                        start: old_size + 1,
                        end: new_size,
                    });
                    if self.diff_list(&parent, Some(previous), Some(&iterations[..old_size]), target)?
                        == DiffOutcome::NeedsFullUpdate
                    {
                        return Ok(DiffOutcome::NeedsFullUpdate);
                    }
                    self.diff_list(&parent, None, Some(&iterations[old_size..]), target)
                } else if new_size < old_size {
                    target.emit(Instruction::DeleteTemplate {
                        repeat_id,
                        parent_indexes,
                        count: old_size - new_size,
                    });
                    self.diff_list(&parent, Some(&previous[..new_size]), Some(iterations), target)
                } else {
                    self.diff_list(&parent, Some(previous), Some(iterations), target)
                }
            }
        }
    }

    fn full_update(
        &self,
        before: Option<&ControlNode>,
        after: &ControlNode,
        mark: Option<&Arc<Mark>>,
        sink: &mut dyn InstructionSink,
    ) -> Result<DiffOutcome, DiffError> {
        let mark = mark.ok_or_else(|| DiffError::MissingMark(after.id().to_string()))?;

        self.emit_control_diff(before, after, sink);
        let html = self
            .renderer
            .render_fragment(mark, after)
            .map_err(|source| DiffError::render(after.id(), source))?;
        sink.emit(Instruction::InnerHtml {
            id: after.id().clone(),
            html,
        });
        Ok(DiffOutcome::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::MarkupRenderer;
    use formsync_control::{ControlCore, ControlState, MarkupEvent, MarkStore, PlaceholderKind};
    use pretty_assertions::assert_eq;

    fn leaf(id: &str, value: &str) -> ControlNode {
        ControlNode::leaf(EffectiveId::new(id), value)
    }

    fn group(id: &str, children: Vec<ControlNode>) -> ControlNode {
        ControlNode::container(ControlCore::new(EffectiveId::new(id)), children)
    }

    fn group_mark(id: &str, children: &[&str]) -> Vec<MarkupEvent> {
        let mut events = vec![MarkupEvent::ControlStart { static_id: id.to_string() }];
        for child in children {
            events.push(MarkupEvent::ControlStart { static_id: (*child).to_string() });
            events.push(MarkupEvent::Placeholder(PlaceholderKind::Value));
            events.push(MarkupEvent::ControlEnd);
        }
        events.push(MarkupEvent::ControlEnd);
        events
    }

    fn run(
        comparator: &Comparator<'_>,
        before: &[ControlNode],
        after: &[ControlNode],
    ) -> Result<Vec<Instruction>, DiffError> {
        let mut out = Vec::new();
        comparator.diff(Some(before), Some(after), &mut out)?;
        Ok(out)
    }

    #[test]
    fn identical_snapshots_emit_nothing() {
        let definition = FormDefinition::new();
        let renderer = MarkupRenderer::default();
        let comparator = Comparator::new(&definition, &renderer);
        let tree = vec![group("g", vec![leaf("a", "1"), leaf("b", "2")])];
        assert!(run(&comparator, &tree, &tree).unwrap().is_empty());
    }

    #[test]
    fn value_change_emits_single_value_diff() {
        let definition = FormDefinition::new();
        let renderer = MarkupRenderer::default();
        let comparator = Comparator::new(&definition, &renderer);
        let before = vec![group("g", vec![leaf("a", "1"), leaf("b", "2")])];
        let after = vec![group("g", vec![leaf("a", "1"), leaf("b", "3")])];

        let out = run(&comparator, &before, &after).unwrap();
        assert_eq!(
            out,
            vec![Instruction::Control(ControlDiff {
                id: EffectiveId::new("b"),
                newly_visible: false,
                attributes: Default::default(),
                value: Some("3".to_string()),
            })]
        );
    }

    #[test]
    fn echoes_value_changed_by_client() {
        let definition = FormDefinition::new();
        let renderer = MarkupRenderer::default();
        let comparator =
            Comparator::new(&definition, &renderer).with_value_changed([EffectiveId::new("a")]);
        let tree = vec![leaf("a", "1")];

        let out = run(&comparator, &tree, &tree).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_control().and_then(|d| d.value.as_deref()), Some("1"));
    }

    #[test]
    fn state_change_reports_only_changed_attributes() {
        let definition = FormDefinition::new();
        let renderer = MarkupRenderer::default();
        let comparator = Comparator::new(&definition, &renderer);
        let before = vec![leaf("a", "1")];
        let after = vec![ControlNode::leaf_with(
            ControlCore::new(EffectiveId::new("a"))
                .with_value("1")
                .with_state(ControlState::DEFAULT.with_readonly(true)),
        )];

        let out = run(&comparator, &before, &after).unwrap();
        let diff = out[0].as_control().unwrap();
        assert_eq!(diff.value, None);
        assert_eq!(diff.attributes.len(), 1);
        assert_eq!(diff.attributes.get("readonly").map(String::as_str), Some("true"));
    }

    #[test]
    fn static_readonly_controls_are_skipped() {
        let definition = FormDefinition::new();
        let renderer = MarkupRenderer::default();
        let comparator = Comparator::new(&definition, &renderer);
        let frozen = |value: &str| {
            ControlNode::leaf_with(
                ControlCore::new(EffectiveId::new("a"))
                    .with_value(value)
                    .with_static_readonly(true),
            )
        };
        assert!(run(&comparator, &[frozen("1")], &[frozen("2")]).unwrap().is_empty());
    }

    #[test]
    fn mismatched_sibling_lengths_are_fatal() {
        let definition = FormDefinition::new();
        let renderer = MarkupRenderer::default();
        let comparator = Comparator::new(&definition, &renderer);
        let before = vec![group("g", vec![leaf("a", "1")])];
        let after = vec![group("g", vec![leaf("a", "1"), leaf("b", "2")])];

        let err = run(&comparator, &before, &after).unwrap_err();
        assert!(matches!(err, DiffError::LengthMismatch { before: 1, after: 2, .. }));
    }

    #[test]
    fn kind_change_without_structural_flag_is_fatal() {
        let definition = FormDefinition::new();
        let renderer = MarkupRenderer::default();
        let comparator = Comparator::new(&definition, &renderer);
        let err = run(&comparator, &[leaf("a", "1")], &[group("a", vec![])]).unwrap_err();
        assert!(matches!(err, DiffError::KindMismatch { .. }));
    }

    #[test]
    fn vanished_controls_break_lockstep() {
        let definition = FormDefinition::new();
        let renderer = MarkupRenderer::default();
        let comparator = Comparator::new(&definition, &renderer);
        let mut out = Vec::new();
        let before = vec![leaf("a", "1")];

        let err = comparator.diff(Some(before.as_slice()), None, &mut out).unwrap_err();
        assert!(matches!(
            err,
            DiffError::LengthMismatch { ref parent, before: 1, after: 0 } if parent == "<root>"
        ));

        let err = comparator.diff(Some(before.as_slice()), Some(&[][..]), &mut out).unwrap_err();
        assert!(err.is_snapshot_contract());
        assert!(out.is_empty());
    }

    #[test]
    fn group_losing_its_children_is_rejected() {
        let definition = FormDefinition::new();
        let renderer = MarkupRenderer::default();
        let comparator = Comparator::new(&definition, &renderer);
        let before = vec![group("g", vec![leaf("a", "1"), leaf("b", "1")])];
        let after = vec![group("g", Vec::new())];

        let err = run(&comparator, &before, &after).unwrap_err();
        assert!(matches!(err, DiffError::LengthMismatch { ref parent, before: 2, after: 0 } if parent == "g"));
    }

    #[test]
    fn both_sides_empty_emits_nothing() {
        let definition = FormDefinition::new();
        let renderer = MarkupRenderer::default();
        let comparator = Comparator::new(&definition, &renderer);
        let mut out = Vec::new();
        comparator.diff(None, Some(&[][..]), &mut out).unwrap();
        comparator.diff(Some(&[][..]), None, &mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn threshold_promotes_directive_control() {
        let marks = MarkStore::from_events(&group_mark("g", &["a", "b", "c"])).unwrap();
        let definition = FormDefinition::new().with_marks(marks).with_full_update("g");
        let renderer = MarkupRenderer::default();
        let comparator = Comparator::new(&definition, &renderer).with_threshold(2);

        let before = vec![group("g", vec![leaf("a", "1"), leaf("b", "1"), leaf("c", "1")])];
        let after = vec![group("g", vec![leaf("a", "2"), leaf("b", "2"), leaf("c", "2")])];

        let out = run(&comparator, &before, &after).unwrap();
        assert_eq!(out.len(), 1);
        assert!(matches!(&out[0], Instruction::InnerHtml { id, .. } if id == &EffectiveId::new("g")));
    }

    #[test]
    fn below_threshold_output_is_replayed() {
        let marks = MarkStore::from_events(&group_mark("g", &["a", "b"])).unwrap();
        let definition = FormDefinition::new().with_marks(marks).with_full_update("g");
        let renderer = MarkupRenderer::default();
        let comparator = Comparator::new(&definition, &renderer).with_threshold(5);

        let before = vec![group("g", vec![leaf("a", "1"), leaf("b", "1")])];
        let after = vec![group("g", vec![leaf("a", "2"), leaf("b", "1")])];

        let out = run(&comparator, &before, &after).unwrap();
        assert_eq!(out.len(), 1);
        assert!(out[0].as_control().is_some());
    }

    #[test]
    fn structural_change_without_mark_is_fatal() {
        let definition = FormDefinition::new();
        let renderer = MarkupRenderer::default();
        let comparator = Comparator::new(&definition, &renderer);
        let mut after = group("g", vec![]);
        after.core_mut().set_structural_change(true);

        let err = run(&comparator, &[group("g", vec![])], &[after]).unwrap_err();
        assert_eq!(err, DiffError::MissingMark("g".to_string()));
    }
}
