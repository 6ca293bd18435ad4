//! Demo form
//!
//! A name field followed by a group holding a title and a repeat of items.
//! The simulator drives it, and the fixtures in `formsync-test-utils` build
//! on it.

use crate::dispatch::{DispatchContext, DispatchError, StandardDispatcher};
use crate::request::ClientEvent;
use formsync_control::{
    ControlError, ControlNode, ControlTree, EffectiveId, FormDefinition, IdGenerator, MarkStore, MarkupEvent,
    PlaceholderKind, TreeBuilder,
};
use formsync_session::DeferredSubmission;

/// Form id the demo definition is registered under
pub const FORM_ID: &str = "demo";
/// Name field
pub const NAME: &str = "c1";
/// Group around the repeat
pub const GROUP: &str = "g";
/// Group title
pub const TITLE: &str = "title";
/// Item repeat
pub const REPEAT: &str = "r1";
/// Item field inside each iteration
pub const ITEM: &str = "v";
/// Save trigger
pub const SAVE: &str = "save";

/// Recorded template markup of the demo form
///
/// # Errors
/// Never fails for the built-in recording.
pub fn marks() -> Result<MarkStore, ControlError> {
    MarkStore::from_events(&[
        MarkupEvent::ControlStart { static_id: NAME.into() },
        MarkupEvent::start("label", &[("for", NAME)]),
        MarkupEvent::Placeholder(PlaceholderKind::Label),
        MarkupEvent::end("label"),
        MarkupEvent::Placeholder(PlaceholderKind::Value),
        MarkupEvent::ControlEnd,
        MarkupEvent::ControlStart { static_id: GROUP.into() },
        MarkupEvent::start("fieldset", &[("class", "items")]),
        MarkupEvent::ControlStart { static_id: TITLE.into() },
        MarkupEvent::start("legend", &[]),
        MarkupEvent::Placeholder(PlaceholderKind::Value),
        MarkupEvent::end("legend"),
        MarkupEvent::ControlEnd,
        MarkupEvent::RepeatStart { static_id: REPEAT.into() },
        MarkupEvent::ControlStart { static_id: ITEM.into() },
        MarkupEvent::Placeholder(PlaceholderKind::Value),
        MarkupEvent::ControlEnd,
        MarkupEvent::RepeatEnd,
        MarkupEvent::start("img", &[("src", "/images/add.png"), ("alt", "Add")]),
        MarkupEvent::end("img"),
        MarkupEvent::end("fieldset"),
        MarkupEvent::ControlEnd,
    ])
}

/// Demo form definition, without `update="full"` directives
///
/// # Errors
/// Never fails for the built-in recording.
pub fn definition() -> Result<FormDefinition, ControlError> {
    Ok(FormDefinition::new().with_marks(marks()?))
}

/// Top-level controls of the demo form
pub fn build(b: &mut TreeBuilder<'_>, name: &str, items: &[&str]) -> Vec<ControlNode> {
    let count = u32::try_from(items.len()).unwrap_or(u32::MAX);
    let name = ControlNode::leaf_with(b.core(Some(NAME)).with_value(name).with_label("Name"));
    let group = b.container(Some(GROUP), |b| {
        vec![
            b.leaf(Some(TITLE), "Items"),
            b.repeat(Some(REPEAT), count, |b, position| {
                let value = items.get(position as usize - 1).copied().unwrap_or_default();
                vec![b.leaf(Some(ITEM), value)]
            }),
        ]
    });
    vec![name, group]
}

/// Demo snapshot with fresh ids
///
/// # Errors
/// Never fails: the demo form has no duplicate ids.
pub fn tree(name: &str, items: &[&str]) -> Result<ControlTree, ControlError> {
    let mut ids = IdGenerator::new();
    ControlTree::new(build(&mut TreeBuilder::new(&mut ids), name, items))
}

/// Dispatcher with the demo form's handlers
///
/// - `add-item` appends an iteration, valued from the `value` property
/// - `remove-item` drops the last iteration
/// - `rename-group` retitles the group and forces a full update of it
/// - activating `save` schedules a replace-all submission of the items
#[must_use]
pub fn dispatcher() -> StandardDispatcher {
    StandardDispatcher::new()
        .on_event("add-item", add_item)
        .on_event("remove-item", remove_item)
        .on_event("rename-group", rename_group)
        .on_activate(SAVE, save)
}

fn add_item(ctx: &mut DispatchContext<'_>, event: &ClientEvent) -> Result<(), DispatchError> {
    let value = event.property("value").unwrap_or_default().to_string();
    let repeat_id = EffectiveId::new(REPEAT);
    let (tree, ids) = ctx.tree_and_ids();
    let repeat = tree
        .require_mut(&repeat_id)
        .and_then(ControlNode::as_repeat_mut)
        .map_err(|source| DispatchError::control(event, source))?;

    let position = u32::try_from(repeat.size() + 1).map_err(|_| DispatchError::Handler {
        event: event.name().to_string(),
        reason: "too many items".to_string(),
    })?;
    let mut builder = TreeBuilder::within(ids, repeat_id.iterations());
    let iteration = builder.iteration(&repeat_id, position, &mut |b: &mut TreeBuilder<'_>, _: u32| {
        vec![b.leaf(Some(ITEM), value.clone())]
    });
    repeat.iterations.push(iteration);
    repeat
        .set_index(repeat.size())
        .map_err(|source| DispatchError::control(event, source))
}

fn remove_item(ctx: &mut DispatchContext<'_>, event: &ClientEvent) -> Result<(), DispatchError> {
    let repeat = ctx
        .tree_mut()
        .require_mut(&EffectiveId::new(REPEAT))
        .and_then(ControlNode::as_repeat_mut)
        .map_err(|source| DispatchError::control(event, source))?;
    if repeat.iterations.pop().is_none() {
        return Ok(());
    }
    let index = repeat.index.min(repeat.size());
    repeat
        .set_index(index)
        .map_err(|source| DispatchError::control(event, source))
}

fn rename_group(ctx: &mut DispatchContext<'_>, event: &ClientEvent) -> Result<(), DispatchError> {
    let title = event.property("title").unwrap_or("Items").to_string();
    let tree = ctx.tree_mut();
    tree.require_mut(&EffectiveId::new(TITLE))
        .map_err(|source| DispatchError::control(event, source))?
        .core_mut()
        .set_value(Some(title));
    tree.require_mut(&EffectiveId::new(GROUP))
        .map_err(|source| DispatchError::control(event, source))?
        .core_mut()
        .set_structural_change(true);
    Ok(())
}

fn save(ctx: &mut DispatchContext<'_>, _: &ClientEvent) -> Result<(), DispatchError> {
    let body = ctx
        .tree()
        .iter()
        .filter(|node| node.core().prefixed_id() == ITEM)
        .filter_map(|node| node.core().value())
        .collect::<Vec<_>>()
        .join("\n");
    ctx.pending().defer_submission(DeferredSubmission {
        id: SAVE.to_string(),
        action: "/save".to_string(),
        body,
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::EventDispatcher;

    #[test]
    fn tree_layout() {
        let tree = tree("a", &["x", "y"]).unwrap();
        let ids: Vec<String> = tree.iter().map(|n| n.id().to_string()).collect();
        assert_eq!(ids, vec!["c1", "g", "title", "r1", "r1·1", "v·1", "r1·2", "v·2"]);
        assert_eq!(definition().unwrap().marks().len(), 5);
    }

    #[test]
    fn add_and_remove_items() {
        let definition = definition().unwrap();
        let mut ids = IdGenerator::new();
        let mut tree = tree("a", &["x"]).unwrap();
        let dispatcher = dispatcher();
        let mut ctx = DispatchContext::new(&definition, &mut tree, &mut ids);

        let add = ClientEvent::custom("add-item").with_property("value", "y");
        dispatcher.dispatch(&mut ctx, &add).unwrap();
        assert_eq!(
            ctx.tree().find(&EffectiveId::with_iterations(ITEM, &[2])).and_then(|n| n.core().value()),
            Some("y")
        );
        assert_eq!(ctx.tree().repeat_indexes()[&EffectiveId::new(REPEAT)], 2);

        let remove = ClientEvent::custom("remove-item");
        dispatcher.dispatch(&mut ctx, &remove).unwrap();
        dispatcher.dispatch(&mut ctx, &remove).unwrap();
        dispatcher.dispatch(&mut ctx, &remove).unwrap();
        assert_eq!(ctx.tree().repeat_indexes()[&EffectiveId::new(REPEAT)], 0);
    }

    #[test]
    fn save_schedules_submission() {
        let definition = definition().unwrap();
        let mut ids = IdGenerator::new();
        let mut tree = tree("a", &["x", "y"]).unwrap();
        let mut ctx = DispatchContext::new(&definition, &mut tree, &mut ids);
        let event = ClientEvent::Activate {
            target: EffectiveId::new(SAVE),
        };
        dispatcher().dispatch(&mut ctx, &event).unwrap();

        let (mut pending, _) = ctx.finish();
        let submission = pending.take_submission().unwrap();
        assert_eq!(submission.body, "x\ny");
    }
}
