//! Full-update rendering
//!
//! Provides [`FullUpdateRenderer`], the seam through which the comparator
//! regenerates a whole subtree, and [`MarkupRenderer`], the default
//! implementation replaying a control's [`Mark`] through the
//! [`pipeline`] stages with the control's current data in scope.

pub mod handlers;
pub mod pipeline;

use crate::error::RenderError;
use formsync_control::{
    ControlNode, EffectiveId, IterationPath, Mark, MarkupError, MarkupEvent, MarkupHandler,
    PlaceholderKind,
};
use handlers::ElementHandlerRegistry;
use pipeline::{FragmentSerializer, NamespaceFilter, UrlRewriter};
use std::collections::HashMap;
use std::fmt::Debug;

/// Regenerates the markup of one control
pub trait FullUpdateRenderer: Send + Sync + Debug {
    /// Render the content of `control` from its recording
    ///
    /// The result is an HTML fragment without the control's own wrapper
    /// element.
    ///
    /// # Errors
    /// Returns [`RenderError`] if replay or serialization fails.
    fn render_fragment(&self, mark: &Mark, control: &ControlNode) -> Result<String, RenderError>;
}

/// Pipeline settings for [`MarkupRenderer`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderConfig {
    /// Prefix for context-relative URLs
    pub context_path: String,
    /// Namespace URIs whose elements never reach the client
    pub swallowed_namespaces: Vec<String>,
}

impl RenderConfig {
    /// With context path
    #[inline]
    #[must_use]
    pub fn with_context_path(mut self, context_path: impl Into<String>) -> Self {
        self.context_path = context_path.into();
        self
    }

    /// With an additional swallowed namespace
    #[inline]
    #[must_use]
    pub fn with_swallowed_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.swallowed_namespaces.push(namespace.into());
        self
    }
}

/// Default renderer: mark replay with placeholder substitution
#[derive(Debug, Clone)]
pub struct MarkupRenderer {
    config: RenderConfig,
    handlers: ElementHandlerRegistry,
}

impl MarkupRenderer {
    /// Create renderer with the built-in element handlers
    #[must_use]
    pub fn new(config: RenderConfig) -> Self {
        Self {
            config,
            handlers: ElementHandlerRegistry::with_defaults(),
        }
    }

    /// Replace the element handler registry
    #[inline]
    #[must_use]
    pub fn with_handlers(mut self, handlers: ElementHandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    /// Pipeline settings
    #[inline]
    #[must_use]
    pub fn config(&self) -> &RenderConfig {
        &self.config
    }
}

impl Default for MarkupRenderer {
    fn default() -> Self {
        Self::new(RenderConfig::default())
    }
}

impl FullUpdateRenderer for MarkupRenderer {
    #[tracing::instrument(level = "debug", skip_all, fields(control = %control.id()))]
    fn render_fragment(&self, mark: &Mark, control: &ControlNode) -> Result<String, RenderError> {
        if mark.static_id() != control.core().prefixed_id() {
            return Err(RenderError::MarkMismatch {
                expected: control.core().prefixed_id().to_string(),
                found: mark.static_id().to_string(),
            });
        }

        let mut pipeline = UrlRewriter::new(
            &self.config.context_path,
            NamespaceFilter::new(&self.config.swallowed_namespaces, FragmentSerializer::new()),
        );
        let mut replay = ScopedReplay::new(control, &self.handlers);
        replay.run(mark.events(), &mut pipeline)?;

        let html = pipeline.into_inner().into_inner().finish()?;
        tracing::debug!(bytes = html.len(), "Rendered full update");
        Ok(html)
    }
}

/// Expands control, repeat and placeholder events against a subtree
struct ScopedReplay<'a> {
    controls: HashMap<EffectiveId, &'a ControlNode>,
    handlers: &'a ElementHandlerRegistry,
    path: IterationPath,
    scope: Vec<&'a ControlNode>,
}

impl<'a> ScopedReplay<'a> {
    fn new(root: &'a ControlNode, handlers: &'a ElementHandlerRegistry) -> Self {
        fn index<'a>(node: &'a ControlNode, out: &mut HashMap<EffectiveId, &'a ControlNode>) {
            out.insert(node.id().clone(), node);
            for child in node.children() {
                index(child, out);
            }
        }

        let mut controls = HashMap::new();
        index(root, &mut controls);
        Self {
            controls,
            handlers,
            path: IterationPath::from_slice(root.id().iterations()),
            scope: Vec::new(),
        }
    }

    fn run(&mut self, events: &[MarkupEvent], out: &mut dyn MarkupHandler) -> Result<(), MarkupError> {
        let mut position = 0;
        while position < events.len() {
            match &events[position] {
                MarkupEvent::ControlStart { static_id } => {
                    let end = matching_end(events, position)?;
                    self.control(static_id, &events[position + 1..end], out)?;
                    position = end;
                }
                MarkupEvent::RepeatStart { static_id } => {
                    let end = matching_end(events, position)?;
                    self.repeat(static_id, &events[position + 1..end], out)?;
                    position = end;
                }
                MarkupEvent::ControlEnd | MarkupEvent::RepeatEnd => {
                    return Err(MarkupError::Unbalanced(format!("stray end event at {position}")));
                }
                MarkupEvent::Placeholder(kind) => self.placeholder(*kind, out)?,
                other => out.event(other)?,
            }
            position += 1;
        }
        Ok(())
    }

    fn lookup(&self, static_id: &str) -> Option<&'a ControlNode> {
        let id = EffectiveId::with_iterations(static_id, &self.path);
        let found = self.controls.get(&id).copied();
        if found.is_none() {
            tracing::trace!(%id, "No control in scope, skipping its markup");
        }
        found
    }

    fn control(
        &mut self,
        static_id: &str,
        body: &[MarkupEvent],
        out: &mut dyn MarkupHandler,
    ) -> Result<(), MarkupError> {
        let Some(control) = self.lookup(static_id) else {
            return Ok(());
        };
        let registry = self.handlers;
        let handler = if self.scope.is_empty() { None } else { registry.get(control.kind()) };

        if let Some(handler) = handler {
            handler.start(control, out)?;
        }
        self.scope.push(control);
        self.run(body, out)?;
        self.scope.pop();
        if let Some(handler) = handler {
            handler.end(control, out)?;
        }
        Ok(())
    }

    fn repeat(
        &mut self,
        static_id: &str,
        body: &[MarkupEvent],
        out: &mut dyn MarkupHandler,
    ) -> Result<(), MarkupError> {
        let Some(repeat) = self.lookup(static_id) else {
            return Ok(());
        };
        if !matches!(repeat, ControlNode::Repeat(_)) {
            return Err(MarkupError::Handler(format!(
                "'{static_id}' recorded as a repeat but is a {}",
                repeat.kind()
            )));
        }
        let registry = self.handlers;
        let is_root = self.scope.is_empty();
        let handler = registry.get(repeat.kind());

        if let (Some(handler), false) = (handler, is_root) {
            handler.start(repeat, out)?;
        }
        self.scope.push(repeat);
        for (offset, iteration) in repeat.children().iter().enumerate() {
            let position = offset + 1;
            if let Some(handler) = handler {
                handler.iteration(repeat, position, out)?;
            }
            self.path.push(u32::try_from(position).map_err(|e| MarkupError::Handler(e.to_string()))?);
            self.scope.push(iteration);
            let result = self.run(body, out);
            self.scope.pop();
            self.path.pop();
            result?;
        }
        self.scope.pop();
        if let (Some(handler), false) = (handler, is_root) {
            handler.end(repeat, out)?;
        }
        Ok(())
    }

    fn placeholder(&self, kind: PlaceholderKind, out: &mut dyn MarkupHandler) -> Result<(), MarkupError> {
        let control = self
            .scope
            .last()
            .ok_or_else(|| MarkupError::UnboundControl(format!("{kind:?} placeholder")))?;
        let text = match kind {
            PlaceholderKind::Value => control.core().value().unwrap_or_default().to_string(),
            PlaceholderKind::Label => control.core().label().unwrap_or_default().to_string(),
            PlaceholderKind::Id => control.id().to_string(),
        };
        if text.is_empty() {
            return Ok(());
        }
        out.event(&MarkupEvent::Text(text))
    }
}

/// Index of the end event matching the start event at `start`
fn matching_end(events: &[MarkupEvent], start: usize) -> Result<usize, MarkupError> {
    let mut depth = 0usize;
    for (position, event) in events.iter().enumerate().skip(start) {
        match event {
            MarkupEvent::ControlStart { .. } | MarkupEvent::RepeatStart { .. } => depth += 1,
            MarkupEvent::ControlEnd | MarkupEvent::RepeatEnd => {
                depth -= 1;
                if depth == 0 {
                    return Ok(position);
                }
            }
            _ => {}
        }
    }
    Err(MarkupError::Unbalanced(format!("event {start} is never closed")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use formsync_control::{IdGenerator, MarkStore, TreeBuilder};
    use pretty_assertions::assert_eq;

    fn marks() -> MarkStore {
        MarkStore::from_events(&[
            MarkupEvent::ControlStart { static_id: "g".into() },
            MarkupEvent::start("fieldset", &[]),
            MarkupEvent::ControlStart { static_id: "c1".into() },
            MarkupEvent::start("label", &[]),
            MarkupEvent::Placeholder(PlaceholderKind::Label),
            MarkupEvent::end("label"),
            MarkupEvent::Placeholder(PlaceholderKind::Value),
            MarkupEvent::ControlEnd,
            MarkupEvent::RepeatStart { static_id: "r1".into() },
            MarkupEvent::ControlStart { static_id: "v".into() },
            MarkupEvent::Placeholder(PlaceholderKind::Value),
            MarkupEvent::ControlEnd,
            MarkupEvent::RepeatEnd,
            MarkupEvent::start("img", &[("src", "logo.png")]),
            MarkupEvent::end("img"),
            MarkupEvent::end("fieldset"),
            MarkupEvent::ControlEnd,
        ])
        .unwrap()
    }

    fn group(values: &[&str]) -> ControlNode {
        let mut ids = IdGenerator::new();
        let mut b = TreeBuilder::new(&mut ids);
        let count = u32::try_from(values.len()).unwrap();
        b.container(Some("g"), |b| {
            let c1 = ControlNode::leaf_with(b.core(Some("c1")).with_value("a<b").with_label("Name"));
            let repeat = b.repeat(Some("r1"), count, |b, position| {
                vec![b.leaf(Some("v"), values[position as usize - 1])]
            });
            vec![c1, repeat]
        })
    }

    #[test]
    fn renders_fragment_without_root_wrapper() {
        let marks = marks();
        let renderer = MarkupRenderer::new(RenderConfig::default().with_context_path("/app"));
        let html = renderer.render_fragment(marks.get("g").unwrap(), &group(&["x", "y"])).unwrap();

        assert_eq!(
            html,
            concat!(
                "<fieldset>",
                r#"<span id="c1" class="xforms-control xforms-leaf"><label>Name</label>a&lt;b</span>"#,
                r#"<span id="repeat-begin-r1" class="xforms-repeat-begin-end"></span>"#,
                r#"<span id="v·1" class="xforms-control xforms-leaf">x</span>"#,
                r#"<span class="xforms-repeat-delimiter"></span>"#,
                r#"<span id="v·2" class="xforms-control xforms-leaf">y</span>"#,
                r#"<span id="repeat-end-r1" class="xforms-repeat-begin-end"></span>"#,
                r#"<img src="/app/logo.png">"#,
                "</fieldset>",
            )
        );
    }

    #[test]
    fn renders_repeat_root_iterations() {
        let marks = marks();
        let tree = group(&["x"]);
        let repeat = &tree.children()[1];
        let html = MarkupRenderer::default()
            .render_fragment(marks.get("r1").unwrap(), repeat)
            .unwrap();
        assert_eq!(html, r#"<span id="v·1" class="xforms-control xforms-leaf">x</span>"#);
    }

    #[test]
    fn rejects_mark_of_another_control() {
        let marks = marks();
        let err = MarkupRenderer::default()
            .render_fragment(marks.get("c1").unwrap(), &group(&[]))
            .unwrap_err();
        assert!(matches!(err, RenderError::MarkMismatch { .. }));
    }
}
