//! Element handlers
//!
//! Provides [`ElementHandlerRegistry`], the dispatch table used while a mark
//! is replayed: for every control encountered, the handler registered for its
//! [`ControlKind`] produces the wrapper markup around the recorded content.

use formsync_control::{ControlKind, ControlNode, MarkupError, MarkupEvent, MarkupHandler};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

/// Produces the markup surrounding one control
pub trait ElementHandler: Send + Sync + Debug {
    /// Markup emitted before the control's recorded content
    ///
    /// # Errors
    /// Propagates downstream handler errors.
    fn start(&self, control: &ControlNode, out: &mut dyn MarkupHandler) -> Result<(), MarkupError>;

    /// Markup emitted after the control's recorded content
    ///
    /// # Errors
    /// Propagates downstream handler errors.
    fn end(&self, control: &ControlNode, out: &mut dyn MarkupHandler) -> Result<(), MarkupError>;

    /// Markup emitted before each iteration of a repeat
    ///
    /// # Errors
    /// Propagates downstream handler errors.
    fn iteration(
        &self,
        _repeat: &ControlNode,
        _position: usize,
        _out: &mut dyn MarkupHandler,
    ) -> Result<(), MarkupError> {
        Ok(())
    }
}

/// CSS classes describing a control's kind and state
#[must_use]
pub fn control_classes(control: &ControlNode) -> String {
    let state = control.core().state();
    let mut classes = format!("xforms-control xforms-{}", control.kind());
    for (flag, class) in [
        (!state.relevant, "xforms-disabled"),
        (state.readonly, "xforms-readonly"),
        (state.required, "xforms-required"),
        (!state.valid, "xforms-invalid"),
    ] {
        if flag {
            classes.push(' ');
            classes.push_str(class);
        }
    }
    classes
}

/// Wraps the control's content in one element carrying its id and classes
#[derive(Debug, Clone, Copy)]
pub struct WrapperHandler {
    element: &'static str,
}

impl WrapperHandler {
    /// Create handler emitting `element`
    #[inline]
    #[must_use]
    pub const fn new(element: &'static str) -> Self {
        Self { element }
    }
}

impl ElementHandler for WrapperHandler {
    fn start(&self, control: &ControlNode, out: &mut dyn MarkupHandler) -> Result<(), MarkupError> {
        let id = control.id().to_string();
        let classes = control_classes(control);
        out.event(&MarkupEvent::start(self.element, &[("id", id.as_str()), ("class", classes.as_str())]))
    }

    fn end(&self, _control: &ControlNode, out: &mut dyn MarkupHandler) -> Result<(), MarkupError> {
        out.event(&MarkupEvent::end(self.element))
    }
}

/// Delimits a repeat and each of its iterations with empty marker elements
#[derive(Debug, Clone, Copy, Default)]
pub struct RepeatDelimiterHandler;

impl RepeatDelimiterHandler {
    fn delimiter(out: &mut dyn MarkupHandler, id: Option<&str>, class: &str) -> Result<(), MarkupError> {
        let event = match id {
            Some(id) => MarkupEvent::start("span", &[("id", id), ("class", class)]),
            None => MarkupEvent::start("span", &[("class", class)]),
        };
        out.event(&event)?;
        out.event(&MarkupEvent::end("span"))
    }
}

impl ElementHandler for RepeatDelimiterHandler {
    fn start(&self, control: &ControlNode, out: &mut dyn MarkupHandler) -> Result<(), MarkupError> {
        let id = format!("repeat-begin-{}", control.id());
        Self::delimiter(out, Some(&id), "xforms-repeat-begin-end")
    }

    fn end(&self, control: &ControlNode, out: &mut dyn MarkupHandler) -> Result<(), MarkupError> {
        let id = format!("repeat-end-{}", control.id());
        Self::delimiter(out, Some(&id), "xforms-repeat-begin-end")
    }

    fn iteration(
        &self,
        _repeat: &ControlNode,
        position: usize,
        out: &mut dyn MarkupHandler,
    ) -> Result<(), MarkupError> {
        if position > 1 {
            Self::delimiter(out, None, "xforms-repeat-delimiter")?;
        }
        Ok(())
    }
}

/// Handlers by control kind
#[derive(Debug, Clone, Default)]
pub struct ElementHandlerRegistry {
    handlers: HashMap<ControlKind, Arc<dyn ElementHandler>>,
}

impl ElementHandlerRegistry {
    /// Create empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create registry with built-in handlers for every kind
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(ControlKind::Leaf, Arc::new(WrapperHandler::new("span")));
        registry.register(ControlKind::Container, Arc::new(WrapperHandler::new("div")));
        registry.register(ControlKind::Dynamic, Arc::new(WrapperHandler::new("div")));
        registry.register(ControlKind::Repeat, Arc::new(RepeatDelimiterHandler));
        registry
    }

    /// Register or replace the handler for `kind`
    pub fn register(&mut self, kind: ControlKind, handler: Arc<dyn ElementHandler>) {
        self.handlers.insert(kind, handler);
    }

    /// Handler for `kind`
    #[inline]
    #[must_use]
    pub fn get(&self, kind: ControlKind) -> Option<&Arc<dyn ElementHandler>> {
        self.handlers.get(&kind)
    }

    /// Check if a handler exists for `kind`
    #[inline]
    #[must_use]
    pub fn contains(&self, kind: ControlKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Number of registered handlers
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Check if registry is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
