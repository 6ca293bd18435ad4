//! Event dispatch
//!
//! The orchestrator hands each inbound event to an [`EventDispatcher`]
//! together with a [`DispatchContext`] over a working copy of the document.
//! Nothing the dispatcher does becomes visible unless every event succeeds.

use crate::request::ClientEvent;
use formsync_control::{ControlError, ControlKind, ControlTree, EffectiveId, FormDefinition, IdGenerator};
use formsync_session::{DeferredSubmission, DocumentKey, PendingActions};
use std::collections::HashMap;
use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

/// Errors raised while dispatching events
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Event addressed a control that does not exist or has the wrong shape
    #[error("event {event} cannot be applied: {source}")]
    Control {
        /// Event name
        event: String,
        /// Underlying error
        #[source]
        source: ControlError,
    },

    /// Submission failed; reported to the user as a form-level error
    #[error("submission {id} failed: {reason}")]
    Submission {
        /// Submission id
        id: String,
        /// Failure reason
        reason: String,
    },

    /// Handler failure outside any recoverable context
    #[error("handler for {event} failed: {reason}")]
    Handler {
        /// Event name
        event: String,
        /// Failure reason
        reason: String,
    },
}

impl DispatchError {
    /// Wrap a control error raised by `event`
    #[must_use]
    pub fn control(event: &ClientEvent, source: ControlError) -> Self {
        Self::Control {
            event: event.name().to_string(),
            source,
        }
    }

    /// Whether the form's own event model absorbs the error
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Submission { .. })
    }
}

/// Mutable view of a document while its events are dispatched
#[derive(Debug)]
pub struct DispatchContext<'a> {
    definition: &'a FormDefinition,
    tree: &'a mut ControlTree,
    ids: &'a mut IdGenerator,
    pending: PendingActions,
    value_changed: Vec<EffectiveId>,
}

impl<'a> DispatchContext<'a> {
    /// Create context over a working snapshot
    #[must_use]
    pub fn new(definition: &'a FormDefinition, tree: &'a mut ControlTree, ids: &'a mut IdGenerator) -> Self {
        Self {
            definition,
            tree,
            ids,
            pending: PendingActions::new(),
            value_changed: Vec::new(),
        }
    }

    /// Form definition
    #[inline]
    #[must_use]
    pub fn definition(&self) -> &FormDefinition {
        self.definition
    }

    /// Working snapshot
    #[inline]
    #[must_use]
    pub fn tree(&self) -> &ControlTree {
        &*self.tree
    }

    /// Working snapshot, mutable
    #[inline]
    pub fn tree_mut(&mut self) -> &mut ControlTree {
        &mut *self.tree
    }

    /// Working snapshot and id generator, for building new subtrees
    #[inline]
    pub fn tree_and_ids(&mut self) -> (&mut ControlTree, &mut IdGenerator) {
        (&mut *self.tree, &mut *self.ids)
    }

    /// Side effects recorded so far
    #[inline]
    pub fn pending(&mut self) -> &mut PendingActions {
        &mut self.pending
    }

    /// Apply a client value edit
    ///
    /// The control is always reported back to the client, so an edit refused
    /// because the control is read-only is reverted on screen.
    ///
    /// # Errors
    /// Returns [`ControlError`] if the control is missing or not a leaf.
    pub fn set_value(&mut self, target: &EffectiveId, value: &str) -> Result<(), ControlError> {
        let node = self.tree.require_mut(target)?;
        if node.kind() != ControlKind::Leaf {
            return Err(ControlError::WrongKind {
                id: target.to_string(),
                kind: node.kind().as_str(),
                expected: ControlKind::Leaf.as_str(),
            });
        }
        let core = node.core_mut();
        if core.state().readonly || !core.state().relevant {
            tracing::warn!(%target, "Ignoring value change on read-only or non-relevant control");
        } else {
            core.set_value(Some(value.to_string()));
        }
        self.value_changed.push(target.clone());
        Ok(())
    }

    /// Record side effects and edited controls, consuming the context
    #[must_use]
    pub fn finish(self) -> (PendingActions, Vec<EffectiveId>) {
        (self.pending, self.value_changed)
    }
}

/// Applies client events to a document
pub trait EventDispatcher: Send + Sync + Debug {
    /// Dispatch one event
    ///
    /// # Errors
    /// Returns [`DispatchError`]; recoverable errors are reported in the
    /// response, others abort the request.
    fn dispatch(&self, ctx: &mut DispatchContext<'_>, event: &ClientEvent) -> Result<(), DispatchError>;
}

/// Form-specific reaction to an event
pub trait EventHandler: Send + Sync {
    /// Handle `event`
    ///
    /// # Errors
    /// Implementation-defined.
    fn handle(&self, ctx: &mut DispatchContext<'_>, event: &ClientEvent) -> Result<(), DispatchError>;
}

impl<F> EventHandler for F
where
    F: Fn(&mut DispatchContext<'_>, &ClientEvent) -> Result<(), DispatchError> + Send + Sync,
{
    fn handle(&self, ctx: &mut DispatchContext<'_>, event: &ClientEvent) -> Result<(), DispatchError> {
        self(ctx, event)
    }
}

/// Built-in handling of value, focus and repeat-index events plus
/// registered handlers for activations and custom events
///
/// Events without a registered handler are ignored, like events without a
/// listener.
#[derive(Default)]
pub struct StandardDispatcher {
    on_activate: HashMap<String, Arc<dyn EventHandler>>,
    on_event: HashMap<String, Arc<dyn EventHandler>>,
}

impl StandardDispatcher {
    /// Create dispatcher without handlers
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle activations of the control with this prefixed id
    #[must_use]
    pub fn on_activate(mut self, prefixed_id: impl Into<String>, handler: impl EventHandler + 'static) -> Self {
        self.on_activate.insert(prefixed_id.into(), Arc::new(handler));
        self
    }

    /// Handle custom events with this name
    #[must_use]
    pub fn on_event(mut self, name: impl Into<String>, handler: impl EventHandler + 'static) -> Self {
        self.on_event.insert(name.into(), Arc::new(handler));
        self
    }

    fn run(
        handler: Option<&Arc<dyn EventHandler>>,
        ctx: &mut DispatchContext<'_>,
        event: &ClientEvent,
    ) -> Result<(), DispatchError> {
        match handler {
            Some(handler) => handler.handle(ctx, event),
            None => {
                tracing::debug!(event = event.name(), "No handler registered");
                Ok(())
            }
        }
    }
}

impl Debug for StandardDispatcher {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("StandardDispatcher")
            .field("on_activate", &self.on_activate.keys().collect::<Vec<_>>())
            .field("on_event", &self.on_event.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl EventDispatcher for StandardDispatcher {
    #[tracing::instrument(level = "debug", skip_all, fields(event = event.name()))]
    fn dispatch(&self, ctx: &mut DispatchContext<'_>, event: &ClientEvent) -> Result<(), DispatchError> {
        match event {
            ClientEvent::ValueChanged { target, value } => ctx
                .set_value(target, value)
                .map_err(|source| DispatchError::control(event, source)),
            ClientEvent::RepeatIndex { repeat, index } => ctx
                .tree_mut()
                .require_mut(repeat)
                .and_then(|node| node.as_repeat_mut())
                .and_then(|node| node.set_index(*index))
                .map_err(|source| DispatchError::control(event, source)),
            ClientEvent::Focus { target } => {
                ctx.pending().focus(target.clone());
                Ok(())
            }
            ClientEvent::Blur { target } => {
                ctx.pending().blur(target.clone());
                Ok(())
            }
            ClientEvent::Activate { target } => {
                Self::run(self.on_activate.get(target.prefixed_id()), ctx, event)
            }
            ClientEvent::Custom { name, .. } => Self::run(self.on_event.get(name), ctx, event),
            ClientEvent::Heartbeat | ClientEvent::UploadProgress { .. } => Ok(()),
        }
    }
}

/// Runs replace-all submissions after the document lock is released
pub trait SubmissionRunner: Send + Sync + Debug {
    /// Perform the submission
    ///
    /// # Errors
    /// Returns [`DispatchError::Submission`] if the target rejects it.
    fn run(&self, document: &DocumentKey, submission: &DeferredSubmission) -> Result<(), DispatchError>;
}

/// Submission runner that only logs
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingSubmissionRunner;

impl SubmissionRunner for LoggingSubmissionRunner {
    fn run(&self, document: &DocumentKey, submission: &DeferredSubmission) -> Result<(), DispatchError> {
        tracing::info!(
            %document,
            submission = %submission.id,
            action = %submission.action,
            bytes = submission.body.len(),
            "Running deferred submission"
        );
        Ok(())
    }
}
