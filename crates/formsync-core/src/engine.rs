//! Request orchestration
//!
//! [`Engine`] owns the document registry and runs each request through
//! lookup, lock, sequence check, dispatch, comparison and memoization. The
//! document lock is held by a [`DocumentGuard`] and released on every exit
//! path when the guard drops.

use crate::config::EngineConfig;
use crate::dispatch::{DispatchContext, EventDispatcher, LoggingSubmissionRunner, StandardDispatcher, SubmissionRunner};
use crate::error::ProcessError;
use crate::request::{Request, RequestKind};
use crate::response::{EventResponse, Response, ResponseKind};
use crate::transport;
use formsync_control::{ControlNode, ControlTree, EffectiveId, FormDefinition, IdGenerator, TreeBuilder};
use formsync_diff::{diff_repeat_indexes, Comparator, FullUpdateRenderer, Instruction, MarkupRenderer};
use formsync_session::{
    encode_dynamic_state, DeferredSubmission, DocumentGuard, DocumentKey, DocumentRegistry, DocumentSlot,
    DocumentState, DocumentStore, LifecycleError, MemoryDocumentStore, SequenceCheck,
    StoredResponse,
};
use std::io::Write;
use std::sync::Arc;

/// Builder for [`Engine`]
#[derive(Debug)]
pub struct EngineBuilder {
    config: EngineConfig,
    store: Option<Arc<dyn DocumentStore>>,
    renderer: Option<Arc<dyn FullUpdateRenderer>>,
    dispatcher: Option<Arc<dyn EventDispatcher>>,
    submissions: Option<Arc<dyn SubmissionRunner>>,
}

impl EngineBuilder {
    /// Persist documents to `store` instead of memory
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Render full updates with `renderer`
    #[must_use]
    pub fn with_renderer(mut self, renderer: Arc<dyn FullUpdateRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Dispatch events with `dispatcher`
    #[must_use]
    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn EventDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Run deferred submissions with `submissions`
    #[must_use]
    pub fn with_submission_runner(mut self, submissions: Arc<dyn SubmissionRunner>) -> Self {
        self.submissions = Some(submissions);
        self
    }

    /// Build the engine
    #[must_use]
    pub fn build(self) -> Engine {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryDocumentStore::new()));
        let renderer = self
            .renderer
            .unwrap_or_else(|| Arc::new(MarkupRenderer::new(self.config.render_config())));
        Engine {
            registry: DocumentRegistry::new(self.config.registry_config(), store),
            renderer,
            dispatcher: self
                .dispatcher
                .unwrap_or_else(|| Arc::new(StandardDispatcher::new())),
            submissions: self
                .submissions
                .unwrap_or_else(|| Arc::new(LoggingSubmissionRunner)),
            config: self.config,
        }
    }
}

/// Processes requests against live documents
///
/// # Example
///
/// ```rust
/// use formsync_control::FormDefinition;
/// use formsync_core::{ClientEvent, Engine, EngineConfig, Request, ResponseKind};
/// use formsync_control::EffectiveId;
///
/// let engine = Engine::builder(EngineConfig::default()).build();
/// engine.register_form("form", FormDefinition::new());
/// let key = engine
///     .open_document("session", "form", |b| vec![b.leaf(Some("c1"), "a")])
///     .unwrap();
///
/// let request = Request::new(key, 1).with_event(ClientEvent::ValueChanged {
///     target: EffectiveId::new("c1"),
///     value: "b".to_string(),
/// });
/// let response = engine.handle(&request);
/// assert_eq!(response.kind(), ResponseKind::Incremental);
/// ```
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    registry: DocumentRegistry,
    renderer: Arc<dyn FullUpdateRenderer>,
    dispatcher: Arc<dyn EventDispatcher>,
    submissions: Arc<dyn SubmissionRunner>,
}

impl Engine {
    /// Start building an engine
    #[must_use]
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder {
            config,
            store: None,
            renderer: None,
            dispatcher: None,
            submissions: None,
        }
    }

    /// Active configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Document registry
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &DocumentRegistry {
        &self.registry
    }

    /// Register a form definition under `form_id`
    pub fn register_form(&self, form_id: &str, definition: FormDefinition) -> Arc<FormDefinition> {
        let definition = Arc::new(definition);
        self.registry.register_definition(form_id, Arc::clone(&definition));
        definition
    }

    /// Create a document for an initial page render
    ///
    /// `build` receives a builder backed by the document's own id generator.
    ///
    /// # Errors
    /// Returns [`ProcessError`] if the form is unknown, the snapshot is
    /// invalid or the store rejects the document.
    pub fn open_document<F>(&self, session: &str, form_id: &str, build: F) -> Result<DocumentKey, ProcessError>
    where
        F: FnOnce(&mut TreeBuilder<'_>) -> Vec<ControlNode>,
    {
        let definition = self.registry.definition(form_id)?;
        let mut ids = IdGenerator::new();
        let roots = build(&mut TreeBuilder::new(&mut ids));
        let tree = ControlTree::new(roots)?;
        let key = DocumentKey::generate(session);
        self.registry
            .insert(DocumentState::new(key.clone(), form_id, definition, tree, ids))?;
        Ok(key)
    }

    /// End a document's session
    pub fn close_document(&self, key: &DocumentKey) {
        self.registry.remove(key);
    }

    /// Copy of the document's current snapshot
    ///
    /// # Errors
    /// Returns [`ProcessError`] if the document is gone or stays locked past
    /// the non-interactive wait.
    pub fn snapshot(&self, key: &DocumentKey) -> Result<ControlTree, ProcessError> {
        let slot = self.registry.get(key)?;
        let guard = slot.acquire(self.config.lock_wait(RequestKind::NonInteractive))?;
        Ok(guard.current().clone())
    }

    /// Process a request and answer it, turning failures into error responses
    pub fn handle(&self, request: &Request) -> Response {
        match self.process(request) {
            Ok(response) => response,
            Err(err) => {
                match err.response_kind() {
                    ResponseKind::Retry | ResponseKind::SessionExpired => {
                        tracing::info!(document = %request.document, %err, "Request not processed");
                    }
                    _ => {
                        tracing::error!(
                            document = %request.document,
                            sequence = request.sequence,
                            error = ?err,
                            "Request failed"
                        );
                    }
                }
                err.to_response()
            }
        }
    }

    /// Answer a request and write the response to `out`
    ///
    /// Transmission failures are logged and swallowed: the document already
    /// advanced and the client recovers by retrying.
    pub fn serve(&self, request: &Request, out: &mut dyn Write) -> Response {
        let response = self.handle(request);
        transport::transmit(&response, out);
        response
    }

    /// Process a request
    ///
    /// # Errors
    /// Returns [`ProcessError`] for expired sessions, busy documents,
    /// sequence violations, dispatch failures and comparator contract
    /// violations. The document is unchanged when an error is returned.
    #[tracing::instrument(skip_all, fields(document = %request.document, sequence = request.sequence))]
    pub fn process(&self, request: &Request) -> Result<Response, ProcessError> {
        if request.is_fast_path() {
            self.registry.get(&request.document)?;
            tracing::trace!("Keep-alive answered without the document lock");
            return Ok(Response::heartbeat());
        }

        let slot = self.slot(request)?;
        if let Some(response) = Self::replay(&slot, request.sequence) {
            return Ok(response);
        }

        let mut guard = slot.acquire(self.config.lock_wait(request.kind))?;
        if guard.check_sequence(request.sequence).into_result()? == SequenceCheck::Replay {
            drop(guard);
            return Self::replay(&slot, request.sequence)
                .ok_or_else(|| LifecycleError::SessionExpired(request.document.to_string()).into());
        }

        if request.submission_pass {
            return self.finish_submission(&slot, guard, request);
        }

        let kind = if request.all_events {
            ResponseKind::AllEvents
        } else {
            ResponseKind::Incremental
        };
        let body = self.update(&mut guard, request)?;
        let stored = guard.commit(StoredResponse::new(request.sequence, body));
        self.persist(&guard);
        drop(guard);

        tracing::debug!(?kind, bytes = stored.len(), "Response committed");
        Ok(Response::new(kind, stored.body()))
    }

    fn slot(&self, request: &Request) -> Result<Arc<DocumentSlot>, ProcessError> {
        match (self.registry.get(&request.document), &request.dynamic_state) {
            (Err(LifecycleError::SessionExpired(_)), Some(blob)) => {
                Ok(self.registry.restore_dynamic_state(&request.document, blob)?)
            }
            (found, _) => Ok(found?),
        }
    }

    fn replay(slot: &DocumentSlot, sequence: u64) -> Option<Response> {
        let stored = slot
            .last_response()
            .filter(|stored| stored.sequence() == sequence)?;
        tracing::debug!(digest = %stored.digest(), "Replaying memoized response");
        Some(Response::new(ResponseKind::Replay, stored.body()))
    }

    /// Dispatch, compare and drain pending actions; returns the response body
    ///
    /// The document is only touched once the body is built, so a failure
    /// leaves it as it was before the request.
    fn update(&self, guard: &mut DocumentGuard<'_>, request: &Request) -> Result<Arc<[u8]>, ProcessError> {
        let definition = Arc::clone(guard.definition());
        let mut after = guard.current().clone();
        let mut ids = guard.ids_mut().clone();

        let (pending, value_changed) = {
            let mut ctx = DispatchContext::new(&definition, &mut after, &mut ids);
            for file in &request.files {
                tracing::debug!(target_id = %file.target, file = %file.filename, size = file.size, "Upload received");
                ctx.set_value(&file.target, &file.filename)?;
            }
            for event in request.dispatch_order() {
                match self.dispatcher.dispatch(&mut ctx, event) {
                    Ok(()) => {}
                    Err(err) if err.is_recoverable() => {
                        tracing::warn!(event = event.name(), %err, "Event failed; reported to the form");
                        ctx.pending().error(err.to_string());
                    }
                    Err(err) => return Err(err.into()),
                }
            }
            ctx.finish()
        };

        let before = if request.all_events {
            flag_replaced_dynamics(guard.initial(), &mut after)?;
            guard.initial()
        } else {
            guard.current()
        };
        let mut instructions: Vec<Instruction> = Vec::new();
        Comparator::new(&definition, self.renderer.as_ref())
            .with_threshold(self.config.full_update_threshold)
            .with_value_changed(value_changed)
            .diff(Some(before.roots()), Some(after.roots()), &mut instructions)?;
        diff_repeat_indexes(&before.repeat_indexes(), &after.repeat_indexes(), &mut instructions);

        after.clear_structural_changes();
        let mut remaining = guard.pending.clone();
        remaining.extend(pending);
        let actions = remaining.drain();

        let dynamic_state = if self.config.include_dynamic_state {
            let mut persisted = guard.persist();
            persisted.current = after.clone();
            persisted.ids = ids.clone();
            persisted.pending = remaining.clone();
            persisted.sequence += 1;
            Some(encode_dynamic_state(&persisted)?)
        } else {
            None
        };
        let body = EventResponse {
            dynamic_state,
            control_values: instructions,
            actions,
        }
        .to_body()?;

        guard.replace_current(after);
        *guard.ids_mut() = ids;
        guard.pending = remaining;
        Ok(body)
    }

    /// Second pass of a replace-all submission: answer with the no-op shape,
    /// release the lock, then run the submission
    fn finish_submission(
        &self,
        slot: &DocumentSlot,
        mut guard: DocumentGuard<'_>,
        request: &Request,
    ) -> Result<Response, ProcessError> {
        let submission = guard.pending.take_submission();
        let body = EventResponse::default().to_body()?;
        let stored = guard.commit(StoredResponse::new(request.sequence, body));
        self.persist(&guard);
        drop(guard);

        match submission {
            Some(submission) => self.run_submission(slot, &submission),
            None => tracing::warn!("Submission pass without a scheduled submission"),
        }
        Ok(Response::new(ResponseKind::NoOp, stored.body()))
    }

    fn run_submission(&self, slot: &DocumentSlot, submission: &DeferredSubmission) {
        let Err(err) = self.submissions.run(slot.key(), submission) else {
            return;
        };
        tracing::warn!(key = %slot.key(), submission = %submission.id, %err, "Deferred submission failed");
        match slot.acquire(self.config.lock_wait(RequestKind::NonInteractive)) {
            Ok(mut guard) => {
                guard.pending.error(err.to_string());
                self.persist(&guard);
            }
            Err(lock_err) => {
                tracing::error!(key = %slot.key(), %lock_err, "Cannot record submission failure");
            }
        }
    }

    fn persist(&self, guard: &DocumentGuard<'_>) {
        if let Err(err) = self.registry.persist(guard) {
            tracing::warn!(key = %guard.slot().key(), %err, "Write-through to document store failed");
        }
    }
}

/// Flag dynamic controls whose subtree was swapped since `initial`
///
/// Diffing against the initial snapshot must regenerate those subtrees
/// rather than walk them in lockstep.
fn flag_replaced_dynamics(initial: &ControlTree, after: &mut ControlTree) -> Result<(), ProcessError> {
    let replaced: Vec<EffectiveId> = after
        .iter()
        .filter_map(|node| match (node, initial.find(node.id())) {
            (ControlNode::Dynamic(now), Some(ControlNode::Dynamic(then))) if now.source != then.source => {
                Some(node.id().clone())
            }
            _ => None,
        })
        .collect();
    for id in replaced {
        after.require_mut(&id)?.core_mut().set_structural_change(true);
    }
    Ok(())
}
