//! Live document registry
//!
//! Provides [`DocumentRegistry`]: a moka cache of [`DocumentSlot`]s with
//! idle expiry, a write-through [`DocumentStore`] for documents that fall
//! out of memory, and the bounded per-document lock.
//!
//! A key maps to at most one slot, and so to one lock: a slot evicted while
//! a request still holds it is revived on the next lookup rather than
//! rebuilt from the store.

use crate::document::{DocumentKey, DocumentState, PersistedDocument};
use crate::error::LifecycleError;
use crate::response::StoredResponse;
use crate::sequence::{DocumentPhase, SequenceCheck};
use crate::store::{decode_dynamic_state, DocumentStore};
use dashmap::DashMap;
use formsync_control::FormDefinition;
use moka::notification::RemovalCause;
use moka::sync::Cache;
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// How long a request may wait for a document lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockWait {
    /// Fail at once if the lock is held (interactive requests)
    Immediate,
    /// Wait up to the given duration
    Bounded(Duration),
}

impl LockWait {
    /// Maximum wait
    #[inline]
    #[must_use]
    pub fn duration(self) -> Duration {
        match self {
            Self::Immediate => Duration::ZERO,
            Self::Bounded(wait) => wait,
        }
    }
}

/// One document held by the registry
#[derive(Debug)]
pub struct DocumentSlot {
    key: DocumentKey,
    state: Mutex<DocumentState>,
    last_response: RwLock<Option<Arc<StoredResponse>>>,
    phase: RwLock<DocumentPhase>,
}

impl DocumentSlot {
    fn new(state: DocumentState, last_response: Option<StoredResponse>) -> Self {
        Self {
            key: state.key().clone(),
            state: Mutex::new(state),
            last_response: RwLock::new(last_response.map(Arc::new)),
            phase: RwLock::new(DocumentPhase::Loading),
        }
    }

    /// Document key
    #[inline]
    #[must_use]
    pub fn key(&self) -> &DocumentKey {
        &self.key
    }

    /// Current lifecycle phase
    #[inline]
    #[must_use]
    pub fn phase(&self) -> DocumentPhase {
        *self.phase.read()
    }

    /// Put an evicted slot back into service
    ///
    /// Returns `false` once the session has expired.
    fn revive(&self) -> bool {
        let mut phase = self.phase.write();
        match *phase {
            DocumentPhase::Evicted => {
                let revived = phase
                    .validate_transition(DocumentPhase::Loading)
                    .and_then(|()| DocumentPhase::Loading.validate_transition(DocumentPhase::Active));
                if revived.is_err() {
                    return false;
                }
                tracing::debug!(key = %self.key, "Reviving evicted document");
                *phase = DocumentPhase::Active;
                true
            }
            DocumentPhase::Loading | DocumentPhase::Active => true,
            DocumentPhase::Absent | DocumentPhase::Expired => false,
        }
    }

    fn transition(&self, to: DocumentPhase) -> Result<(), LifecycleError> {
        let mut phase = self.phase.write();
        phase.validate_transition(to)?;
        tracing::debug!(key = %self.key, from = ?*phase, ?to, "Document phase change");
        *phase = to;
        Ok(())
    }

    /// Last memoized response
    ///
    /// Readable without the document lock.
    #[inline]
    #[must_use]
    pub fn last_response(&self) -> Option<Arc<StoredResponse>> {
        self.last_response.read().clone()
    }

    /// Take the document lock, waiting at most `wait`
    ///
    /// # Errors
    /// Returns [`LifecycleError::LockTimeout`] if the lock is still held
    /// when the wait runs out, [`LifecycleError::SessionExpired`] if the
    /// document expired while the caller waited, and
    /// [`LifecycleError::Evicted`] if it left memory and must be looked up
    /// again.
    pub fn acquire(&self, wait: LockWait) -> Result<DocumentGuard<'_>, LifecycleError> {
        let started = Instant::now();
        let state = match wait {
            LockWait::Immediate => self.state.try_lock(),
            LockWait::Bounded(duration) => self.state.try_lock_for(duration),
        };
        let Some(state) = state else {
            let waited_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            tracing::debug!(key = %self.key, waited_ms, "Document lock busy");
            return Err(LifecycleError::LockTimeout {
                key: self.key.to_string(),
                waited_ms,
            });
        };

        match self.phase() {
            DocumentPhase::Expired => return Err(LifecycleError::SessionExpired(self.key.to_string())),
            DocumentPhase::Evicted => return Err(LifecycleError::Evicted(self.key.to_string())),
            _ => {}
        }
        tracing::trace!(key = %self.key, "Document lock acquired");
        Ok(DocumentGuard { slot: self, state })
    }
}

/// Exclusive access to one document
///
/// Releases the lock on drop, whatever the outcome of the request.
#[derive(Debug)]
pub struct DocumentGuard<'a> {
    slot: &'a DocumentSlot,
    state: MutexGuard<'a, DocumentState>,
}

impl DocumentGuard<'_> {
    /// Classify a request's sequence number against this document
    #[must_use]
    pub fn check_sequence(&self, received: u64) -> SequenceCheck {
        let stored = self.slot.last_response().map(|response| response.sequence());
        SequenceCheck::classify(self.state.sequence(), received, stored)
    }

    /// Memoize the response for the sequence just processed and advance
    ///
    /// The response becomes visible to readers in one swap, before the lock
    /// is released.
    pub fn commit(&mut self, response: StoredResponse) -> Arc<StoredResponse> {
        let response = Arc::new(response);
        *self.slot.last_response.write() = Some(Arc::clone(&response));
        self.state.advance();
        response
    }

    /// Persisted form, including the memoized response
    #[must_use]
    pub fn persisted(&self) -> PersistedDocument {
        let mut persisted = self.state.persist();
        persisted.last_response = self.slot.last_response().map(|response| response.to_persisted());
        persisted
    }

    /// Slot this guard locks
    #[inline]
    #[must_use]
    pub fn slot(&self) -> &DocumentSlot {
        self.slot
    }
}

impl Deref for DocumentGuard<'_> {
    type Target = DocumentState;

    fn deref(&self) -> &DocumentState {
        &self.state
    }
}

impl DerefMut for DocumentGuard<'_> {
    fn deref_mut(&mut self) -> &mut DocumentState {
        &mut self.state
    }
}

impl Drop for DocumentGuard<'_> {
    fn drop(&mut self) {
        tracing::trace!(key = %self.slot.key, "Document lock released");
    }
}

/// Registry settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Documents idle longer than this expire with their session
    pub idle_timeout: Duration,
    /// Maximum live documents; older ones are evicted to the store
    pub max_documents: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(30 * 60),
            max_documents: 10_000,
        }
    }
}

/// Maps document keys to live documents
#[derive(Debug, Clone)]
pub struct DocumentRegistry {
    cache: Cache<DocumentKey, Arc<DocumentSlot>>,
    live: Arc<DashMap<DocumentKey, Weak<DocumentSlot>>>,
    store: Arc<dyn DocumentStore>,
    definitions: Arc<DashMap<String, Arc<FormDefinition>>>,
    max_documents: u64,
}

impl DocumentRegistry {
    /// Create registry writing through to `store`
    #[must_use]
    pub fn new(config: RegistryConfig, store: Arc<dyn DocumentStore>) -> Self {
        let live: Arc<DashMap<DocumentKey, Weak<DocumentSlot>>> = Arc::new(DashMap::new());
        let listener_store = Arc::clone(&store);
        let listener_live = Arc::clone(&live);
        let cache = Cache::builder()
            .max_capacity(config.max_documents)
            .time_to_idle(config.idle_timeout)
            .eviction_listener(move |key: Arc<DocumentKey>, slot: Arc<DocumentSlot>, cause| {
                Self::on_removal(listener_store.as_ref(), &listener_live, &key, &slot, cause);
            })
            .build();
        Self {
            cache,
            live,
            store,
            definitions: Arc::new(DashMap::new()),
            max_documents: config.max_documents,
        }
    }

    fn on_removal(
        store: &dyn DocumentStore,
        live: &DashMap<DocumentKey, Weak<DocumentSlot>>,
        key: &DocumentKey,
        slot: &DocumentSlot,
        cause: RemovalCause,
    ) {
        if slot.phase() == DocumentPhase::Expired {
            return;
        }
        let to = match cause {
            RemovalCause::Expired | RemovalCause::Explicit => DocumentPhase::Expired,
            RemovalCause::Size => DocumentPhase::Evicted,
            RemovalCause::Replaced => return,
        };
        if let Err(err) = slot.transition(to) {
            tracing::warn!(%key, %err, "Unexpected removal");
            return;
        }
        if to == DocumentPhase::Expired {
            tracing::info!(%key, "Document expired");
            live.remove_if(key, |_, weak| std::ptr::eq(weak.as_ptr(), slot));
            if let Err(err) = store.remove(key) {
                tracing::warn!(%key, %err, "Failed to drop persisted state");
            }
        } else {
            tracing::debug!(%key, "Document evicted to store");
        }
    }

    /// Register a form definition under `form_id`
    pub fn register_definition(&self, form_id: impl Into<String>, definition: Arc<FormDefinition>) {
        self.definitions.insert(form_id.into(), definition);
    }

    /// Definition registered under `form_id`
    ///
    /// # Errors
    /// Returns [`LifecycleError::UnknownForm`] if none is registered.
    pub fn definition(&self, form_id: &str) -> Result<Arc<FormDefinition>, LifecycleError> {
        self.definitions
            .get(form_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| LifecycleError::UnknownForm(form_id.to_string()))
    }

    /// Add a freshly rendered document
    ///
    /// # Errors
    /// Returns [`LifecycleError::Store`] if the write-through fails.
    pub fn insert(&self, state: DocumentState) -> Result<Arc<DocumentSlot>, LifecycleError> {
        self.store.save(&state.persist())?;
        let slot = Arc::new(DocumentSlot::new(state, None));
        slot.transition(DocumentPhase::Active)?;
        tracing::info!(key = %slot.key, "Document created");
        self.track(&slot);
        self.cache.insert(slot.key.clone(), Arc::clone(&slot));
        Ok(slot)
    }

    /// Remember `slot` as the one slot for its key while anything holds it
    fn track(&self, slot: &Arc<DocumentSlot>) {
        self.live.insert(slot.key.clone(), Arc::downgrade(slot));
        let tracked = u64::try_from(self.live.len()).unwrap_or(u64::MAX);
        if tracked > self.max_documents.saturating_mul(2) {
            self.prune_live();
        }
    }

    fn prune_live(&self) {
        self.live.retain(|_, weak| weak.strong_count() > 0);
    }

    /// Slot for `key` that is out of the cache but still referenced
    fn live_slot(&self, key: &DocumentKey) -> Option<Arc<DocumentSlot>> {
        let slot = self.live.get(key).and_then(|weak| weak.upgrade());
        match slot {
            Some(slot) if slot.revive() => Some(slot),
            _ => {
                self.live.remove_if(key, |_, weak| {
                    weak.upgrade()
                        .map_or(true, |slot| slot.phase() == DocumentPhase::Expired)
                });
                None
            }
        }
    }

    /// Live document for `key`, reloading it from the store if evicted
    ///
    /// Concurrent lookups of an evicted document share one reload. An
    /// evicted slot that is still referenced is revived instead, so the key
    /// keeps its single lock.
    ///
    /// # Errors
    /// Returns [`LifecycleError::SessionExpired`] if the document is neither
    /// live nor persisted.
    pub fn get(&self, key: &DocumentKey) -> Result<Arc<DocumentSlot>, LifecycleError> {
        if let Some(slot) = self.cache.get(key) {
            if slot.revive() {
                return Ok(slot);
            }
            self.cache.invalidate(key);
            return Err(LifecycleError::SessionExpired(key.to_string()));
        }

        self.cache
            .try_get_with(key.clone(), || self.load(key))
            .map_err(|err| match Arc::try_unwrap(err) {
                Ok(err) => err,
                Err(shared) => LifecycleError::SessionExpired(format!("{key}: {shared}")),
            })
    }

    fn load(&self, key: &DocumentKey) -> Result<Arc<DocumentSlot>, LifecycleError> {
        if let Some(slot) = self.live_slot(key) {
            tracing::debug!(%key, "Evicted document still referenced; reusing its slot");
            return Ok(slot);
        }
        let persisted = self
            .store
            .load(key)?
            .ok_or_else(|| LifecycleError::SessionExpired(key.to_string()))?;
        tracing::debug!(%key, sequence = persisted.sequence, "Reloading document from store");
        self.restore(persisted)
    }

    /// Rebuild the document `key` from a client-held dynamic-state blob
    ///
    /// # Errors
    /// Returns [`LifecycleError::SessionExpired`] if the blob belongs to
    /// another document, and [`LifecycleError`] if it is corrupt or names an
    /// unknown form.
    pub fn restore_dynamic_state(
        &self,
        key: &DocumentKey,
        blob: &str,
    ) -> Result<Arc<DocumentSlot>, LifecycleError> {
        let persisted = decode_dynamic_state(blob)?;
        if persisted.key != *key {
            tracing::warn!(%key, found = %persisted.key, "Dynamic state names another document");
            return Err(LifecycleError::SessionExpired(key.to_string()));
        }
        if let Some(slot) = self.live_slot(key) {
            tracing::debug!(%key, "Document still referenced; ignoring dynamic state");
            self.cache.insert(key.clone(), Arc::clone(&slot));
            return Ok(slot);
        }
        let slot = self.restore(persisted)?;
        let guard = slot.acquire(LockWait::Immediate)?;
        self.store.save(&guard.persisted())?;
        drop(guard);
        tracing::info!(%key, "Document rebuilt from dynamic state");
        self.cache.insert(key.clone(), Arc::clone(&slot));
        Ok(slot)
    }

    fn restore(&self, mut persisted: PersistedDocument) -> Result<Arc<DocumentSlot>, LifecycleError> {
        let definition = self.definition(&persisted.form_id)?;
        let last_response = persisted
            .last_response
            .take()
            .map(|response| StoredResponse::from_persisted(&response))
            .transpose()?;
        let slot = Arc::new(DocumentSlot::new(
            DocumentState::restore(persisted, definition),
            last_response,
        ));
        slot.transition(DocumentPhase::Active)?;
        self.track(&slot);
        Ok(slot)
    }

    /// Write the locked document through to the store
    ///
    /// # Errors
    /// Returns [`LifecycleError::Store`] if the backend fails.
    pub fn persist(&self, guard: &DocumentGuard<'_>) -> Result<(), LifecycleError> {
        self.store.save(&guard.persisted())?;
        Ok(())
    }

    /// End a document's session
    pub fn remove(&self, key: &DocumentKey) {
        self.cache.invalidate(key);
        if let Err(err) = self.store.remove(key) {
            tracing::warn!(%key, %err, "Failed to drop persisted state");
        }
    }

    /// Whether `key` is live in memory
    #[inline]
    #[must_use]
    pub fn contains(&self, key: &DocumentKey) -> bool {
        self.cache.contains_key(key)
    }

    /// Approximate number of live documents
    #[inline]
    #[must_use]
    pub fn len(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Whether no document is live
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run pending expiry and eviction work now
    pub fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks();
        self.prune_live();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryDocumentStore;
    use formsync_control::{ControlNode, ControlTree, EffectiveId, IdGenerator};

    fn registry() -> (DocumentRegistry, Arc<MemoryDocumentStore>) {
        let store = Arc::new(MemoryDocumentStore::new());
        let registry = DocumentRegistry::new(RegistryConfig::default(), store.clone());
        registry.register_definition("form", Arc::new(FormDefinition::new()));
        (registry, store)
    }

    fn state(registry: &DocumentRegistry) -> DocumentState {
        let tree = ControlTree::new(vec![ControlNode::leaf(EffectiveId::new("c1"), "a")]).unwrap();
        DocumentState::new(
            DocumentKey::generate("s1"),
            "form",
            registry.definition("form").unwrap(),
            tree,
            IdGenerator::new(),
        )
    }

    #[test]
    fn insert_then_get_returns_same_slot() {
        let (registry, store) = registry();
        let slot = registry.insert(state(&registry)).unwrap();
        let found = registry.get(slot.key()).unwrap();
        assert!(Arc::ptr_eq(&slot, &found));
        assert_eq!(found.phase(), DocumentPhase::Active);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn unknown_key_is_session_expired() {
        let (registry, _) = registry();
        let err = registry.get(&DocumentKey::generate("nobody")).unwrap_err();
        assert!(matches!(err, LifecycleError::SessionExpired(_)));
    }

    #[test]
    fn second_immediate_acquire_times_out() {
        let (registry, _) = registry();
        let slot = registry.insert(state(&registry)).unwrap();
        let _held = slot.acquire(LockWait::Immediate).unwrap();
        let err = slot.acquire(LockWait::Immediate).unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn commit_publishes_response_and_advances() {
        let (registry, _) = registry();
        let slot = registry.insert(state(&registry)).unwrap();
        let mut guard = slot.acquire(LockWait::Immediate).unwrap();
        assert_eq!(guard.check_sequence(1), SequenceCheck::Process);

        guard.commit(StoredResponse::new(1, b"r1".to_vec()));
        assert_eq!(guard.sequence(), 2);
        assert_eq!(guard.check_sequence(1), SequenceCheck::Replay);
        drop(guard);

        assert_eq!(slot.last_response().map(|r| r.sequence()), Some(1));
    }

    #[test]
    fn invalidated_document_expires_with_its_state() {
        let (registry, _) = registry();
        let slot = registry.insert(state(&registry)).unwrap();
        let key = slot.key().clone();
        {
            let mut guard = slot.acquire(LockWait::Immediate).unwrap();
            guard.commit(StoredResponse::new(1, b"r1".to_vec()));
            registry.persist(&guard).unwrap();
        }

        registry.remove(&key);
        registry.run_pending_tasks();
        assert!(!registry.contains(&key));
        assert_eq!(slot.phase(), DocumentPhase::Expired);
        assert!(matches!(registry.get(&key), Err(LifecycleError::SessionExpired(_))));
        assert!(matches!(
            slot.acquire(LockWait::Immediate),
            Err(LifecycleError::SessionExpired(_))
        ));
    }

    #[test]
    fn reload_restores_sequence_and_response() {
        let (registry, store) = registry();
        let state = state(&registry);
        let key = state.key().clone();
        let mut persisted = state.persist();
        persisted.sequence = 5;
        persisted.last_response = Some(StoredResponse::new(4, b"r4".to_vec()).to_persisted());
        store.save(&persisted).unwrap();

        let slot = registry.get(&key).unwrap();
        let guard = slot.acquire(LockWait::Immediate).unwrap();
        assert_eq!(guard.sequence(), 5);
        assert_eq!(guard.check_sequence(4), SequenceCheck::Replay);
    }

    #[test]
    fn dynamic_state_rebuilds_document() {
        let (registry, _) = registry();
        let state = state(&registry);
        let key = state.key().clone();
        let blob = crate::store::encode_dynamic_state(&state.persist()).unwrap();

        let slot = registry.restore_dynamic_state(&key, &blob).unwrap();
        assert_eq!(slot.key(), &key);
        assert!(registry.contains(&key));

        let other = DocumentKey::generate("s2");
        assert!(matches!(
            registry.restore_dynamic_state(&other, &blob),
            Err(LifecycleError::SessionExpired(_))
        ));
        assert!(!registry.contains(&other));
    }
}
