//! Document lifecycle across threads and evictions

use formsync_control::{ControlTree, FormDefinition, IdGenerator};
use formsync_session::{
    DocumentKey, DocumentPhase, DocumentRegistry, DocumentSlot, DocumentState, LifecycleError, LockWait,
    MemoryDocumentStore, RegistryConfig, SequenceCheck, StoredResponse,
};
use proptest::prelude::*;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

fn registry(max_documents: u64) -> DocumentRegistry {
    let config = RegistryConfig {
        max_documents,
        ..RegistryConfig::default()
    };
    let registry = DocumentRegistry::new(config, Arc::new(MemoryDocumentStore::new()));
    registry.register_definition("form", Arc::new(FormDefinition::new()));
    registry
}

fn document(registry: &DocumentRegistry) -> DocumentState {
    DocumentState::new(
        DocumentKey::generate("session"),
        "form",
        registry.definition("form").unwrap(),
        ControlTree::empty(),
        IdGenerator::new(),
    )
}

#[test]
fn contending_immediate_acquires_never_block() {
    let registry = registry(16);
    let slot = registry.insert(document(&registry)).unwrap();
    let barrier = Barrier::new(2);

    let results: Vec<bool> = thread::scope(|scope| {
        let handles: Vec<_> = (0..2)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    match slot.acquire(LockWait::Immediate) {
                        Ok(_guard) => {
                            thread::sleep(Duration::from_millis(100));
                            true
                        }
                        Err(err) => {
                            assert!(err.is_retryable());
                            false
                        }
                    }
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(results.iter().filter(|won| **won).count(), 1);
}

#[test]
fn bounded_wait_gets_lock_after_release() {
    let registry = registry(16);
    let slot = registry.insert(document(&registry)).unwrap();

    thread::scope(|scope| {
        let guard = slot.acquire(LockWait::Immediate).unwrap();
        let waiter = scope.spawn(|| slot.acquire(LockWait::Bounded(Duration::from_secs(5))).is_ok());
        thread::sleep(Duration::from_millis(50));
        drop(guard);
        assert!(waiter.join().unwrap());
    });
}

#[test]
fn capacity_eviction_keeps_documents_reachable() {
    let registry = registry(1);
    let mut keys = Vec::new();
    for sequence in 1..=3u64 {
        let slot = registry.insert(document(&registry)).unwrap();
        let mut guard = slot.acquire(LockWait::Immediate).unwrap();
        guard.commit(StoredResponse::new(1, format!("response {sequence}").into_bytes()));
        registry.persist(&guard).unwrap();
        keys.push(slot.key().clone());
    }
    registry.run_pending_tasks();

    for key in &keys {
        let slot = registry.get(key).unwrap();
        let guard = slot.acquire(LockWait::Immediate).unwrap();
        assert_eq!(guard.sequence(), 2);
        assert_eq!(guard.check_sequence(1), SequenceCheck::Replay);
    }
}

/// Insert `count` documents into a one-document registry and let the cache
/// evict all but one
fn evicted_documents(registry: &DocumentRegistry, count: usize) -> Vec<Arc<DocumentSlot>> {
    let slots: Vec<_> = (0..count)
        .map(|_| registry.insert(document(registry)).unwrap())
        .collect();
    registry.run_pending_tasks();
    assert!(slots.iter().any(|slot| !registry.contains(slot.key())));
    slots
}

#[test]
fn evicted_document_keeps_its_single_lock() {
    let registry = registry(1);
    let slots: Vec<_> = (0..4)
        .map(|_| registry.insert(document(&registry)).unwrap())
        .collect();
    let guards: Vec<_> = slots
        .iter()
        .map(|slot| slot.acquire(LockWait::Immediate).unwrap())
        .collect();
    registry.run_pending_tasks();
    assert!(slots.iter().any(|slot| !registry.contains(slot.key())));

    for slot in &slots {
        let found = registry.get(slot.key()).unwrap();
        assert!(Arc::ptr_eq(slot, &found), "{} got a second slot", slot.key());
        let err = found.acquire(LockWait::Immediate).unwrap_err();
        assert!(matches!(err, LifecycleError::LockTimeout { .. }));
    }

    drop(guards);
    for slot in &slots {
        assert!(registry.get(slot.key()).unwrap().acquire(LockWait::Immediate).is_ok());
    }
}

#[test]
fn evicted_slot_refuses_lock_until_looked_up_again() {
    let registry = registry(1);
    let slots = evicted_documents(&registry, 4);
    let evicted = slots
        .iter()
        .find(|slot| slot.phase() == DocumentPhase::Evicted)
        .unwrap();

    let err = evicted.acquire(LockWait::Immediate).unwrap_err();
    assert!(matches!(err, LifecycleError::Evicted(_)));
    assert!(err.is_retryable());

    let found = registry.get(evicted.key()).unwrap();
    assert!(Arc::ptr_eq(evicted, &found));
    assert_eq!(found.phase(), DocumentPhase::Active);
    assert!(found.acquire(LockWait::Immediate).is_ok());
}

#[test]
fn unreferenced_evicted_document_reloads_from_store() {
    let registry = registry(1);
    let keys: Vec<DocumentKey> = evicted_documents(&registry, 3)
        .into_iter()
        .map(|slot| slot.key().clone())
        .collect();
    registry.run_pending_tasks();

    for key in &keys {
        let slot = registry.get(key).unwrap();
        assert_eq!(slot.phase(), DocumentPhase::Active);
        assert_eq!(slot.acquire(LockWait::Immediate).unwrap().sequence(), 1);
    }
}

#[test]
fn queued_error_survives_reload_from_store() {
    let store = Arc::new(MemoryDocumentStore::new());
    let first = DocumentRegistry::new(RegistryConfig::default(), store.clone());
    first.register_definition("form", Arc::new(FormDefinition::new()));
    let slot = first.insert(document(&first)).unwrap();
    {
        let mut guard = slot.acquire(LockWait::Immediate).unwrap();
        guard.pending.error("submission to /save failed");
        first.persist(&guard).unwrap();
    }

    let second = DocumentRegistry::new(RegistryConfig::default(), store);
    second.register_definition("form", Arc::new(FormDefinition::new()));
    let reloaded = second.get(slot.key()).unwrap();
    let mut guard = reloaded.acquire(LockWait::Immediate).unwrap();
    assert_eq!(guard.pending.drain().errors, vec!["submission to /save failed".to_string()]);
}

#[test]
fn unknown_form_in_dynamic_state_is_rejected() {
    let registry = registry(4);
    let mut persisted = document(&registry).persist();
    persisted.form_id = "missing".to_string();
    let key = persisted.key.clone();
    let blob = formsync_session::encode_dynamic_state(&persisted).unwrap();

    let err = registry.restore_dynamic_state(&key, &blob).unwrap_err();
    assert!(matches!(err, LifecycleError::UnknownForm(_)));
}

proptest! {
    #[test]
    fn classify_accepts_only_current_or_one_behind(
        expected in 1u64..1_000,
        received in 0u64..1_000,
        stored in proptest::option::of(0u64..1_000),
    ) {
        let check = SequenceCheck::classify(expected, received, stored);
        let expected_check = if received == expected {
            SequenceCheck::Process
        } else if received + 1 == expected && stored == Some(received) {
            SequenceCheck::Replay
        } else {
            SequenceCheck::Violation { expected, received }
        };
        prop_assert_eq!(check, expected_check);
    }
}
