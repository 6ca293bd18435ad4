//! Persisted document state
//!
//! Provides [`DocumentStore`], the backing store documents are written
//! through to and reloaded from after eviction, and the hex-encoded
//! dynamic-state blob that lets a client carry its own document state.

use crate::document::{DocumentKey, PersistedDocument};
use crate::error::StoreError;
use dashmap::DashMap;
use std::fmt::Debug;

/// Backing store for document state
pub trait DocumentStore: Send + Sync + Debug {
    /// Load persisted state
    ///
    /// # Errors
    /// Returns [`StoreError`] if the backend fails or the state is corrupt.
    fn load(&self, key: &DocumentKey) -> Result<Option<PersistedDocument>, StoreError>;

    /// Write state, replacing any previous version
    ///
    /// # Errors
    /// Returns [`StoreError`] if the backend fails.
    fn save(&self, document: &PersistedDocument) -> Result<(), StoreError>;

    /// Drop state for an ended session
    ///
    /// # Errors
    /// Returns [`StoreError`] if the backend fails.
    fn remove(&self, key: &DocumentKey) -> Result<(), StoreError>;
}

/// In-process store keeping serialized state per key
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    documents: DashMap<DocumentKey, String>,
}

impl MemoryDocumentStore {
    /// Create empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Whether the store is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn load(&self, key: &DocumentKey) -> Result<Option<PersistedDocument>, StoreError> {
        self.documents
            .get(key)
            .map(|entry| serde_json::from_str(entry.value()))
            .transpose()
            .map_err(StoreError::from)
    }

    fn save(&self, document: &PersistedDocument) -> Result<(), StoreError> {
        let encoded = serde_json::to_string(document)?;
        self.documents.insert(document.key.clone(), encoded);
        Ok(())
    }

    fn remove(&self, key: &DocumentKey) -> Result<(), StoreError> {
        self.documents.remove(key);
        Ok(())
    }
}

/// Encode document state as an opaque, round-trippable blob
///
/// The memoized response is not part of the blob.
///
/// # Errors
/// Returns [`StoreError::Serialization`] if the state cannot be serialized.
pub fn encode_dynamic_state(document: &PersistedDocument) -> Result<String, StoreError> {
    let mut document = document.clone();
    document.last_response = None;
    Ok(hex::encode(serde_json::to_vec(&document)?))
}

/// Decode a blob produced by [`encode_dynamic_state`]
///
/// # Errors
/// Returns [`StoreError`] if the blob is not valid hex or not valid state.
pub fn decode_dynamic_state(blob: &str) -> Result<PersistedDocument, StoreError> {
    let bytes = hex::decode(blob.trim())?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::PersistedResponse;
    use formsync_control::{ControlNode, ControlTree, EffectiveId, IdGenerator};

    fn document() -> PersistedDocument {
        let tree = ControlTree::new(vec![ControlNode::leaf(EffectiveId::new("c1"), "a")]).unwrap();
        PersistedDocument {
            key: DocumentKey::generate("s1"),
            form_id: "form".to_string(),
            sequence: 4,
            initial: tree.clone(),
            current: tree,
            ids: IdGenerator::new(),
            pending: crate::actions::PendingActions::new(),
            last_response: Some(PersistedResponse {
                sequence: 3,
                body: "00".to_string(),
            }),
        }
    }

    #[test]
    fn memory_store_save_load_remove() {
        let store = MemoryDocumentStore::new();
        let document = document();
        store.save(&document).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.load(&document.key).unwrap(), Some(document.clone()));

        store.remove(&document.key).unwrap();
        assert!(store.load(&document.key).unwrap().is_none());
    }

    #[test]
    fn dynamic_state_drops_response() {
        let document = document();
        let blob = encode_dynamic_state(&document).unwrap();
        assert!(blob.chars().all(|c| c.is_ascii_hexdigit()));

        let decoded = decode_dynamic_state(&blob).unwrap();
        assert_eq!(decoded.last_response, None);
        assert_eq!(decoded.current, document.current);
        assert_eq!(decoded.sequence, 4);
    }

    #[test]
    fn corrupt_blob_is_rejected() {
        assert!(matches!(decode_dynamic_state("not hex"), Err(StoreError::Encoding(_))));
        assert!(matches!(decode_dynamic_state("7b7d"), Err(StoreError::Serialization(_))));
    }
}
