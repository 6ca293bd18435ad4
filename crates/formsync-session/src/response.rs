//! Memoized responses
//!
//! The body of the last successful response is kept as an immutable buffer
//! so a retry is answered byte for byte.

use crate::document::PersistedResponse;
use crate::error::StoreError;
use std::sync::Arc;

/// Serialized response for one sequence number
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredResponse {
    sequence: u64,
    body: Arc<[u8]>,
    digest: blake3::Hash,
}

impl StoredResponse {
    /// Memoize `body` as the answer to `sequence`
    #[must_use]
    pub fn new(sequence: u64, body: impl Into<Arc<[u8]>>) -> Self {
        let body = body.into();
        let digest = blake3::hash(&body);
        Self {
            sequence,
            body,
            digest,
        }
    }

    /// Sequence number this response answered
    #[inline]
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Response body, shared
    #[inline]
    #[must_use]
    pub fn body(&self) -> Arc<[u8]> {
        Arc::clone(&self.body)
    }

    /// Response body length in bytes
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.body.len()
    }

    /// Whether the body is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// Content digest, hex-encoded
    #[must_use]
    pub fn digest(&self) -> String {
        self.digest.to_hex().to_string()
    }

    /// Form kept alongside persisted document state
    #[must_use]
    pub fn to_persisted(&self) -> PersistedResponse {
        PersistedResponse {
            sequence: self.sequence,
            body: hex::encode(&self.body),
        }
    }

    /// Restore from persisted form
    ///
    /// # Errors
    /// Returns [`StoreError::Encoding`] if the body is not valid hex.
    pub fn from_persisted(persisted: &PersistedResponse) -> Result<Self, StoreError> {
        Ok(Self::new(persisted.sequence, hex::decode(&persisted.body)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_is_shared_not_copied() {
        let response = StoredResponse::new(3, b"{\"ok\":true}".to_vec());
        let a = response.body();
        let b = response.body();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(response.len(), 11);
    }

    #[test]
    fn persisted_form_round_trips() {
        let response = StoredResponse::new(7, b"body".to_vec());
        let restored = StoredResponse::from_persisted(&response.to_persisted()).unwrap();
        assert_eq!(restored, response);
        assert_eq!(restored.digest(), response.digest());
    }

    #[test]
    fn corrupt_body_is_rejected() {
        let persisted = PersistedResponse {
            sequence: 1,
            body: "zz".to_string(),
        };
        assert!(matches!(StoredResponse::from_persisted(&persisted), Err(StoreError::Encoding(_))));
    }
}
