//! Document instances
//!
//! A [`DocumentState`] is the server-side state of one open form: the
//! snapshot the client currently reflects, the expected sequence number and
//! side effects waiting for the next response.

use crate::actions::PendingActions;
use formsync_control::{ControlTree, EffectiveId, FormDefinition, IdGenerator};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

/// Registry key of a document: session plus document UUID
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct DocumentKey {
    session: String,
    uuid: Uuid,
}

impl DocumentKey {
    /// New key with a random UUID
    #[must_use]
    pub fn generate(session: impl Into<String>) -> Self {
        Self::new(session, Uuid::new_v4())
    }

    /// Key from its parts
    #[inline]
    #[must_use]
    pub fn new(session: impl Into<String>, uuid: Uuid) -> Self {
        Self {
            session: session.into(),
            uuid,
        }
    }

    /// Session id
    #[inline]
    #[must_use]
    pub fn session(&self) -> &str {
        &self.session
    }

    /// Document UUID
    #[inline]
    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }
}

impl Display for DocumentKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.session, self.uuid)
    }
}

impl FromStr for DocumentKey {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (session, uuid) = s.rsplit_once('/').unwrap_or(("", s));
        Ok(Self::new(session, uuid.parse()?))
    }
}

impl From<DocumentKey> for String {
    fn from(key: DocumentKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for DocumentKey {
    type Error = uuid::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Live state of one document
#[derive(Debug)]
pub struct DocumentState {
    key: DocumentKey,
    form_id: String,
    definition: Arc<FormDefinition>,
    initial: ControlTree,
    current: ControlTree,
    sequence: u64,
    ids: IdGenerator,
    /// Side effects for the next response
    pub pending: PendingActions,
}

impl DocumentState {
    /// Sequence number of the first request after the initial page
    pub const FIRST_SEQUENCE: u64 = 1;

    /// Create state for a freshly rendered document
    #[must_use]
    pub fn new(
        key: DocumentKey,
        form_id: impl Into<String>,
        definition: Arc<FormDefinition>,
        initial: ControlTree,
        ids: IdGenerator,
    ) -> Self {
        Self {
            key,
            form_id: form_id.into(),
            definition,
            current: initial.clone(),
            initial,
            sequence: Self::FIRST_SEQUENCE,
            ids,
            pending: PendingActions::new(),
        }
    }

    /// Rebuild live state from its persisted form
    #[must_use]
    pub fn restore(persisted: PersistedDocument, definition: Arc<FormDefinition>) -> Self {
        Self {
            key: persisted.key,
            form_id: persisted.form_id,
            definition,
            initial: persisted.initial,
            current: persisted.current,
            sequence: persisted.sequence,
            ids: persisted.ids,
            pending: persisted.pending,
        }
    }

    /// Registry key
    #[inline]
    #[must_use]
    pub fn key(&self) -> &DocumentKey {
        &self.key
    }

    /// Form definition id
    #[inline]
    #[must_use]
    pub fn form_id(&self) -> &str {
        &self.form_id
    }

    /// Form definition
    #[inline]
    #[must_use]
    pub fn definition(&self) -> &Arc<FormDefinition> {
        &self.definition
    }

    /// Snapshot from the initial page render
    #[inline]
    #[must_use]
    pub fn initial(&self) -> &ControlTree {
        &self.initial
    }

    /// Snapshot the client currently reflects
    #[inline]
    #[must_use]
    pub fn current(&self) -> &ControlTree {
        &self.current
    }

    /// Sequence number expected from the next request
    #[inline]
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Id generator for controls created at runtime
    #[inline]
    pub fn ids_mut(&mut self) -> &mut IdGenerator {
        &mut self.ids
    }

    /// Replace the current snapshot, returning the previous one
    ///
    /// Callers clear structural-change flags on `next` once the comparison
    /// that needed them has run.
    pub fn replace_current(&mut self, next: ControlTree) -> ControlTree {
        std::mem::replace(&mut self.current, next)
    }

    /// Advance to the next expected sequence number
    pub fn advance(&mut self) {
        self.sequence += 1;
    }

    /// Ids of controls whose value differs from the initial snapshot
    #[must_use]
    pub fn changed_since_initial(&self) -> HashSet<EffectiveId> {
        self.current
            .iter()
            .filter(|node| {
                self.initial
                    .find(node.id())
                    .map_or(true, |initial| initial.core().value() != node.core().value())
            })
            .map(|node| node.id().clone())
            .collect()
    }

    /// Serializable form of this state, without the definition
    #[must_use]
    pub fn persist(&self) -> PersistedDocument {
        PersistedDocument {
            key: self.key.clone(),
            form_id: self.form_id.clone(),
            sequence: self.sequence,
            initial: self.initial.clone(),
            current: self.current.clone(),
            ids: self.ids.clone(),
            pending: self.pending.clone(),
            last_response: None,
        }
    }
}

/// Memoized response kept with persisted state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedResponse {
    /// Sequence number the response answered
    pub sequence: u64,
    /// Hex-encoded body
    pub body: String,
}

/// Document state as written to a store or the dynamic-state blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedDocument {
    /// Registry key
    pub key: DocumentKey,
    /// Form definition id
    pub form_id: String,
    /// Expected next sequence number
    pub sequence: u64,
    /// Initial snapshot
    pub initial: ControlTree,
    /// Current snapshot
    pub current: ControlTree,
    /// Id generator state
    pub ids: IdGenerator,
    /// Actions not yet delivered, such as a failed submission's error
    #[serde(default, skip_serializing_if = "PendingActions::is_empty")]
    pub pending: PendingActions,
    /// Last response, for replaying a retry after a reload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_response: Option<PersistedResponse>,
}
