//! Request sequencing and document lifecycle phases

use crate::error::LifecycleError;
use serde::{Deserialize, Serialize};

/// What to do with a request given its sequence number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceCheck {
    /// Sequence matches: process and advance
    Process,
    /// One behind with a stored response: replay it unchanged
    Replay,
    /// Anything else: fatal desynchronization
    Violation {
        /// Sequence number the document expects next
        expected: u64,
        /// Sequence number carried by the request
        received: u64,
    },
}

impl SequenceCheck {
    /// Classify `received` against the document's `expected` sequence
    ///
    /// `stored` is the sequence number of the memoized response, if any. A
    /// retry is only honored when that response exists.
    #[must_use]
    pub fn classify(expected: u64, received: u64, stored: Option<u64>) -> Self {
        if received == expected {
            Self::Process
        } else if received.checked_add(1) == Some(expected) && stored == Some(received) {
            Self::Replay
        } else {
            Self::Violation { expected, received }
        }
    }

    /// Violation as an error
    ///
    /// # Errors
    /// Returns [`LifecycleError::SequenceViolation`] for [`Self::Violation`].
    pub fn into_result(self) -> Result<Self, LifecycleError> {
        match self {
            Self::Violation { expected, received } => {
                Err(LifecycleError::SequenceViolation { expected, received })
            }
            other => Ok(other),
        }
    }
}

/// Lifecycle phase of a document in the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentPhase {
    /// Not in memory
    Absent,
    /// Being created or restored from persisted state
    Loading,
    /// Live in the cache
    Active,
    /// Dropped from memory for capacity; persisted state remains
    Evicted,
    /// Session ended; persisted state removed
    Expired,
}

impl DocumentPhase {
    /// Phases reachable from this one
    #[must_use]
    pub fn allowed_transitions(self) -> &'static [DocumentPhase] {
        use DocumentPhase::{Absent, Active, Evicted, Expired, Loading};
        match self {
            Absent => &[Loading],
            Loading => &[Active, Expired],
            Active => &[Evicted, Expired],
            Evicted => &[Loading, Expired],
            Expired => &[],
        }
    }

    /// Check a transition
    ///
    /// # Errors
    /// Returns [`LifecycleError::IllegalTransition`] if `to` is not reachable.
    pub fn validate_transition(self, to: DocumentPhase) -> Result<(), LifecycleError> {
        if self.allowed_transitions().contains(&to) {
            Ok(())
        } else {
            Err(LifecycleError::IllegalTransition { from: self, to })
        }
    }

    /// Whether requests may be served in this phase
    #[inline]
    #[must_use]
    pub fn is_live(self) -> bool {
        matches!(self, Self::Loading | Self::Active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_window() {
        assert_eq!(SequenceCheck::classify(5, 5, Some(4)), SequenceCheck::Process);
        assert_eq!(SequenceCheck::classify(5, 4, Some(4)), SequenceCheck::Replay);
        assert_eq!(
            SequenceCheck::classify(5, 10, Some(4)),
            SequenceCheck::Violation { expected: 5, received: 10 }
        );
        assert!(matches!(SequenceCheck::classify(5, 3, Some(4)), SequenceCheck::Violation { .. }));
    }

    #[test]
    fn retry_without_stored_response_is_violation() {
        assert!(matches!(SequenceCheck::classify(2, 1, None), SequenceCheck::Violation { .. }));
        assert!(matches!(SequenceCheck::classify(0, u64::MAX, None), SequenceCheck::Violation { .. }));
    }

    #[test]
    fn into_result_maps_violation() {
        assert!(SequenceCheck::classify(1, 9, None).into_result().is_err());
        assert_eq!(SequenceCheck::classify(1, 1, None).into_result().unwrap(), SequenceCheck::Process);
    }

    #[test]
    fn phase_transitions() {
        assert!(DocumentPhase::Absent.validate_transition(DocumentPhase::Loading).is_ok());
        assert!(DocumentPhase::Evicted.validate_transition(DocumentPhase::Loading).is_ok());
        assert!(DocumentPhase::Expired.validate_transition(DocumentPhase::Active).is_err());
        assert!(DocumentPhase::Absent.validate_transition(DocumentPhase::Active).is_err());
        assert!(DocumentPhase::Active.is_live());
        assert!(!DocumentPhase::Evicted.is_live());
    }
}
