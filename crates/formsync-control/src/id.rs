//! Control identifiers
//!
//! Provides [`EffectiveId`] for addressing one control instance within a
//! snapshot, and [`IdGenerator`] for allocating static ids during tree
//! construction.

use crate::error::ControlError;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Separates the prefixed id from the iteration suffix.
pub const REPEAT_SEPARATOR: char = '·';

/// Separates iteration positions within the suffix.
pub const ITERATION_SEPARATOR: char = '-';

/// 1-based iteration positions, outermost repeat first.
pub type IterationPath = SmallVec<[u32; 4]>;

/// Fully qualified runtime identifier of a control
///
/// Composed of the prefixed static id (stable across iterations) and the
/// iteration path of every enclosing repeat.
///
/// # Examples
/// - `name` → control `name` outside any repeat
/// - `name·2` → control `name` in the second iteration of its repeat
/// - `name·2-1` → nested repeats: outer iteration 2, inner iteration 1
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct EffectiveId {
    prefixed: String,
    iterations: IterationPath,
}

impl EffectiveId {
    /// Create id for a control outside any repeat
    #[inline]
    #[must_use]
    pub fn new(prefixed: impl Into<String>) -> Self {
        Self {
            prefixed: prefixed.into(),
            iterations: IterationPath::new(),
        }
    }

    /// Create id with an explicit iteration path
    #[inline]
    #[must_use]
    pub fn with_iterations(prefixed: impl Into<String>, iterations: &[u32]) -> Self {
        Self {
            prefixed: prefixed.into(),
            iterations: IterationPath::from_slice(iterations),
        }
    }

    /// Prefixed static id
    #[inline]
    #[must_use]
    pub fn prefixed_id(&self) -> &str {
        &self.prefixed
    }

    /// Iteration positions of enclosing repeats
    #[inline]
    #[must_use]
    pub fn iterations(&self) -> &[u32] {
        &self.iterations
    }

    /// Whether the control lives inside at least one repeat
    #[inline]
    #[must_use]
    pub fn is_repeated(&self) -> bool {
        !self.iterations.is_empty()
    }

    /// Same control position, one repeat level deeper
    #[inline]
    #[must_use]
    pub fn child_iteration(&self, position: u32) -> Self {
        let mut iterations = self.iterations.clone();
        iterations.push(position);
        Self {
            prefixed: self.prefixed.clone(),
            iterations,
        }
    }

    /// Id of another static control sharing this id's iteration context
    #[inline]
    #[must_use]
    pub fn sibling(&self, prefixed: impl Into<String>) -> Self {
        Self {
            prefixed: prefixed.into(),
            iterations: self.iterations.clone(),
        }
    }

    /// Iteration suffix as sent to the client (`2-1`), empty outside repeats
    #[must_use]
    pub fn iteration_suffix(&self) -> String {
        self.iterations
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(&ITERATION_SEPARATOR.to_string())
    }
}

impl Display for EffectiveId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.iterations.is_empty() {
            f.write_str(&self.prefixed)
        } else {
            write!(f, "{}{}{}", self.prefixed, REPEAT_SEPARATOR, self.iteration_suffix())
        }
    }
}

impl FromStr for EffectiveId {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (prefixed, suffix) = match s.split_once(REPEAT_SEPARATOR) {
            Some((prefixed, suffix)) => (prefixed, Some(suffix)),
            None => (s, None),
        };

        if prefixed.is_empty() {
            return Err(ControlError::InvalidId(s.to_string()));
        }

        let mut iterations = IterationPath::new();
        if let Some(suffix) = suffix {
            for part in suffix.split(ITERATION_SEPARATOR) {
                let position: u32 = part
                    .parse()
                    .map_err(|_| ControlError::InvalidId(s.to_string()))?;
                if position == 0 {
                    return Err(ControlError::InvalidId(s.to_string()));
                }
                iterations.push(position);
            }
        }

        Ok(Self {
            prefixed: prefixed.to_string(),
            iterations,
        })
    }
}

impl From<EffectiveId> for String {
    fn from(id: EffectiveId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for EffectiveId {
    type Error = ControlError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Allocates static ids for controls built without one
///
/// Owned by the document and threaded through tree construction, so ids stay
/// unique across dynamic subtree swaps without any process-wide counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdGenerator {
    prefix: String,
    next: u64,
}

impl IdGenerator {
    /// Default prefix for generated ids
    pub const DEFAULT_PREFIX: &'static str = "xf-";

    /// Create generator with the default prefix
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::with_prefix(Self::DEFAULT_PREFIX)
    }

    /// Create generator with a custom prefix
    #[inline]
    #[must_use]
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: 1,
        }
    }

    /// Allocate next id
    pub fn next_id(&mut self) -> String {
        let id = format!("{}{}", self.prefix, self.next);
        self.next += 1;
        id
    }

    /// Number of ids allocated so far
    #[inline]
    #[must_use]
    pub fn allocated(&self) -> u64 {
        self.next - 1
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_id_display() {
        assert_eq!(EffectiveId::new("name").to_string(), "name");
        assert_eq!(
            EffectiveId::with_iterations("name", &[2, 1]).to_string(),
            "name·2-1"
        );
    }

    #[test]
    fn effective_id_parse() {
        let id: EffectiveId = "name·3-4".parse().unwrap();
        assert_eq!(id.prefixed_id(), "name");
        assert_eq!(id.iterations(), &[3, 4]);

        let plain: EffectiveId = "name".parse().unwrap();
        assert!(!plain.is_repeated());
    }

    #[test]
    fn effective_id_rejects_garbage() {
        assert!("".parse::<EffectiveId>().is_err());
        assert!("name·".parse::<EffectiveId>().is_err());
        assert!("name·0".parse::<EffectiveId>().is_err());
        assert!("name·a-1".parse::<EffectiveId>().is_err());
    }

    #[test]
    fn child_iteration_and_sibling() {
        let repeat = EffectiveId::new("r1");
        let iteration = repeat.child_iteration(3);
        assert_eq!(iteration.to_string(), "r1·3");

        let field = iteration.sibling("v");
        assert_eq!(field.to_string(), "v·3");
        assert_eq!(field.child_iteration(1).to_string(), "v·3-1");
    }

    #[test]
    fn serde_uses_string_form() {
        let id = EffectiveId::with_iterations("v", &[1, 2]);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"v·1-2\"");
        let back: EffectiveId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn id_generator_sequence() {
        let mut ids = IdGenerator::new();
        assert_eq!(ids.next_id(), "xf-1");
        assert_eq!(ids.next_id(), "xf-2");
        assert_eq!(ids.allocated(), 2);
    }
}
