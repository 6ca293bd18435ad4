//! formsync snapshot comparison
//!
//! Turns two control snapshots into the protocol instructions the client
//! applies to its DOM.
//!
//! # Core Concepts
//!
//! - [`Comparator`]: lockstep walk of "before" and "after" snapshots
//! - [`Instruction`]: attribute/value diffs, repeat template operations, inner-HTML replacement
//! - [`BufferedSink`]: speculative output of a subtree that may be fully updated instead
//! - [`FullUpdateRenderer`]: regenerates a subtree from its recorded markup
//!
//! # Example
//!
//! ```rust
//! use formsync_control::{ControlNode, EffectiveId, FormDefinition};
//! use formsync_diff::{Comparator, DiffOutcome, MarkupRenderer};
//!
//! let definition = FormDefinition::new();
//! let renderer = MarkupRenderer::default();
//! let after = vec![ControlNode::leaf(EffectiveId::new("c1"), "a")];
//!
//! let mut out = Vec::new();
//! let outcome = Comparator::new(&definition, &renderer)
//!     .diff(None, Some(after.as_slice()), &mut out)
//!     .unwrap();
//! assert_eq!(outcome, DiffOutcome::Done);
//! assert!(out[0].as_control().unwrap().newly_visible);
//! ```

#![warn(unreachable_pub)]

mod comparator;
mod error;
mod indexes;
mod instruction;
pub mod render;
mod sink;

pub use comparator::{Comparator, DiffOutcome, DEFAULT_FULL_UPDATE_THRESHOLD};
pub use error::{DiffError, RenderError};
pub use indexes::diff_repeat_indexes;
pub use instruction::{ControlDiff, Instruction};
pub use render::handlers::{ElementHandler, ElementHandlerRegistry};
pub use render::{FullUpdateRenderer, MarkupRenderer, RenderConfig};
pub use sink::{BufferedSink, InstructionSink};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
