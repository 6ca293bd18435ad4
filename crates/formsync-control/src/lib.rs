//! formsync control model
//!
//! Immutable-per-request snapshots of the server-side UI tree.
//!
//! # Core Concepts
//!
//! - [`EffectiveId`]: runtime id, unique within a snapshot, encodes iterations
//! - [`ControlNode`]: closed set of control variants (leaf, container, repeat, dynamic)
//! - [`ControlTree`]: ordered snapshot of a document's controls
//! - [`TreeBuilder`]: snapshot construction with an explicit [`IdGenerator`]
//! - [`Mark`]: replayable recording of a control's template markup
//!
//! # Example
//!
//! ```rust
//! use formsync_control::{ControlTree, IdGenerator, TreeBuilder};
//!
//! let mut ids = IdGenerator::new();
//! let mut builder = TreeBuilder::new(&mut ids);
//! let tree = ControlTree::new(vec![builder.leaf(Some("c1"), "a")]).unwrap();
//! assert_eq!(tree.len(), 1);
//! ```

#![warn(unreachable_pub)]

mod control;
mod definition;
mod error;
mod id;
mod mark;
mod state;
mod tree;

pub use control::{
    ContainerControl, ControlCore, ControlKind, ControlNode, DynamicControl, LeafControl,
    RepeatControl,
};
pub use definition::FormDefinition;
pub use error::{ControlError, MarkupError};
pub use id::{EffectiveId, IdGenerator, IterationPath, ITERATION_SEPARATOR, REPEAT_SEPARATOR};
pub use mark::{Mark, MarkRecorder, MarkStore, MarkupEvent, MarkupHandler, PlaceholderKind};
pub use state::{changed_attributes, ControlState, ExternalAttributes};
pub use tree::{ControlTree, TreeBuilder};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
