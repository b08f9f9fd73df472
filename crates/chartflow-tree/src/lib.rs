//! Structural diff, merge and apply over configuration trees
//!
//! Type-agnostic operations with no knowledge of charts.
//!
//! # Core Concepts
//!
//! - [`Tree`]: declarative configuration value with a [`Tree::Delete`] sentinel
//! - [`diff`]: minimal patch between two trees (`None` when equal)
//! - [`merge`]: precedence-ordered merge of partial trees, last wins
//! - [`apply`]: patch a live [`LiveNode`] graph in place, honoring skip paths,
//!   constructors and the [`Patchable`] capability
//! - [`PropertyPath`]: dotted/bracket addressing with `[]` wildcards
//!
//! # Example
//!
//! ```rust
//! use chartflow_tree::{diff, merge, Tree};
//! use serde_json::json;
//!
//! let a = Tree::from(json!({"title": "old", "legend": {"enabled": true}}));
//! let b = Tree::from(json!({"title": "new", "legend": {"enabled": true}}));
//!
//! let patch = diff(&a, &b).unwrap_or_default();
//! assert_eq!(patch, Tree::from(json!({"title": "new"})));
//! assert_eq!(merge(&[a, patch]), b);
//! ```

#![warn(unreachable_pub)]

mod apply;
mod diff;
mod merge;
mod path;
mod tree;

pub use apply::{
    apply, apply_at, ApplyOptions, ApplyReport, ApplyWarning, Constructor, ConstructorMap,
    LiveNode, PatchRejected, Patchable, Record,
};
pub use diff::diff;
pub use merge::{merge, merge_with, MergeOptions};
pub use path::{PathError, PropertyPath, Segment};
pub use tree::{Tree, TreeKind, TreeMap};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
