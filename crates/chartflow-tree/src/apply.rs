//! Applying patches onto live object graphs
//!
//! A live graph is a tree of [`LiveNode`]s. Plain data lives in
//! [`LiveNode::Value`]; typed objects with a fixed property set are
//! [`Record`]s; domain value objects that validate their own input implement
//! [`Patchable`] and are wrapped in [`LiveNode::Custom`].
//!
//! [`apply`] never fails. Malformed input degrades to a per-key skip recorded
//! in the returned [`ApplyReport`] and logged once.

use crate::path::PropertyPath;
use crate::tree::{Tree, TreeKind, TreeMap};
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Capability for domain objects that normalize or validate their own input
///
/// [`apply`] delegates to `set` before any generic handling. A
/// [`Tree::Delete`] value asks the object to restore its default.
pub trait Patchable: Send + Sync + fmt::Debug {
    /// Accept a new (possibly partial) value
    ///
    /// # Errors
    /// Returns [`PatchRejected`] when the value is not acceptable. The object
    /// must be left unchanged in that case.
    fn set(&mut self, value: &Tree) -> Result<(), PatchRejected>;

    /// Current value as a tree
    fn snapshot(&self) -> Tree;
}

/// Rejection reported by a [`Patchable`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}")]
pub struct PatchRejected {
    /// Human readable reason
    pub reason: String,
}

impl PatchRejected {
    /// Create a rejection
    #[inline]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Node of a live object graph
#[derive(Debug)]
pub enum LiveNode {
    /// Open plain data; objects accept any key
    Value(Tree),
    /// Typed object with declared properties
    Record(Record),
    /// Array of constructed elements
    List(Vec<LiveNode>),
    /// Domain value object
    Custom(Box<dyn Patchable>),
}

impl LiveNode {
    /// Snapshot the node as a plain tree
    #[must_use]
    pub fn to_tree(&self) -> Tree {
        match self {
            Self::Value(tree) => tree.clone(),
            Self::Record(record) => record.to_tree(),
            Self::List(items) => Tree::Array(items.iter().map(Self::to_tree).collect()),
            Self::Custom(obj) => obj.snapshot(),
        }
    }

    /// Snapshot of one property, for records and object values
    #[must_use]
    pub fn get_tree(&self, key: &str) -> Option<Tree> {
        match self {
            Self::Value(tree) => tree.get(key).cloned(),
            Self::Record(record) => record.get(key).map(Self::to_tree),
            _ => None,
        }
    }

    /// Record view, if this is a record
    #[inline]
    #[must_use]
    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Self::Record(record) => Some(record),
            _ => None,
        }
    }

    /// Mutable record view, if this is a record
    #[inline]
    pub fn as_record_mut(&mut self) -> Option<&mut Record> {
        match self {
            Self::Record(record) => Some(record),
            _ => None,
        }
    }
}

impl From<Tree> for LiveNode {
    fn from(tree: Tree) -> Self {
        Self::Value(tree)
    }
}

impl From<Record> for LiveNode {
    fn from(record: Record) -> Self {
        Self::Record(record)
    }
}

/// Typed object with a fixed property set
///
/// The value each property was declared with is remembered as its default
/// and restored when a patch deletes the property.
#[derive(Debug)]
pub struct Record {
    kind: String,
    props: IndexMap<String, LiveNode>,
    defaults: TreeMap,
}

impl Record {
    /// Create an empty record of the given kind
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            props: IndexMap::new(),
            defaults: TreeMap::new(),
        }
    }

    /// Declare a property with its default value
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, node: impl Into<LiveNode>) -> Self {
        self.declare(key, node);
        self
    }

    /// Declare a property in place
    pub fn declare(&mut self, key: impl Into<String>, node: impl Into<LiveNode>) {
        let key = key.into();
        let node = node.into();
        self.defaults.insert(key.clone(), node.to_tree());
        self.props.insert(key, node);
    }

    /// Record kind label
    #[inline]
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Property node
    #[inline]
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&LiveNode> {
        self.props.get(key)
    }

    /// Mutable property node
    #[inline]
    pub fn get_mut(&mut self, key: &str) -> Option<&mut LiveNode> {
        self.props.get_mut(key)
    }

    /// Declared property names
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.props.keys().map(String::as_str)
    }

    /// Snapshot as an object tree
    #[must_use]
    pub fn to_tree(&self) -> Tree {
        Tree::Object(
            self.props
                .iter()
                .map(|(k, v)| (k.clone(), v.to_tree()))
                .collect(),
        )
    }
}

/// Factory for a live node at a registered path
pub type Constructor = Arc<dyn Fn() -> LiveNode + Send + Sync>;

/// Constructors keyed by path pattern
///
/// A constructor registered for `a.b` instantiates the node at `a.b` when an
/// object arrives there; one registered for `a.items[]` builds each element
/// of an array arriving at `a.items`.
#[derive(Clone, Default)]
pub struct ConstructorMap {
    entries: Vec<(PropertyPath, Constructor)>,
}

impl ConstructorMap {
    /// Create an empty map
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor for a path pattern
    pub fn insert<F>(&mut self, pattern: PropertyPath, ctor: F)
    where
        F: Fn() -> LiveNode + Send + Sync + 'static,
    {
        self.entries.retain(|(p, _)| p != &pattern);
        self.entries.push((pattern, Arc::new(ctor)));
    }

    /// Constructor whose pattern matches `path`
    #[must_use]
    pub fn lookup(&self, path: &PropertyPath) -> Option<&Constructor> {
        self.entries
            .iter()
            .find(|(pattern, _)| pattern.matches(path))
            .map(|(_, ctor)| ctor)
    }

    /// Number of registered constructors
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is registered
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for ConstructorMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|(p, _)| p.to_string()))
            .finish()
    }
}

/// Options for [`apply`]
#[derive(Debug, Clone, Default)]
pub struct ApplyOptions {
    /// Path patterns never touched by `apply`
    pub skip: Vec<PropertyPath>,
    /// Constructors for nested instantiation
    pub constructors: ConstructorMap,
    /// Extra kinds a slot may change to, by path pattern
    pub allowed_types: Vec<(PropertyPath, Vec<TreeKind>)>,
}

impl ApplyOptions {
    /// Create default options
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a skip pattern
    #[must_use]
    pub fn skip(mut self, pattern: PropertyPath) -> Self {
        self.skip.push(pattern);
        self
    }

    /// Register a constructor
    #[must_use]
    pub fn constructor<F>(mut self, pattern: PropertyPath, ctor: F) -> Self
    where
        F: Fn() -> LiveNode + Send + Sync + 'static,
    {
        self.constructors.insert(pattern, ctor);
        self
    }

    /// Allow extra kinds at a path pattern
    #[must_use]
    pub fn allow(mut self, pattern: PropertyPath, kinds: Vec<TreeKind>) -> Self {
        self.allowed_types.push((pattern, kinds));
        self
    }

    fn is_skipped(&self, path: &PropertyPath) -> bool {
        self.skip.iter().any(|p| p.matches(path))
    }

    fn allows(&self, path: &PropertyPath, kind: TreeKind) -> bool {
        self.allowed_types
            .iter()
            .any(|(p, kinds)| p.matches(path) && kinds.contains(&kind))
    }
}

/// Recovered problem encountered by [`apply`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApplyWarning {
    /// Record has no such property
    #[error("unable to set [{path}] - property is unknown")]
    UnknownProperty {
        /// Offending path
        path: PropertyPath,
    },

    /// Incoming value has an incompatible kind
    #[error(
        "unable to set [{path}] - can't apply type of [{found}], allowed types are [{expected}]"
    )]
    TypeMismatch {
        /// Offending path
        path: PropertyPath,
        /// Kind currently held
        expected: TreeKind,
        /// Kind supplied
        found: TreeKind,
    },

    /// A [`Patchable`] refused the value
    #[error("unable to set [{path}] - {reason}")]
    Rejected {
        /// Offending path
        path: PropertyPath,
        /// Rejection reason
        reason: String,
    },
}

impl ApplyWarning {
    /// Path the warning refers to
    #[must_use]
    pub fn path(&self) -> &PropertyPath {
        match self {
            Self::UnknownProperty { path }
            | Self::TypeMismatch { path, .. }
            | Self::Rejected { path, .. } => path,
        }
    }
}

/// Outcome of one [`apply`] call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Distinct warnings, in encounter order
    pub warnings: Vec<ApplyWarning>,
    /// Number of assignments and removals performed
    pub applied: usize,
}

impl ApplyReport {
    /// True when no warning was raised
    #[inline]
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }

    /// Fold another report into this one
    pub fn absorb(&mut self, other: ApplyReport) {
        self.applied += other.applied;
        for w in other.warnings {
            if !self.warnings.contains(&w) {
                self.warnings.push(w);
            }
        }
    }

    fn warn(&mut self, warning: ApplyWarning) {
        if !self.warnings.contains(&warning) {
            warn!("{warning}");
            self.warnings.push(warning);
        }
    }
}

/// Apply `patch` onto `target` in place
#[inline]
pub fn apply(target: &mut LiveNode, patch: &Tree, opts: &ApplyOptions) -> ApplyReport {
    apply_at(target, patch, &PropertyPath::root(), opts)
}

/// Apply `patch` onto `target`, which lives at `base` in the larger graph
///
/// `base` only affects skip, constructor and allowed-type matching and the
/// paths reported in warnings.
pub fn apply_at(
    target: &mut LiveNode,
    patch: &Tree,
    base: &PropertyPath,
    opts: &ApplyOptions,
) -> ApplyReport {
    let mut applier = Applier {
        opts,
        report: ApplyReport::default(),
    };
    applier.node(target, patch, base);
    applier.report
}

struct Applier<'a> {
    opts: &'a ApplyOptions,
    report: ApplyReport,
}

impl Applier<'_> {
    fn node(&mut self, slot: &mut LiveNode, value: &Tree, path: &PropertyPath) {
        if let LiveNode::Value(_) = slot {
            if let Some(built) = self.construct(value, path) {
                *slot = built;
            }
        }

        match slot {
            LiveNode::Custom(obj) => match obj.set(value) {
                Ok(()) => self.report.applied += 1,
                Err(e) => self.report.warn(ApplyWarning::Rejected {
                    path: path.clone(),
                    reason: e.reason,
                }),
            },
            LiveNode::Record(record) => match value {
                Tree::Object(map) => self.record(record, map, path),
                Tree::Null | Tree::Delete => self.reset_record(record, path),
                other => self.mismatch(path, TreeKind::Object, other.kind()),
            },
            LiveNode::List(items) => match value {
                Tree::Array(values) => self.list(items, values, path),
                Tree::Null | Tree::Delete => {
                    items.clear();
                    self.report.applied += 1;
                }
                other => self.mismatch(path, TreeKind::Array, other.kind()),
            },
            LiveNode::Value(tree) => self.tree(tree, value, path),
        }
    }

    /// Build a fresh node when a constructor is registered for `path`
    fn construct(&self, value: &Tree, path: &PropertyPath) -> Option<LiveNode> {
        match value {
            Tree::Object(_) => self.opts.constructors.lookup(path).map(|ctor| ctor()),
            Tree::Array(_) => self
                .opts
                .constructors
                .lookup(&path.any_index())
                .map(|_| LiveNode::List(Vec::new())),
            _ => None,
        }
    }

    fn record(&mut self, record: &mut Record, patch: &TreeMap, path: &PropertyPath) {
        for (key, value) in patch {
            let child = path.key(key.as_str());
            if self.opts.is_skipped(&child) {
                continue;
            }
            let Some(slot) = record.props.get_mut(key) else {
                self.report
                    .warn(ApplyWarning::UnknownProperty { path: child });
                continue;
            };
            if value.is_delete() {
                let default = record.defaults.get(key).cloned().unwrap_or_default();
                self.reset_slot(slot, &default, &child);
            } else {
                self.node(slot, value, &child);
            }
        }
    }

    fn list(&mut self, items: &mut Vec<LiveNode>, values: &[Tree], path: &PropertyPath) {
        let ctor = self.opts.constructors.lookup(&path.any_index()).cloned();
        let mut rebuilt = Vec::with_capacity(values.len());
        for (i, value) in values.iter().enumerate() {
            let mut node = match &ctor {
                Some(ctor) => ctor(),
                None => LiveNode::Value(Tree::Null),
            };
            self.node(&mut node, value, &path.index(i));
            rebuilt.push(node);
        }
        *items = rebuilt;
    }

    fn tree(&mut self, slot: &mut Tree, value: &Tree, path: &PropertyPath) {
        match (slot, value) {
            (Tree::Object(existing), Tree::Object(patch)) => {
                for (key, v) in patch {
                    let child = path.key(key.as_str());
                    if self.opts.is_skipped(&child) {
                        continue;
                    }
                    if v.is_delete() {
                        if existing.shift_remove(key).is_some() {
                            self.report.applied += 1;
                        }
                        continue;
                    }
                    match existing.get_mut(key) {
                        Some(current) => self.tree(current, v, &child),
                        None => {
                            existing.insert(key.clone(), v.without_deletes());
                            self.report.applied += 1;
                        }
                    }
                }
            }
            (slot, Tree::Delete) => {
                *slot = Tree::Null;
                self.report.applied += 1;
            }
            (slot, value) => {
                let current = slot.kind();
                let incoming = value.kind();
                let compatible = current == incoming
                    || current == TreeKind::Null
                    || incoming == TreeKind::Null
                    || self.opts.allows(path, incoming);
                if compatible {
                    *slot = value.without_deletes();
                    self.report.applied += 1;
                } else {
                    self.mismatch(path, current, incoming);
                }
            }
        }
    }

    fn reset_slot(&mut self, slot: &mut LiveNode, default: &Tree, path: &PropertyPath) {
        match slot {
            LiveNode::Value(tree) => {
                *tree = default.clone();
                self.report.applied += 1;
            }
            LiveNode::Record(record) => self.reset_record(record, path),
            LiveNode::List(items) => {
                items.clear();
                self.report.applied += 1;
            }
            LiveNode::Custom(obj) => match obj.set(&Tree::Delete) {
                Ok(()) => self.report.applied += 1,
                Err(e) => self.report.warn(ApplyWarning::Rejected {
                    path: path.clone(),
                    reason: e.reason,
                }),
            },
        }
    }

    fn reset_record(&mut self, record: &mut Record, path: &PropertyPath) {
        let Record {
            props, defaults, ..
        } = record;
        for (key, slot) in props.iter_mut() {
            let default = defaults.get(key).cloned().unwrap_or_default();
            self.reset_slot(slot, &default, &path.key(key.as_str()));
        }
    }

    fn mismatch(&mut self, path: &PropertyPath, expected: TreeKind, found: TreeKind) {
        self.report.warn(ApplyWarning::TypeMismatch {
            path: path.clone(),
            expected,
            found,
        });
    }
}
