//! Configuration trees
//!
//! [`Tree`] is the immutable-by-convention value that callers hand to the
//! engine: primitives, arrays and keyed objects, plus the [`Tree::Delete`]
//! sentinel used by patches and merges to remove a key.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value as JsonValue};
use std::fmt::{self, Display, Formatter};

/// Ordered map used for object nodes
pub type TreeMap = IndexMap<String, Tree>;

/// Declarative configuration tree
///
/// Object key order is preserved. `Delete` is distinct from both `Null` and
/// an absent key: it marks a key that must be removed from a merged result.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "JsonValue", into = "JsonValue")]
pub enum Tree {
    /// Explicit null
    #[default]
    Null,
    /// Boolean leaf
    Bool(bool),
    /// Numeric leaf
    Number(Number),
    /// String leaf
    String(String),
    /// Array node (never patched element-wise)
    Array(Vec<Tree>),
    /// Keyed object node
    Object(TreeMap),
    /// Delete sentinel
    Delete,
}

/// Coarse classification of a [`Tree`] node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeKind {
    /// `Tree::Null`
    Null,
    /// `Tree::Bool`
    Bool,
    /// `Tree::Number`
    Number,
    /// `Tree::String`
    String,
    /// `Tree::Array`
    Array,
    /// `Tree::Object`
    Object,
    /// `Tree::Delete`
    Delete,
}

impl Display for TreeKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Null => "null",
            Self::Bool => "boolean",
            Self::Number => "number",
            Self::String => "string",
            Self::Array => "array",
            Self::Object => "object",
            Self::Delete => "delete",
        };
        f.write_str(name)
    }
}

impl Tree {
    /// Empty object
    #[inline]
    #[must_use]
    pub fn object() -> Self {
        Self::Object(TreeMap::new())
    }

    /// Classify this node
    #[inline]
    #[must_use]
    pub fn kind(&self) -> TreeKind {
        match self {
            Self::Null => TreeKind::Null,
            Self::Bool(_) => TreeKind::Bool,
            Self::Number(_) => TreeKind::Number,
            Self::String(_) => TreeKind::String,
            Self::Array(_) => TreeKind::Array,
            Self::Object(_) => TreeKind::Object,
            Self::Delete => TreeKind::Delete,
        }
    }

    /// True for `Null`
    #[inline]
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// True for the delete sentinel
    #[inline]
    #[must_use]
    pub fn is_delete(&self) -> bool {
        matches!(self, Self::Delete)
    }

    /// Object entries, if this is an object
    #[inline]
    #[must_use]
    pub fn as_object(&self) -> Option<&TreeMap> {
        match self {
            Self::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Mutable object entries, if this is an object
    #[inline]
    pub fn as_object_mut(&mut self) -> Option<&mut TreeMap> {
        match self {
            Self::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Array items, if this is an array
    #[inline]
    #[must_use]
    pub fn as_array(&self) -> Option<&[Tree]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    /// String value, if this is a string
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric value as `f64`, if this is a number
    #[inline]
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    /// Boolean value, if this is a boolean
    #[inline]
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Look up a key on an object node
    ///
    /// Returns `None` for non-objects and for absent keys.
    #[inline]
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Tree> {
        self.as_object().and_then(|map| map.get(key))
    }

    /// True when this is an object with no entries
    #[inline]
    #[must_use]
    pub fn is_empty_object(&self) -> bool {
        self.as_object().is_some_and(IndexMap::is_empty)
    }

    /// Insert into an object node, turning `Null` into an object first
    ///
    /// Returns `false` (and does nothing) for other node kinds.
    pub fn insert(&mut self, key: impl Into<String>, value: Tree) -> bool {
        if self.is_null() {
            *self = Self::object();
        }
        match self {
            Self::Object(map) => {
                map.insert(key.into(), value);
                true
            }
            _ => false,
        }
    }

    /// Copy of this tree with every `Delete` removed
    ///
    /// Deleted object keys disappear; deleted array slots become `Null`.
    #[must_use]
    pub fn without_deletes(&self) -> Tree {
        match self {
            Self::Object(map) => Self::Object(
                map.iter()
                    .filter(|(_, v)| !v.is_delete())
                    .map(|(k, v)| (k.clone(), v.without_deletes()))
                    .collect(),
            ),
            Self::Array(items) => Self::Array(
                items
                    .iter()
                    .map(|v| if v.is_delete() { Self::Null } else { v.without_deletes() })
                    .collect(),
            ),
            Self::Delete => Self::Null,
            other => other.clone(),
        }
    }

    /// Convert to a JSON value, dropping delete sentinels
    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        JsonValue::from(self.without_deletes())
    }
}

impl Display for Tree {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Delete => f.write_str("<delete>"),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl From<JsonValue> for Tree {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(b) => Self::Bool(b),
            JsonValue::Number(n) => Self::Number(n),
            JsonValue::String(s) => Self::String(s),
            JsonValue::Array(items) => Self::Array(items.into_iter().map(Self::from).collect()),
            JsonValue::Object(map) => {
                Self::Object(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

impl From<Tree> for JsonValue {
    fn from(tree: Tree) -> Self {
        match tree {
            Tree::Null | Tree::Delete => Self::Null,
            Tree::Bool(b) => Self::Bool(b),
            Tree::Number(n) => Self::Number(n),
            Tree::String(s) => Self::String(s),
            Tree::Array(items) => Self::Array(items.into_iter().map(Self::from).collect()),
            Tree::Object(map) => Self::Object(
                map.into_iter()
                    .filter(|(_, v)| !v.is_delete())
                    .map(|(k, v)| (k, Self::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<bool> for Tree {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for Tree {
    fn from(value: i32) -> Self {
        Self::Number(value.into())
    }
}

impl From<i64> for Tree {
    fn from(value: i64) -> Self {
        Self::Number(value.into())
    }
}

impl From<f64> for Tree {
    fn from(value: f64) -> Self {
        Number::from_f64(value).map_or(Self::Null, Self::Number)
    }
}

impl From<&str> for Tree {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Tree {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<Vec<Tree>> for Tree {
    fn from(items: Vec<Tree>) -> Self {
        Self::Array(items)
    }
}

impl From<TreeMap> for Tree {
    fn from(map: TreeMap) -> Self {
        Self::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_json_preserves_key_order() {
        let tree = Tree::from(json!({"b": 1, "a": 2}));
        let keys: Vec<_> = tree.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["b", "a"]);
    }

    #[test]
    fn delete_is_distinct_from_null_and_absent() {
        let mut tree = Tree::from(json!({"x": null}));
        tree.insert("y", Tree::Delete);
        assert_eq!(tree.get("x"), Some(&Tree::Null));
        assert_eq!(tree.get("y"), Some(&Tree::Delete));
        assert_eq!(tree.get("z"), None);
    }

    #[test]
    fn to_json_drops_deletes() {
        let mut tree = Tree::from(json!({"keep": 1}));
        tree.insert("gone", Tree::Delete);
        assert_eq!(tree.to_json(), json!({"keep": 1}));
    }

    #[test]
    fn serde_round_trip_through_json() {
        let tree = Tree::from(json!({"series": [{"type": "line"}], "n": 1.5}));
        let text = serde_json::to_string(&tree).unwrap();
        let back: Tree = serde_json::from_str(&text).unwrap();
        assert_eq!(back, tree);
    }

    #[test]
    fn insert_on_null_creates_object() {
        let mut tree = Tree::Null;
        assert!(tree.insert("a", Tree::from(1)));
        assert_eq!(tree.to_json(), json!({"a": 1}));

        let mut leaf = Tree::from("text");
        assert!(!leaf.insert("a", Tree::from(1)));
    }

    #[test]
    fn kind_display() {
        assert_eq!(Tree::from(json!([1])).kind().to_string(), "array");
        assert_eq!(Tree::Delete.kind().to_string(), "delete");
    }
}
