//! Precedence-ordered merging of partial trees

use crate::tree::{Tree, TreeMap};
use indexmap::IndexSet;
use std::collections::HashSet;

/// Options for [`merge_with`]
#[derive(Debug, Clone, Default)]
pub struct MergeOptions {
    /// Keys whose last value is taken verbatim instead of deep-merged
    pub avoid_deep_clone: HashSet<String>,
}

impl MergeOptions {
    /// Create default options
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the value of `key` verbatim
    #[inline]
    #[must_use]
    pub fn avoid_deep_clone(mut self, key: impl Into<String>) -> Self {
        self.avoid_deep_clone.insert(key.into());
        self
    }
}

/// Merge trees, later entries taking precedence
///
/// See [`merge_with`].
#[inline]
#[must_use]
pub fn merge(trees: &[Tree]) -> Tree {
    merge_with(trees, &MergeOptions::default())
}

/// Merge trees with explicit options
///
/// - Top-level [`Tree::Delete`] inputs are ignored. With no remaining input
///   the result is `Null`.
/// - When every input has the same kind, objects merge per key and arrays
///   resolve to the last array; otherwise the last input wins.
/// - For each key, values before the last [`Tree::Delete`] are discarded. A
///   trailing delete removes the key from the result.
/// - Arrays are never merged element-wise. The last array wins, but its
///   elements are re-merged individually so the result is a deep copy.
#[must_use]
pub fn merge_with(trees: &[Tree], opts: &MergeOptions) -> Tree {
    let refs: Vec<&Tree> = trees.iter().collect();
    merge_refs(&refs, opts)
}

fn merge_refs(trees: &[&Tree], opts: &MergeOptions) -> Tree {
    let inputs: Vec<&Tree> = trees.iter().copied().filter(|t| !t.is_delete()).collect();
    let Some(&last) = inputs.last() else {
        return Tree::Null;
    };

    let kind = last.kind();
    if !inputs.iter().all(|t| t.kind() == kind) {
        return merge_refs(&[last], opts);
    }

    match last {
        Tree::Object(_) => merge_objects(&inputs, opts),
        Tree::Array(items) => Tree::Array(
            items
                .iter()
                .filter(|item| !item.is_delete())
                .map(|item| merge_refs(&[item], opts))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn merge_objects(inputs: &[&Tree], opts: &MergeOptions) -> Tree {
    let mut keys: IndexSet<&str> = IndexSet::new();
    for map in inputs.iter().filter_map(|t| t.as_object()) {
        keys.extend(map.keys().map(String::as_str));
    }

    let mut result = TreeMap::with_capacity(keys.len());
    for key in keys {
        let values: Vec<&Tree> = inputs.iter().filter_map(|t| t.get(key)).collect();
        let start = values.iter().rposition(|v| v.is_delete()).map_or(0, |i| i + 1);
        let live = &values[start..];
        let Some(&last) = live.last() else {
            continue;
        };

        let merged = if opts.avoid_deep_clone.contains(key) {
            last.clone()
        } else {
            merge_refs(live, opts)
        };
        result.insert(key.to_string(), merged);
    }

    Tree::Object(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn t(v: serde_json::Value) -> Tree {
        Tree::from(v)
    }

    #[test]
    fn later_wins_and_objects_deep_merge() {
        let a = t(json!({"x": 1, "nested": {"a": 1, "b": 2}}));
        let b = t(json!({"y": 2, "nested": {"b": 3}}));
        assert_eq!(
            merge(&[a, b]),
            t(json!({"x": 1, "nested": {"a": 1, "b": 3}, "y": 2}))
        );
    }

    #[test]
    fn delete_sentinel_removes_key() {
        let mut b = Tree::object();
        b.insert("x", Tree::Delete);
        assert_eq!(merge(&[t(json!({"x": 1})), b]), Tree::object());
    }

    #[test]
    fn delete_not_last_is_overridden() {
        let mut b = Tree::object();
        b.insert("x", Tree::Delete);
        let merged = merge(&[t(json!({"x": 1})), b, t(json!({"x": 3}))]);
        assert_eq!(merged, t(json!({"x": 3})));
    }

    #[test]
    fn arrays_are_not_merged_element_wise() {
        let a = t(json!({"xs": [{"a": 1}, {"b": 2}]}));
        let b = t(json!({"xs": [{"c": 3}]}));
        assert_eq!(merge(&[a, b]), t(json!({"xs": [{"c": 3}]})));
    }

    #[test]
    fn mixed_kinds_take_last_value() {
        let a = t(json!({"v": {"x": 1}}));
        let b = t(json!({"v": "flat"}));
        assert_eq!(merge(&[a, b]), t(json!({"v": "flat"})));
    }

    #[test]
    fn avoid_deep_clone_takes_last_verbatim() {
        let opts = MergeOptions::new().avoid_deep_clone("data");
        let a = t(json!({"data": {"a": 1}}));
        let b = t(json!({"data": {"b": 2}}));
        assert_eq!(merge_with(&[a, b], &opts), t(json!({"data": {"b": 2}})));
    }

    #[test]
    fn single_input_is_cloned() {
        let a = t(json!({"a": [1, {"b": 2}], "c": null}));
        assert_eq!(merge(std::slice::from_ref(&a)), a);
        assert_eq!(merge(&[Tree::from(5)]), Tree::from(5));
    }

    #[test]
    fn merge_is_idempotent() {
        let a = t(json!({"a": {"b": 1}, "xs": [1, 2]}));
        let b = t(json!({"a": {"c": 2}, "xs": [3]}));
        let once = merge(&[a, b]);
        assert_eq!(merge(std::slice::from_ref(&once)), once);
    }
}
