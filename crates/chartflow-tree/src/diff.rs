//! Minimal patches between configuration trees

use crate::tree::{Tree, TreeMap};

/// Compute the patch that turns `source` into `target`
///
/// Returns `None` when the trees are equal.
///
/// - Objects are compared per key. Keys only in `target` are copied, keys
///   only in `source` become [`Tree::Delete`], and shared keys recurse.
/// - Arrays are never patched element-wise: any difference in length or in
///   any element makes the whole target array the patch.
/// - A kind change at a key replaces the whole value.
#[must_use]
pub fn diff(source: &Tree, target: &Tree) -> Option<Tree> {
    match (source, target) {
        (Tree::Object(a), Tree::Object(b)) => diff_objects(a, b).map(Tree::Object),
        _ if source == target => None,
        _ => Some(target.clone()),
    }
}

fn diff_objects(source: &TreeMap, target: &TreeMap) -> Option<TreeMap> {
    let mut patch = TreeMap::new();

    for (key, target_val) in target {
        match source.get(key) {
            None => {
                patch.insert(key.clone(), target_val.clone());
            }
            Some(source_val) => {
                if let Some(d) = diff(source_val, target_val) {
                    patch.insert(key.clone(), d);
                }
            }
        }
    }

    for key in source.keys() {
        if !target.contains_key(key) {
            patch.insert(key.clone(), Tree::Delete);
        }
    }

    if patch.is_empty() {
        None
    } else {
        Some(patch)
    }
}
