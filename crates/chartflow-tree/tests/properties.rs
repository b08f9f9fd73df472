use chartflow_tree::{apply, diff, merge, ApplyOptions, LiveNode, PropertyPath, Record, Tree};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::json;

fn leaf() -> impl Strategy<Value = Tree> {
    prop_oneof![
        Just(Tree::Null),
        any::<bool>().prop_map(Tree::from),
        any::<i32>().prop_map(Tree::from),
        "[a-z]{0,6}".prop_map(Tree::from),
    ]
}

fn object_of(inner: impl Strategy<Value = Tree>) -> impl Strategy<Value = Tree> {
    prop::collection::vec(("[a-e]", inner), 0..5)
        .prop_map(|entries| Tree::Object(entries.into_iter().collect()))
}

fn any_tree() -> impl Strategy<Value = Tree> {
    leaf().prop_recursive(3, 32, 5, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Tree::from),
            object_of(inner),
        ]
    })
}

fn any_object() -> impl Strategy<Value = Tree> {
    object_of(any_tree())
}

proptest! {
    #[test]
    fn prop_diff_then_merge_reproduces_target(a in any_object(), b in any_object()) {
        let patch = diff(&a, &b).unwrap_or_else(Tree::object);
        prop_assert_eq!(merge(&[a, patch]), b);
    }

    #[test]
    fn prop_merge_is_idempotent(a in any_object(), b in any_object()) {
        let once = merge(&[a, b]);
        prop_assert_eq!(merge(std::slice::from_ref(&once)), once);
    }

    #[test]
    fn prop_diff_of_equal_trees_is_none(a in any_tree()) {
        prop_assert_eq!(diff(&a, &a.clone()), None);
    }

    #[test]
    fn prop_merge_single_is_identity(a in any_tree()) {
        prop_assert_eq!(merge(std::slice::from_ref(&a)), a);
    }
}

#[test]
fn patch_application_scenario() {
    let mut target = LiveNode::Value(Tree::from(json!({"a": 1, "b": {"c": 2}})));
    let report = apply(
        &mut target,
        &Tree::from(json!({"b": {"c": 3}})),
        &ApplyOptions::new(),
    );
    assert!(report.is_clean());
    assert_eq!(target.to_tree(), Tree::from(json!({"a": 1, "b": {"c": 3}})));
}

#[test]
fn constructed_slot_does_not_reuse_previous_value() {
    let b: PropertyPath = "b".parse().unwrap();
    let opts = ApplyOptions::new().constructor(b, || {
        Record::new("b").with("c", Tree::from(0)).into()
    });
    let mut target = LiveNode::Record(
        Record::new("root")
            .with("a", Tree::from(1))
            .with("b", Tree::from(json!({"c": 2, "extra": "old"}))),
    );
    apply(&mut target, &Tree::from(json!({"b": {"c": 3}})), &opts);
    assert_eq!(target.to_tree(), Tree::from(json!({"a": 1, "b": {"c": 3}})));
}

#[test]
fn delete_sentinel_scenario() {
    let mut delete = Tree::object();
    delete.insert("x", Tree::Delete);
    assert_eq!(merge(&[Tree::from(json!({"x": 1})), delete]), Tree::object());
}

#[test]
fn removed_keys_round_trip_through_delete() {
    let a = Tree::from(json!({"legend": {"enabled": true, "position": "top"}, "title": "t"}));
    let b = Tree::from(json!({"legend": {"enabled": true}}));
    let patch = diff(&a, &b).unwrap();
    assert_eq!(patch.get("title"), Some(&Tree::Delete));
    assert_eq!(merge(&[a, patch]), b);
}
