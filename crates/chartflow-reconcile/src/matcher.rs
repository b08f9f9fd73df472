//! Instance matcher
//!
//! Pairs live instances with desired specs so that compatible instances keep
//! their identity across updates. Two strategies are provided:
//!
//! - [`MatchStrategy::Keyed`]: identity keys built from the discriminant plus
//!   configured identity properties; survives reordering.
//! - [`MatchStrategy::Positional`]: index-by-index; lengths and discriminants
//!   must agree.
//!
//! When nothing can be paired the outcome is [`MatchOutcome::NoOverlap`] and
//! the caller must rebuild the whole list.

use chartflow_tree::{diff, Tree};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Something that can be compared against a desired spec
pub trait MatchSubject {
    /// Current value of a top-level property
    fn property(&self, key: &str) -> Option<Tree>;
}

impl MatchSubject for Tree {
    fn property(&self, key: &str) -> Option<Tree> {
        self.get(key).cloned()
    }
}

/// Per-item classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchStatus {
    /// Spec unchanged
    NoOp,
    /// Patch in place
    Update,
    /// Create a new instance
    Add,
    /// Destroy the instance
    Remove,
    /// Patch in place and regroup
    SeriesGroupingChange,
    /// Freshly built as part of a whole-list replacement
    Replaced,
}

/// One old/new pairing
#[derive(Debug, Clone, PartialEq)]
pub struct MatchRecord {
    /// Classification
    pub status: MatchStatus,
    /// Index into the old instance list
    pub old_index: Option<usize>,
    /// Index into the new spec list
    pub new_index: Option<usize>,
    /// Changes to apply (full spec for `Add` and `Replaced`)
    pub patch: Option<Tree>,
}

impl MatchRecord {
    fn remove(old_index: usize) -> Self {
        Self {
            status: MatchStatus::Remove,
            old_index: Some(old_index),
            new_index: None,
            patch: None,
        }
    }

    fn fresh(status: MatchStatus, new_index: usize, spec: &Tree) -> Self {
        Self {
            status,
            old_index: None,
            new_index: Some(new_index),
            patch: Some(spec.clone()),
        }
    }
}

/// Whole-list result
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    /// Nothing pairs; destroy every old instance and build every new one
    NoOverlap {
        /// Identity keys of the old instances
        old_keys: Vec<String>,
        /// Identity keys of the new specs
        new_keys: Vec<String>,
    },
    /// Per-item records, removes first then in new-spec order
    Overlap(Vec<MatchRecord>),
}

impl MatchOutcome {
    /// True for [`MatchOutcome::NoOverlap`]
    #[inline]
    #[must_use]
    pub fn is_no_overlap(&self) -> bool {
        matches!(self, Self::NoOverlap { .. })
    }

    /// Flatten into records
    ///
    /// A no-overlap outcome becomes a `Remove` for every old index followed
    /// by a `Replaced` for every new spec.
    #[must_use]
    pub fn into_records(self, new_specs: &[Tree]) -> Vec<MatchRecord> {
        match self {
            Self::Overlap(records) => records,
            Self::NoOverlap { old_keys, .. } => (0..old_keys.len())
                .map(MatchRecord::remove)
                .chain(
                    new_specs
                        .iter()
                        .enumerate()
                        .map(|(i, spec)| MatchRecord::fresh(MatchStatus::Replaced, i, spec)),
                )
                .collect(),
        }
    }
}

/// How old and new lists are paired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    /// Pair by identity key
    #[default]
    Keyed,
    /// Pair by position
    Positional,
}

/// Decides whether a patch changes item grouping
#[derive(Clone, Default)]
pub enum GroupingPredicate {
    /// Never
    #[default]
    None,
    /// The patch touches only `key`, and any of `fields` beneath it
    Nested {
        /// Grouping object key
        key: String,
        /// Fields that affect grouping
        fields: Vec<String>,
    },
    /// Caller-supplied test
    Custom(Arc<dyn Fn(&Tree) -> bool + Send + Sync>),
}

impl GroupingPredicate {
    /// Predicate that never matches
    #[inline]
    #[must_use]
    pub fn none() -> Self {
        Self::None
    }

    /// Match when any of `fields` changed under `key`
    #[must_use]
    pub fn nested<I, S>(key: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Nested {
            key: key.into(),
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    /// Match with a custom function
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&Tree) -> bool + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    /// Test a patch
    #[must_use]
    pub fn matches(&self, patch: &Tree) -> bool {
        match self {
            Self::None => false,
            Self::Nested { key, fields } => {
                let confined = patch.as_object().is_some_and(|map| map.len() == 1);
                match patch.get(key) {
                    Some(Tree::Object(group)) if confined => {
                        fields.iter().any(|f| group.contains_key(f))
                    }
                    Some(_) => confined,
                    None => false,
                }
            }
            Self::Custom(f) => f(patch),
        }
    }
}

impl fmt::Debug for GroupingPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Nested { key, fields } => f
                .debug_struct("Nested")
                .field("key", key)
                .field("fields", fields)
                .finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Matcher configuration for one kind of list
#[derive(Debug, Clone)]
pub struct MatcherConfig {
    /// Pairing strategy
    pub strategy: MatchStrategy,
    /// Property holding the discriminant
    pub discriminant_key: String,
    /// Properties that distinguish same-discriminant items
    pub identity_keys: Vec<String>,
    /// Grouping classification
    pub grouping: GroupingPredicate,
}

/// Identity properties used for series by default
pub const SERIES_IDENTITY_KEYS: &[&str] = &[
    "direction",
    "xKey",
    "yKey",
    "angleKey",
    "radiusKey",
    "sizeKey",
    "normalizedTo",
];

impl MatcherConfig {
    /// Keyed matching on `type` plus [`SERIES_IDENTITY_KEYS`], grouping on
    /// `seriesGrouping.{groupIndex,stackIndex}`
    #[must_use]
    pub fn series() -> Self {
        Self {
            strategy: MatchStrategy::Keyed,
            discriminant_key: "type".to_string(),
            identity_keys: SERIES_IDENTITY_KEYS.iter().map(|k| (*k).to_string()).collect(),
            grouping: GroupingPredicate::nested("seriesGrouping", ["groupIndex", "stackIndex"]),
        }
    }

    /// Positional matching on `type`, no grouping
    #[must_use]
    pub fn axes() -> Self {
        Self {
            strategy: MatchStrategy::Positional,
            discriminant_key: "type".to_string(),
            identity_keys: Vec::new(),
            grouping: GroupingPredicate::none(),
        }
    }

    /// Replace the identity keys
    #[must_use]
    pub fn with_identity_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.identity_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the grouping predicate
    #[inline]
    #[must_use]
    pub fn with_grouping(mut self, grouping: GroupingPredicate) -> Self {
        self.grouping = grouping;
        self
    }

    /// Discriminant of a subject
    #[must_use]
    pub fn discriminant<S: MatchSubject + ?Sized>(&self, subject: &S) -> Option<String> {
        subject
            .property(&self.discriminant_key)
            .and_then(|t| t.as_str().map(str::to_string))
    }

    /// Identity key of a subject, without the occurrence suffix
    #[must_use]
    pub fn identity<S: MatchSubject + ?Sized>(&self, subject: &S) -> String {
        let mut key = self.discriminant(subject).unwrap_or_default();
        for prop in &self.identity_keys {
            if let Some(value) = subject.property(prop) {
                if !value.is_null() {
                    key.push(';');
                    key.push_str(prop);
                    key.push('=');
                    key.push_str(&value.to_string());
                }
            }
        }
        key
    }

    fn identities<S: MatchSubject>(&self, subjects: &[S]) -> Vec<String> {
        let mut seen: HashMap<String, usize> = HashMap::new();
        subjects
            .iter()
            .map(|s| {
                let base = self.identity(s);
                let n = seen.entry(base.clone()).or_insert(0);
                let key = if *n == 0 { base } else { format!("{base}#{n}") };
                *n += 1;
                key
            })
            .collect()
    }

    fn classify(&self, previous: &Tree, spec: &Tree) -> (MatchStatus, Option<Tree>) {
        match diff(previous, spec) {
            None => (MatchStatus::NoOp, None),
            Some(patch) if self.grouping.matches(&patch) => {
                (MatchStatus::SeriesGroupingChange, Some(patch))
            }
            Some(patch) => (MatchStatus::Update, Some(patch)),
        }
    }
}

/// Match live instances against desired specs
///
/// `previous` holds the last applied spec for each old instance, aligned by
/// index; a missing entry counts as an empty spec.
pub fn match_instances<S: MatchSubject>(
    old: &[S],
    new_specs: &[Tree],
    previous: &[Tree],
    config: &MatcherConfig,
) -> MatchOutcome {
    let outcome = match config.strategy {
        MatchStrategy::Keyed => match_keyed(old, new_specs, previous, config),
        MatchStrategy::Positional => match_positional(old, new_specs, previous, config),
    };
    if let MatchOutcome::NoOverlap { old_keys, new_keys } = &outcome {
        debug!(?old_keys, ?new_keys, "no overlap between instance lists");
    }
    outcome
}

fn previous_for(previous: &[Tree], index: usize) -> Tree {
    previous.get(index).cloned().unwrap_or_else(Tree::object)
}

fn match_keyed<S: MatchSubject>(
    old: &[S],
    new_specs: &[Tree],
    previous: &[Tree],
    config: &MatcherConfig,
) -> MatchOutcome {
    let old_keys = config.identities(old);
    let new_keys = config.identities(new_specs);

    let old_index: HashMap<&str, usize> = old_keys
        .iter()
        .enumerate()
        .map(|(i, k)| (k.as_str(), i))
        .collect();

    let overlaps = new_keys.iter().any(|k| old_index.contains_key(k.as_str()));
    if !overlaps && !old.is_empty() && !new_specs.is_empty() {
        return MatchOutcome::NoOverlap { old_keys, new_keys };
    }

    let mut records: Vec<MatchRecord> = old_keys
        .iter()
        .enumerate()
        .filter(|(_, k)| !new_keys.contains(k))
        .map(|(i, _)| MatchRecord::remove(i))
        .collect();

    for (j, (key, spec)) in new_keys.iter().zip(new_specs).enumerate() {
        let record = match old_index.get(key.as_str()) {
            Some(&i) => {
                let (status, patch) = config.classify(&previous_for(previous, i), spec);
                MatchRecord {
                    status,
                    old_index: Some(i),
                    new_index: Some(j),
                    patch,
                }
            }
            None => MatchRecord::fresh(MatchStatus::Add, j, spec),
        };
        records.push(record);
    }

    MatchOutcome::Overlap(records)
}

fn match_positional<S: MatchSubject>(
    old: &[S],
    new_specs: &[Tree],
    previous: &[Tree],
    config: &MatcherConfig,
) -> MatchOutcome {
    let old_keys: Vec<String> = old.iter().map(|s| config.identity(s)).collect();
    let new_keys: Vec<String> = new_specs.iter().map(|s| config.identity(s)).collect();

    if old_keys != new_keys {
        return MatchOutcome::NoOverlap { old_keys, new_keys };
    }

    MatchOutcome::Overlap(
        new_specs
            .iter()
            .enumerate()
            .map(|(i, spec)| {
                let (status, patch) = config.classify(&previous_for(previous, i), spec);
                MatchRecord {
                    status,
                    old_index: Some(i),
                    new_index: Some(i),
                    patch,
                }
            })
            .collect(),
    )
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
    fn identity_includes_configured_keys() {
        let config = MatcherConfig::series();
        let spec = t(json!({"type": "bar", "xKey": "month", "yKey": "sales", "fill": "red"}));
        assert_eq!(
            config.identity(&spec),
            r#"bar;xKey="month";yKey="sales""#
        );
    }

    #[test]
    fn duplicate_identities_get_suffix() {
        let config = MatcherConfig::series();
        let specs = vec![t(json!({"type": "bar"})), t(json!({"type": "bar"}))];
        assert_eq!(config.identities(&specs), vec!["bar", "bar#1"]);
    }

    #[test]
    fn reorder_keeps_identity() {
        let config = MatcherConfig::series();
        let old = vec![
            t(json!({"type": "line", "yKey": "a"})),
            t(json!({"type": "line", "yKey": "b"})),
        ];
        let new = vec![
            t(json!({"type": "line", "yKey": "b"})),
            t(json!({"type": "line", "yKey": "a"})),
        ];
        let MatchOutcome::Overlap(records) = match_instances(&old, &new, &old, &config) else {
            panic!("expected overlap");
        };
        assert_eq!(records.len(), 2);
        assert_eq!((records[0].old_index, records[0].new_index), (Some(1), Some(0)));
        assert_eq!((records[1].old_index, records[1].new_index), (Some(0), Some(1)));
        assert!(records.iter().all(|r| r.status == MatchStatus::NoOp));
    }

    #[test]
    fn removes_come_first_then_new_order() {
        let config = MatcherConfig::series();
        let old = vec![
            t(json!({"type": "line", "yKey": "a"})),
            t(json!({"type": "line", "yKey": "gone"})),
        ];
        let new = vec![
            t(json!({"type": "area", "yKey": "new"})),
            t(json!({"type": "line", "yKey": "a"})),
        ];
        let MatchOutcome::Overlap(records) = match_instances(&old, &new, &old, &config) else {
            panic!("expected overlap");
        };
        let statuses: Vec<_> = records.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![MatchStatus::Remove, MatchStatus::Add, MatchStatus::NoOp]
        );
        assert_eq!(records[0].old_index, Some(1));
        assert_eq!(records[1].patch.as_ref(), Some(&new[0]));
    }

    #[test]
    fn grouping_change_is_detected() {
        let config = MatcherConfig::series();
        let prev = vec![t(json!({"type": "bar", "seriesGrouping": {"groupIndex": 0}}))];
        let new = vec![t(json!({"type": "bar", "seriesGrouping": {"groupIndex": 1}}))];
        let MatchOutcome::Overlap(records) = match_instances(&prev, &new, &prev, &config) else {
            panic!("expected overlap");
        };
        assert_eq!(records[0].status, MatchStatus::SeriesGroupingChange);
    }

    #[test]
    fn grouping_change_with_other_edits_is_an_update() {
        let config = MatcherConfig::series();
        let prev = vec![t(json!({"type": "bar", "seriesGrouping": {"groupIndex": 0}}))];
        let new = vec![t(json!({
            "type": "bar",
            "fill": "red",
            "seriesGrouping": {"groupIndex": 1},
        }))];
        let MatchOutcome::Overlap(records) = match_instances(&prev, &new, &prev, &config) else {
            panic!("expected overlap");
        };
        assert_eq!(records[0].status, MatchStatus::Update);
    }

    #[test]
    fn missing_previous_counts_as_empty() {
        let config = MatcherConfig::series();
        let old = vec![t(json!({"type": "line"}))];
        let MatchOutcome::Overlap(records) = match_instances(&old, &old, &[], &config) else {
            panic!("expected overlap");
        };
        assert_eq!(records[0].status, MatchStatus::Update);
        assert_eq!(records[0].patch, Some(t(json!({"type": "line"}))));
    }

    #[test]
    fn positional_requires_same_shape() {
        let config = MatcherConfig::axes();
        let old = vec![t(json!({"type": "number"})), t(json!({"type": "category"}))];
        let swapped = vec![t(json!({"type": "category"})), t(json!({"type": "number"}))];
        assert!(match_instances(&old, &swapped, &old, &config).is_no_overlap());

        let longer = vec![
            t(json!({"type": "number"})),
            t(json!({"type": "category"})),
            t(json!({"type": "time"})),
        ];
        assert!(match_instances(&old, &longer, &old, &config).is_no_overlap());
    }

    #[test]
    fn positional_patches_in_place() {
        let config = MatcherConfig::axes();
        let old = vec![t(json!({"type": "number", "title": {"text": "A"}}))];
        let new = vec![t(json!({"type": "number", "title": {"text": "B"}}))];
        let MatchOutcome::Overlap(records) = match_instances(&old, &new, &old, &config) else {
            panic!("expected overlap");
        };
        assert_eq!(records[0].status, MatchStatus::Update);
        assert_eq!(records[0].patch, Some(t(json!({"title": {"text": "B"}}))));
    }

    #[test]
    fn empty_sides_produce_adds_and_removes() {
        let config = MatcherConfig::series();
        let none: Vec<Tree> = Vec::new();
        let one = vec![t(json!({"type": "line"}))];

        let MatchOutcome::Overlap(adds) = match_instances(&none, &one, &[], &config) else {
            panic!("expected overlap");
        };
        assert_eq!(adds[0].status, MatchStatus::Add);

        let MatchOutcome::Overlap(removes) = match_instances(&one, &none, &one, &config) else {
            panic!("expected overlap");
        };
        assert_eq!(removes[0].status, MatchStatus::Remove);
    }

    #[test]
    fn no_overlap_flattens_to_replacements() {
        let config = MatcherConfig::series();
        let old = vec![t(json!({"type": "line"}))];
        let new = vec![t(json!({"type": "pie"}))];
        let records = match_instances(&old, &new, &old, &config).into_records(&new);
        let statuses: Vec<_> = records.iter().map(|r| r.status).collect();
        assert_eq!(statuses, vec![MatchStatus::Remove, MatchStatus::Replaced]);
    }

    #[test]
    fn custom_grouping_predicate() {
        let config = MatcherConfig::axes()
            .with_grouping(GroupingPredicate::custom(|p| p.get("position").is_some()));
        let old = vec![t(json!({"type": "number", "position": "left"}))];
        let new = vec![t(json!({"type": "number", "position": "right"}))];
        let MatchOutcome::Overlap(records) = match_instances(&old, &new, &old, &config) else {
            panic!("expected overlap");
        };
        assert_eq!(records[0].status, MatchStatus::SeriesGroupingChange);
    }
}
