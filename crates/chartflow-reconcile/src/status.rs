//! Overall update status

use crate::matcher::{MatchRecord, MatchStatus};
use serde::{Deserialize, Serialize};

/// Strongest change observed while reconciling a list
///
/// Ordered weakest to strongest, so `max` picks the dominant status.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateStatus {
    /// Nothing changed
    #[default]
    NoOp,
    /// Properties changed
    Updated,
    /// Inline data changed
    DataChange,
    /// Item grouping changed
    SeriesGroupingChange,
    /// Instances were rebuilt
    Replaced,
}

impl UpdateStatus {
    /// Strongest status across `records`
    ///
    /// A patch or new spec touching `data_key` counts as [`Self::DataChange`].
    #[must_use]
    pub fn from_records(records: &[MatchRecord], data_key: &str) -> Self {
        records
            .iter()
            .map(|r| Self::from_record(r, data_key))
            .max()
            .unwrap_or_default()
    }

    fn from_record(record: &MatchRecord, data_key: &str) -> Self {
        let touches_data = record
            .patch
            .as_ref()
            .is_some_and(|p| p.get(data_key).is_some());
        match record.status {
            MatchStatus::NoOp => Self::NoOp,
            MatchStatus::Update | MatchStatus::Add | MatchStatus::Remove if touches_data => {
                Self::DataChange
            }
            MatchStatus::Update | MatchStatus::Add | MatchStatus::Remove => Self::Updated,
            MatchStatus::SeriesGroupingChange => Self::SeriesGroupingChange,
            MatchStatus::Replaced => Self::Replaced,
        }
    }

    /// True for grouping changes and replacements
    #[inline]
    #[must_use]
    pub fn is_structural(self) -> bool {
        self >= Self::SeriesGroupingChange
    }
}
