//! Pipeline stages
//!
//! Stages are totally ordered: a smaller stage runs first and implies more
//! work. A request for stage `S` means every stage from `S` through
//! [`Stage::Render`] runs on the next pass.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// One step of an update pass
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    /// Structural scene work (attach, detach, resize)
    Full,
    /// Pull raw data from the data source
    Ingest,
    /// Aggregate raw data per item
    Process,
    /// Allocate space
    Layout,
    /// Recompute per-item render data
    ItemUpdate,
    /// Cross-item adjustments over finalized geometry
    PreRender,
    /// Hand off to the scene graph
    Render,
    /// Idle; nothing requested
    #[default]
    None,
}

impl Stage {
    /// Every runnable stage, in execution order
    pub const PIPELINE: [Stage; 7] = [
        Self::Full,
        Self::Ingest,
        Self::Process,
        Self::Layout,
        Self::ItemUpdate,
        Self::PreRender,
        Self::Render,
    ];

    /// Stable lowercase name
    #[inline]
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Ingest => "ingest",
            Self::Process => "process",
            Self::Layout => "layout",
            Self::ItemUpdate => "item-update",
            Self::PreRender => "pre-render",
            Self::Render => "render",
            Self::None => "none",
        }
    }

    /// True for [`Stage::None`]
    #[inline]
    #[must_use]
    pub fn is_idle(self) -> bool {
        self == Self::None
    }

    /// Stages from `self` through [`Stage::Render`]
    pub fn through_render(self) -> impl Iterator<Item = Stage> {
        Self::PIPELINE.into_iter().filter(move |s| *s >= self)
    }

    /// The more comprehensive of two stages
    #[inline]
    #[must_use]
    pub fn earliest(self, other: Stage) -> Stage {
        self.min(other)
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_are_ordered() {
        let mut sorted = Stage::PIPELINE;
        sorted.sort();
        assert_eq!(sorted, Stage::PIPELINE);
        assert!(Stage::Render < Stage::None);
        assert!(Stage::Full < Stage::Ingest);
    }

    #[test]
    fn through_render_starts_at_self() {
        let stages: Vec<_> = Stage::Layout.through_render().collect();
        assert_eq!(
            stages,
            vec![
                Stage::Layout,
                Stage::ItemUpdate,
                Stage::PreRender,
                Stage::Render
            ]
        );
        assert_eq!(Stage::None.through_render().count(), 0);
        assert_eq!(Stage::Full.through_render().count(), 7);
    }

    #[test]
    fn earliest_picks_more_work() {
        assert_eq!(Stage::Layout.earliest(Stage::Ingest), Stage::Ingest);
        assert_eq!(Stage::None.earliest(Stage::Render), Stage::Render);
    }

    #[test]
    fn names() {
        assert_eq!(Stage::ItemUpdate.to_string(), "item-update");
        assert_eq!(Stage::default(), Stage::None);
    }
}
