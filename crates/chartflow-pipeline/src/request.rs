//! Update requests and per-pass context

use crate::stage::Stage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::{self, Display, Formatter};
use std::time::Duration;

/// Identifier of an item (series) inside one chart
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ItemId(pub u64);

impl Display for ItemId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "item-{}", self.0)
    }
}

/// Items that need their render data recomputed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemSelection {
    /// Every item
    All,
    /// Only these items
    Only(BTreeSet<ItemId>),
}

impl Default for ItemSelection {
    fn default() -> Self {
        Self::Only(BTreeSet::new())
    }
}

impl ItemSelection {
    /// Empty selection
    #[inline]
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Selection of specific items
    pub fn of(ids: impl IntoIterator<Item = ItemId>) -> Self {
        Self::Only(ids.into_iter().collect())
    }

    /// True if `id` is selected
    #[must_use]
    pub fn contains(&self, id: ItemId) -> bool {
        match self {
            Self::All => true,
            Self::Only(ids) => ids.contains(&id),
        }
    }

    /// True when nothing is selected
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Only(ids) if ids.is_empty())
    }

    /// Union with another selection
    pub fn extend(&mut self, other: ItemSelection) {
        match (&mut *self, other) {
            (Self::All, _) => {}
            (this, Self::All) => *this = Self::All,
            (Self::Only(ids), Self::Only(more)) => ids.extend(more),
        }
    }
}

/// Request for a pipeline pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRequest {
    /// Earliest stage that must run
    pub stage: Stage,
    /// Bypass caches in collaborators
    pub force_refresh: bool,
    /// Items needing recomputation
    pub items: ItemSelection,
    /// Render without animating
    pub skip_animations: bool,
    /// Delay before scheduling, used to batch bursts
    pub backoff: Option<Duration>,
    /// Label recorded for re-entrancy diagnostics
    pub requestor: Option<String>,
}

impl UpdateRequest {
    /// Request `stage` for every item
    #[must_use]
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            force_refresh: false,
            items: ItemSelection::All,
            skip_animations: false,
            backoff: None,
            requestor: None,
        }
    }

    /// Set the force-refresh flag
    #[inline]
    #[must_use]
    pub fn force_refresh(mut self) -> Self {
        self.force_refresh = true;
        self
    }

    /// Restrict the item selection
    #[inline]
    #[must_use]
    pub fn items(mut self, items: ItemSelection) -> Self {
        self.items = items;
        self
    }

    /// Set the skip-animations flag
    #[inline]
    #[must_use]
    pub fn skip_animations(mut self) -> Self {
        self.skip_animations = true;
        self
    }

    /// Delay scheduling by `backoff`
    #[inline]
    #[must_use]
    pub fn backoff(mut self, backoff: Duration) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// Label the request
    #[inline]
    #[must_use]
    pub fn requestor(mut self, label: impl Into<String>) -> Self {
        self.requestor = Some(label.into());
        self
    }
}

impl From<Stage> for UpdateRequest {
    fn from(stage: Stage) -> Self {
        Self::new(stage)
    }
}

/// Inputs shared by every stage of one pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassContext {
    /// Pass sequence number, starting at 1
    pub pass: u64,
    /// First stage of this pass
    pub start_stage: Stage,
    /// Items to recompute during [`Stage::ItemUpdate`]
    pub items: ItemSelection,
    /// Bypass collaborator caches
    pub force_refresh: bool,
    /// Render without animating
    pub skip_animations: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_union() {
        let mut sel = ItemSelection::of([ItemId(1)]);
        sel.extend(ItemSelection::of([ItemId(2)]));
        assert!(sel.contains(ItemId(1)) && sel.contains(ItemId(2)));
        assert!(!sel.contains(ItemId(3)));

        sel.extend(ItemSelection::All);
        assert_eq!(sel, ItemSelection::All);
        sel.extend(ItemSelection::of([ItemId(9)]));
        assert_eq!(sel, ItemSelection::All);
    }

    #[test]
    fn empty_selection() {
        assert!(ItemSelection::none().is_empty());
        assert!(!ItemSelection::All.is_empty());
    }

    #[test]
    fn request_builder() {
        let req = UpdateRequest::new(Stage::Layout)
            .force_refresh()
            .skip_animations()
            .requestor("zoom")
            .backoff(Duration::from_millis(20));
        assert!(req.force_refresh && req.skip_animations);
        assert_eq!(req.requestor.as_deref(), Some("zoom"));
        assert_eq!(req.backoff, Some(Duration::from_millis(20)));
        assert_eq!(req.items, ItemSelection::All);
    }
}
