//! Live object graph of one chart
//!
//! Mutated only while the update lock is held: by the reconciler inside a
//! configuration task, or by pipeline stages inside a pass.

use crate::types::{
    AxisKind, Dataset, Layout, ProcessedData, RenderInstructions, SeriesKind, SeriesRender, Size,
};
use chartflow_pipeline::ItemId;
use chartflow_reconcile::{MatchSubject, ModuleKind};
use chartflow_tree::{LiveNode, Tree};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Live series
#[derive(Debug)]
pub struct SeriesInstance {
    pub(crate) id: Uuid,
    pub(crate) item: ItemId,
    pub(crate) kind: SeriesKind,
    pub(crate) node: LiveNode,
    pub(crate) spec: Tree,
    pub(crate) processed: Option<ProcessedData>,
    pub(crate) nodes: Tree,
    pub(crate) dirty: bool,
}

impl SeriesInstance {
    pub(crate) fn new(item: ItemId, kind: SeriesKind, node: LiveNode) -> Self {
        Self {
            id: Uuid::new_v4(),
            item,
            kind,
            node,
            spec: Tree::object(),
            processed: None,
            nodes: Tree::Array(Vec::new()),
            dirty: true,
        }
    }

    /// Stable identity
    #[inline]
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Pipeline item id
    #[inline]
    #[must_use]
    pub fn item(&self) -> ItemId {
        self.item
    }

    /// Series kind
    #[inline]
    #[must_use]
    pub fn kind(&self) -> SeriesKind {
        self.kind
    }

    /// Current properties, defaults included
    #[must_use]
    pub fn properties(&self) -> Tree {
        self.node.to_tree()
    }

    fn visible(&self) -> bool {
        self.node
            .get_tree("visible")
            .and_then(|v| v.as_bool())
            .unwrap_or(true)
    }
}

impl MatchSubject for SeriesInstance {
    fn property(&self, key: &str) -> Option<Tree> {
        self.spec.get(key).cloned()
    }
}

/// Live axis
#[derive(Debug)]
pub struct AxisInstance {
    pub(crate) id: Uuid,
    pub(crate) kind: AxisKind,
    pub(crate) node: LiveNode,
    pub(crate) spec: Tree,
}

impl AxisInstance {
    pub(crate) fn new(kind: AxisKind, node: LiveNode) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            node,
            spec: Tree::object(),
        }
    }

    /// Stable identity
    #[inline]
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Axis kind
    #[inline]
    #[must_use]
    pub fn kind(&self) -> AxisKind {
        self.kind
    }
}

impl MatchSubject for AxisInstance {
    fn property(&self, key: &str) -> Option<Tree> {
        self.spec.get(key).cloned()
    }
}

/// Live module
#[derive(Debug)]
pub struct ModuleInstance {
    pub(crate) node: LiveNode,
    pub(crate) processed: Option<ProcessedData>,
}

/// The whole live graph
#[derive(Debug)]
pub struct ChartGraph {
    pub(crate) root: LiveNode,
    pub(crate) series: Vec<SeriesInstance>,
    pub(crate) axes: Vec<AxisInstance>,
    pub(crate) modules: BTreeMap<ModuleKind, ModuleInstance>,
    /// Last applied normalized options
    pub(crate) applied: Tree,
    pub(crate) inline_data: Option<Vec<Tree>>,
    pub(crate) data_version: u64,
    pub(crate) explicit_size: Option<Size>,
    pub(crate) auto_size: Option<Size>,
    pub(crate) auto_size_waited: bool,
    pub(crate) scene_size: Option<Size>,
    pub(crate) raw: Option<Dataset>,
    pub(crate) layout: Option<Layout>,
    pub(crate) attach_queue: Vec<Uuid>,
    pub(crate) detach_queue: Vec<Uuid>,
    pub(crate) animation_batch: u64,
    pub(crate) prepared: Option<RenderInstructions>,
    pub(crate) last_frame: Option<RenderInstructions>,
    next_item: u64,
}

impl ChartGraph {
    pub(crate) fn new(root: LiveNode) -> Self {
        Self {
            root,
            series: Vec::new(),
            axes: Vec::new(),
            modules: BTreeMap::new(),
            applied: Tree::object(),
            inline_data: None,
            data_version: 0,
            explicit_size: None,
            auto_size: None,
            auto_size_waited: false,
            scene_size: None,
            raw: None,
            layout: None,
            attach_queue: Vec::new(),
            detach_queue: Vec::new(),
            animation_batch: 0,
            prepared: None,
            last_frame: None,
            next_item: 0,
        }
    }

    pub(crate) fn next_item(&mut self) -> ItemId {
        self.next_item += 1;
        ItemId(self.next_item)
    }

    pub(crate) fn queue_attach(&mut self, id: Uuid) {
        self.attach_queue.push(id);
    }

    /// Queue a detach; a node that was never attached is just dropped
    pub(crate) fn queue_detach(&mut self, id: Uuid) {
        if let Some(pos) = self.attach_queue.iter().position(|q| *q == id) {
            self.attach_queue.remove(pos);
        } else {
            self.detach_queue.push(id);
        }
    }

    pub(crate) fn series_mut(&mut self, id: Uuid) -> Option<&mut SeriesInstance> {
        self.series.iter_mut().find(|s| s.id == id)
    }

    /// Size known from options or an auto-size signal
    pub(crate) fn known_size(&self) -> Option<Size> {
        self.explicit_size.or(self.auto_size)
    }

    pub(crate) fn assemble(
        &self,
        pass: u64,
        fallback: Size,
        skip_animations: bool,
    ) -> RenderInstructions {
        RenderInstructions {
            pass,
            size: self.known_size().unwrap_or(fallback),
            series: self
                .series
                .iter()
                .map(|s| SeriesRender {
                    id: s.id,
                    item: s.item,
                    kind: s.kind,
                    visible: s.visible(),
                    nodes: s.nodes.clone(),
                })
                .collect(),
            axes: self.axes.iter().map(|a| a.node.to_tree()).collect(),
            modules: self
                .modules
                .iter()
                .map(|(kind, m)| (*kind, m.node.to_tree()))
                .collect(),
            chart: self.root.to_tree(),
            layout: self.layout.clone().unwrap_or_default(),
            animation_batch: self.animation_batch,
            skip_animations,
            overlays: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detach_of_unattached_node_cancels_attach() {
        let mut graph = ChartGraph::new(LiveNode::Value(Tree::object()));
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        graph.queue_attach(a);
        graph.queue_detach(a);
        graph.queue_detach(b);
        assert!(graph.attach_queue.is_empty());
        assert_eq!(graph.detach_queue, vec![b]);
    }

    #[test]
    fn item_ids_are_unique() {
        let mut graph = ChartGraph::new(LiveNode::Value(Tree::object()));
        assert_ne!(graph.next_item(), graph.next_item());
    }
}
