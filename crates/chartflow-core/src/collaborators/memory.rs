//! In-memory collaborators
//!
//! Enough to drive the pipeline end to end without a real renderer: used by
//! the `chartflow` binary and as defaults when embedding.

use super::{Aggregator, DataSource, LayoutEngine, SceneGraph, SeriesBehavior};
use crate::error::CollaboratorError;
use crate::types::{
    AxisInput, AxisKind, Dataset, Layout, ProcessTarget, ProcessedData, Rect, RenderInstructions,
    SeriesUpdateInput, Size,
};
use chartflow_tree::{Tree, TreeMap};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use tokio::sync::watch;
use uuid::Uuid;

/// Data source holding rows in memory
///
/// [`StaticDataSource::set_rows`] bumps the version and notifies listeners.
#[derive(Debug)]
pub struct StaticDataSource {
    data: RwLock<Dataset>,
    changed: watch::Sender<u64>,
}

impl Default for StaticDataSource {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl StaticDataSource {
    /// Create a source with initial rows at version 0
    #[must_use]
    pub fn new(rows: Vec<Tree>) -> Self {
        Self {
            data: RwLock::new(Dataset { version: 0, rows }),
            changed: watch::channel(0).0,
        }
    }

    /// Replace the rows and notify listeners
    pub fn set_rows(&self, rows: Vec<Tree>) -> u64 {
        let version = {
            let mut data = self.data.write();
            data.version += 1;
            data.rows = rows;
            data.version
        };
        self.changed.send_replace(version);
        version
    }
}

#[async_trait::async_trait]
impl DataSource for StaticDataSource {
    async fn ingest(&self) -> Result<Dataset, CollaboratorError> {
        Ok(self.data.read().clone())
    }

    fn changes(&self) -> Option<watch::Receiver<u64>> {
        Some(self.changed.subscribe())
    }
}

/// Aggregator that filters rows down to the keys a series plots
///
/// Series-level inline data replaces the shared dataset.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughAggregator;

fn plotted_keys(options: &Tree) -> Vec<&str> {
    ["xKey", "yKey", "angleKey", "radiusKey", "sizeKey"]
        .into_iter()
        .filter_map(|k| options.get(k).and_then(Tree::as_str))
        .collect()
}

#[async_trait::async_trait]
impl Aggregator for PassthroughAggregator {
    async fn process(
        &self,
        raw: &Dataset,
        target: &ProcessTarget,
    ) -> Result<ProcessedData, CollaboratorError> {
        let ProcessTarget::Series { options, .. } = target else {
            return Ok(ProcessedData {
                rows: raw.rows.clone(),
                source_version: raw.version,
            });
        };

        let rows = options
            .get("data")
            .and_then(Tree::as_array)
            .unwrap_or(raw.rows.as_slice());
        let keys = plotted_keys(options);
        let rows = rows
            .iter()
            .filter(|row| keys.iter().all(|k| row.get(k).is_some_and(|v| !v.is_null())))
            .cloned()
            .collect();

        Ok(ProcessedData {
            rows,
            source_version: raw.version,
        })
    }
}

/// Layout that reserves a fixed band per axis inside a margin
#[derive(Debug, Clone, Copy)]
pub struct MarginLayout {
    /// Outer margin on every side
    pub margin: f64,
    /// Thickness reserved per axis
    pub axis_band: f64,
}

impl Default for MarginLayout {
    fn default() -> Self {
        Self {
            margin: 20.0,
            axis_band: 30.0,
        }
    }
}

#[derive(Clone, Copy)]
enum Edge {
    Left,
    Right,
    Top,
    Bottom,
}

fn edge_of(axis: &AxisInput) -> Edge {
    match axis.options.get("position").and_then(Tree::as_str) {
        Some("right") => Edge::Right,
        Some("top") => Edge::Top,
        Some("bottom") => Edge::Bottom,
        Some("left") => Edge::Left,
        _ => match axis.kind {
            AxisKind::Category | AxisKind::Time | AxisKind::AngleCategory => Edge::Bottom,
            _ => Edge::Left,
        },
    }
}

#[async_trait::async_trait]
impl LayoutEngine for MarginLayout {
    async fn compute_layout(
        &self,
        size: Size,
        axes: &[AxisInput],
    ) -> Result<Layout, CollaboratorError> {
        let mut area = Rect {
            x: self.margin,
            y: self.margin,
            width: (f64::from(size.width) - 2.0 * self.margin).max(0.0),
            height: (f64::from(size.height) - 2.0 * self.margin).max(0.0),
        };

        let mut axis_areas = Vec::with_capacity(axes.len());
        for axis in axes {
            let band = self.axis_band;
            let rect = match edge_of(axis) {
                Edge::Left => {
                    let r = Rect { width: band, ..area };
                    area.x += band;
                    area.width = (area.width - band).max(0.0);
                    r
                }
                Edge::Right => {
                    area.width = (area.width - band).max(0.0);
                    Rect {
                        x: area.x + area.width,
                        width: band,
                        ..area
                    }
                }
                Edge::Top => {
                    let r = Rect { height: band, ..area };
                    area.y += band;
                    area.height = (area.height - band).max(0.0);
                    r
                }
                Edge::Bottom => {
                    area.height = (area.height - band).max(0.0);
                    Rect {
                        y: area.y + area.height,
                        height: band,
                        ..area
                    }
                }
            };
            axis_areas.push(rect);
        }

        Ok(Layout {
            series_area: area,
            axis_areas,
        })
    }
}

/// Scene that keeps the last frame and the attached node set
#[derive(Debug, Default)]
pub struct BufferScene {
    last_frame: Mutex<Option<RenderInstructions>>,
    attached: Mutex<BTreeSet<Uuid>>,
    size: Mutex<Option<Size>>,
}

impl BufferScene {
    /// Most recently rendered frame
    #[must_use]
    pub fn last_frame(&self) -> Option<RenderInstructions> {
        self.last_frame.lock().clone()
    }

    /// Series with an attached node
    #[must_use]
    pub fn attached(&self) -> BTreeSet<Uuid> {
        self.attached.lock().clone()
    }

    /// Current surface size
    #[must_use]
    pub fn size(&self) -> Option<Size> {
        *self.size.lock()
    }
}

#[async_trait::async_trait]
impl SceneGraph for BufferScene {
    async fn render(&self, instructions: &RenderInstructions) -> Result<(), CollaboratorError> {
        *self.last_frame.lock() = Some(instructions.clone());
        Ok(())
    }

    fn attach(&self, series: Uuid) {
        self.attached.lock().insert(series);
    }

    fn detach(&self, series: Uuid) {
        self.attached.lock().remove(&series);
    }

    fn resize(&self, size: Size) {
        *self.size.lock() = Some(size);
    }
}

/// Behavior that turns processed rows into point nodes
///
/// Each node carries the plotted keys of its row, renamed to `x`/`y`
/// (or `angle`/`radius` for polar series). Hidden series produce no nodes.
#[derive(Debug, Clone, Copy, Default)]
pub struct PointsBehavior;

#[async_trait::async_trait]
impl SeriesBehavior for PointsBehavior {
    async fn update(&self, input: SeriesUpdateInput) -> Result<Tree, CollaboratorError> {
        let visible = input
            .options
            .get("visible")
            .and_then(Tree::as_bool)
            .unwrap_or(true);
        let Some(processed) = input.processed.filter(|_| visible) else {
            return Ok(Tree::Array(Vec::new()));
        };

        let fields: &[(&str, &str)] = if input.kind.is_polar() {
            &[("angleKey", "angle"), ("radiusKey", "radius")]
        } else {
            &[("xKey", "x"), ("yKey", "y"), ("sizeKey", "size")]
        };

        let nodes = processed
            .rows
            .iter()
            .map(|row| {
                let mut node = TreeMap::new();
                for (option, name) in fields {
                    let value = input
                        .options
                        .get(option)
                        .and_then(Tree::as_str)
                        .and_then(|key| row.get(key));
                    if let Some(value) = value {
                        node.insert((*name).to_string(), value.clone());
                    }
                }
                Tree::Object(node)
            })
            .collect();
        Ok(Tree::Array(nodes))
    }
}
