//! Shared chart types
//!
//! Enumerated discriminants for series and axes, geometry, and the values
//! exchanged with collaborators during a pass.

use chartflow_pipeline::ItemId;
use chartflow_reconcile::ModuleKind;
use chartflow_tree::Tree;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use uuid::Uuid;

/// Series discriminant
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum SeriesKind {
    /// Line series
    Line,
    /// Bar / column series
    Bar,
    /// Area series
    Area,
    /// Scatter series
    Scatter,
    /// Bubble series
    Bubble,
    /// Histogram series
    Histogram,
    /// Pie series
    Pie,
    /// Donut series
    Donut,
}

impl SeriesKind {
    /// Every series kind
    pub const ALL: [SeriesKind; 8] = [
        Self::Line,
        Self::Bar,
        Self::Area,
        Self::Scatter,
        Self::Bubble,
        Self::Histogram,
        Self::Pie,
        Self::Donut,
    ];

    /// Name used in options
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Line => "line",
            Self::Bar => "bar",
            Self::Area => "area",
            Self::Scatter => "scatter",
            Self::Bubble => "bubble",
            Self::Histogram => "histogram",
            Self::Pie => "pie",
            Self::Donut => "donut",
        }
    }

    /// True for series drawn on polar axes
    #[inline]
    #[must_use]
    pub fn is_polar(self) -> bool {
        matches!(self, Self::Pie | Self::Donut)
    }
}

impl Display for SeriesKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SeriesKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.name() == s)
            .ok_or_else(|| s.to_string())
    }
}

/// Axis discriminant
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum AxisKind {
    /// Continuous numeric axis
    Number,
    /// Logarithmic axis
    Log,
    /// Discrete category axis
    Category,
    /// Time axis
    Time,
    /// Polar angle axis
    AngleCategory,
    /// Polar radius axis
    RadiusNumber,
}

impl AxisKind {
    /// Every axis kind
    pub const ALL: [AxisKind; 6] = [
        Self::Number,
        Self::Log,
        Self::Category,
        Self::Time,
        Self::AngleCategory,
        Self::RadiusNumber,
    ];

    /// Name used in options
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Number => "number",
            Self::Log => "log",
            Self::Category => "category",
            Self::Time => "time",
            Self::AngleCategory => "angle-category",
            Self::RadiusNumber => "radius-number",
        }
    }
}

impl Display for AxisKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AxisKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.name() == s)
            .ok_or_else(|| s.to_string())
    }
}

/// Scene dimensions in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    /// Width
    pub width: u32,
    /// Height
    pub height: u32,
}

impl Size {
    /// Create a size
    #[inline]
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Display for Size {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Axis-aligned rectangle
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    /// Left edge
    pub x: f64,
    /// Top edge
    pub y: f64,
    /// Width
    pub width: f64,
    /// Height
    pub height: f64,
}

/// Space allocation produced by the layout collaborator
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Layout {
    /// Area available to series
    pub series_area: Rect,
    /// One rectangle per axis, in axis order
    pub axis_areas: Vec<Rect>,
}

/// Axis description handed to the layout collaborator
#[derive(Debug, Clone, PartialEq)]
pub struct AxisInput {
    /// Axis kind
    pub kind: AxisKind,
    /// Current axis properties
    pub options: Tree,
}

/// Raw dataset produced by ingestion
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Dataset {
    /// Monotonic version of the source data
    pub version: u64,
    /// Rows, usually objects
    pub rows: Vec<Tree>,
}

/// What the aggregation collaborator is asked to process
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessTarget {
    /// One series
    Series {
        /// Series identity
        id: Uuid,
        /// Series kind
        kind: SeriesKind,
        /// Current series properties
        options: Tree,
    },
    /// A module consuming data
    Module(ModuleKind),
}

/// Output of the aggregation collaborator for one target
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProcessedData {
    /// Processed rows
    pub rows: Vec<Tree>,
    /// Dataset version the rows were derived from
    pub source_version: u64,
}

/// Input for recomputing one series' render data
#[derive(Debug, Clone)]
pub struct SeriesUpdateInput {
    /// Series identity
    pub id: Uuid,
    /// Series kind
    pub kind: SeriesKind,
    /// Current series properties
    pub options: Tree,
    /// Processed data, if the process stage produced any
    pub processed: Option<ProcessedData>,
    /// Area available to the series
    pub area: Rect,
    /// Whether animations should be skipped
    pub skip_animations: bool,
}

/// Render data for one series
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesRender {
    /// Series identity
    pub id: Uuid,
    /// Pipeline item id
    pub item: ItemId,
    /// Series kind
    pub kind: SeriesKind,
    /// Whether the series is drawn
    pub visible: bool,
    /// Node data computed during item update
    pub nodes: Tree,
}

/// Everything the scene graph needs to draw a frame
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderInstructions {
    /// Pass that produced the frame
    pub pass: u64,
    /// Scene size
    pub size: Size,
    /// Series in declaration order
    pub series: Vec<SeriesRender>,
    /// Axis properties in order
    pub axes: Vec<Tree>,
    /// Enabled modules with their properties
    pub modules: Vec<(ModuleKind, Tree)>,
    /// Chart-level properties (title, padding, ...)
    pub chart: Tree,
    /// Space allocation used for the frame
    pub layout: Layout,
    /// Animation batch the frame belongs to
    pub animation_batch: u64,
    /// Whether animations are skipped for the frame
    pub skip_animations: bool,
    /// Extra decorations added by pre-render hooks
    pub overlays: Vec<Tree>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_parse_from_option_names() {
        assert_eq!("bar".parse::<SeriesKind>(), Ok(SeriesKind::Bar));
        assert_eq!("angle-category".parse::<AxisKind>(), Ok(AxisKind::AngleCategory));
        assert_eq!("pyramid".parse::<SeriesKind>(), Err("pyramid".to_string()));
    }

    #[test]
    fn serde_names_match_option_names() {
        for kind in SeriesKind::ALL {
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json.as_str(), Some(kind.name()));
        }
        for kind in AxisKind::ALL {
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json.as_str(), Some(kind.name()));
        }
    }

    #[test]
    fn polar_kinds() {
        assert!(SeriesKind::Pie.is_polar());
        assert!(!SeriesKind::Line.is_polar());
    }
}
