//! Registries of series, axis and module implementations
//!
//! Injected into a chart at build time and keyed by enumerated
//! discriminants. Each entry carries the default property set that live
//! instances are built from; a series entry also carries its behavior.

use crate::collaborators::memory::PointsBehavior;
use crate::collaborators::SeriesBehavior;
use crate::error::ChartError;
use crate::types::{AxisKind, SeriesKind};
use chartflow_reconcile::ModuleKind;
use chartflow_tree::{ApplyOptions, LiveNode, PropertyPath, Record, Segment, Tree};
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Registered series implementation
#[derive(Clone)]
pub struct SeriesRegistration {
    /// Render-data computation
    pub behavior: Arc<dyn SeriesBehavior>,
    /// Declared properties with their defaults
    pub defaults: Tree,
}

impl fmt::Debug for SeriesRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SeriesRegistration")
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

/// Explicit registry of everything a chart may instantiate
#[derive(Debug, Clone, Default)]
pub struct Registry {
    series: BTreeMap<SeriesKind, SeriesRegistration>,
    axes: BTreeMap<AxisKind, Tree>,
    modules: BTreeMap<ModuleKind, Tree>,
}

impl Registry {
    /// Create an empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in kind, using [`PointsBehavior`] for series
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        let points: Arc<dyn SeriesBehavior> = Arc::new(PointsBehavior);
        for kind in SeriesKind::ALL {
            registry.register_series(kind, Arc::clone(&points));
        }
        for kind in AxisKind::ALL {
            registry.register_axis(kind);
        }
        for module in ModuleKind::ALL {
            registry.register_module(module);
        }
        registry
    }

    /// Register a series kind with built-in defaults
    pub fn register_series(&mut self, kind: SeriesKind, behavior: Arc<dyn SeriesBehavior>) {
        self.register_series_with_defaults(kind, behavior, series_defaults(kind));
    }

    /// Register a series kind with a custom property set
    pub fn register_series_with_defaults(
        &mut self,
        kind: SeriesKind,
        behavior: Arc<dyn SeriesBehavior>,
        defaults: Tree,
    ) {
        self.series
            .insert(kind, SeriesRegistration { behavior, defaults });
    }

    /// Register an axis kind
    pub fn register_axis(&mut self, kind: AxisKind) {
        self.axes.insert(kind, axis_defaults(kind));
    }

    /// Register a module
    pub fn register_module(&mut self, module: ModuleKind) {
        self.modules.insert(module, module_defaults(module));
    }

    /// Remove a series kind
    #[inline]
    pub fn remove_series(&mut self, kind: SeriesKind) -> bool {
        self.series.remove(&kind).is_some()
    }

    /// Remove a module
    #[inline]
    pub fn remove_module(&mut self, module: ModuleKind) -> bool {
        self.modules.remove(&module).is_some()
    }

    /// Check if a series kind is registered
    #[inline]
    #[must_use]
    pub fn contains_series(&self, kind: SeriesKind) -> bool {
        self.series.contains_key(&kind)
    }

    /// Check if a module is registered
    #[inline]
    #[must_use]
    pub fn contains_module(&self, module: ModuleKind) -> bool {
        self.modules.contains_key(&module)
    }

    /// Registered series kinds
    #[must_use]
    pub fn series_kinds(&self) -> Vec<SeriesKind> {
        self.series.keys().copied().collect()
    }

    /// Parse and look up a series type
    ///
    /// # Errors
    /// [`ChartError::UnknownType`] for unparseable names,
    /// [`ChartError::MissingRegistration`] for known but unregistered kinds.
    pub fn resolve_series(&self, name: &str) -> Result<SeriesKind, ChartError> {
        let kind: SeriesKind = name.parse().map_err(|name| ChartError::UnknownType {
            kind: "series",
            name,
        })?;
        if self.contains_series(kind) {
            Ok(kind)
        } else {
            Err(ChartError::MissingRegistration {
                kind: "series",
                name: name.to_string(),
            })
        }
    }

    /// Parse and look up an axis type
    ///
    /// # Errors
    /// As [`Registry::resolve_series`].
    pub fn resolve_axis(&self, name: &str) -> Result<AxisKind, ChartError> {
        let kind: AxisKind = name.parse().map_err(|name| ChartError::UnknownType {
            kind: "axis",
            name,
        })?;
        if self.axes.contains_key(&kind) {
            Ok(kind)
        } else {
            Err(ChartError::MissingRegistration {
                kind: "axis",
                name: name.to_string(),
            })
        }
    }

    /// Require a module registration
    ///
    /// # Errors
    /// [`ChartError::MissingRegistration`] when the module is not registered.
    pub fn require_module(&self, module: ModuleKind) -> Result<(), ChartError> {
        if self.contains_module(module) {
            Ok(())
        } else {
            Err(ChartError::MissingRegistration {
                kind: "module",
                name: module.to_string(),
            })
        }
    }

    /// Behavior of a series kind
    #[must_use]
    pub fn behavior(&self, kind: SeriesKind) -> Option<Arc<dyn SeriesBehavior>> {
        self.series.get(&kind).map(|r| Arc::clone(&r.behavior))
    }

    /// Fresh live node for a series kind
    pub(crate) fn build_series(&self, kind: SeriesKind) -> LiveNode {
        let defaults = self
            .series
            .get(&kind)
            .map_or_else(|| series_defaults(kind), |r| r.defaults.clone());
        LiveNode::Record(record_from(kind.name(), &defaults))
    }

    /// Fresh live node for an axis kind
    pub(crate) fn build_axis(&self, kind: AxisKind) -> LiveNode {
        let defaults = self
            .axes
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| axis_defaults(kind));
        LiveNode::Record(record_from(kind.name(), &defaults))
    }

    /// Fresh live node for a module
    pub(crate) fn build_module(&self, module: ModuleKind) -> LiveNode {
        let defaults = self
            .modules
            .get(&module)
            .cloned()
            .unwrap_or_else(|| module_defaults(module));
        LiveNode::Record(record_from(module.option_key(), &defaults))
    }
}

/// Build a record declaring every key of `defaults`
///
/// Nested objects become nested records; everything else is an open value.
pub(crate) fn record_from(kind: &str, defaults: &Tree) -> Record {
    let mut record = Record::new(kind);
    if let Some(map) = defaults.as_object() {
        for (key, value) in map {
            match value {
                Tree::Object(_) => record.declare(key.as_str(), record_from(key, value)),
                other => record.declare(key.as_str(), other.clone()),
            }
        }
    }
    record
}

fn path(segments: &[&str]) -> PropertyPath {
    PropertyPath::new(
        segments
            .iter()
            .map(|s| match *s {
                "[]" => Segment::AnyIndex,
                key => Segment::Key(key.to_string()),
            })
            .collect(),
    )
}

/// Apply options for module and axis patches
///
/// Registers constructors for list items that are typed records.
pub(crate) fn item_constructors(options: ApplyOptions) -> ApplyOptions {
    options
        .constructor(path(&["annotations", "items", "[]"]), || {
            LiveNode::Record(record_from("annotation", &annotation_defaults()))
        })
        .constructor(path(&["axes", "[]", "crossLines", "[]"]), || {
            LiveNode::Record(record_from("cross-line", &cross_line_defaults()))
        })
}

/// Declared chart-level properties
pub(crate) fn chart_defaults() -> Tree {
    Tree::from(json!({
        "width": null,
        "height": null,
        "theme": null,
        "title": {"enabled": false, "text": null, "fontSize": 18, "color": null},
        "subtitle": {"enabled": false, "text": null, "fontSize": 12, "color": null},
        "footnote": {"enabled": false, "text": null, "fontSize": 10, "color": null},
        "padding": {"top": 20, "right": 20, "bottom": 20, "left": 20},
        "animation": {"enabled": true, "duration": 1000},
        "tooltip": {"enabled": true, "delay": 0},
    }))
}

fn series_defaults(kind: SeriesKind) -> Tree {
    let mut defaults = Tree::from(json!({
        "type": kind.name(),
        "visible": true,
        "showInLegend": true,
        "data": null,
        "fill": null,
        "stroke": null,
        "strokeWidth": 1,
        "fillOpacity": 1,
        "tooltip": {"enabled": true},
        "label": {"enabled": false, "fontSize": 12, "color": null},
        "seriesGrouping": null,
    }));
    let specific = if kind.is_polar() {
        json!({"angleKey": null, "radiusKey": null, "innerRadiusRatio": null})
    } else {
        json!({
            "xKey": null,
            "yKey": null,
            "xName": null,
            "yName": null,
            "direction": null,
            "normalizedTo": null,
            "sizeKey": null,
            "marker": {"enabled": true, "size": 6, "shape": "circle"},
        })
    };
    if let Tree::Object(extra) = Tree::from(specific) {
        for (key, value) in extra {
            defaults.insert(key, value);
        }
    }
    if kind == SeriesKind::Donut {
        defaults.insert("innerRadiusRatio", Tree::from(0.6));
    }
    defaults
}

fn axis_defaults(kind: AxisKind) -> Tree {
    Tree::from(json!({
        "type": kind.name(),
        "position": null,
        "keys": [],
        "title": {"enabled": false, "text": null},
        "min": null,
        "max": null,
        "nice": true,
        "gridLine": {"enabled": true, "width": 1},
        "label": {"enabled": true, "rotation": 0, "fontSize": 12, "format": null},
        "crossLines": [],
    }))
}

fn module_defaults(module: ModuleKind) -> Tree {
    let value = match module {
        ModuleKind::Legend => json!({
            "enabled": true,
            "position": "bottom",
            "spacing": 20,
            "item": {"marker": {"size": 15}, "label": {"fontSize": 12}},
        }),
        ModuleKind::Navigator => json!({"enabled": true, "height": 30, "min": 0, "max": 1}),
        ModuleKind::Zoom => json!({
            "enabled": true,
            "axes": "x",
            "scrollingStep": 0.1,
            "minVisibleItems": 2,
        }),
        ModuleKind::Annotations => json!({"enabled": true, "items": []}),
        ModuleKind::Background => json!({"visible": true, "fill": "white", "image": null}),
    };
    Tree::from(value)
}

fn annotation_defaults() -> Tree {
    Tree::from(json!({
        "type": "line",
        "start": null,
        "end": null,
        "stroke": "black",
        "strokeWidth": 1,
        "label": {"text": null},
    }))
}

fn cross_line_defaults() -> Tree {
    Tree::from(json!({
        "type": "line",
        "value": null,
        "range": null,
        "stroke": "gray",
        "label": {"text": null},
    }))
}
