//! Reconciliation of declarative options onto the live graph
//!
//! # Steps
//! 1. Normalize and validate (missing registrations fail before any mutation)
//! 2. Patch the chart root, skipping list and module keys
//! 3. Reconcile series with the keyed matcher
//! 4. Reconcile axes positionally, rebuilding when series were replaced
//! 5. Add, remove and patch modules
//! 6. Record inline data changes
//! 7. Decide the pipeline request

use crate::config::ChartflowConfig;
use crate::error::ChartError;
use crate::graph::{AxisInstance, ChartGraph, ModuleInstance, SeriesInstance};
use crate::registry::{chart_defaults, item_constructors, record_from, Registry};
use crate::types::{AxisKind, SeriesKind, Size};
use chartflow_pipeline::{Stage, UpdateRequest};
use chartflow_reconcile::{
    is_enabled, match_instances, plan_modules, MatchOutcome, MatchStatus, MatcherConfig,
    ModuleKind, ModulePlan, UpdateStatus,
};
use chartflow_tree::{
    apply, apply_at, diff, ApplyOptions, ApplyReport, LiveNode, PropertyPath, Segment, Tree,
    TreeKind, TreeMap,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// How options relate to what was applied before
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApplyMode {
    /// Incremental update
    #[default]
    Patch,
    /// Caller replaced the whole configuration
    Replace,
}

/// Series membership changes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeriesChanges {
    /// Newly created series
    pub added: Vec<Uuid>,
    /// Destroyed series
    pub removed: Vec<Uuid>,
    /// Series patched in place
    pub patched: Vec<Uuid>,
    /// Whole list rebuilt
    pub replaced: bool,
}

/// Result of one reconciliation
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileOutcome {
    /// Strongest change
    pub status: UpdateStatus,
    /// Series changes
    pub series: SeriesChanges,
    /// Axes were rebuilt
    pub axes_rebuilt: bool,
    /// Module changes
    pub modules: ModulePlan,
    /// Inline data changed
    pub data_changed: bool,
    /// Recovered apply warnings
    pub report: ApplyReport,
    /// Pipeline work needed
    pub request: UpdateRequest,
}

struct Validated {
    options: Tree,
    series: Vec<(SeriesKind, Tree)>,
    axes: Vec<(AxisKind, Tree)>,
}

fn key_path(key: &str) -> PropertyPath {
    PropertyPath::root().key(key)
}

fn list_item_path(list: &str, index: usize) -> PropertyPath {
    key_path(list).index(index)
}

fn any_item_path(list: &str, key: &str) -> PropertyPath {
    PropertyPath::new(vec![
        Segment::Key(list.to_string()),
        Segment::AnyIndex,
        Segment::Key(key.to_string()),
    ])
}

/// Applies option trees to a [`ChartGraph`]
#[derive(Debug, Clone)]
pub struct Reconciler {
    config: Arc<ChartflowConfig>,
    registry: Arc<Registry>,
    series_matcher: MatcherConfig,
    axis_matcher: MatcherConfig,
    root_opts: ApplyOptions,
    series_opts: ApplyOptions,
    axis_opts: ApplyOptions,
    module_opts: ApplyOptions,
}

impl Reconciler {
    /// Create a reconciler
    #[must_use]
    pub fn new(config: Arc<ChartflowConfig>, registry: Arc<Registry>) -> Self {
        let data_key = config.data_key.as_str();

        let mut root_opts = ApplyOptions::new()
            .skip(key_path("series"))
            .skip(key_path("axes"))
            .skip(key_path(data_key))
            .allow(key_path("theme"), vec![TreeKind::String, TreeKind::Object]);
        for module in ModuleKind::ALL {
            root_opts = root_opts.skip(key_path(module.option_key()));
        }

        let series_opts = ApplyOptions::new()
            .skip(any_item_path("series", "type"))
            .allow(any_item_path("series", data_key), vec![TreeKind::Array]);
        let axis_opts = item_constructors(ApplyOptions::new().skip(any_item_path("axes", "type")))
            .allow(any_item_path("axes", "min"), vec![TreeKind::Number, TreeKind::String])
            .allow(any_item_path("axes", "max"), vec![TreeKind::Number, TreeKind::String]);
        let module_opts = item_constructors(ApplyOptions::new());

        Self {
            series_matcher: config.series_matcher(),
            axis_matcher: MatcherConfig::axes(),
            config,
            registry,
            root_opts,
            series_opts,
            axis_opts,
            module_opts,
        }
    }

    /// Empty live graph with the chart-level properties declared
    #[must_use]
    pub fn empty_graph(&self) -> ChartGraph {
        ChartGraph::new(LiveNode::Record(record_from("chart", &chart_defaults())))
    }

    /// Bring `graph` in line with `options`
    ///
    /// # Errors
    /// Fails before touching the graph when the options are not an object or
    /// name a type that is unknown or unregistered.
    pub fn apply_options(
        &self,
        graph: &mut ChartGraph,
        options: &Tree,
        mode: ApplyMode,
    ) -> Result<ReconcileOutcome, ChartError> {
        let Validated {
            options,
            series,
            axes,
        } = self.validate(options)?;

        let mut report = ApplyReport::default();
        let mut status = UpdateStatus::NoOp;

        let size_changed = self.reconcile_root(graph, &options, &mut report, &mut status);
        let series_changes = self.reconcile_series(graph, &series, &mut report, &mut status);
        let axes_rebuilt =
            self.reconcile_axes(graph, &axes, series_changes.replaced, &mut report, &mut status);
        let modules = self.reconcile_modules(graph, &options, &mut report, &mut status);
        let data_changed = self.reconcile_data(graph, &options);
        if data_changed {
            status = status.max(UpdateStatus::DataChange);
        }

        let structural = status >= UpdateStatus::DataChange
            || !series_changes.added.is_empty()
            || !series_changes.removed.is_empty()
            || axes_rebuilt
            || !modules.is_empty()
            || size_changed
            || mode == ApplyMode::Replace;

        let mut request = if structural {
            UpdateRequest::new(Stage::Full).force_refresh()
        } else {
            UpdateRequest::new(Stage::Layout)
        };
        if series_changes.replaced {
            graph.animation_batch += 1;
            request = request.skip_animations();
        }
        request = request.requestor("apply-options");

        graph.applied = options;

        debug!(
            ?status,
            added = series_changes.added.len(),
            removed = series_changes.removed.len(),
            patched = series_changes.patched.len(),
            axes_rebuilt,
            data_changed,
            stage = %request.stage,
            "options reconciled"
        );

        Ok(ReconcileOutcome {
            status,
            series: series_changes,
            axes_rebuilt,
            modules,
            data_changed,
            report,
            request,
        })
    }

    fn validate(&self, options: &Tree) -> Result<Validated, ChartError> {
        let Tree::Object(mut map) = options.without_deletes() else {
            return Err(ChartError::InvalidOptions(format!(
                "options must be an object, got {}",
                options.kind()
            )));
        };

        let default_type = self.config.default_series_type.name();
        let series = match map.get_mut("series") {
            None | Some(Tree::Null) => Vec::new(),
            Some(Tree::Array(items)) => {
                let mut resolved = Vec::with_capacity(items.len());
                for (i, item) in items.iter_mut().enumerate() {
                    let Tree::Object(spec) = item else {
                        return Err(ChartError::InvalidOptions(format!(
                            "series[{i}] must be an object"
                        )));
                    };
                    let kind = match spec.get("type") {
                        Some(Tree::String(name)) => self.registry.resolve_series(name)?,
                        None | Some(Tree::Null) => {
                            spec.insert("type".to_string(), Tree::from(default_type));
                            self.registry.resolve_series(default_type)?
                        }
                        Some(other) => {
                            return Err(ChartError::InvalidOptions(format!(
                                "series[{i}].type must be a string, got {}",
                                other.kind()
                            )))
                        }
                    };
                    resolved.push((kind, item.clone()));
                }
                resolved
            }
            Some(other) => {
                return Err(ChartError::InvalidOptions(format!(
                    "series must be an array, got {}",
                    other.kind()
                )))
            }
        };

        let axes = match map.get("axes") {
            None | Some(Tree::Null) => Vec::new(),
            Some(Tree::Array(items)) => {
                let mut resolved = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    let name = item.get("type").and_then(Tree::as_str).ok_or_else(|| {
                        ChartError::InvalidOptions(format!("axes[{i}] needs a string type"))
                    })?;
                    resolved.push((self.registry.resolve_axis(name)?, item.clone()));
                }
                resolved
            }
            Some(other) => {
                return Err(ChartError::InvalidOptions(format!(
                    "axes must be an array, got {}",
                    other.kind()
                )))
            }
        };

        for module in ModuleKind::ALL {
            let key = module.option_key();
            if let Some(Tree::Bool(enabled)) = map.get(key) {
                let mut expanded = TreeMap::new();
                expanded.insert("enabled".to_string(), Tree::Bool(*enabled));
                map.insert(key.to_string(), Tree::Object(expanded));
            }
        }

        let options = Tree::Object(map);
        for module in ModuleKind::ALL {
            if is_enabled(module, &options) {
                self.registry.require_module(module)?;
            }
        }

        Ok(Validated {
            options,
            series,
            axes,
        })
    }

    /// Patch chart-level properties; returns true when the explicit size changed
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn reconcile_root(
        &self,
        graph: &mut ChartGraph,
        options: &Tree,
        report: &mut ApplyReport,
        status: &mut UpdateStatus,
    ) -> bool {
        if let Some(patch) = diff(&graph.applied, options) {
            let root = apply(&mut graph.root, &patch, &self.root_opts);
            if root.applied > 0 {
                *status = (*status).max(UpdateStatus::Updated);
            }
            report.absorb(root);
        }

        let dimension = |key: &str| {
            options
                .get(key)
                .and_then(Tree::as_f64)
                .filter(|v| *v >= 0.0)
                .map(|v| v.round() as u32)
        };
        let explicit = match (dimension("width"), dimension("height")) {
            (Some(width), Some(height)) => Some(Size::new(width, height)),
            _ => None,
        };
        let changed = explicit != graph.explicit_size;
        graph.explicit_size = explicit;
        changed
    }

    fn create_series(
        &self,
        graph: &mut ChartGraph,
        kind: SeriesKind,
        spec: &Tree,
        index: usize,
        report: &mut ApplyReport,
    ) -> SeriesInstance {
        let item = graph.next_item();
        let mut instance = SeriesInstance::new(item, kind, self.registry.build_series(kind));
        report.absorb(apply_at(
            &mut instance.node,
            spec,
            &list_item_path("series", index),
            &self.series_opts,
        ));
        instance.spec = spec.clone();
        graph.queue_attach(instance.id);
        instance
    }

    fn reconcile_series(
        &self,
        graph: &mut ChartGraph,
        series: &[(SeriesKind, Tree)],
        report: &mut ApplyReport,
        status: &mut UpdateStatus,
    ) -> SeriesChanges {
        let specs: Vec<Tree> = series.iter().map(|(_, spec)| spec.clone()).collect();
        let previous: Vec<Tree> = graph.series.iter().map(|s| s.spec.clone()).collect();
        let outcome = match_instances(&graph.series, &specs, &previous, &self.series_matcher);

        let mut changes = SeriesChanges {
            replaced: outcome.is_no_overlap(),
            ..SeriesChanges::default()
        };
        let series_status = match &outcome {
            MatchOutcome::NoOverlap { .. } => UpdateStatus::Replaced,
            MatchOutcome::Overlap(records) => {
                UpdateStatus::from_records(records, &self.config.data_key)
            }
        };
        *status = (*status).max(series_status);

        let mut old: Vec<Option<SeriesInstance>> = graph.series.drain(..).map(Some).collect();
        let mut next: Vec<Option<SeriesInstance>> = specs.iter().map(|_| None).collect();

        for record in outcome.into_records(&specs) {
            let reused = record.old_index.and_then(|i| old.get_mut(i)?.take());
            match (record.status, record.new_index) {
                (MatchStatus::Remove, _) | (_, None) => {
                    if let Some(instance) = reused {
                        graph.queue_detach(instance.id);
                        changes.removed.push(instance.id);
                    }
                }
                (MatchStatus::Add | MatchStatus::Replaced, Some(j)) => {
                    let (kind, spec) = &series[j];
                    let instance = self.create_series(graph, *kind, spec, j, report);
                    changes.added.push(instance.id);
                    next[j] = Some(instance);
                }
                (_, Some(j)) => {
                    let Some(mut instance) = reused else {
                        continue;
                    };
                    if let Some(patch) = &record.patch {
                        report.absorb(apply_at(
                            &mut instance.node,
                            patch,
                            &list_item_path("series", j),
                            &self.series_opts,
                        ));
                        instance.dirty = true;
                        changes.patched.push(instance.id);
                    }
                    instance.spec = specs[j].clone();
                    next[j] = Some(instance);
                }
            }
        }

        for instance in old.into_iter().flatten() {
            graph.queue_detach(instance.id);
            changes.removed.push(instance.id);
        }
        graph.series = next.into_iter().flatten().collect();
        changes
    }

    /// Returns true when the axis list was rebuilt
    fn reconcile_axes(
        &self,
        graph: &mut ChartGraph,
        axes: &[(AxisKind, Tree)],
        series_replaced: bool,
        report: &mut ApplyReport,
        status: &mut UpdateStatus,
    ) -> bool {
        let specs: Vec<Tree> = axes.iter().map(|(_, spec)| spec.clone()).collect();
        let previous: Vec<Tree> = graph.axes.iter().map(|a| a.spec.clone()).collect();

        let outcome = if series_replaced {
            None
        } else {
            match match_instances(&graph.axes, &specs, &previous, &self.axis_matcher) {
                MatchOutcome::Overlap(records) => Some(records),
                MatchOutcome::NoOverlap { .. } => None,
            }
        };

        if let Some(records) = outcome {
            for record in records {
                let (Some(i), Some(patch)) = (record.old_index, &record.patch) else {
                    continue;
                };
                let Some(axis) = graph.axes.get_mut(i) else {
                    continue;
                };
                report.absorb(apply_at(
                    &mut axis.node,
                    patch,
                    &list_item_path("axes", i),
                    &self.axis_opts,
                ));
                axis.spec = specs[i].clone();
                *status = (*status).max(UpdateStatus::Updated);
            }
            return false;
        }

        if graph.axes.is_empty() && axes.is_empty() {
            return false;
        }
        graph.axes = axes
            .iter()
            .enumerate()
            .map(|(i, (kind, spec))| {
                let mut axis = AxisInstance::new(*kind, self.registry.build_axis(*kind));
                report.absorb(apply_at(
                    &mut axis.node,
                    spec,
                    &list_item_path("axes", i),
                    &self.axis_opts,
                ));
                axis.spec = spec.clone();
                axis
            })
            .collect();
        *status = (*status).max(UpdateStatus::Updated);
        true
    }

    fn reconcile_modules(
        &self,
        graph: &mut ChartGraph,
        options: &Tree,
        report: &mut ApplyReport,
        status: &mut UpdateStatus,
    ) -> ModulePlan {
        let enabled: BTreeSet<ModuleKind> = graph.modules.keys().copied().collect();
        let plan = plan_modules(&enabled, options);

        for module in &plan.remove {
            graph.modules.remove(module);
        }
        for module in &plan.add {
            graph.modules.insert(
                *module,
                ModuleInstance {
                    node: self.registry.build_module(*module),
                    processed: None,
                },
            );
        }
        if !plan.is_empty() {
            *status = (*status).max(UpdateStatus::Updated);
        }

        for (module, instance) in &mut graph.modules {
            let key = module.option_key();
            let Some(desired) = options.get(key) else {
                continue;
            };
            let patch = if plan.add.contains(module) {
                Some(desired.clone())
            } else {
                let before = graph.applied.get(key).cloned().unwrap_or_else(Tree::object);
                diff(&before, desired)
            };
            if let Some(patch) = patch {
                let applied =
                    apply_at(&mut instance.node, &patch, &key_path(key), &self.module_opts);
                if applied.applied > 0 {
                    *status = (*status).max(UpdateStatus::Updated);
                }
                report.absorb(applied);
            }
        }
        plan
    }

    /// Returns true when inline chart data changed
    fn reconcile_data(&self, graph: &mut ChartGraph, options: &Tree) -> bool {
        let key = self.config.data_key.as_str();
        let before = graph.applied.get(key).cloned().unwrap_or_default();
        let after = options.get(key).cloned().unwrap_or_default();
        if diff(&before, &after).is_none() {
            return false;
        }
        graph.inline_data = after.as_array().map(<[Tree]>::to_vec);
        graph.data_version += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn t(v: serde_json::Value) -> Tree {
        Tree::from(v)
    }

    fn reconciler() -> Reconciler {
        Reconciler::new(
            Arc::new(ChartflowConfig::default()),
            Arc::new(Registry::with_defaults()),
        )
    }

    fn ids(graph: &ChartGraph) -> Vec<Uuid> {
        graph.series.iter().map(SeriesInstance::id).collect()
    }

    #[test]
    fn first_apply_builds_everything() {
        let r = reconciler();
        let mut graph = r.empty_graph();
        let outcome = r
            .apply_options(
                &mut graph,
                &t(json!({
                    "title": {"text": "Sales"},
                    "series": [
                        {"type": "line", "xKey": "m", "yKey": "v"},
                        {"xKey": "m", "yKey": "w"},
                    ],
                    "axes": [{"type": "category"}, {"type": "number"}],
                    "legend": {"position": "right"},
                })),
                ApplyMode::Patch,
            )
            .unwrap();

        assert_eq!(graph.series.len(), 2);
        assert_eq!(graph.series[1].kind(), SeriesKind::Line);
        assert_eq!(graph.axes.len(), 2);
        assert_eq!(outcome.series.added.len(), 2);
        assert_eq!(outcome.modules.add, vec![ModuleKind::Legend]);
        assert_eq!(outcome.request.stage, Stage::Full);
        assert!(outcome.request.force_refresh);
        assert_eq!(
            graph.root.get_tree("title").and_then(|t| t.get("text").cloned()),
            Some(Tree::from("Sales"))
        );
        assert_eq!(graph.attach_queue.len(), 2);
    }

    #[test]
    fn property_change_patches_in_place() {
        let r = reconciler();
        let mut graph = r.empty_graph();
        let base = json!({"series": [{"type": "bar", "xKey": "m", "yKey": "v", "fill": "red"}]});
        r.apply_options(&mut graph, &t(base), ApplyMode::Patch).unwrap();
        let before = ids(&graph);

        let outcome = r
            .apply_options(
                &mut graph,
                &t(json!({"series": [{"type": "bar", "xKey": "m", "yKey": "v", "fill": "blue"}]})),
                ApplyMode::Patch,
            )
            .unwrap();

        assert_eq!(ids(&graph), before);
        assert_eq!(outcome.status, UpdateStatus::Updated);
        assert_eq!(outcome.series.patched, before);
        assert_eq!(outcome.request.stage, Stage::Layout);
        assert_eq!(graph.series[0].properties().get("fill"), Some(&Tree::from("blue")));
    }

    #[test]
    fn incompatible_series_are_replaced() {
        let r = reconciler();
        let mut graph = r.empty_graph();
        r.apply_options(
            &mut graph,
            &t(json!({"series": [{"type": "line"}], "axes": [{"type": "number"}]})),
            ApplyMode::Patch,
        )
        .unwrap();
        let old = ids(&graph);
        let old_axis = graph.axes[0].id();

        let outcome = r
            .apply_options(
                &mut graph,
                &t(json!({
                    "series": [{"type": "bar"}, {"type": "bar"}],
                    "axes": [{"type": "number"}],
                })),
                ApplyMode::Patch,
            )
            .unwrap();

        assert_eq!(outcome.status, UpdateStatus::Replaced);
        assert!(outcome.series.replaced);
        assert!(outcome.axes_rebuilt);
        assert_ne!(graph.axes[0].id(), old_axis);
        assert_eq!(outcome.series.removed, old);
        assert!(outcome.request.skip_animations);
        assert_eq!(graph.animation_batch, 1);
        assert!(ids(&graph).iter().all(|id| !old.contains(id)));
    }

    #[test]
    fn removed_property_restores_default() {
        let r = reconciler();
        let mut graph = r.empty_graph();
        r.apply_options(
            &mut graph,
            &t(json!({"series": [{"type": "line", "strokeWidth": 4}]})),
            ApplyMode::Patch,
        )
        .unwrap();
        r.apply_options(&mut graph, &t(json!({"series": [{"type": "line"}]})), ApplyMode::Patch)
            .unwrap();
        assert_eq!(
            graph.series[0].properties().get("strokeWidth"),
            Some(&Tree::from(1))
        );
    }

    #[test]
    fn bad_leaf_is_skipped_with_warning() {
        let r = reconciler();
        let mut graph = r.empty_graph();
        let outcome = r
            .apply_options(
                &mut graph,
                &t(json!({"series": [{"type": "line", "strokeWidth": "wide", "madeUp": 1}]})),
                ApplyMode::Patch,
            )
            .unwrap();
        assert_eq!(outcome.report.warnings.len(), 2);
        assert_eq!(
            graph.series[0].properties().get("strokeWidth"),
            Some(&Tree::from(1))
        );
    }

    #[test]
    fn misconfiguration_leaves_graph_untouched() {
        let mut registry = Registry::with_defaults();
        assert!(registry.remove_module(ModuleKind::Navigator));
        let r = Reconciler::new(Arc::new(ChartflowConfig::default()), Arc::new(registry));
        let mut graph = r.empty_graph();

        let err = r
            .apply_options(
                &mut graph,
                &t(json!({"series": [{"type": "line"}], "navigator": {}})),
                ApplyMode::Patch,
            )
            .unwrap_err();
        assert!(matches!(err, ChartError::MissingRegistration { kind: "module", .. }));
        assert!(graph.series.is_empty());

        let err = r
            .apply_options(&mut graph, &t(json!({"series": [{"type": "radar"}]})), ApplyMode::Patch)
            .unwrap_err();
        assert!(matches!(err, ChartError::UnknownType { kind: "series", .. }));
    }

    #[test]
    fn modules_follow_option_keys() {
        let r = reconciler();
        let mut graph = r.empty_graph();
        r.apply_options(&mut graph, &t(json!({"legend": true, "zoom": {}})), ApplyMode::Patch)
            .unwrap();
        assert_eq!(
            graph.modules.keys().copied().collect::<Vec<_>>(),
            vec![ModuleKind::Legend, ModuleKind::Zoom]
        );

        let outcome = r
            .apply_options(&mut graph, &t(json!({"legend": {"position": "top"}})), ApplyMode::Patch)
            .unwrap();
        assert_eq!(outcome.modules.remove, vec![ModuleKind::Zoom]);
        let legend = graph.modules[&ModuleKind::Legend].node.to_tree();
        assert_eq!(legend.get("position"), Some(&Tree::from("top")));
        assert_eq!(legend.get("enabled"), Some(&Tree::Bool(true)));
    }

    #[test]
    fn inline_data_change_forces_full_refresh() {
        let r = reconciler();
        let mut graph = r.empty_graph();
        r.apply_options(
            &mut graph,
            &t(json!({"data": [{"m": 1}], "series": [{"type": "line"}]})),
            ApplyMode::Patch,
        )
        .unwrap();

        let outcome = r
            .apply_options(
                &mut graph,
                &t(json!({"data": [{"m": 1}, {"m": 2}], "series": [{"type": "line"}]})),
                ApplyMode::Patch,
            )
            .unwrap();
        assert!(outcome.data_changed);
        assert_eq!(outcome.status, UpdateStatus::DataChange);
        assert_eq!(outcome.request.stage, Stage::Full);
        assert_eq!(graph.inline_data.as_ref().map(Vec::len), Some(2));
        assert_eq!(graph.data_version, 2);
    }

    #[test]
    fn explicit_size_comes_from_width_and_height() {
        let r = reconciler();
        let mut graph = r.empty_graph();
        let outcome = r
            .apply_options(&mut graph, &t(json!({"width": 800, "height": 500})), ApplyMode::Patch)
            .unwrap();
        assert_eq!(graph.explicit_size, Some(Size::new(800, 500)));
        assert_eq!(outcome.request.stage, Stage::Full);
    }
}
