//! Chart instance: live graph plus the stage implementations
//!
//! A [`Chart`] owns one [`ChartGraph`] and runs every pipeline stage
//! against it. Stages copy what they need out of the graph, release the
//! graph lock, await their collaborator, then write results back; the
//! scheduler guarantees no configuration task runs in between.

use crate::collaborators::Collaborators;
use crate::config::ChartflowConfig;
use crate::error::{ChartError, CollaboratorError};
use crate::graph::ChartGraph;
use crate::reconciler::{ApplyMode, ReconcileOutcome, Reconciler};
use crate::registry::Registry;
use crate::types::{
    AxisInput, AxisKind, Dataset, ProcessTarget, RenderInstructions, SeriesKind,
    SeriesUpdateInput, Size,
};
use chartflow_pipeline::{
    PassContext, PipelineError, PipelineRunner, Stage, StageFlow, UpdateRequest, UpdateScheduler,
};
use chartflow_reconcile::ModuleKind;
use chartflow_tree::Tree;
use futures::future::try_join_all;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

/// Series as seen from outside the chart
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesSnapshot {
    /// Stable identity
    pub id: Uuid,
    /// Series kind
    pub kind: SeriesKind,
    /// Current properties, defaults included
    pub properties: Tree,
}

/// Axis as seen from outside the chart
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AxisSnapshot {
    /// Stable identity
    pub id: Uuid,
    /// Axis kind
    pub kind: AxisKind,
    /// Current properties, defaults included
    pub properties: Tree,
}

/// Point-in-time copy of the live graph
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartSnapshot {
    /// Chart-level properties
    pub chart: Tree,
    /// Series in declaration order
    pub series: Vec<SeriesSnapshot>,
    /// Axes in declaration order
    pub axes: Vec<AxisSnapshot>,
    /// Enabled modules
    pub modules: Vec<ModuleKind>,
    /// Last applied options
    pub applied: Tree,
    /// Version of the inline data
    pub data_version: u64,
    /// Current scene size, once known
    pub size: Option<Size>,
}

/// One chart instance
pub struct Chart {
    config: Arc<ChartflowConfig>,
    registry: Arc<Registry>,
    collaborators: Collaborators,
    reconciler: Reconciler,
    scheduler: UpdateScheduler,
    graph: Mutex<ChartGraph>,
    size_signal: watch::Sender<Option<Size>>,
    shutdown: watch::Sender<bool>,
}

impl Chart {
    /// Build a chart and bind it to a fresh scheduler
    ///
    /// Must be called from within a Tokio runtime when the data source
    /// publishes change notifications.
    #[must_use]
    pub fn new(
        config: ChartflowConfig,
        registry: Registry,
        collaborators: Collaborators,
    ) -> Arc<Self> {
        let config = Arc::new(config);
        let registry = Arc::new(registry);
        let reconciler = Reconciler::new(Arc::clone(&config), Arc::clone(&registry));
        let graph = reconciler.empty_graph();

        let chart = Arc::new(Self {
            scheduler: UpdateScheduler::new(config.scheduler()),
            config,
            registry,
            collaborators,
            reconciler,
            graph: Mutex::new(graph),
            size_signal: watch::channel(None).0,
            shutdown: watch::channel(false).0,
        });
        chart.scheduler.bind(&chart);
        chart.listen_for_data_changes();
        chart
    }

    fn listen_for_data_changes(self: &Arc<Self>) {
        let Some(mut changes) = self.collaborators.data_source.changes() else {
            return;
        };
        let weak = Arc::downgrade(self);
        let mut shutdown = self.shutdown.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = changes.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let Some(chart) = weak.upgrade() else {
                            break;
                        };
                        let version = *changes.borrow_and_update();
                        debug!(version, "data source changed");
                        chart.scheduler.request_update(
                            UpdateRequest::new(Stage::Ingest).requestor("data-changed"),
                        );
                    }
                    _ = shutdown.changed() => break,
                }
            }
        });
    }

    /// Scheduler driving this chart
    #[inline]
    #[must_use]
    pub fn scheduler(&self) -> &UpdateScheduler {
        &self.scheduler
    }

    /// Runtime configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ChartflowConfig {
        &self.config
    }

    /// Registry the chart was built with
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Publish a measured container size
    pub fn set_auto_size(&self, size: Size) {
        self.size_signal.send_replace(Some(size));
    }

    /// Most recently rendered frame
    #[must_use]
    pub fn last_frame(&self) -> Option<RenderInstructions> {
        self.graph.lock().last_frame.clone()
    }

    /// Copy of the live graph
    #[must_use]
    pub fn snapshot(&self) -> ChartSnapshot {
        let graph = self.graph.lock();
        ChartSnapshot {
            chart: graph.root.to_tree(),
            series: graph
                .series
                .iter()
                .map(|s| SeriesSnapshot {
                    id: s.id(),
                    kind: s.kind(),
                    properties: s.properties(),
                })
                .collect(),
            axes: graph
                .axes
                .iter()
                .map(|a| AxisSnapshot {
                    id: a.id(),
                    kind: a.kind(),
                    properties: a.node.to_tree(),
                })
                .collect(),
            modules: graph.modules.keys().copied().collect(),
            applied: graph.applied.clone(),
            data_version: graph.data_version,
            size: graph.scene_size,
        }
    }

    /// Reconcile `options` onto the live graph
    ///
    /// Callers must hold the update lock, which configuration tasks do.
    pub(crate) fn reconcile(
        &self,
        options: &Tree,
        mode: ApplyMode,
    ) -> Result<ReconcileOutcome, ChartError> {
        if self.scheduler.is_destroyed() {
            return Err(ChartError::Destroyed);
        }
        let mut graph = self.graph.lock();
        self.reconciler.apply_options(&mut graph, options, mode)
    }

    /// Stop all work and release scene resources
    pub fn destroy(&self) {
        if self.scheduler.is_destroyed() {
            return;
        }
        self.scheduler.destroy();
        self.shutdown.send_replace(true);

        let mut graph = self.graph.lock();
        let pending: Vec<Uuid> = std::mem::take(&mut graph.attach_queue);
        for id in std::mem::take(&mut graph.detach_queue) {
            self.collaborators.scene.detach(id);
        }
        for series in graph.series.drain(..) {
            if !pending.contains(&series.id()) {
                self.collaborators.scene.detach(series.id());
            }
        }
        graph.axes.clear();
        graph.modules.clear();
        debug!("chart destroyed");
    }

    fn absorb_auto_size(&self, graph: &mut ChartGraph) {
        if let Some(size) = *self.size_signal.borrow() {
            graph.auto_size = Some(size);
        }
    }

    fn sync_scene_size(&self, graph: &mut ChartGraph, size: Size) {
        if graph.scene_size != Some(size) {
            debug!(%size, "resizing scene");
            self.collaborators.scene.resize(size);
            graph.scene_size = Some(size);
        }
    }

    fn assemble(&self, ctx: &PassContext) -> RenderInstructions {
        let graph = self.graph.lock();
        let fallback = graph.scene_size.unwrap_or(self.config.default_size);
        graph.assemble(ctx.pass, fallback, ctx.skip_animations)
    }

    fn full(&self, ctx: &PassContext) {
        let scene = &self.collaborators.scene;
        let mut graph = self.graph.lock();

        if ctx.force_refresh {
            graph.layout = None;
            for series in &mut graph.series {
                series.dirty = true;
            }
        }

        let detached = std::mem::take(&mut graph.detach_queue);
        let attached = std::mem::take(&mut graph.attach_queue);
        for id in &detached {
            scene.detach(*id);
        }
        for id in &attached {
            scene.attach(*id);
        }
        if !detached.is_empty() || !attached.is_empty() {
            debug!(
                attached = attached.len(),
                detached = detached.len(),
                "scene nodes updated"
            );
        }

        self.absorb_auto_size(&mut graph);
        if let Some(size) = graph.known_size() {
            self.sync_scene_size(&mut graph, size);
        }
    }

    /// Stages resuming after destroy drop their results
    fn abandoned(&self) -> bool {
        self.scheduler.is_destroyed()
    }

    async fn ingest(&self) -> Result<StageFlow, CollaboratorError> {
        let inline = {
            let graph = self.graph.lock();
            graph.inline_data.clone().map(|rows| Dataset {
                version: graph.data_version,
                rows,
            })
        };
        let dataset = match inline {
            Some(dataset) => dataset,
            None => self.collaborators.data_source.ingest().await?,
        };
        if self.abandoned() {
            return Ok(StageFlow::Continue);
        }
        debug!(
            version = dataset.version,
            rows = dataset.rows.len(),
            "data ingested"
        );
        self.graph.lock().raw = Some(dataset);
        Ok(StageFlow::Continue)
    }

    async fn process(&self) -> Result<StageFlow, CollaboratorError> {
        let (raw, targets) = {
            let graph = self.graph.lock();
            let raw = graph.raw.clone().unwrap_or_default();
            let mut targets: Vec<ProcessTarget> = graph
                .series
                .iter()
                .map(|s| ProcessTarget::Series {
                    id: s.id(),
                    kind: s.kind(),
                    options: s.properties(),
                })
                .collect();
            targets.extend(
                graph
                    .modules
                    .keys()
                    .copied()
                    .filter(|m| m.needs_data())
                    .map(ProcessTarget::Module),
            );
            (raw, targets)
        };

        let aggregator = &self.collaborators.aggregator;
        let results = try_join_all(targets.iter().map(|t| aggregator.process(&raw, t))).await?;
        if self.abandoned() {
            return Ok(StageFlow::Continue);
        }

        let mut graph = self.graph.lock();
        for (target, data) in targets.into_iter().zip(results) {
            match target {
                ProcessTarget::Series { id, .. } => {
                    if let Some(series) = graph.series_mut(id) {
                        series.processed = Some(data);
                        series.dirty = true;
                    }
                }
                ProcessTarget::Module(module) => {
                    if let Some(instance) = graph.modules.get_mut(&module) {
                        instance.processed = Some(data);
                    }
                }
            }
        }
        Ok(StageFlow::Continue)
    }

    /// Size for this pass, waiting once for an auto-size signal
    async fn resolve_size(&self) -> Size {
        let waited = {
            let mut graph = self.graph.lock();
            self.absorb_auto_size(&mut graph);
            if let Some(size) = graph.known_size() {
                return size;
            }
            graph.auto_size_waited
        };

        if !waited {
            let timeout = self.config.auto_size_timeout();
            let mut signal = self.size_signal.subscribe();
            let received = tokio::time::timeout(timeout, async move {
                let size = signal.wait_for(Option::is_some).await.ok().and_then(|s| *s);
                size
            })
            .await
            .ok()
            .flatten();
            if self.abandoned() {
                return self.config.default_size;
            }

            let mut graph = self.graph.lock();
            graph.auto_size_waited = true;
            if let Some(size) = received {
                graph.auto_size = Some(size);
                return size;
            }
            warn!(
                ?timeout,
                fallback = %self.config.default_size,
                "no size signal received, using default size"
            );
        }
        self.config.default_size
    }

    async fn layout(&self) -> Result<StageFlow, CollaboratorError> {
        let size = self.resolve_size().await;
        if self.abandoned() {
            return Ok(StageFlow::Continue);
        }
        if size.width == 0 || size.height == 0 {
            debug!(%size, "zero-sized scene, ending pass");
            return Ok(StageFlow::Halt);
        }

        let axes: Vec<AxisInput> = {
            let mut graph = self.graph.lock();
            self.sync_scene_size(&mut graph, size);
            graph
                .axes
                .iter()
                .map(|a| AxisInput {
                    kind: a.kind(),
                    options: a.node.to_tree(),
                })
                .collect()
        };

        let layout = self.collaborators.layout.compute_layout(size, &axes).await?;
        if self.abandoned() {
            return Ok(StageFlow::Continue);
        }
        self.graph.lock().layout = Some(layout);
        Ok(StageFlow::Continue)
    }

    async fn update_items(&self, ctx: &PassContext) -> Result<StageFlow, CollaboratorError> {
        let jobs = {
            let graph = self.graph.lock();
            let area = graph
                .layout
                .as_ref()
                .map(|l| l.series_area)
                .unwrap_or_default();
            graph
                .series
                .iter()
                .filter(|s| ctx.force_refresh || s.dirty || ctx.items.contains(s.item()))
                .filter_map(|s| {
                    let behavior = self.registry.behavior(s.kind())?;
                    let input = SeriesUpdateInput {
                        id: s.id(),
                        kind: s.kind(),
                        options: s.properties(),
                        processed: s.processed.clone(),
                        area,
                        skip_animations: ctx.skip_animations,
                    };
                    Some((behavior, input))
                })
                .collect::<Vec<_>>()
        };

        let updates = try_join_all(jobs.into_iter().map(|(behavior, input)| async move {
            let id = input.id;
            behavior.update(input).await.map(|nodes| (id, nodes))
        }))
        .await?;
        if self.abandoned() {
            return Ok(StageFlow::Continue);
        }

        let mut graph = self.graph.lock();
        debug!(updated = updates.len(), "series recomputed");
        for (id, nodes) in updates {
            if let Some(series) = graph.series_mut(id) {
                series.nodes = nodes;
                series.dirty = false;
            }
        }
        Ok(StageFlow::Continue)
    }

    async fn pre_render(&self, ctx: &PassContext) -> Result<StageFlow, CollaboratorError> {
        let mut frame = self.assemble(ctx);
        for hook in &self.collaborators.hooks {
            hook.before_render(&mut frame).await?;
        }
        if self.abandoned() {
            return Ok(StageFlow::Continue);
        }
        self.graph.lock().prepared = Some(frame);
        Ok(StageFlow::Continue)
    }

    async fn render(&self, ctx: &PassContext) -> Result<StageFlow, CollaboratorError> {
        let prepared = self
            .graph
            .lock()
            .prepared
            .take()
            .filter(|frame| frame.pass == ctx.pass);
        let frame = match prepared {
            Some(frame) => frame,
            None => self.assemble(ctx),
        };

        self.collaborators.scene.render(&frame).await?;
        if self.abandoned() {
            return Ok(StageFlow::Continue);
        }
        debug!(
            pass = ctx.pass,
            series = frame.series.len(),
            size = %frame.size,
            "frame rendered"
        );
        self.graph.lock().last_frame = Some(frame);
        Ok(StageFlow::Continue)
    }
}

#[async_trait::async_trait]
impl PipelineRunner for Chart {
    async fn run_stage(
        &self,
        stage: Stage,
        ctx: &PassContext,
    ) -> Result<StageFlow, PipelineError> {
        let result = match stage {
            Stage::Full => {
                self.full(ctx);
                Ok(StageFlow::Continue)
            }
            Stage::Ingest => self.ingest().await,
            Stage::Process => self.process().await,
            Stage::Layout => self.layout().await,
            Stage::ItemUpdate => self.update_items(ctx).await,
            Stage::PreRender => self.pre_render(ctx).await,
            Stage::Render => self.render(ctx).await,
            Stage::None => Ok(StageFlow::Continue),
        };
        result.map_err(|e| PipelineError::stage(stage, e))
    }
}

impl fmt::Debug for Chart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chart")
            .field("config", &self.config)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::memory::BufferScene;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::time::Duration;

    fn chart_with_scene() -> (Arc<Chart>, Arc<BufferScene>) {
        let scene = Arc::new(BufferScene::default());
        let mut collaborators = Collaborators::in_memory();
        collaborators.scene = scene.clone();
        let chart = Chart::new(
            ChartflowConfig::default(),
            Registry::with_defaults(),
            collaborators,
        );
        (chart, scene)
    }

    async fn settle(chart: &Chart) {
        chart
            .scheduler()
            .wait_for_update(Duration::from_secs(5), true)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_size_renders_without_waiting() {
        let (chart, scene) = chart_with_scene();
        let outcome = chart
            .reconcile(
                &Tree::from(json!({
                    "width": 400,
                    "height": 200,
                    "data": [{"m": 1, "v": 2}],
                    "series": [{"type": "line", "xKey": "m", "yKey": "v"}],
                })),
                ApplyMode::Replace,
            )
            .unwrap();
        chart.scheduler().request_update(outcome.request);
        settle(&chart).await;

        let frame = scene.last_frame().unwrap();
        assert_eq!(frame.size, Size::new(400, 200));
        assert_eq!(frame.series[0].nodes, Tree::from(json!([{"x": 1, "y": 2}])));
        assert_eq!(scene.size(), Some(Size::new(400, 200)));
        assert_eq!(scene.attached().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_size_falls_back_after_timeout() {
        let (chart, scene) = chart_with_scene();
        let started = tokio::time::Instant::now();
        let outcome = chart
            .reconcile(&Tree::from(json!({"series": [{"type": "bar"}]})), ApplyMode::Replace)
            .unwrap();
        chart.scheduler().request_update(outcome.request);
        settle(&chart).await;

        assert!(started.elapsed() >= chart.config().auto_size_timeout());
        assert_eq!(scene.last_frame().unwrap().size, Size::new(600, 300));
    }

    #[tokio::test(start_paused = true)]
    async fn auto_size_signal_wins_over_default() {
        let (chart, scene) = chart_with_scene();
        chart.set_auto_size(Size::new(320, 240));
        let outcome = chart
            .reconcile(&Tree::from(json!({"series": [{"type": "bar"}]})), ApplyMode::Replace)
            .unwrap();
        chart.scheduler().request_update(outcome.request);
        settle(&chart).await;
        assert_eq!(scene.last_frame().unwrap().size, Size::new(320, 240));
    }

    #[tokio::test(start_paused = true)]
    async fn destroy_detaches_scene_nodes() {
        let (chart, scene) = chart_with_scene();
        let outcome = chart
            .reconcile(
                &Tree::from(json!({"width": 10, "height": 10, "series": [{"type": "pie"}]})),
                ApplyMode::Replace,
            )
            .unwrap();
        chart.scheduler().request_update(outcome.request);
        settle(&chart).await;
        assert_eq!(scene.attached().len(), 1);

        chart.destroy();
        assert!(scene.attached().is_empty());
        assert!(matches!(
            chart.reconcile(&Tree::object(), ApplyMode::Patch),
            Err(ChartError::Destroyed)
        ));
    }
}
