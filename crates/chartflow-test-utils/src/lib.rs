//! Testing utilities for the chartflow workspace
//!
//! Recording collaborators, option fixtures and a harness that wires them
//! into a [`ChartHandle`].

#![allow(missing_docs)]

use chartflow_core::collaborators::memory::{MarginLayout, PassthroughAggregator, PointsBehavior};
use chartflow_core::{
    Aggregator, AxisInput, ChartHandle, ChartflowConfig, CollaboratorError, Collaborators,
    DataSource, Dataset, Layout, LayoutEngine, ProcessTarget, ProcessedData, Registry,
    RenderInstructions, SceneGraph, SeriesBehavior, SeriesUpdateInput, Size,
};
use chartflow_tree::Tree;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum SceneEvent {
    Attach(Uuid),
    Detach(Uuid),
    Resize(Size),
    Render { pass: u64, series: usize },
}

#[derive(Debug, Default)]
pub struct RecordingScene {
    events: Mutex<Vec<SceneEvent>>,
    frames: Mutex<Vec<RenderInstructions>>,
}

impl RecordingScene {
    pub fn events(&self) -> Vec<SceneEvent> {
        self.events.lock().clone()
    }

    pub fn frames(&self) -> Vec<RenderInstructions> {
        self.frames.lock().clone()
    }

    pub fn last_frame(&self) -> Option<RenderInstructions> {
        self.frames.lock().last().cloned()
    }

    pub fn render_count(&self) -> usize {
        self.frames.lock().len()
    }

    /// Series whose attach has not been followed by a detach
    pub fn attached(&self) -> BTreeSet<Uuid> {
        let mut attached = BTreeSet::new();
        for event in self.events.lock().iter() {
            match event {
                SceneEvent::Attach(id) => {
                    attached.insert(*id);
                }
                SceneEvent::Detach(id) => {
                    attached.remove(id);
                }
                _ => {}
            }
        }
        attached
    }

    pub fn detached(&self) -> Vec<Uuid> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                SceneEvent::Detach(id) => Some(*id),
                _ => None,
            })
            .collect()
    }

    pub fn resizes(&self) -> Vec<Size> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                SceneEvent::Resize(size) => Some(*size),
                _ => None,
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl SceneGraph for RecordingScene {
    async fn render(&self, instructions: &RenderInstructions) -> Result<(), CollaboratorError> {
        self.events.lock().push(SceneEvent::Render {
            pass: instructions.pass,
            series: instructions.series.len(),
        });
        self.frames.lock().push(instructions.clone());
        Ok(())
    }

    fn attach(&self, series: Uuid) {
        self.events.lock().push(SceneEvent::Attach(series));
    }

    fn detach(&self, series: Uuid) {
        self.events.lock().push(SceneEvent::Detach(series));
    }

    fn resize(&self, size: Size) {
        self.events.lock().push(SceneEvent::Resize(size));
    }
}

/// Data source counting ingests; can be told to fail
#[derive(Debug)]
pub struct CountingDataSource {
    data: RwLock<Dataset>,
    changed: watch::Sender<u64>,
    ingests: AtomicUsize,
    failing: Mutex<Option<String>>,
}

impl CountingDataSource {
    pub fn new(rows: Vec<Tree>) -> Self {
        Self {
            data: RwLock::new(Dataset { version: 0, rows }),
            changed: watch::channel(0).0,
            ingests: AtomicUsize::new(0),
            failing: Mutex::new(None),
        }
    }

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

    pub fn ingest_count(&self) -> usize {
        self.ingests.load(Ordering::SeqCst)
    }

    pub fn fail_with(&self, reason: Option<&str>) {
        *self.failing.lock() = reason.map(str::to_string);
    }
}

#[async_trait::async_trait]
impl DataSource for CountingDataSource {
    async fn ingest(&self) -> Result<Dataset, CollaboratorError> {
        self.ingests.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = self.failing.lock().clone() {
            return Err(CollaboratorError::unavailable("data source", reason));
        }
        Ok(self.data.read().clone())
    }

    fn changes(&self) -> Option<watch::Receiver<u64>> {
        Some(self.changed.subscribe())
    }
}

/// Aggregator that sleeps before delegating to [`PassthroughAggregator`]
#[derive(Debug, Default)]
pub struct SlowAggregator {
    delay: Duration,
    calls: AtomicUsize,
}

impl SlowAggregator {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Aggregator for SlowAggregator {
    async fn process(
        &self,
        raw: &Dataset,
        target: &ProcessTarget,
    ) -> Result<ProcessedData, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        PassthroughAggregator.process(raw, target).await
    }
}

/// Layout recording the sizes it was asked for
#[derive(Debug, Default)]
pub struct CountingLayout {
    sizes: Mutex<Vec<Size>>,
}

impl CountingLayout {
    pub fn sizes(&self) -> Vec<Size> {
        self.sizes.lock().clone()
    }

    pub fn calls(&self) -> usize {
        self.sizes.lock().len()
    }
}

#[async_trait::async_trait]
impl LayoutEngine for CountingLayout {
    async fn compute_layout(
        &self,
        size: Size,
        axes: &[AxisInput],
    ) -> Result<Layout, CollaboratorError> {
        self.sizes.lock().push(size);
        MarginLayout::default().compute_layout(size, axes).await
    }
}

/// Series behavior counting updates per series
#[derive(Debug, Default)]
pub struct CountingBehavior {
    updates: Mutex<Vec<Uuid>>,
}

impl CountingBehavior {
    pub fn updates(&self) -> Vec<Uuid> {
        self.updates.lock().clone()
    }

    pub fn updates_of(&self, id: Uuid) -> usize {
        self.updates.lock().iter().filter(|u| **u == id).count()
    }
}

#[async_trait::async_trait]
impl SeriesBehavior for CountingBehavior {
    async fn update(&self, input: SeriesUpdateInput) -> Result<Tree, CollaboratorError> {
        self.updates.lock().push(input.id);
        PointsBehavior.update(input).await
    }
}

/// A chart wired to recording collaborators
#[derive(Debug, Clone)]
pub struct Harness {
    pub handle: ChartHandle,
    pub scene: Arc<RecordingScene>,
    pub data: Arc<CountingDataSource>,
    pub aggregator: Arc<SlowAggregator>,
    pub layout: Arc<CountingLayout>,
    pub behavior: Arc<CountingBehavior>,
}

impl Harness {
    pub fn new() -> Self {
        HarnessBuilder::new().build()
    }

    pub fn builder() -> HarnessBuilder {
        HarnessBuilder::new()
    }

    /// Wait with the configured timeout and panic if the chart never settles
    pub async fn settle(&self) {
        self.handle.settle().await.unwrap();
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct HarnessBuilder {
    config: ChartflowConfig,
    registry: Option<Registry>,
    rows: Vec<Tree>,
    aggregator_delay: Duration,
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            config: ChartflowConfig::default(),
            registry: None,
            rows: sales_rows(),
            aggregator_delay: Duration::ZERO,
        }
    }

    pub fn config(mut self, config: ChartflowConfig) -> Self {
        self.config = config;
        self
    }

    /// Registry to use instead of the defaults; series behaviors are not
    /// replaced with the counting one
    pub fn registry(mut self, registry: Registry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn rows(mut self, rows: Vec<Tree>) -> Self {
        self.rows = rows;
        self
    }

    pub fn aggregator_delay(mut self, delay: Duration) -> Self {
        self.aggregator_delay = delay;
        self
    }

    pub fn build(self) -> Harness {
        let scene = Arc::new(RecordingScene::default());
        let data = Arc::new(CountingDataSource::new(self.rows));
        let aggregator = Arc::new(SlowAggregator::new(self.aggregator_delay));
        let layout = Arc::new(CountingLayout::default());
        let behavior = Arc::new(CountingBehavior::default());

        let registry = self.registry.unwrap_or_else(|| {
            let mut registry = Registry::with_defaults();
            let counting: Arc<dyn SeriesBehavior> = behavior.clone();
            for kind in registry.series_kinds() {
                registry.register_series(kind, Arc::clone(&counting));
            }
            registry
        });

        let collaborators = Collaborators::new(
            data.clone(),
            aggregator.clone(),
            layout.clone(),
            scene.clone(),
        );
        Harness {
            handle: ChartHandle::new(self.config, registry, collaborators),
            scene,
            data,
            aggregator,
            layout,
            behavior,
        }
    }
}

pub fn t(value: serde_json::Value) -> Tree {
    Tree::from(value)
}

pub fn sales_rows() -> Vec<Tree> {
    vec![
        t(json!({"month": "jan", "sales": 10, "returns": 1})),
        t(json!({"month": "feb", "sales": 14, "returns": 3})),
        t(json!({"month": "mar", "sales": 9, "returns": 2})),
    ]
}

/// Sized line chart over `month`/`sales` with category and number axes
pub fn line_chart() -> Tree {
    t(json!({
        "width": 800,
        "height": 400,
        "title": {"text": "Sales"},
        "series": [{"type": "line", "xKey": "month", "yKey": "sales"}],
        "axes": [
            {"type": "category", "position": "bottom"},
            {"type": "number", "position": "left"},
        ],
    }))
}

/// Sized chart with one bar series per y key
pub fn bar_chart(y_keys: &[&str]) -> Tree {
    let series: Vec<serde_json::Value> = y_keys
        .iter()
        .map(|y| json!({"type": "bar", "xKey": "month", "yKey": y}))
        .collect();
    t(json!({"width": 800, "height": 400, "series": series}))
}
