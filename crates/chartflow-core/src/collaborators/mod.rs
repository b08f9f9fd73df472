//! External collaborators driven by the pipeline
//!
//! Only the shape of each interaction is fixed here. In-memory
//! implementations live in [`memory`].

pub mod memory;

use crate::error::CollaboratorError;
use crate::types::{
    AxisInput, Dataset, Layout, ProcessTarget, ProcessedData, RenderInstructions,
    SeriesUpdateInput, Size,
};
use chartflow_tree::Tree;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

/// Supplies raw data to the ingest stage
#[async_trait::async_trait]
pub trait DataSource: Send + Sync {
    /// Produce the latest raw dataset
    async fn ingest(&self) -> Result<Dataset, CollaboratorError>;

    /// Data-changed notifications, carrying the new dataset version
    ///
    /// Sources that never change on their own return `None`.
    fn changes(&self) -> Option<watch::Receiver<u64>> {
        None
    }
}

/// Aggregates raw data for one series or data-hungry module
#[async_trait::async_trait]
pub trait Aggregator: Send + Sync {
    /// Process `raw` for `target`
    async fn process(
        &self,
        raw: &Dataset,
        target: &ProcessTarget,
    ) -> Result<ProcessedData, CollaboratorError>;
}

/// Computes space allocation
#[async_trait::async_trait]
pub trait LayoutEngine: Send + Sync {
    /// Allocate space for series and axes within `size`
    async fn compute_layout(
        &self,
        size: Size,
        axes: &[AxisInput],
    ) -> Result<Layout, CollaboratorError>;
}

/// Scene graph owning drawable nodes
#[async_trait::async_trait]
pub trait SceneGraph: Send + Sync {
    /// Draw a frame
    async fn render(&self, instructions: &RenderInstructions) -> Result<(), CollaboratorError>;

    /// Create the drawable node for a series
    fn attach(&self, series: Uuid);

    /// Drop the drawable node of a series
    fn detach(&self, series: Uuid);

    /// Resize the drawing surface
    fn resize(&self, size: Size);
}

/// Cross-item adjustments that need all finalized geometry at once
#[async_trait::async_trait]
pub trait PreRenderHook: Send + Sync {
    /// Adjust the frame before it is rendered
    async fn before_render(
        &self,
        instructions: &mut RenderInstructions,
    ) -> Result<(), CollaboratorError>;
}

/// Per-series-kind recomputation of render data
#[async_trait::async_trait]
pub trait SeriesBehavior: Send + Sync {
    /// Compute node data for one series
    async fn update(&self, input: SeriesUpdateInput) -> Result<Tree, CollaboratorError>;
}

/// The collaborators one chart drives
#[derive(Clone)]
pub struct Collaborators {
    /// Raw data
    pub data_source: Arc<dyn DataSource>,
    /// Aggregation
    pub aggregator: Arc<dyn Aggregator>,
    /// Layout
    pub layout: Arc<dyn LayoutEngine>,
    /// Scene graph
    pub scene: Arc<dyn SceneGraph>,
    /// Pre-render hooks, run in order
    pub hooks: Vec<Arc<dyn PreRenderHook>>,
}

impl Collaborators {
    /// Bundle collaborators with no pre-render hooks
    #[must_use]
    pub fn new(
        data_source: Arc<dyn DataSource>,
        aggregator: Arc<dyn Aggregator>,
        layout: Arc<dyn LayoutEngine>,
        scene: Arc<dyn SceneGraph>,
    ) -> Self {
        Self {
            data_source,
            aggregator,
            layout,
            scene,
            hooks: Vec::new(),
        }
    }

    /// Add a pre-render hook
    #[must_use]
    pub fn with_hook(mut self, hook: Arc<dyn PreRenderHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// In-memory collaborators with no data
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(memory::StaticDataSource::default()),
            Arc::new(memory::PassthroughAggregator),
            Arc::new(memory::MarginLayout::default()),
            Arc::new(memory::BufferScene::default()),
        )
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators")
            .field("hooks", &self.hooks.len())
            .finish_non_exhaustive()
    }
}
