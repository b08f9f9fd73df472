//! Chartflow Core - declarative chart reconciliation
//!
//! Turns full or partial chart configurations into a live object graph and
//! keeps it in step with later changes:
//! - Validates options against explicit series, axis and module registries
//! - Reconciles series, axes and modules while preserving instance identity
//! - Drives data, layout and render collaborators through the staged pipeline
//! - Serializes configuration tasks with pipeline passes
//!
//! # Example
//!
//! ```rust,ignore
//! use chartflow_core::{ChartHandle, ChartflowConfig, Collaborators, Registry};
//!
//! let chart = ChartHandle::new(
//!     ChartflowConfig::new(),
//!     Registry::with_defaults(),
//!     Collaborators::in_memory(),
//! );
//! chart.create_or_replace(options).await?;
//! chart.apply_patch(&patch).await?;
//! chart.settle().await?;
//! ```

#![warn(unreachable_pub)]

pub mod collaborators;

mod chart;
mod config;
mod error;
mod graph;
mod handle;
mod reconciler;
mod registry;
mod types;

pub use chart::{AxisSnapshot, Chart, ChartSnapshot, SeriesSnapshot};
pub use collaborators::{
    Aggregator, Collaborators, DataSource, LayoutEngine, PreRenderHook, SceneGraph,
    SeriesBehavior,
};
pub use config::ChartflowConfig;
pub use error::{ChartError, CollaboratorError, ConfigError};
pub use graph::{AxisInstance, ChartGraph, ModuleInstance, SeriesInstance};
pub use handle::{ApplyOutcome, ChartHandle};
pub use reconciler::{ApplyMode, ReconcileOutcome, Reconciler, SeriesChanges};
pub use registry::{Registry, SeriesRegistration};
pub use types::{
    AxisInput, AxisKind, Dataset, Layout, ProcessTarget, ProcessedData, Rect,
    RenderInstructions, SeriesKind, SeriesRender, SeriesUpdateInput, Size,
};

pub use chartflow_pipeline::{Stage, UpdateRequest, WaitOutcome};
pub use chartflow_reconcile::{ModuleKind, UpdateStatus};
pub use chartflow_tree::Tree;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
