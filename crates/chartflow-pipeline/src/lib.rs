//! Staged update pipeline and single-flight scheduler
//!
//! # Core Concepts
//!
//! - [`Stage`]: ordered pipeline steps, `Full` through `Render`, plus `None`
//! - [`UpdateRequest`]: "run at least from this stage" with per-item selection
//! - [`UpdateScheduler`]: debounces requests, serializes passes and
//!   configuration tasks through one [`UpdateMutex`], bounds shortcut
//!   re-entrancy and exposes [`UpdateScheduler::wait_for_update`]
//! - [`PipelineRunner`]: the chart side, executing one stage at a time
//!
//! # Example
//!
//! ```rust,ignore
//! let scheduler = UpdateScheduler::new(SchedulerConfig::default());
//! scheduler.bind(&chart);
//!
//! scheduler.request_update(Stage::Layout);
//! scheduler.request_update(Stage::Ingest); // same pass, starts at ingest
//! scheduler.wait_for_update(Duration::from_secs(10), true).await?;
//! ```

#![warn(unreachable_pub)]

mod debounce;
mod error;
mod lock;
mod request;
mod scheduler;
mod stage;

pub use debounce::{DebounceCallback, Debouncer};
pub use error::{BoxError, PipelineError, SchedulerError};
pub use lock::{UpdateGuard, UpdateMutex};
pub use request::{ItemId, ItemSelection, PassContext, UpdateRequest};
pub use scheduler::{
    ExecutionState, PassOutcome, PassReport, PipelineRunner, SchedulerConfig, StageFlow,
    UpdateScheduler, WaitOutcome,
};
pub use stage::Stage;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
