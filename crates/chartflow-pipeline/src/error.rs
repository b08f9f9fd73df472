//! Error types for the update pipeline

use crate::stage::Stage;
use std::time::Duration;

/// Boxed error from a stage implementation
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure of one pipeline stage
///
/// Ends the current pass; there is no rollback of earlier stages.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Stage implementation failed
    #[error("{stage} stage failed: {source}")]
    StageFailed {
        /// Stage that failed
        stage: Stage,
        /// Underlying error
        #[source]
        source: BoxError,
    },
}

impl PipelineError {
    /// Wrap an error raised while running `stage`
    pub fn stage(stage: Stage, source: impl Into<BoxError>) -> Self {
        Self::StageFailed {
            stage,
            source: source.into(),
        }
    }
}

/// Scheduler errors surfaced to callers
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    /// Pending work did not drain in time
    #[error("update did not settle within {}ms", .timeout.as_millis())]
    WaitTimeout {
        /// Timeout that elapsed
        timeout: Duration,
    },
}
