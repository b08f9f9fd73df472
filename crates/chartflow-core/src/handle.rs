//! Caller-facing chart handle
//!
//! Every configuration call records the caller's intent in a versioned
//! options queue and returns a future for the configuration task that
//! applies it. The task is counted by the scheduler from the moment the
//! call returns, so `wait_for_update` covers it even before it is polled.
//!
//! A task that finds a newer version queued skips itself; the newest task
//! applies the accumulated options, diffed against whatever was applied
//! last. A pending replacement stays pending until some task applies it.

use crate::chart::{Chart, ChartSnapshot};
use crate::collaborators::Collaborators;
use crate::config::ChartflowConfig;
use crate::error::ChartError;
use crate::reconciler::ApplyMode;
use crate::registry::Registry;
use crate::types::{RenderInstructions, Size};
use chartflow_pipeline::{ExecutionState, PassReport, Stage, UpdateRequest, WaitOutcome};
use chartflow_reconcile::UpdateStatus;
use chartflow_tree::{merge_with, MergeOptions, Tree};
use parking_lot::Mutex;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

/// Result of one configuration call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case", tag = "outcome", content = "status")]
pub enum ApplyOutcome {
    /// Options were reconciled with the given status
    Applied(UpdateStatus),
    /// A newer call was queued; that one applies these options too
    Superseded,
    /// The chart was destroyed before the task ran
    Destroyed,
}

#[derive(Debug)]
struct OptionsQueue {
    version: u64,
    options: Tree,
    deltas: Tree,
    replace_pending: bool,
    applied_options: Tree,
    applied_deltas: Tree,
}

impl Default for OptionsQueue {
    fn default() -> Self {
        Self {
            version: 0,
            options: Tree::object(),
            deltas: Tree::object(),
            replace_pending: false,
            applied_options: Tree::object(),
            applied_deltas: Tree::object(),
        }
    }
}

/// Handle to one chart instance
///
/// Cheap to clone; clones drive the same chart.
#[derive(Debug, Clone)]
pub struct ChartHandle {
    chart: Arc<Chart>,
    queue: Arc<Mutex<OptionsQueue>>,
}

impl ChartHandle {
    /// Build a chart with no options applied
    #[must_use]
    pub fn new(config: ChartflowConfig, registry: Registry, collaborators: Collaborators) -> Self {
        Self::from_chart(Chart::new(config, registry, collaborators))
    }

    /// Wrap an existing chart
    #[must_use]
    pub fn from_chart(chart: Arc<Chart>) -> Self {
        Self {
            chart,
            queue: Arc::new(Mutex::new(OptionsQueue::default())),
        }
    }

    /// Build a chart with in-memory collaborators and apply `options`
    ///
    /// # Errors
    /// Fails when `options` are rejected by the reconciler.
    pub async fn create(options: Tree) -> Result<Self, ChartError> {
        let handle = Self::new(
            ChartflowConfig::default(),
            Registry::with_defaults(),
            Collaborators::in_memory(),
        );
        handle.create_or_replace(options).await?;
        Ok(handle)
    }

    /// Underlying chart
    #[inline]
    #[must_use]
    pub fn chart(&self) -> &Arc<Chart> {
        &self.chart
    }

    /// Replace the whole configuration
    ///
    /// User deltas recorded so far are dropped.
    pub fn create_or_replace(
        &self,
        options: Tree,
    ) -> impl Future<Output = Result<ApplyOutcome, ChartError>> + Send + 'static {
        let version = {
            let mut queue = self.queue.lock();
            queue.version += 1;
            queue.options = options;
            queue.deltas = Tree::object();
            queue.replace_pending = true;
            queue.version
        };
        self.schedule(version)
    }

    /// Merge a partial configuration into the current one
    pub fn apply_patch(
        &self,
        patch: &Tree,
    ) -> impl Future<Output = Result<ApplyOutcome, ChartError>> + Send + 'static {
        let merge_opts = self.merge_options();
        let version = {
            let mut queue = self.queue.lock();
            queue.version += 1;
            queue.options = merge_with(&[queue.options.clone(), patch.clone()], &merge_opts);
            queue.version
        };
        self.schedule(version)
    }

    /// Layer a user-interaction change over the configuration
    ///
    /// Deltas survive later patches and are dropped by a replacement.
    pub fn apply_user_delta(
        &self,
        delta: &Tree,
    ) -> impl Future<Output = Result<ApplyOutcome, ChartError>> + Send + 'static {
        let merge_opts = self.merge_options();
        let version = {
            let mut queue = self.queue.lock();
            queue.version += 1;
            queue.deltas = merge_with(&[queue.deltas.clone(), delta.clone()], &merge_opts);
            queue.version
        };
        self.schedule(version)
    }

    fn merge_options(&self) -> MergeOptions {
        MergeOptions::new().avoid_deep_clone(self.chart.config().data_key.clone())
    }

    fn schedule(
        &self,
        version: u64,
    ) -> impl Future<Output = Result<ApplyOutcome, ChartError>> + Send + 'static {
        let chart = Arc::clone(&self.chart);
        let queue = Arc::clone(&self.queue);
        let merge_opts = self.merge_options();

        let task = self.chart.scheduler().run_factory_update(async move {
            let (options, replace) = {
                let mut queue = queue.lock();
                if queue.version != version {
                    debug!(version, latest = queue.version, "configuration task superseded");
                    return Ok(ApplyOutcome::Superseded);
                }
                let replace = std::mem::take(&mut queue.replace_pending);
                let options =
                    merge_with(&[queue.options.clone(), queue.deltas.clone()], &merge_opts);
                (options, replace)
            };

            let mode = if replace {
                ApplyMode::Replace
            } else {
                ApplyMode::Patch
            };
            match chart.reconcile(&options, mode) {
                Ok(outcome) => {
                    {
                        let mut queue = queue.lock();
                        queue.applied_options = queue.options.clone();
                        queue.applied_deltas = queue.deltas.clone();
                    }
                    chart.scheduler().request_update(outcome.request);
                    Ok(ApplyOutcome::Applied(outcome.status))
                }
                Err(err) => {
                    let mut queue = queue.lock();
                    if queue.version == version {
                        queue.options = queue.applied_options.clone();
                        queue.deltas = queue.applied_deltas.clone();
                    }
                    queue.replace_pending |= replace;
                    Err(err)
                }
            }
        });

        async move { task.await.unwrap_or(Ok(ApplyOutcome::Destroyed)) }
    }

    /// Wait until the chart has settled
    ///
    /// # Errors
    /// [`ChartError::Wait`] on timeout when `fail_on_timeout` is set.
    pub async fn wait_for_update(
        &self,
        timeout: Duration,
        fail_on_timeout: bool,
    ) -> Result<WaitOutcome, ChartError> {
        Ok(self
            .chart
            .scheduler()
            .wait_for_update(timeout, fail_on_timeout)
            .await?)
    }

    /// Wait with the configured default timeout, failing when it elapses
    ///
    /// # Errors
    /// As [`ChartHandle::wait_for_update`].
    pub async fn settle(&self) -> Result<WaitOutcome, ChartError> {
        self.wait_for_update(self.chart.config().wait_timeout(), true)
            .await
    }

    /// Report a new container size
    pub fn resize(&self, size: Size) {
        self.chart.set_auto_size(size);
        self.chart
            .scheduler()
            .request_update(UpdateRequest::new(Stage::Full).requestor("resize"));
    }

    /// Ask for fresh data from the data source
    pub fn notify_data_changed(&self) {
        self.chart
            .scheduler()
            .request_update(UpdateRequest::new(Stage::Ingest).requestor("data-changed"));
    }

    /// Copy of the live graph
    #[must_use]
    pub fn snapshot(&self) -> ChartSnapshot {
        self.chart.snapshot()
    }

    /// Most recently rendered frame
    #[must_use]
    pub fn last_frame(&self) -> Option<RenderInstructions> {
        self.chart.last_frame()
    }

    /// Pass reports
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<PassReport>> {
        self.chart.scheduler().subscribe()
    }

    /// Scheduler state
    #[must_use]
    pub fn state(&self) -> ExecutionState {
        self.chart.scheduler().state()
    }

    /// Destroy the chart; later calls resolve to [`ApplyOutcome::Destroyed`]
    pub fn destroy(&self) {
        self.chart.destroy();
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

    fn handle() -> ChartHandle {
        ChartHandle::new(
            ChartflowConfig::default(),
            Registry::with_defaults(),
            Collaborators::in_memory(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn stale_task_is_superseded() {
        let handle = handle();
        let first = handle.create_or_replace(t(json!({"series": [{"type": "line"}]})));
        let second = handle.apply_patch(&t(json!({"title": {"text": "Late"}})));
        assert_eq!(handle.state().pending_factory_updates, 2);

        let (first, second) = tokio::join!(first, second);
        assert_eq!(first.unwrap(), ApplyOutcome::Superseded);
        assert_eq!(second.unwrap(), ApplyOutcome::Applied(UpdateStatus::Updated));

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.series.len(), 1);
        assert_eq!(
            snapshot.chart.get("title").and_then(|t| t.get("text")),
            Some(&Tree::from("Late"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_patch_is_reverted() {
        let handle = handle();
        handle
            .create_or_replace(t(json!({"series": [{"type": "line", "yKey": "a"}]})))
            .await
            .unwrap();

        let err = handle
            .apply_patch(&t(json!({"series": [{"type": "radar"}]})))
            .await
            .unwrap_err();
        assert!(err.is_misconfiguration());

        handle
            .apply_patch(&t(json!({"subtitle": {"text": "ok"}})))
            .await
            .unwrap();
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.series[0].kind, crate::types::SeriesKind::Line);
        assert_eq!(
            snapshot.applied.get("series"),
            Some(&t(json!([{"type": "line", "yKey": "a"}])))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn user_delta_layers_over_patches() {
        let handle = handle();
        handle
            .create_or_replace(t(json!({"legend": {"position": "bottom"}})))
            .await
            .unwrap();
        handle
            .apply_user_delta(&t(json!({"legend": {"enabled": false}})))
            .await
            .unwrap();
        handle
            .apply_patch(&t(json!({"legend": {"position": "top"}})))
            .await
            .unwrap();

        assert_eq!(
            handle.snapshot().applied.get("legend"),
            Some(&t(json!({"position": "top", "enabled": false})))
        );

        handle
            .create_or_replace(t(json!({"legend": {"position": "left"}})))
            .await
            .unwrap();
        assert_eq!(
            handle.snapshot().applied.get("legend"),
            Some(&t(json!({"position": "left"})))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn destroyed_chart_skips_tasks() {
        let handle = handle();
        handle.destroy();
        let outcome = handle
            .apply_patch(&t(json!({"series": [{"type": "line"}]})))
            .await
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::Destroyed);
    }
}
