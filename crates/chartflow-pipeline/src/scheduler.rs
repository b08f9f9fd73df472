//! Update scheduler
//!
//! Owns the execution state of one chart instance and guarantees that at
//! most one pipeline pass or configuration task runs at a time.
//!
//! # Shortcuts
//!
//! Before each stage the scheduler checks whether an earlier (or the same)
//! stage has been re-requested since the pass began. If so, the pass ends
//! early and the next pass starts from the re-requested stage. After
//! [`SchedulerConfig::max_shortcuts`] extra passes the re-request is dropped
//! with a warning and the current pass is allowed to render.

use crate::debounce::Debouncer;
use crate::error::{PipelineError, SchedulerError};
use crate::lock::UpdateMutex;
use crate::request::{ItemSelection, PassContext, UpdateRequest};
use crate::stage::Stage;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, warn};

/// Executes individual stages of a pass
///
/// Implementations may call [`UpdateScheduler::request_update`] from inside
/// a stage; they must not wait for the scheduler to settle.
#[async_trait::async_trait]
pub trait PipelineRunner: Send + Sync {
    /// Run one stage
    ///
    /// # Errors
    /// A returned error is logged and ends the pass.
    async fn run_stage(&self, stage: Stage, ctx: &PassContext)
        -> Result<StageFlow, PipelineError>;
}

/// What to do after a stage completes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageFlow {
    /// Proceed to the next stage
    Continue,
    /// End the pass without rendering
    Halt,
}

/// Scheduler tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Extra passes allowed before a render is forced
    pub max_shortcuts: u32,
    /// Poll interval of [`UpdateScheduler::wait_for_update`]
    pub poll_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_shortcuts: 3,
            poll_interval: Duration::from_millis(5),
        }
    }
}

/// Read-only view of the execution state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionState {
    /// Earliest stage requested since the last pass began
    pub pending_stage: Stage,
    /// Start stage of the pass in flight, or `None`
    pub running_stage: Stage,
    /// Consecutive shortcut passes
    pub shortcut_count: u32,
    /// Configuration tasks queued or running
    pub pending_factory_updates: usize,
    /// Terminal flag
    pub destroyed: bool,
}

impl ExecutionState {
    /// True when nothing is pending, running or queued
    #[inline]
    #[must_use]
    pub fn is_quiescent(&self) -> bool {
        self.pending_stage.is_idle()
            && self.running_stage.is_idle()
            && self.pending_factory_updates == 0
    }
}

/// How a pass ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// Reached the end of the render stage
    Rendered,
    /// Superseded by a re-request before `at`
    Shortcut {
        /// Stage that was skipped
        at: Stage,
    },
    /// A stage asked to stop
    Halted {
        /// Stage that halted
        at: Stage,
    },
    /// A stage failed
    Failed {
        /// Stage that failed
        at: Stage,
    },
    /// The scheduler was destroyed mid-pass
    Abandoned,
}

/// Summary published after every pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassReport {
    /// Pass sequence number
    pub pass: u64,
    /// First stage run
    pub start_stage: Stage,
    /// How the pass ended
    pub outcome: PassOutcome,
    /// Shortcut counter after the pass
    pub shortcut_count: u32,
    /// Wall time spent in the pass
    pub duration: Duration,
}

/// Result of [`UpdateScheduler::wait_for_update`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// All work drained
    Settled,
    /// Timed out without failing
    TimedOut,
    /// The scheduler was destroyed
    Destroyed,
}

#[derive(Debug, Default)]
struct PendingWork {
    stage: Stage,
    items: ItemSelection,
    force_refresh: bool,
    skip_animations: bool,
}

#[derive(Debug, Default)]
struct PipelineState {
    pending: PendingWork,
    running: Stage,
    shortcut_count: u32,
    requestors: BTreeMap<String, u32>,
}

struct Inner {
    config: SchedulerConfig,
    lock: UpdateMutex,
    state: Mutex<PipelineState>,
    runner: RwLock<Option<Weak<dyn PipelineRunner>>>,
    debouncer: Debouncer,
    factory_pending: AtomicUsize,
    passes: AtomicU64,
    destroyed: AtomicBool,
    timeout_warned: AtomicBool,
    reports: watch::Sender<Option<PassReport>>,
}

/// Single-flight scheduler for one chart instance
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct UpdateScheduler {
    inner: Arc<Inner>,
}

impl Default for UpdateScheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl UpdateScheduler {
    /// Create a scheduler with no runner bound
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let weak = weak.clone();
            let debouncer = Debouncer::new(Arc::new(move |coalesced: u32| {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.run_pass(coalesced).await;
                    }
                }
                .boxed()
            }));
            Inner {
                config,
                lock: UpdateMutex::new(),
                state: Mutex::new(PipelineState::default()),
                runner: RwLock::new(None),
                debouncer,
                factory_pending: AtomicUsize::new(0),
                passes: AtomicU64::new(0),
                destroyed: AtomicBool::new(false),
                timeout_warned: AtomicBool::new(false),
                reports: watch::channel(None).0,
            }
        });
        Self { inner }
    }

    /// Attach the runner that executes stages
    ///
    /// Only a weak reference is kept; the runner owns the scheduler, not the
    /// other way round.
    pub fn bind<R: PipelineRunner + 'static>(&self, runner: &Arc<R>) {
        let weak: Weak<R> = Arc::downgrade(runner);
        let weak: Weak<dyn PipelineRunner> = weak;
        *self.inner.runner.write() = Some(weak);

        let pending = !self.inner.state.lock().pending.stage.is_idle();
        if pending && !self.inner.is_destroyed() {
            self.inner.debouncer.schedule(None);
        }
    }

    /// Scheduler configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Request a pass reaching at least `request.stage`
    ///
    /// The pending stage becomes the earliest of all outstanding requests;
    /// item selections and flags accumulate. Synchronous bursts are coalesced
    /// into one scheduled pass. Must be called from within a Tokio runtime.
    pub fn request_update(&self, request: impl Into<UpdateRequest>) {
        let request = request.into();
        if self.inner.is_destroyed() || request.stage.is_idle() {
            return;
        }

        {
            let mut state = self.inner.state.lock();
            let pending = &mut state.pending;
            pending.stage = pending.stage.earliest(request.stage);
            pending.items.extend(request.items);
            pending.force_refresh |= request.force_refresh;
            pending.skip_animations |= request.skip_animations;
            if let Some(label) = request.requestor {
                *state.requestors.entry(label).or_insert(0) += 1;
            }
        }

        self.inner.debouncer.schedule(request.backoff);
    }

    /// Wrap a configuration task so it runs under the update lock
    ///
    /// The task is counted as pending from this call until it completes,
    /// even before the returned future is first polled. Resolves to `None`
    /// without running `task` if the scheduler is destroyed first.
    pub fn run_factory_update<F>(
        &self,
        task: F,
    ) -> impl Future<Output = Option<F::Output>> + Send + 'static
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let ticket = FactoryTicket::issue(&self.inner);
        let inner = Arc::clone(&self.inner);
        async move {
            let _ticket = ticket;
            if inner.is_destroyed() {
                return None;
            }
            let _guard = inner.lock.acquire().await;
            if inner.is_destroyed() {
                return None;
            }
            Some(task.await)
        }
    }

    /// Wait until no pass or configuration task is pending or running
    ///
    /// Never cancels in-flight work.
    ///
    /// # Errors
    /// Returns [`SchedulerError::WaitTimeout`] on timeout when
    /// `fail_on_timeout` is set; otherwise a timeout is logged once per
    /// scheduler and reported as [`WaitOutcome::TimedOut`].
    pub async fn wait_for_update(
        &self,
        timeout: Duration,
        fail_on_timeout: bool,
    ) -> Result<WaitOutcome, SchedulerError> {
        let inner = &self.inner;
        let settle = async {
            loop {
                if inner.is_destroyed() {
                    return WaitOutcome::Destroyed;
                }
                if inner.factory_pending.load(Ordering::SeqCst) > 0 && !inner.lock.is_idle() {
                    inner.lock.wait_for_clear_queue().await;
                }
                if inner.is_quiescent() {
                    return WaitOutcome::Settled;
                }
                tokio::time::sleep(inner.config.poll_interval).await;
            }
        };

        match tokio::time::timeout(timeout, settle).await {
            Ok(outcome) => Ok(outcome),
            Err(_) if fail_on_timeout => Err(SchedulerError::WaitTimeout { timeout }),
            Err(_) => {
                if !inner.timeout_warned.swap(true, Ordering::SeqCst) {
                    warn!(?timeout, state = ?self.state(), "update did not settle in time");
                }
                Ok(WaitOutcome::TimedOut)
            }
        }
    }

    /// Snapshot of the execution state
    #[must_use]
    pub fn state(&self) -> ExecutionState {
        let state = self.inner.state.lock();
        ExecutionState {
            pending_stage: state.pending.stage,
            running_stage: state.running,
            shortcut_count: state.shortcut_count,
            pending_factory_updates: self.inner.factory_pending.load(Ordering::SeqCst),
            destroyed: self.inner.is_destroyed(),
        }
    }

    /// Receive a [`PassReport`] after every pass
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<PassReport>> {
        self.inner.reports.subscribe()
    }

    /// Number of passes started so far
    #[inline]
    #[must_use]
    pub fn passes(&self) -> u64 {
        self.inner.passes.load(Ordering::SeqCst)
    }

    /// Mark the scheduler destroyed
    ///
    /// Pending work is dropped; suspended tasks abandon their remaining work
    /// when they resume.
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.state.lock().pending = PendingWork::default();
        debug!("update scheduler destroyed");
    }

    /// True once [`UpdateScheduler::destroy`] has been called
    #[inline]
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.inner.is_destroyed()
    }
}

impl fmt::Debug for UpdateScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateScheduler")
            .field("config", &self.inner.config)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

struct FactoryTicket(Arc<Inner>);

impl FactoryTicket {
    fn issue(inner: &Arc<Inner>) -> Self {
        inner.factory_pending.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(inner))
    }
}

impl Drop for FactoryTicket {
    fn drop(&mut self) {
        self.0.factory_pending.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Inner {
    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    fn is_quiescent(&self) -> bool {
        let idle = {
            let state = self.state.lock();
            state.pending.stage.is_idle() && state.running.is_idle()
        };
        idle && self.factory_pending.load(Ordering::SeqCst) == 0
            && self.lock.is_idle()
            && !self.debouncer.is_scheduled()
    }

    async fn run_pass(&self, coalesced: u32) {
        if self.is_destroyed() {
            return;
        }
        let _guard = self.lock.acquire().await;
        if self.is_destroyed() {
            return;
        }

        let runner = self.runner.read().as_ref().and_then(Weak::upgrade);
        let Some(runner) = runner else {
            debug!("no pipeline runner bound; request left pending");
            return;
        };

        let ctx = {
            let mut state = self.state.lock();
            if state.pending.stage.is_idle() {
                return;
            }
            let pending = std::mem::take(&mut state.pending);
            state.running = pending.stage;
            PassContext {
                pass: self.passes.fetch_add(1, Ordering::SeqCst) + 1,
                start_stage: pending.stage,
                items: pending.items,
                force_refresh: pending.force_refresh,
                skip_animations: pending.skip_animations,
            }
        };

        debug!(pass = ctx.pass, start = %ctx.start_stage, coalesced, "update pass starting");
        let started = Instant::now();
        let outcome = self.execute(runner.as_ref(), &ctx).await;
        drop(runner);

        let shortcut_count = {
            let mut state = self.state.lock();
            state.running = Stage::None;
            state.shortcut_count
        };
        let report = PassReport {
            pass: ctx.pass,
            start_stage: ctx.start_stage,
            outcome,
            shortcut_count,
            duration: started.elapsed(),
        };
        debug!(
            pass = report.pass,
            outcome = ?report.outcome,
            duration = ?report.duration,
            "update pass finished"
        );
        self.reports.send_replace(Some(report));
    }

    async fn execute(&self, runner: &dyn PipelineRunner, ctx: &PassContext) -> PassOutcome {
        for stage in ctx.start_stage.through_render() {
            if self.is_destroyed() {
                return PassOutcome::Abandoned;
            }
            if let Some(outcome) = self.check_shortcut(stage, ctx) {
                return outcome;
            }
            match runner.run_stage(stage, ctx).await {
                Ok(_) if self.is_destroyed() => return PassOutcome::Abandoned,
                Ok(StageFlow::Continue) => {}
                Ok(StageFlow::Halt) => {
                    debug!(pass = ctx.pass, %stage, "pass halted");
                    return PassOutcome::Halted { at: stage };
                }
                Err(e) => {
                    error!(pass = ctx.pass, %stage, error = %e, "update pass failed");
                    return PassOutcome::Failed { at: stage };
                }
            }
        }

        let mut state = self.state.lock();
        state.shortcut_count = 0;
        state.requestors.clear();
        PassOutcome::Rendered
    }

    /// End the pass if `stage` or an earlier one was re-requested
    ///
    /// The items and flags of the ended pass carry over into the next one.
    fn check_shortcut(&self, stage: Stage, ctx: &PassContext) -> Option<PassOutcome> {
        let mut state = self.state.lock();
        if state.pending.stage > stage {
            return None;
        }

        if state.shortcut_count <= self.config.max_shortcuts {
            state.shortcut_count += 1;
            let pending = &mut state.pending;
            pending.items.extend(ctx.items.clone());
            pending.force_refresh |= ctx.force_refresh;
            pending.skip_animations |= ctx.skip_animations;
            debug!(
                %stage,
                pending = %state.pending.stage,
                count = state.shortcut_count,
                "shortcut: earlier stage re-requested"
            );
            return Some(PassOutcome::Shortcut { at: stage });
        }

        warn!(
            requestors = ?state.requestors,
            shortcuts = state.shortcut_count,
            "excessive update re-entrancy; forcing render"
        );
        state.pending = PendingWork::default();
        None
    }
}
