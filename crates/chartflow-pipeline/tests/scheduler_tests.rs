use chartflow_pipeline::{
    ItemId, ItemSelection, PassContext, PassOutcome, PipelineError, PipelineRunner, SchedulerError,
    Stage, StageFlow, UpdateRequest, UpdateScheduler, WaitOutcome,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(10);

#[derive(Default)]
struct Script {
    delay: Option<(Stage, Duration)>,
    fail_at: Option<Stage>,
    rerequest_from_item_update: bool,
    rerequest_ingest_once_at: Option<Stage>,
}

struct ScriptedRunner {
    scheduler: UpdateScheduler,
    script: Script,
    log: Mutex<Vec<(u64, Stage)>>,
    contexts: Mutex<Vec<PassContext>>,
    rerequested: AtomicBool,
}

impl ScriptedRunner {
    fn bound(scheduler: &UpdateScheduler, script: Script) -> Arc<Self> {
        let runner = Arc::new(Self {
            scheduler: scheduler.clone(),
            script,
            log: Mutex::new(Vec::new()),
            contexts: Mutex::new(Vec::new()),
            rerequested: AtomicBool::new(false),
        });
        scheduler.bind(&runner);
        runner
    }

    fn stages(&self) -> Vec<Stage> {
        self.log.lock().iter().map(|(_, s)| *s).collect()
    }

    fn count(&self, stage: Stage) -> usize {
        self.stages().into_iter().filter(|s| *s == stage).count()
    }
}

#[async_trait::async_trait]
impl PipelineRunner for ScriptedRunner {
    async fn run_stage(
        &self,
        stage: Stage,
        ctx: &PassContext,
    ) -> Result<StageFlow, PipelineError> {
        self.log.lock().push((ctx.pass, stage));
        if stage == ctx.start_stage {
            self.contexts.lock().push(ctx.clone());
        }
        if let Some((at, delay)) = self.script.delay {
            if at == stage {
                tokio::time::sleep(delay).await;
            }
        }
        if self.script.fail_at == Some(stage) {
            return Err(PipelineError::stage(stage, "collaborator unavailable"));
        }
        if stage == Stage::ItemUpdate && self.script.rerequest_from_item_update {
            self.scheduler
                .request_update(UpdateRequest::new(Stage::Process).requestor("label-placement"));
        }
        if self.script.rerequest_ingest_once_at == Some(stage)
            && !self.rerequested.swap(true, Ordering::SeqCst)
        {
            self.scheduler.request_update(
                UpdateRequest::new(Stage::Ingest)
                    .items(ItemSelection::none())
                    .requestor("data-changed"),
            );
        }
        Ok(StageFlow::Continue)
    }
}

#[tokio::test(start_paused = true)]
async fn layout_then_ingest_runs_one_pass_from_ingest() {
    let scheduler = UpdateScheduler::default();
    let runner = ScriptedRunner::bound(&scheduler, Script::default());

    scheduler.request_update(Stage::Layout);
    scheduler.request_update(Stage::Ingest);
    assert_eq!(scheduler.state().pending_stage, Stage::Ingest);

    let outcome = scheduler.wait_for_update(WAIT, true).await.unwrap();
    assert_eq!(outcome, WaitOutcome::Settled);
    assert_eq!(scheduler.passes(), 1);
    assert_eq!(
        runner.stages(),
        vec![
            Stage::Ingest,
            Stage::Process,
            Stage::Layout,
            Stage::ItemUpdate,
            Stage::PreRender,
            Stage::Render,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn shortcut_budget_forces_render() {
    let scheduler = UpdateScheduler::default();
    let reports = scheduler.subscribe();
    let runner = ScriptedRunner::bound(
        &scheduler,
        Script {
            rerequest_from_item_update: true,
            ..Script::default()
        },
    );

    scheduler.request_update(Stage::Full);
    scheduler.wait_for_update(WAIT, true).await.unwrap();

    assert_eq!(runner.count(Stage::ItemUpdate), 5);
    assert_eq!(runner.count(Stage::PreRender), 1);
    assert_eq!(runner.count(Stage::Render), 1);
    assert_eq!(scheduler.passes(), 5);

    let state = scheduler.state();
    assert_eq!(state.shortcut_count, 0);
    assert!(state.is_quiescent());

    let last = reports.borrow().clone().unwrap();
    assert_eq!(last.outcome, PassOutcome::Rendered);
    assert_eq!(last.start_stage, Stage::Process);
}

#[tokio::test(start_paused = true)]
async fn wait_covers_pipeline_and_factory_work() {
    let scheduler = UpdateScheduler::default();
    let runner = ScriptedRunner::bound(
        &scheduler,
        Script {
            delay: Some((Stage::Process, Duration::from_millis(50))),
            ..Script::default()
        },
    );

    let applied = Arc::new(AtomicBool::new(false));
    scheduler.request_update(Stage::Full);
    let flag = Arc::clone(&applied);
    tokio::spawn(scheduler.run_factory_update(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        flag.store(true, Ordering::SeqCst);
    }));

    scheduler.wait_for_update(WAIT, true).await.unwrap();

    let state = scheduler.state();
    assert!(applied.load(Ordering::SeqCst));
    assert_eq!(state.running_stage, Stage::None);
    assert_eq!(state.pending_stage, Stage::None);
    assert_eq!(state.pending_factory_updates, 0);
    assert_eq!(runner.count(Stage::Render), 1);
}

#[tokio::test(start_paused = true)]
async fn factory_tasks_never_overlap_passes() {
    let scheduler = UpdateScheduler::default();
    let _runner = ScriptedRunner::bound(
        &scheduler,
        Script {
            delay: Some((Stage::Layout, Duration::from_millis(40))),
            ..Script::default()
        },
    );

    scheduler.request_update(Stage::Full);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(scheduler.state().running_stage, Stage::Full);

    let observer = scheduler.clone();
    let seen = scheduler
        .run_factory_update(async move { observer.state().running_stage })
        .await;
    assert_eq!(seen, Some(Stage::None));
}

#[tokio::test(start_paused = true)]
async fn timeout_is_error_or_outcome() {
    let scheduler = UpdateScheduler::default();
    let _runner = ScriptedRunner::bound(
        &scheduler,
        Script {
            delay: Some((Stage::Layout, Duration::from_secs(60))),
            ..Script::default()
        },
    );
    scheduler.request_update(Stage::Layout);

    let short = Duration::from_millis(20);
    assert_eq!(
        scheduler.wait_for_update(short, true).await,
        Err(SchedulerError::WaitTimeout { timeout: short })
    );
    assert_eq!(
        scheduler.wait_for_update(short, false).await,
        Ok(WaitOutcome::TimedOut)
    );
}

#[tokio::test(start_paused = true)]
async fn failed_stage_ends_pass_without_render() {
    let scheduler = UpdateScheduler::default();
    let reports = scheduler.subscribe();
    let runner = ScriptedRunner::bound(
        &scheduler,
        Script {
            fail_at: Some(Stage::Layout),
            ..Script::default()
        },
    );

    scheduler.request_update(Stage::Ingest);
    scheduler.wait_for_update(WAIT, true).await.unwrap();

    assert_eq!(runner.count(Stage::Render), 0);
    assert_eq!(
        reports.borrow().as_ref().map(|r| r.outcome),
        Some(PassOutcome::Failed { at: Stage::Layout })
    );
}

#[tokio::test(start_paused = true)]
async fn item_selections_accumulate() {
    let scheduler = UpdateScheduler::default();
    let runner = ScriptedRunner::bound(&scheduler, Script::default());

    scheduler.request_update(
        UpdateRequest::new(Stage::ItemUpdate).items(ItemSelection::of([ItemId(1)])),
    );
    scheduler.request_update(
        UpdateRequest::new(Stage::ItemUpdate)
            .items(ItemSelection::of([ItemId(2)]))
            .skip_animations(),
    );
    scheduler.wait_for_update(WAIT, true).await.unwrap();

    let contexts = runner.contexts.lock().clone();
    assert_eq!(contexts.len(), 1);
    assert_eq!(contexts[0].items, ItemSelection::of([ItemId(1), ItemId(2)]));
    assert!(contexts[0].skip_animations);
    assert!(!contexts[0].force_refresh);
}

#[tokio::test(start_paused = true)]
async fn backoff_batches_bursts() {
    let scheduler = UpdateScheduler::default();
    let _runner = ScriptedRunner::bound(&scheduler, Script::default());

    for _ in 0..5 {
        scheduler.request_update(
            UpdateRequest::new(Stage::Layout).backoff(Duration::from_millis(100)),
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(scheduler.passes(), 0);

    scheduler.wait_for_update(WAIT, true).await.unwrap();
    assert_eq!(scheduler.passes(), 1);
}

#[tokio::test(start_paused = true)]
async fn destroyed_scheduler_ignores_requests() {
    let scheduler = UpdateScheduler::default();
    let runner = ScriptedRunner::bound(&scheduler, Script::default());

    scheduler.destroy();
    scheduler.request_update(Stage::Full);
    assert_eq!(scheduler.state().pending_stage, Stage::None);
    assert_eq!(
        scheduler.wait_for_update(WAIT, true).await,
        Ok(WaitOutcome::Destroyed)
    );
    assert!(runner.stages().is_empty());
}

#[tokio::test(start_paused = true)]
async fn shortcut_carries_items_and_flags_into_next_pass() {
    let scheduler = UpdateScheduler::default();
    let runner = ScriptedRunner::bound(
        &scheduler,
        Script {
            rerequest_ingest_once_at: Some(Stage::Layout),
            ..Script::default()
        },
    );

    scheduler.request_update(
        UpdateRequest::new(Stage::Layout)
            .items(ItemSelection::of([ItemId(7)]))
            .skip_animations()
            .force_refresh(),
    );
    scheduler.wait_for_update(WAIT, true).await.unwrap();

    let contexts = runner.contexts.lock().clone();
    assert_eq!(contexts.len(), 2);
    assert_eq!(contexts[1].start_stage, Stage::Ingest);
    assert!(contexts[1].items.contains(ItemId(7)));
    assert!(contexts[1].skip_animations);
    assert!(contexts[1].force_refresh);
    assert_eq!(runner.count(Stage::ItemUpdate), 1);
    assert_eq!(runner.count(Stage::Render), 1);
}

#[tokio::test(start_paused = true)]
async fn requests_before_bind_run_once_bound() {
    let scheduler = UpdateScheduler::default();
    scheduler.request_update(Stage::Layout);
    tokio::task::yield_now().await;
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(scheduler.passes(), 0);
    assert_eq!(scheduler.state().pending_stage, Stage::Layout);

    let runner = ScriptedRunner::bound(&scheduler, Script::default());
    let outcome = scheduler.wait_for_update(WAIT, true).await.unwrap();

    assert_eq!(outcome, WaitOutcome::Settled);
    assert_eq!(runner.count(Stage::Render), 1);
    assert_eq!(runner.contexts.lock()[0].start_stage, Stage::Layout);
}
