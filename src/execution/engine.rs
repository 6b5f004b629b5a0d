//! Pipeline Execution Engine
//!
//! Runs the stage sequence of one site: skip what the checkpoint says is
//! done, then build, execute, and postprocess each remaining stage in
//! order. The first failure stops the pipeline; the checkpoint keeps
//! pointing at the last stage that fully completed.

use std::time::Instant;

use log::{error, info};
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::task;

use crate::error::{FlowError, FlowResult};
use crate::monitoring::{EventType, ExecutionTimeline, ProgressReporter};
use crate::stages::{StageContext, StageFactory};
use crate::workflow::{StageId, WorkflowDefinition};

use super::executor::{JobExecutor, JobRequest};

/// Drives one site pipeline through the workflow.
pub struct PipelineRunner<'a> {
    definition: &'a WorkflowDefinition,
    factory: &'a StageFactory,
    executor: &'a JobExecutor,
    dry_run: bool,
}

impl<'a> PipelineRunner<'a> {
    pub fn new(
        definition: &'a WorkflowDefinition,
        factory: &'a StageFactory,
        executor: &'a JobExecutor,
    ) -> Self {
        Self {
            definition,
            factory,
            executor,
            dry_run: false,
        }
    }

    /// In dry-run mode scripts are built and written but never launched,
    /// and the checkpoint does not move.
    pub fn set_dry_run(&mut self, dry_run: bool) {
        self.dry_run = dry_run;
    }

    /// Runs every stage after `resume_from`.
    ///
    /// Returns the stages that were processed, in order.
    pub async fn run(
        &self,
        ctx: &StageContext<'_>,
        resume_from: Option<&str>,
        progress: &ProgressReporter,
        timeline: &mut ExecutionTimeline,
    ) -> FlowResult<Vec<StageId>> {
        let remaining = self.definition.remaining_after(resume_from)?;

        if let Some(token) = resume_from {
            info!(
                "{} resuming after '{}' ({} stages left)",
                progress.tag(),
                token,
                remaining.len()
            );
        }

        let mut processed = Vec::with_capacity(remaining.len());
        for stage in remaining {
            timeline.add_event(stage, EventType::Started);
            match self.run_stage(stage, ctx, progress).await {
                Ok(()) => {
                    timeline.add_event(stage, EventType::Completed);
                    processed.push(stage);
                }
                Err(e) => {
                    timeline.add_event(stage, EventType::Failed);
                    progress.stage_failed(stage, &e.to_string());
                    error!("{} pipeline stopped at {}", progress.tag(), stage);
                    return Err(e);
                }
            }
        }

        Ok(processed)
    }

    async fn run_stage(
        &self,
        stage: StageId,
        ctx: &StageContext<'_>,
        progress: &ProgressReporter,
    ) -> FlowResult<()> {
        let started = Instant::now();
        let controller = (self.factory)(stage);
        progress.stage_started(stage);

        let artifact = run_blocking(|| controller.build(ctx))?;
        let script = run_blocking(|| artifact.write_to(ctx.working_dir))
            .map_err(|e| FlowError::from(e).in_stage(stage))?;

        if self.dry_run {
            progress.stage_script_only(stage, &script.display().to_string());
            return Ok(());
        }

        let outcome = controller
            .execute(
                self.executor,
                JobRequest {
                    artifact: &artifact,
                    script: &script,
                    working_dir: ctx.working_dir,
                    progress,
                },
            )
            .await?;

        run_blocking(|| controller.postprocess(ctx, &outcome))?;
        progress.stage_completed(stage, started.elapsed());
        Ok(())
    }
}

/// Runs synchronous stage work (script writes, registry queries).
///
/// On a multi-thread runtime the worker hands its other tasks to a fresh
/// thread for the duration; elsewhere the work runs inline.
pub(crate) fn run_blocking<T>(work: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            task::block_in_place(work)
        }
        _ => work(),
    }
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use parking_lot::Mutex;

    use super::testing::recording_factory;
    use super::*;
    use crate::execution::scheduler::fake::FakeScheduler;
    use crate::stages::fixtures::Harness;
    use crate::workflow::CYBERSHAKE_WORKFLOW;

    fn executor() -> JobExecutor {
        JobExecutor::new(Arc::new(FakeScheduler::new(0)), Duration::from_millis(5))
    }

    #[tokio::test]
    async fn test_fresh_run_processes_all_stages_in_order() {
        let harness = Harness::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let factory = recording_factory(log.clone(), None);
        let executor = executor();
        let runner = PipelineRunner::new(&CYBERSHAKE_WORKFLOW, &factory, &executor);
        let progress = ProgressReporter::new("A", 1, 3);
        let mut timeline = ExecutionTimeline::new();

        let processed = runner
            .run(&harness.ctx(), None, &progress, &mut timeline)
            .await
            .unwrap();

        assert_eq!(processed, StageId::ALL.to_vec());
        assert_eq!(harness.checkpoint.load().unwrap().as_deref(), Some("cleanUp"));
        assert_eq!(timeline.durations().len(), 11);

        let log = log.lock();
        assert_eq!(log[0], "A:preSGT:build");
        assert_eq!(log[1], "preSGT:execute");
        assert_eq!(log[2], "A:preSGT:postprocess");
        assert_eq!(log.len(), 33);
        assert!(harness.working_dir.join("runDS.marker").exists());
    }

    #[tokio::test]
    async fn test_resume_after_checkpoint() {
        let harness = Harness::new();
        harness.checkpoint.save(StageId::CheckX).unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let factory = recording_factory(log.clone(), None);
        let executor = executor();
        let runner = PipelineRunner::new(&CYBERSHAKE_WORKFLOW, &factory, &executor);
        let progress = ProgressReporter::new("A", 1, 3);

        let processed = runner
            .run(&harness.ctx(), Some("checkX"), &progress, &mut ExecutionTimeline::new())
            .await
            .unwrap();

        assert_eq!(processed.first(), Some(&StageId::CheckY));
        assert_eq!(processed.len(), 5);
        assert!(!log.lock().iter().any(|l| l.contains("checkX") || l.contains("AWPY")));
    }

    #[tokio::test]
    async fn test_failure_stops_pipeline_without_checkpoint() {
        let harness = Harness::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let factory = recording_factory(log.clone(), Some((StageId::PreAwp, "A_1")));
        let executor = executor();
        let runner = PipelineRunner::new(&CYBERSHAKE_WORKFLOW, &factory, &executor);
        let progress = ProgressReporter::new("A", 1, 3);

        let err = runner
            .run(&harness.ctx(), None, &progress, &mut ExecutionTimeline::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            FlowError::StageExecution { stage: StageId::PreAwp, .. }
        ));
        assert_eq!(harness.checkpoint.load().unwrap().as_deref(), Some("preSGT"));
        let log = log.lock();
        assert_eq!(log.last().map(String::as_str), Some("preAWP:execute-failed"));
        assert!(!log.iter().any(|l| l.contains("AWPX")));
    }

    #[tokio::test]
    async fn test_unknown_checkpoint_fails_fast() {
        let harness = Harness::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let factory = recording_factory(log.clone(), None);
        let executor = executor();
        let runner = PipelineRunner::new(&CYBERSHAKE_WORKFLOW, &factory, &executor);
        let progress = ProgressReporter::new("A", 1, 3);

        let err = runner
            .run(&harness.ctx(), Some("insertDB"), &progress, &mut ExecutionTimeline::new())
            .await
            .unwrap_err();

        assert!(matches!(err, FlowError::UnknownCheckpoint(ref t) if t == "insertDB"));
        assert!(log.lock().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_blocking_stage_work_leaves_runtime_responsive() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let ticker = tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(5)).await;
                counter.fetch_add(1, Ordering::Relaxed);
            }
        });

        // Occupy the only worker with synchronous work
        tokio::spawn(async {
            run_blocking(|| std::thread::sleep(Duration::from_millis(200)));
        })
        .await
        .unwrap();
        ticker.abort();

        assert!(ticks.load(Ordering::Relaxed) >= 5);
    }

    #[tokio::test]
    async fn test_run_blocking_inline_on_current_thread() {
        let caller = std::thread::current().id();
        let ran_on = run_blocking(|| std::thread::current().id());
        assert_eq!(ran_on, caller);
    }

    #[tokio::test]
    async fn test_dry_run_writes_scripts_only() {
        let harness = Harness::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let factory = recording_factory(log.clone(), None);
        let executor = executor();
        let mut runner = PipelineRunner::new(&CYBERSHAKE_WORKFLOW, &factory, &executor);
        runner.set_dry_run(true);
        let progress = ProgressReporter::new("A", 1, 3);

        runner
            .run(&harness.ctx(), None, &progress, &mut ExecutionTimeline::new())
            .await
            .unwrap();

        assert!(harness.working_dir.join("preSGT.sh").exists());
        assert!(harness.working_dir.join("cleanUp.sh").exists());
        assert!(!harness.working_dir.join("preSGT.marker").exists());
        assert_eq!(harness.checkpoint.load().unwrap(), None);
        assert!(log.lock().iter().all(|l| l.ends_with(":build")));
    }
}
