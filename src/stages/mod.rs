//! Stage Controllers
//!
//! Every stage kind of the CyberShake workflow implements [`Stage`]:
//! build a script from the run context, hand it to the job executor, then
//! record bookkeeping and move the checkpoint.
//!
//! # Structure
//!
//! - [`script`]: Script artifacts and scheduler resource directives
//! - [`sgt`]: Strain Green tensor stages (preSGT through postY)
//! - [`synthesis`]: Rupture variations, seismogram synthesis, cleanup

pub mod script;
pub mod sgt;
pub mod synthesis;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use log::debug;

use crate::config::{Config, Resources};
use crate::error::{FlowError, FlowResult};
use crate::execution::{JobExecutor, JobOutcome, JobRequest};
use crate::registry::Registry;
use crate::workflow::{Checkpoint, StageId};

pub use script::{ExecutionMode, ResourceRequest, ScriptArtifact};
pub use sgt::{
    Component, MeshSolve, PrepareMeshInputs, PrepareSourceGeometry, PrepareTensors, ValidateSolve,
};
pub use synthesis::{CleanUp, RuptureVariations, Synthesis};

/// Everything a stage needs to know about the run it belongs to.
#[derive(Clone, Copy)]
pub struct StageContext<'a> {
    pub config: &'a Config,
    pub registry: &'a Registry,
    pub checkpoint: &'a Checkpoint,
    pub run_id: i64,
    /// Site short name as stored in the registry
    pub site: &'a str,
    pub erf_id: i64,
    pub working_dir: &'a Path,
    /// Directory holding `Ruptures_erf<id>/` trees
    pub rupture_root: &'a Path,
}

impl StageContext<'_> {
    /// Rupture descriptor tree of the selected forecast.
    pub fn forecast_ruptures(&self) -> PathBuf {
        self.rupture_root.join(format!("Ruptures_erf{}", self.erf_id))
    }

    /// Path of a CyberShake installation tool.
    pub fn tool(&self, relative: &str) -> String {
        format!("{}/{}", self.config.input.cybershake.path.display(), relative)
    }

    pub fn database(&self) -> String {
        self.config.input.database.path.display().to_string()
    }

    /// `<site>.<kind>` file produced by source geometry preparation.
    pub fn site_file(&self, kind: &str) -> String {
        format!("{}.{}", self.site, kind)
    }
}

/// One stage of a site pipeline.
#[async_trait]
pub trait Stage: Send + Sync {
    fn id(&self) -> StageId;

    /// Generates the stage script. Pure construction apart from registry
    /// lookups; nothing is written or launched.
    fn build(&self, ctx: &StageContext<'_>) -> FlowResult<ScriptArtifact>;

    /// Runs the written script and blocks until it is done.
    async fn execute(
        &self,
        executor: &JobExecutor,
        request: JobRequest<'_>,
    ) -> FlowResult<JobOutcome> {
        let stage = self.id();
        executor.execute(request).await.map_err(|e| e.in_stage(stage))
    }

    /// Stage-specific bookkeeping performed before the checkpoint moves.
    fn record(&self, _ctx: &StageContext<'_>) -> FlowResult<()> {
        Ok(())
    }

    /// Commits bookkeeping, then advances the checkpoint to this stage.
    fn postprocess(&self, ctx: &StageContext<'_>, outcome: &JobOutcome) -> FlowResult<()> {
        let stage = self.id();
        self.record(ctx).map_err(|e| e.in_stage(stage))?;
        ctx.checkpoint
            .save(stage)
            .map_err(|e| FlowError::from(e).in_stage(stage))?;
        debug!(
            "[{}] {} postprocessed ({:?}, job {})",
            ctx.site,
            stage,
            outcome.mode,
            outcome.job_id.as_deref().unwrap_or("-")
        );
        Ok(())
    }
}

/// Produces the controller for a stage kind.
pub type StageFactory = Arc<dyn Fn(StageId) -> Box<dyn Stage> + Send + Sync>;

/// Controller of each CyberShake stage kind.
pub fn controller(stage: StageId) -> Box<dyn Stage> {
    match stage {
        StageId::PreSgt => Box::new(PrepareSourceGeometry),
        StageId::PreAwp => Box::new(PrepareMeshInputs),
        StageId::AwpX => Box::new(MeshSolve::new(Component::X)),
        StageId::AwpY => Box::new(MeshSolve::new(Component::Y)),
        StageId::CheckX => Box::new(ValidateSolve::new(Component::X)),
        StageId::CheckY => Box::new(ValidateSolve::new(Component::Y)),
        StageId::PostX => Box::new(PrepareTensors::new(Component::X)),
        StageId::PostY => Box::new(PrepareTensors::new(Component::Y)),
        StageId::RupVar => Box::new(RuptureVariations),
        StageId::RunDs => Box::new(Synthesis),
        StageId::CleanUp => Box::new(CleanUp),
    }
}

/// Factory over the built-in controllers.
pub fn default_factory() -> StageFactory {
    Arc::new(controller)
}

/// Single-node request used by the helper stages; the whole node's task
/// slots become CPUs of one task.
pub(crate) fn single_node(resources: &Resources, time: f64) -> ResourceRequest {
    ResourceRequest {
        time,
        nodes: 1,
        tasks_per_node: 1,
        cpus_per_task: resources.tasks_per_node,
        qos: resources.qos.clone(),
    }
}

/// Formats a float the way the CyberShake tools expect on their command
/// lines (`200.0`, `0.5`).
pub(crate) fn num(value: f64) -> String {
    format!("{:?}", value)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::config::model::fixtures::sample_config;
    use crate::registry::fixtures::seed;
    use tempfile::TempDir;

    /// Owned pieces a [`StageContext`] borrows from.
    pub struct Harness {
        pub _dir: TempDir,
        pub config: Config,
        pub registry: Registry,
        pub checkpoint: Checkpoint,
        pub working_dir: PathBuf,
        pub rupture_root: PathBuf,
    }

    impl Harness {
        pub fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let config = sample_config(dir.path());
            let registry = Registry::open(&config.input.database.path).unwrap();
            seed(&registry);
            let working_dir = dir.path().join("runs/A_1");
            std::fs::create_dir_all(&working_dir).unwrap();
            let checkpoint = Checkpoint::new(&working_dir, "stage.txt");
            let rupture_root = working_dir.join("ruptures");
            Self {
                _dir: dir,
                config,
                registry,
                checkpoint,
                working_dir,
                rupture_root,
            }
        }

        pub fn ctx(&self) -> StageContext<'_> {
            StageContext {
                config: &self.config,
                registry: &self.registry,
                checkpoint: &self.checkpoint,
                run_id: 1,
                site: "A",
                erf_id: 36,
                working_dir: &self.working_dir,
                rupture_root: &self.rupture_root,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::Harness;
    use super::*;

    #[test]
    fn test_controller_ids_match() {
        for stage in StageId::ALL {
            assert_eq!(controller(stage).id(), stage);
        }
    }

    #[test]
    fn test_every_controller_builds() {
        let harness = Harness::new();
        let ctx = harness.ctx();
        for stage in StageId::ALL {
            let artifact = controller(stage).build(&ctx).unwrap();
            assert_eq!(artifact.stage(), stage);
            assert_eq!(artifact.lines()[0], "#!/bin/bash");
        }
    }

    #[test]
    fn test_execution_modes() {
        let harness = Harness::new();
        let ctx = harness.ctx();
        let local: Vec<StageId> = StageId::ALL
            .into_iter()
            .filter(|s| controller(*s).build(&ctx).unwrap().mode() == ExecutionMode::Local)
            .collect();
        assert_eq!(local, vec![StageId::RupVar, StageId::CleanUp]);
    }

    #[test]
    fn test_postprocess_moves_checkpoint() {
        let harness = Harness::new();
        let ctx = harness.ctx();
        let outcome = JobOutcome::local(std::time::Duration::ZERO);

        controller(StageId::PreAwp).postprocess(&ctx, &outcome).unwrap();
        assert_eq!(harness.checkpoint.load().unwrap().as_deref(), Some("preAWP"));
    }

    #[test]
    fn test_context_paths() {
        let harness = Harness::new();
        let ctx = harness.ctx();
        assert_eq!(ctx.forecast_ruptures(), harness.rupture_root.join("Ruptures_erf36"));
        assert!(ctx.tool("PreSgt/presgt.py").ends_with("cybershake/PreSgt/presgt.py"));
        assert_eq!(ctx.site_file("fdloc"), "A.fdloc");
        assert_eq!(num(200.0), "200.0");
        assert_eq!(num(0.5), "0.5");
    }
}
