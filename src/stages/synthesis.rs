//! Synthesis Stages
//!
//! Rupture variation population, seismogram synthesis against the two
//! tensor files, and removal of the bulky intermediate outputs.

use std::fs;

use log::info;

use crate::error::{FlowError, FlowResult};
use crate::workflow::StageId;

use super::{num, ResourceRequest, ScriptArtifact, Stage, StageContext};

/// Directory (relative to the run directory) holding synthesis inputs
/// and outputs.
pub const POST_PROCESSING_DIR: &str = "post-processing";

/// Fixed DirectSynth parameters appended after the run-specific ones.
const SYNTH_PARAMETERS: &[&str] = &[
    "stoch_max_freq=-1.0",
    "run_psa=1",
    "run_rotd=1",
    "run_durations=1",
    "dtout=0.1",
    "simulation_out_pointsX=2",
    "simulation_out_pointsY=1",
    "simulation_out_timesamples=3000",
    "simulation_out_timeskip=0.1",
    "surfseis_rspectra_seismogram_units=cmpersec",
    "surfseis_rspectra_output_units=cmpersec2",
    "surfseis_rspectra_output_type=aa",
    "surfseis_rspectra_period=all",
    "surfseis_rspectra_apply_filter_highHZ=5.0",
    "surfseis_rspectra_apply_byteswap=no",
];

fn rupture_list_name(ctx: &StageContext<'_>) -> String {
    format!("rupture_file_list_{}", ctx.config.input.region)
}

/// `rupVar`: populates rupture variations, then writes the rupture list
/// the synthesis stage reads.
#[derive(Debug, Clone, Copy)]
pub struct RuptureVariations;

impl Stage for RuptureVariations {
    fn id(&self) -> StageId {
        StageId::RupVar
    }

    fn build(&self, ctx: &StageContext<'_>) -> FlowResult<ScriptArtifact> {
        let mut script = ScriptArtifact::local(self.id());
        script.line("module load python/2.7.16");
        script.blank();
        script.command([
            ctx.tool("populate_rvs.py"),
            ctx.config.input.cybershake.graves_pitarka.clone(),
            ctx.erf_id.to_string(),
            "1".to_string(),
            ctx.database(),
        ]);
        script.line(format!("mkdir -p {}", POST_PROCESSING_DIR));
        script.line(format!("cd {}", POST_PROCESSING_DIR));
        Ok(script)
    }

    fn record(&self, ctx: &StageContext<'_>) -> FlowResult<()> {
        let dir = ctx.working_dir.join(POST_PROCESSING_DIR);
        fs::create_dir_all(&dir)?;
        let path = dir.join(rupture_list_name(ctx));
        let count = ctx.registry.write_rupture_file_list(&path)?;
        info!("[{}] Rupture list {} ({} entries)", ctx.site, path.display(), count);
        Ok(())
    }
}

/// `runDS`: seismogram and intensity measure synthesis.
#[derive(Debug, Clone, Copy)]
pub struct Synthesis;

impl Synthesis {
    /// Half the task slots per node, each task with twice the CPUs.
    pub fn resources(ctx: &StageContext<'_>) -> ResourceRequest {
        let r = &ctx.config.compute.resources;
        ResourceRequest {
            time: r.time,
            nodes: r.nodes,
            tasks_per_node: r.tasks_per_node / 2,
            cpus_per_task: r.cpus_per_task * 2,
            qos: r.qos.clone(),
        }
    }
}

impl Stage for Synthesis {
    fn id(&self) -> StageId {
        StageId::RunDs
    }

    fn build(&self, ctx: &StageContext<'_>) -> FlowResult<ScriptArtifact> {
        let stage = self.id();
        let (lat, lon) = ctx
            .registry
            .site_location(ctx.site)
            .map_err(|e| FlowError::StageBuild {
                stage,
                reason: e.to_string(),
            })?
            .ok_or_else(|| FlowError::StageBuild {
                stage,
                reason: format!("no location registered for site '{}'", ctx.site),
            })?;

        let site = ctx.site;
        let run = ctx.run_id;
        let list = rupture_list_name(ctx);
        let cybershake = &ctx.config.input.cybershake;

        let mut script = ScriptArtifact::scheduled(stage, Self::resources(ctx));
        script.line("module purge");
        script.line("module load impi/2017.4");
        script.line("module load gcc");
        script.line("module load fftw");
        script.line("ulimit -c unlimited");
        script.blank();

        script.line(format!("cd {}/", POST_PROCESSING_DIR));
        for label in ["fx", "fy"] {
            script.line(format!("ln -s ../{}_{}_{}.sgt", site, label, run));
        }
        for label in ["fx", "fy"] {
            script.line(format!("ln -s ../{}_{}_{}.sgthead", site, label, run));
        }
        script.command([
            ctx.tool("make_lns.py"),
            list.clone(),
            format!("{}/", ctx.forecast_ruptures().display()),
        ]);
        script.blank();

        let mut cmd = vec![
            ctx.tool("DirectSynth/direct_synth.py"),
            cybershake.graves_pitarka.clone(),
            format!("stat={}", site),
            format!("slat={}", num(lat)),
            format!("slon={}", num(lon)),
            "sgt_handlers=84".to_string(),
            format!("run_id={}", run),
            "debug=1".to_string(),
            "max_buf_mb=512".to_string(),
            "rupture_spacing=uniform".to_string(),
            "ntout=3000".to_string(),
            format!("rup_list_file={}", list),
            format!("sgt_xfile={}_fx_{}.sgt", site, run),
            format!("sgt_yfile={}_fy_{}.sgt", site, run),
            format!("x_header={}_fx_{}.sgthead", site, run),
            format!("y_header={}_fy_{}.sgthead", site, run),
            format!("det_max_freq={}", num(ctx.config.compute.setup.frequency)),
        ];
        cmd.extend(SYNTH_PARAMETERS.iter().map(|p| p.to_string()));
        script.command(cmd);
        script.line("cd ..");

        Ok(script)
    }

    fn record(&self, ctx: &StageContext<'_>) -> FlowResult<()> {
        ctx.registry
            .add_hazard_dataset(ctx.run_id, ctx.config.compute.setup.frequency)?;
        Ok(())
    }
}

/// `cleanUp`: removes tensor files and raw solver output.
#[derive(Debug, Clone, Copy)]
pub struct CleanUp;

impl Stage for CleanUp {
    fn id(&self) -> StageId {
        StageId::CleanUp
    }

    fn build(&self, _ctx: &StageContext<'_>) -> FlowResult<ScriptArtifact> {
        let mut script = ScriptArtifact::local(self.id());
        script.line("rm -fr *sgt");
        script.line("rm -fr comp_*/output_sgt/*");
        Ok(script)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::JobOutcome;
    use crate::registry::NewRun;
    use crate::stages::fixtures::Harness;
    use crate::stages::ExecutionMode;
    use std::time::Duration;

    #[test]
    fn test_rupvar_script_is_local() {
        let harness = Harness::new();
        let script = RuptureVariations.build(&harness.ctx()).unwrap();

        assert_eq!(script.mode(), ExecutionMode::Local);
        assert_eq!(script.file_name(), "rupVar.sh");
        let lines = script.lines();
        assert_eq!(lines[lines.len() - 2], "mkdir -p post-processing");
        assert!(lines[lines.len() - 3].ends_with(&format!(
            "populate_rvs.py 3 36 1 {}",
            harness.config.input.database.path.display()
        )));
    }

    #[test]
    fn test_rupvar_postprocess_writes_list_then_checkpoint() {
        let harness = Harness::new();
        let ctx = harness.ctx();

        RuptureVariations
            .postprocess(&ctx, &JobOutcome::local(Duration::ZERO))
            .unwrap();

        let list = harness.working_dir.join("post-processing/rupture_file_list_LA");
        let content = fs::read_to_string(list).unwrap();
        assert_eq!(content.lines().next(), Some("1"));
        assert_eq!(harness.checkpoint.load().unwrap().as_deref(), Some("rupVar"));
    }

    #[test]
    fn test_rupvar_registry_failure_keeps_checkpoint() {
        let harness = Harness::new();
        harness.checkpoint.save(StageId::PostY).unwrap();
        // A file where the directory should be makes bookkeeping fail
        fs::write(harness.working_dir.join("post-processing"), "").unwrap();

        let err = RuptureVariations
            .postprocess(&harness.ctx(), &JobOutcome::local(Duration::ZERO))
            .unwrap_err();

        assert!(matches!(err, FlowError::StageExecution { stage: StageId::RupVar, .. }));
        assert_eq!(harness.checkpoint.load().unwrap().as_deref(), Some("postY"));
    }

    #[test]
    fn test_runds_postprocess_registers_hazard_dataset() {
        let harness = Harness::new();
        harness
            .registry
            .add_run_info(&NewRun {
                run_id: 1,
                site_id: 1,
                erf_id: 36,
                model_id: 5,
                source_frequency: 1.0,
                frequency: 0.5,
            })
            .unwrap();

        Synthesis
            .postprocess(&harness.ctx(), &JobOutcome::local(Duration::ZERO))
            .unwrap();
        assert_eq!(harness.checkpoint.load().unwrap().as_deref(), Some("runDS"));

        // A second pass is a no-op for the registry
        Synthesis
            .postprocess(&harness.ctx(), &JobOutcome::local(Duration::ZERO))
            .unwrap();
    }

    #[test]
    fn test_runds_postprocess_needs_registered_run() {
        let harness = Harness::new();
        let err = Synthesis
            .postprocess(&harness.ctx(), &JobOutcome::local(Duration::ZERO))
            .unwrap_err();
        assert!(matches!(err, FlowError::StageExecution { stage: StageId::RunDs, .. }));
        assert_eq!(harness.checkpoint.load().unwrap(), None);
    }

    #[test]
    fn test_runds_script() {
        let harness = Harness::new();
        let ctx = harness.ctx();
        let script = Synthesis.build(&ctx).unwrap();
        let lines = script.lines();

        assert_eq!(lines[4], "#SBATCH --tasks-per-node=24");
        assert_eq!(lines[5], "#SBATCH --cpus-per-task=2");
        assert_eq!(lines[6], "#SBATCH --ntasks=96");
        assert!(lines.contains(&"ln -s ../A_fx_1.sgt".to_string()));
        assert!(lines.contains(&"ln -s ../A_fy_1.sgthead".to_string()));

        let make_lns = format!(
            "make_lns.py rupture_file_list_LA {}/",
            harness.rupture_root.join("Ruptures_erf36").display()
        );
        assert!(lines.iter().any(|l| l.ends_with(&make_lns)));

        let synth = &lines[lines.len() - 2];
        assert!(synth.contains("direct_synth.py 3 stat=A slat=34.05 slon=-118.25"));
        assert!(synth.contains("slon=-118.25 sgt_handlers=84 run_id=1"));
        assert!(synth.contains("det_max_freq=0.5 stoch_max_freq=-1.0"));
        assert!(synth.ends_with("surfseis_rspectra_apply_byteswap=no"));
        assert_eq!(lines.last().unwrap(), "cd ..");
    }

    #[test]
    fn test_runds_unknown_site_fails_build() {
        let harness = Harness::new();
        let mut ctx = harness.ctx();
        ctx.site = "ZZZ";

        let err = Synthesis.build(&ctx).unwrap_err();
        assert!(matches!(err, FlowError::StageBuild { stage: StageId::RunDs, .. }));
    }

    #[test]
    fn test_cleanup_script() {
        let harness = Harness::new();
        let script = CleanUp.build(&harness.ctx()).unwrap();
        assert_eq!(script.render(), "#!/bin/bash\n\nrm -fr *sgt\nrm -fr comp_*/output_sgt/*\n");
    }
}
