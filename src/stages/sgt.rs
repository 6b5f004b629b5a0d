//! Strain Green Tensor Stages
//!
//! From source geometry preparation through the two solver runs, their
//! checks, and the conversion of raw solver output into the tensor files
//! the synthesis stage reads.

use crate::error::FlowResult;
use crate::workflow::StageId;

use super::{num, single_node, ResourceRequest, ScriptArtifact, Stage, StageContext};

const FDLOC: &str = "fdloc";
const FAULTLIST: &str = "faultlist";
const RADIUSFILE: &str = "radiusfile";
const COORDFILE: &str = "coordfile";

const PYTHON_MODULE: &str = "module load python/2.7.16";

/// Force component of a solver run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    X,
    Y,
}

impl Component {
    /// Lowercase axis label (`x`, `y`).
    pub fn axis(self) -> &'static str {
        match self {
            Component::X => "x",
            Component::Y => "y",
        }
    }

    /// Solver output directory suffix (`fx`, `fy`).
    pub fn force(self) -> &'static str {
        match self {
            Component::X => "fx",
            Component::Y => "fy",
        }
    }

    /// Label of the tensor file produced from this component's output.
    pub fn tensor_label(self) -> &'static str {
        match self {
            Component::X => "fy",
            Component::Y => "fx",
        }
    }

    fn solver_input(self, site: &str) -> String {
        format!("IN3D.{}.{}", site, self.axis())
    }

    fn strain_output(self, site: &str) -> String {
        format!("comp_{}/output_sgt/awp-strain-{}-{}", self.axis(), site, self.force())
    }
}

/// `preSGT`: site location, fault list, radius and coordinate files.
#[derive(Debug, Clone, Copy)]
pub struct PrepareSourceGeometry;

impl Stage for PrepareSourceGeometry {
    fn id(&self) -> StageId {
        StageId::PreSgt
    }

    fn build(&self, ctx: &StageContext<'_>) -> FlowResult<ScriptArtifact> {
        let r = &ctx.config.compute.resources;
        let model = &ctx.config.input.model;
        let setup = &ctx.config.compute.setup;

        let mut script = ScriptArtifact::scheduled(self.id(), single_node(r, r.time / 6.0));
        script.line(format!("export PYTHONPATH={}:$PYTHONPATH", ctx.working_dir.display()));
        script.line(PYTHON_MODULE);
        script.blank();
        script.command([
            ctx.tool("PreSgt/presgt.py"),
            ctx.site.to_string(),
            ctx.erf_id.to_string(),
            model.model_box.clone(),
            model.grid_out.clone(),
            model.coords.clone(),
            ctx.site_file(FDLOC),
            ctx.site_file(FAULTLIST),
            ctx.site_file(RADIUSFILE),
            ctx.site_file(COORDFILE),
            ctx.database(),
            num(setup.spacing),
            num(setup.frequency),
        ]);
        Ok(script)
    }
}

/// `preAWP`: solver inputs and the velocity mesh link.
#[derive(Debug, Clone, Copy)]
pub struct PrepareMeshInputs;

impl Stage for PrepareMeshInputs {
    fn id(&self) -> StageId {
        StageId::PreAwp
    }

    fn build(&self, ctx: &StageContext<'_>) -> FlowResult<ScriptArtifact> {
        let r = &ctx.config.compute.resources;
        let model = &ctx.config.input.model;
        let setup = &ctx.config.compute.setup;
        let d = &ctx.config.compute.decomposition;

        let mut script = ScriptArtifact::scheduled(self.id(), single_node(r, r.time / 6.0));
        script.line(PYTHON_MODULE);
        script.line(format!("ln -s {} awp.{}.media", model.path, ctx.site));
        script.blank();
        script.command([
            ctx.tool("AWP-ODC-SGT/utils/build_awp_inputs.py"),
            format!("--site {}", ctx.site),
            format!("--gridout {}", model.grid_out),
            format!("--fdloc {}", ctx.site_file(FDLOC)),
            format!("--cordfile {}", ctx.site_file(COORDFILE)),
            format!("--frequency {}", num(setup.frequency)),
            format!("--px {}", d.x),
            format!("--py {}", d.y),
            format!("--pz {}", d.z),
            format!("--source-frequency {}", num(setup.source_frequency)),
            format!("--run_id {}", ctx.run_id),
            format!("--velocity-mesh {}", model.path),
        ]);
        Ok(script)
    }
}

/// `AWPX` / `AWPY`: the wave propagation solve for one force component.
#[derive(Debug, Clone, Copy)]
pub struct MeshSolve {
    component: Component,
}

impl MeshSolve {
    pub fn new(component: Component) -> Self {
        Self { component }
    }

    /// Scheduler request: one task per mesh partition spread over the
    /// configured nodes.
    pub fn resources(ctx: &StageContext<'_>) -> ResourceRequest {
        let r = &ctx.config.compute.resources;
        let tasks = ctx.config.compute.decomposition.tasks();
        let nodes = r.nodes.max(1);
        ResourceRequest {
            time: r.time,
            nodes,
            tasks_per_node: tasks.div_ceil(nodes),
            cpus_per_task: r.cpus_per_task,
            qos: r.qos.clone(),
        }
    }
}

impl Stage for MeshSolve {
    fn id(&self) -> StageId {
        match self.component {
            Component::X => StageId::AwpX,
            Component::Y => StageId::AwpY,
        }
    }

    fn build(&self, ctx: &StageContext<'_>) -> FlowResult<ScriptArtifact> {
        let tasks = ctx.config.compute.decomposition.tasks();

        let mut script = ScriptArtifact::scheduled(self.id(), Self::resources(ctx));
        script.line("module swap intel gcc");
        script.line("ulimit -c unlimited");
        script.blank();
        script.line(format!(
            "export CYBERSHAKE_HOME={}",
            ctx.config.input.cybershake.path.display()
        ));
        script.blank();
        script.command([
            ctx.tool("AWP-ODC-SGT/awp_odc_wrapper.sh"),
            tasks.to_string(),
            self.component.solver_input(ctx.site),
        ]);
        Ok(script)
    }
}

/// `checkX` / `checkY`: sanity checks over the solver output.
#[derive(Debug, Clone, Copy)]
pub struct ValidateSolve {
    component: Component,
}

impl ValidateSolve {
    pub fn new(component: Component) -> Self {
        Self { component }
    }
}

impl Stage for ValidateSolve {
    fn id(&self) -> StageId {
        match self.component {
            Component::X => StageId::CheckX,
            Component::Y => StageId::CheckY,
        }
    }

    fn build(&self, ctx: &StageContext<'_>) -> FlowResult<ScriptArtifact> {
        let r = &ctx.config.compute.resources;

        let mut script = ScriptArtifact::scheduled(self.id(), single_node(r, r.time * 0.5));
        script.line(PYTHON_MODULE);
        script.blank();
        script.command([
            ctx.tool("SgtTest/perform_checks.py"),
            self.component.strain_output(ctx.site),
            ctx.site_file(COORDFILE),
            self.component.solver_input(ctx.site),
        ]);
        Ok(script)
    }
}

/// `postX` / `postY`: converts solver output into tensor and header files.
#[derive(Debug, Clone, Copy)]
pub struct PrepareTensors {
    component: Component,
}

impl PrepareTensors {
    pub fn new(component: Component) -> Self {
        Self { component }
    }
}

impl Stage for PrepareTensors {
    fn id(&self) -> StageId {
        match self.component {
            Component::X => StageId::PostX,
            Component::Y => StageId::PostY,
        }
    }

    fn build(&self, ctx: &StageContext<'_>) -> FlowResult<ScriptArtifact> {
        let r = &ctx.config.compute.resources;
        let model = &ctx.config.input.model;
        let setup = &ctx.config.compute.setup;
        let c = self.component;
        let tensor = format!("{}_{}_{}", ctx.site, c.tensor_label(), ctx.run_id);

        let mut script = ScriptArtifact::scheduled(self.id(), single_node(r, r.time / 6.0));
        script.line(PYTHON_MODULE);
        script.blank();
        script.command([
            ctx.tool("AWP-GPU-SGT/utils/prepare_for_pp.py"),
            ctx.site.to_string(),
            c.strain_output(ctx.site),
            format!("{}.sgt", tensor),
            model.model_box.clone(),
            ctx.site_file(COORDFILE),
            ctx.site_file(FDLOC),
            model.grid_out.clone(),
            c.solver_input(ctx.site),
            format!("awp.{}.media", ctx.site),
            c.axis().to_string(),
            ctx.run_id.to_string(),
            format!("{}.sgthead", tensor),
            num(setup.frequency),
            format!("-s {}", num(setup.source_frequency)),
        ]);
        Ok(script)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::fixtures::Harness;
    use crate::stages::ExecutionMode;

    #[test]
    fn test_presgt_script() {
        let harness = Harness::new();
        let ctx = harness.ctx();
        let script = PrepareSourceGeometry.build(&ctx).unwrap();
        let lines = script.lines();

        // 7200 s / 6
        assert_eq!(lines[2], "#SBATCH --time=00:20:00");
        assert_eq!(lines[3], "#SBATCH --nodes=1");
        assert_eq!(lines[4], "#SBATCH --tasks-per-node=1");
        assert_eq!(lines[5], "#SBATCH --cpus-per-task=48");
        assert_eq!(lines[6], "#SBATCH --ntasks=1");
        assert_eq!(
            lines[12],
            format!("export PYTHONPATH={}:$PYTHONPATH", harness.working_dir.display())
        );
        let cmd = lines.last().unwrap();
        assert!(cmd.contains("/PreSgt/presgt.py A 36 model_box gridout model_coords A.fdloc "));
        assert!(cmd.contains(" A.fdloc A.faultlist A.radiusfile A.coordfile "));
        let db = harness.config.input.database.path.display();
        assert!(cmd.ends_with(&format!("{} 0.2 0.5", db)));
        assert_eq!(script.file_name(), "preSGT.slurm");
    }

    #[test]
    fn test_preawp_script() {
        let harness = Harness::new();
        let script = PrepareMeshInputs.build(&harness.ctx()).unwrap();
        let lines = script.lines();

        assert!(lines.contains(&"ln -s /data/awp.media awp.A.media".to_string()));
        let cmd = lines.last().unwrap();
        assert!(cmd.contains("build_awp_inputs.py --site A --gridout gridout"));
        assert!(cmd.contains("--gridout gridout --fdloc A.fdloc --cordfile A.coordfile"));
        assert!(cmd.contains("--px 4 --py 4 --pz 2"));
        assert!(cmd.contains("--run_id 1"));
        assert!(cmd.ends_with("--velocity-mesh /data/awp.media"));
    }

    #[test]
    fn test_solver_resources_split_tasks_over_nodes() {
        let mut harness = Harness::new();
        // 4 * 4 * 3 = 48 tasks over 5 nodes -> 10 per node
        harness.config.compute.decomposition.z = 3;
        harness.config.compute.resources.nodes = 5;
        let ctx = harness.ctx();

        let request = MeshSolve::resources(&ctx);
        assert_eq!(request.nodes, 5);
        assert_eq!(request.tasks_per_node, 10);
        assert_eq!(request.cpus_per_task, 1);
        assert_eq!(request.time, 7200.0);

        let script = MeshSolve::new(Component::Y).build(&ctx).unwrap();
        assert_eq!(script.stage(), StageId::AwpY);
        assert_eq!(script.lines()[2], "#SBATCH --time=02:00:00");
        assert!(script.lines().last().unwrap().ends_with("awp_odc_wrapper.sh 48 IN3D.A.y"));
    }

    #[test]
    fn test_check_script() {
        let harness = Harness::new();
        let script = ValidateSolve::new(Component::X).build(&harness.ctx()).unwrap();

        assert_eq!(script.lines()[2], "#SBATCH --time=01:00:00");
        assert_eq!(script.mode(), ExecutionMode::Scheduled);
        assert!(script
            .lines()
            .last()
            .unwrap()
            .ends_with("perform_checks.py comp_x/output_sgt/awp-strain-A-fx A.coordfile IN3D.A.x"));
    }

    #[test]
    fn test_post_script_tensor_names() {
        let harness = Harness::new();
        let ctx = harness.ctx();

        let x = PrepareTensors::new(Component::X).build(&ctx).unwrap();
        let cmd = x.lines().last().unwrap();
        assert!(cmd.contains("comp_x/output_sgt/awp-strain-A-fx A_fy_1.sgt model_box"));
        assert!(cmd.contains("IN3D.A.x awp.A.media x 1 A_fy_1.sgthead 0.5 -s "));

        let y = PrepareTensors::new(Component::Y).build(&ctx).unwrap();
        let cmd = y.lines().last().unwrap();
        assert!(cmd.contains("comp_y/output_sgt/awp-strain-A-fy A_fx_1.sgt"));
        assert!(cmd.contains("awp.A.media y 1 A_fx_1.sgthead"));
    }
}
