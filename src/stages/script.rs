//! Stage Script Artifacts
//!
//! A built stage is a bash script plus the way it must be launched.
//! Scheduled scripts carry a Slurm directive header describing the
//! resources they ask for; local scripts are plain bash.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::debug;

use crate::workflow::StageId;

/// How a stage script is launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Run with bash in the run directory, blocking until exit.
    Local,
    /// Submitted to the batch scheduler and polled until it leaves the queue.
    Scheduled,
}

impl ExecutionMode {
    /// Script file extension for this mode.
    pub fn extension(self) -> &'static str {
        match self {
            ExecutionMode::Local => "sh",
            ExecutionMode::Scheduled => "slurm",
        }
    }
}

/// Resources requested from the scheduler for one job.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceRequest {
    /// Wall-clock limit in seconds
    pub time: f64,
    pub nodes: u32,
    pub tasks_per_node: u32,
    pub cpus_per_task: u32,
    pub qos: String,
}

impl ResourceRequest {
    pub fn total_tasks(&self) -> u32 {
        self.nodes * self.tasks_per_node
    }

    /// Wall-clock limit as `HH:MM:SS`. Fractional seconds are dropped and
    /// hours are not wrapped at one day.
    pub fn wall_time(&self) -> String {
        let total = self.time.max(0.0) as u64;
        format!(
            "{:02}:{:02}:{:02}",
            total / 3600,
            (total % 3600) / 60,
            total % 60
        )
    }
}

/// The generated script of one stage.
#[derive(Debug, Clone)]
pub struct ScriptArtifact {
    stage: StageId,
    mode: ExecutionMode,
    resources: Option<ResourceRequest>,
    lines: Vec<String>,
}

impl ScriptArtifact {
    /// Starts a local script with the bash header.
    pub fn local(stage: StageId) -> Self {
        let mut artifact = Self {
            stage,
            mode: ExecutionMode::Local,
            resources: None,
            lines: Vec::new(),
        };
        artifact.push_header();
        artifact
    }

    /// Starts a scheduled script with the bash header and the directive
    /// block for `resources`.
    pub fn scheduled(stage: StageId, resources: ResourceRequest) -> Self {
        let mut artifact = Self {
            stage,
            mode: ExecutionMode::Scheduled,
            resources: None,
            lines: Vec::new(),
        };
        artifact.push_header();

        let name = stage.token();
        artifact.line(format!("#SBATCH --time={}", resources.wall_time()));
        artifact.line(format!("#SBATCH --nodes={}", resources.nodes));
        artifact.line(format!("#SBATCH --tasks-per-node={}", resources.tasks_per_node));
        artifact.line(format!("#SBATCH --cpus-per-task={}", resources.cpus_per_task));
        artifact.line(format!("#SBATCH --ntasks={}", resources.total_tasks()));
        artifact.line(format!("#SBATCH --error={}.e", name));
        artifact.line(format!("#SBATCH --output={}.o", name));
        artifact.line(format!("#SBATCH --qos={}", resources.qos));
        artifact.blank();
        artifact.line("cd $SLURM_SUBMIT_DIR");

        artifact.resources = Some(resources);
        artifact
    }

    fn push_header(&mut self) {
        self.line("#!/bin/bash");
        self.blank();
    }

    /// Appends one line to the script body.
    pub fn line(&mut self, line: impl Into<String>) -> &mut Self {
        self.lines.push(line.into());
        self
    }

    pub fn blank(&mut self) -> &mut Self {
        self.lines.push(String::new());
        self
    }

    /// Appends a command assembled from whitespace-joined parts.
    pub fn command<I, S>(&mut self, parts: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let joined = parts
            .into_iter()
            .map(|p| p.as_ref().to_string())
            .collect::<Vec<_>>()
            .join(" ");
        self.line(joined)
    }

    pub fn stage(&self) -> StageId {
        self.stage
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn resources(&self) -> Option<&ResourceRequest> {
        self.resources.as_ref()
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Estimated run time used for progress display.
    pub fn estimated_time(&self) -> Option<Duration> {
        self.resources
            .as_ref()
            .map(|r| Duration::from_secs_f64(r.time.max(0.0)))
    }

    /// Script file name, `<stage token>.<extension>`.
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.stage.token(), self.mode.extension())
    }

    /// Full script text, one line per entry, newline terminated.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(line);
            out.push('\n');
        }
        out
    }

    /// Writes the script into `dir` and marks it executable.
    pub fn write_to(&self, dir: &Path) -> io::Result<PathBuf> {
        let path = dir.join(self.file_name());
        let mut out = BufWriter::new(File::create(&path)?);
        out.write_all(self.render().as_bytes())?;
        out.flush()?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
        }

        debug!("Wrote {}", path.display());
        Ok(path)
    }
}
