//! Job Execution
//!
//! Launches a written stage script either locally or through the batch
//! scheduler and blocks until it is finished.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{info, warn};

use crate::config::SchedulerConfig;
use crate::error::{FlowError, FlowResult};
use crate::monitoring::ProgressReporter;
use crate::stages::{ExecutionMode, ScriptArtifact};

use super::local::run_script;
use super::scheduler::{JobState, JobWatch, SchedulerClient, SlurmClient};

/// One script launch.
#[derive(Clone, Copy)]
pub struct JobRequest<'a> {
    pub artifact: &'a ScriptArtifact,
    /// Written script file
    pub script: &'a Path,
    pub working_dir: &'a Path,
    pub progress: &'a ProgressReporter,
}

/// What happened to a finished job.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub mode: ExecutionMode,
    pub job_id: Option<String>,
    pub elapsed: Duration,
    /// Queue queries issued while waiting
    pub status_queries: usize,
    pub final_state: Option<JobState>,
}

impl JobOutcome {
    pub fn local(elapsed: Duration) -> Self {
        Self {
            mode: ExecutionMode::Local,
            job_id: None,
            elapsed,
            status_queries: 0,
            final_state: None,
        }
    }
}

/// Dispatches scripts to the right launcher.
#[derive(Clone)]
pub struct JobExecutor {
    scheduler: Arc<dyn SchedulerClient>,
    poll_interval: Duration,
    verify_final_state: bool,
}

impl JobExecutor {
    pub fn new(scheduler: Arc<dyn SchedulerClient>, poll_interval: Duration) -> Self {
        Self {
            scheduler,
            poll_interval,
            verify_final_state: true,
        }
    }

    /// Executor backed by the Slurm commands named in `config`.
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self::new(Arc::new(SlurmClient::from_config(config)), config.poll_interval())
            .with_final_state_check(config.verify_final_state)
    }

    /// Enables or disables the accounting check after a job leaves the
    /// queue.
    pub fn with_final_state_check(mut self, enabled: bool) -> Self {
        self.verify_final_state = enabled;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Runs the script and waits for it to finish.
    pub async fn execute(&self, request: JobRequest<'_>) -> FlowResult<JobOutcome> {
        match request.artifact.mode() {
            ExecutionMode::Local => self.run_local(request).await,
            ExecutionMode::Scheduled => self.run_scheduled(request).await,
        }
    }

    async fn run_local(&self, request: JobRequest<'_>) -> FlowResult<JobOutcome> {
        let started = Instant::now();
        run_script(request.script, request.working_dir).await?;
        Ok(JobOutcome::local(started.elapsed()))
    }

    async fn run_scheduled(&self, request: JobRequest<'_>) -> FlowResult<JobOutcome> {
        let stage = request.artifact.stage();
        let progress = request.progress;
        let started = Instant::now();

        let job_id = self
            .scheduler
            .submit(request.script, request.working_dir)
            .await?;
        info!("{} {} submitted as job {}", progress.tag(), stage, job_id);

        let limit = request.artifact.estimated_time();
        let scheduler = Arc::clone(&self.scheduler);
        let watch = JobWatch::spawn(scheduler, job_id.clone(), self.poll_interval);
        let status_queries = watch
            .wait(self.poll_interval, |status, elapsed| {
                progress.job_status(stage, status, elapsed, limit)
            })
            .await?;

        let final_state = if self.verify_final_state {
            let state = self.scheduler.final_state(&job_id).await?;
            match &state {
                JobState::Completed => {}
                JobState::Failed(s) => {
                    return Err(FlowError::JobFailed {
                        job_id,
                        state: s.clone(),
                    })
                }
                JobState::Unknown(s) => warn!(
                    "{} job {} left the queue with unconfirmed state '{}'; assuming success",
                    progress.tag(),
                    job_id,
                    s
                ),
            }
            Some(state)
        } else {
            None
        };

        Ok(JobOutcome {
            mode: ExecutionMode::Scheduled,
            job_id: Some(job_id),
            elapsed: started.elapsed(),
            status_queries,
            final_state,
        })
    }
}
