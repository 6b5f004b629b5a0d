//! Batch Scheduler Client
//!
//! Submission, queue polling, and accounting against a Slurm-style
//! scheduler. A submitted job is watched by a background task that polls
//! the queue until the job leaves it; the stage waiting on the job only
//! sees the latest status line and the final completion signal.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::{debug, warn};
use tokio::process::Command;
use tokio::sync::{oneshot, watch};
use tokio::time::MissedTickBehavior;

use crate::config::SchedulerConfig;
use crate::error::{FlowError, FlowResult};

/// Queue format producing lines like `Slurm job RUNNING (1:02 of 20:00)`.
pub const STATUS_FORMAT: &str = "Slurm job %T (%M of %l)";

/// Accounting states that mean the job did not succeed.
const FAILURE_STATES: &[&str] = &[
    "FAILED",
    "TIMEOUT",
    "CANCELLED",
    "OUT_OF_MEMORY",
    "NODE_FAIL",
    "PREEMPTED",
    "BOOT_FAIL",
    "DEADLINE",
];

/// Final state of a job as reported by accounting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Completed,
    Failed(String),
    /// Accounting had no record yet or reported an unrecognized state
    Unknown(String),
}

/// Operations the engine needs from a batch scheduler.
#[async_trait]
pub trait SchedulerClient: Send + Sync {
    /// Submits `script` from `working_dir`; returns the job id.
    async fn submit(&self, script: &Path, working_dir: &Path) -> FlowResult<String>;

    /// One queue query. An empty result means the job is no longer queued.
    async fn query_status(&self, job_id: &str) -> FlowResult<String>;

    /// Final state of a job that left the queue.
    async fn final_state(&self, job_id: &str) -> FlowResult<JobState>;
}

/// Slurm client driving `sbatch`, `squeue`, and `sacct` (or the commands
/// configured in their place).
#[derive(Debug, Clone)]
pub struct SlurmClient {
    submit: String,
    status: String,
    accounting: String,
}

impl SlurmClient {
    pub fn new(
        submit: impl Into<String>,
        status: impl Into<String>,
        accounting: impl Into<String>,
    ) -> Self {
        Self {
            submit: submit.into(),
            status: status.into(),
            accounting: accounting.into(),
        }
    }

    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self::new(&config.submit, &config.status, &config.accounting)
    }
}

impl Default for SlurmClient {
    fn default() -> Self {
        Self::from_config(&SchedulerConfig::default())
    }
}

#[async_trait]
impl SchedulerClient for SlurmClient {
    async fn submit(&self, script: &Path, working_dir: &Path) -> FlowResult<String> {
        let args = vec![script.display().to_string()];
        let stdout = run_command(&self.submit, &args, Some(working_dir)).await?;
        parse_job_id(&stdout).ok_or_else(|| FlowError::Scheduler {
            command: command_line(&self.submit, &args),
            reason: format!("unexpected submission output '{}'", stdout.trim()),
        })
    }

    async fn query_status(&self, job_id: &str) -> FlowResult<String> {
        let args = vec![
            "-h".to_string(),
            "-o".to_string(),
            STATUS_FORMAT.to_string(),
            "--job".to_string(),
            job_id.to_string(),
        ];
        match run_command(&self.status, &args, None).await {
            Ok(stdout) => Ok(stdout.trim_end().to_string()),
            // Finished jobs age out of the queue and are then unknown to it
            Err(FlowError::Scheduler { reason, .. }) if reason.contains("Invalid job id") => {
                Ok(String::new())
            }
            Err(e) => Err(e),
        }
    }

    async fn final_state(&self, job_id: &str) -> FlowResult<JobState> {
        let args: Vec<String> = ["-j", job_id, "-X", "-n", "-P", "-o", "State"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let stdout = run_command(&self.accounting, &args, None).await?;
        Ok(parse_accounting_state(&stdout))
    }
}

fn command_line(command: &str, args: &[String]) -> String {
    if args.is_empty() {
        command.to_string()
    } else {
        format!("{} {}", command, args.join(" "))
    }
}

/// Runs a scheduler command and returns its standard output.
///
/// `command` may carry fixed leading arguments (`"sbatch --parsable"`
/// style); `args` are appended after them.
async fn run_command(
    command: &str,
    args: &[String],
    working_dir: Option<&Path>,
) -> FlowResult<String> {
    let display = command_line(command, args);
    let mut parts = command.split_whitespace();
    let program = parts
        .next()
        .ok_or_else(|| FlowError::Config("empty scheduler command".to_string()))?;

    let mut cmd = Command::new(program);
    cmd.args(parts).args(args).stdin(Stdio::null());
    if let Some(dir) = working_dir {
        cmd.current_dir(dir);
    }

    debug!("Running '{}'", display);
    let output = cmd.output().await.map_err(|e| FlowError::Scheduler {
        command: display.clone(),
        reason: e.to_string(),
    })?;

    if !output.status.success() {
        return Err(FlowError::Scheduler {
            command: display,
            reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Extracts the job id from `Submitted batch job <id>` (fourth token).
pub fn parse_job_id(stdout: &str) -> Option<String> {
    stdout.split_whitespace().nth(3).map(|s| s.to_string())
}

/// Interprets accounting output (first non-empty line, first token).
pub fn parse_accounting_state(stdout: &str) -> JobState {
    let raw = stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .and_then(|line| line.split_whitespace().next())
        .unwrap_or("")
        .trim_end_matches('+')
        .to_uppercase();

    if raw == "COMPLETED" {
        JobState::Completed
    } else if FAILURE_STATES.contains(&raw.as_str()) {
        JobState::Failed(raw)
    } else {
        JobState::Unknown(raw)
    }
}

/// A submitted job watched by a background polling task.
pub struct JobWatch {
    job_id: String,
    status: watch::Receiver<String>,
    done: oneshot::Receiver<FlowResult<usize>>,
}

impl JobWatch {
    /// Starts polling `job_id` every `interval` until a query comes back
    /// empty.
    pub fn spawn(client: Arc<dyn SchedulerClient>, job_id: String, interval: Duration) -> Self {
        let (status_tx, status_rx) = watch::channel(String::new());
        let (done_tx, done_rx) = oneshot::channel();
        let id = job_id.clone();

        tokio::spawn(async move {
            let mut queries = 0usize;
            let result = loop {
                queries += 1;
                match client.query_status(&id).await {
                    Ok(line) if line.trim().is_empty() => break Ok(queries),
                    Ok(line) => {
                        let _ = status_tx.send(line.trim().to_string());
                    }
                    Err(e) => break Err(e),
                }
                tokio::time::sleep(interval).await;
            };
            debug!("Job {} left the queue after {} queries", id, queries);
            let _ = done_tx.send(result);
        });

        Self {
            job_id,
            status: status_rx,
            done: done_rx,
        }
    }

    /// Waits for the job to leave the queue, calling `on_tick` with the
    /// latest status and elapsed time every `tick`.
    ///
    /// Returns the number of queue queries issued.
    pub async fn wait<F>(mut self, tick: Duration, mut on_tick: F) -> FlowResult<usize>
    where
        F: FnMut(&str, Duration),
    {
        let started = Instant::now();
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                result = &mut self.done => {
                    return result.map_err(|_| FlowError::Scheduler {
                        command: format!("status polling of job {}", self.job_id),
                        reason: "poller stopped without reporting".to_string(),
                    })?;
                }
                _ = ticker.tick() => {
                    let status = self.status.borrow().clone();
                    on_tick(&status, started.elapsed());
                }
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fake::FakeScheduler;
    use super::*;
    use std::fs;
    use std::sync::atomic::Ordering;
    use tempfile::tempdir;

    /// Writes an executable bash script named `name` into `dir`.
    #[cfg(unix)]
    fn write_stub(dir: &Path, name: &str, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/bash\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    #[test]
    fn test_parse_job_id() {
        assert_eq!(
            parse_job_id("Submitted batch job 4242\n").as_deref(),
            Some("4242")
        );
        assert_eq!(parse_job_id("Submitted batch job"), None);
    }

    #[test]
    fn test_parse_accounting_state() {
        assert_eq!(parse_accounting_state("COMPLETED\n"), JobState::Completed);
        assert_eq!(
            parse_accounting_state("\nCANCELLED by 1000\n"),
            JobState::Failed("CANCELLED".to_string())
        );
        assert_eq!(
            parse_accounting_state("TIMEOUT"),
            JobState::Failed("TIMEOUT".to_string())
        );
        assert_eq!(
            parse_accounting_state("FAILED+"),
            JobState::Failed("FAILED".to_string())
        );
        assert_eq!(parse_accounting_state(""), JobState::Unknown(String::new()));
        assert_eq!(
            parse_accounting_state("RUNNING"),
            JobState::Unknown("RUNNING".to_string())
        );
    }

    #[tokio::test]
    async fn test_watch_issues_one_query_past_last_status() {
        let scheduler = Arc::new(FakeScheduler::new(3));
        let dir = tempdir().unwrap();
        let job_id = scheduler
            .submit(&dir.path().join("x.slurm"), dir.path())
            .await
            .unwrap();

        let watch = JobWatch::spawn(scheduler.clone(), job_id, Duration::from_millis(5));
        let queries = watch.wait(Duration::from_millis(2), |_, _| {}).await.unwrap();

        assert_eq!(queries, 4);
        assert_eq!(scheduler.status_calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_watch_reports_latest_status() {
        let scheduler = Arc::new(FakeScheduler::new(4));
        let dir = tempdir().unwrap();
        let job_id = scheduler
            .submit(&dir.path().join("x.slurm"), dir.path())
            .await
            .unwrap();

        let watch = JobWatch::spawn(scheduler.clone(), job_id, Duration::from_millis(20));
        let mut seen = Vec::new();
        watch
            .wait(Duration::from_millis(5), |status, _| seen.push(status.to_string()))
            .await
            .unwrap();

        assert!(!seen.is_empty());
        assert!(seen.iter().any(|s| s.starts_with("Slurm job RUNNING")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_slurm_client_with_stub_commands() {
        let dir = tempdir().unwrap();
        let counter = dir.path().join("count");

        let submit = write_stub(
            dir.path(),
            "sbatch",
            "pwd > submit_dir\necho \"Submitted batch job 77\"",
        );
        let status = write_stub(
            dir.path(),
            "squeue",
            &format!(
                "n=$(cat {c} 2>/dev/null || echo 0); n=$((n+1)); echo $n > {c}\n\
                 if [ $n -lt 3 ]; then echo \"Slurm job RUNNING (0:0$n of 20:00)\"; fi",
                c = counter.display()
            ),
        );
        let accounting = write_stub(dir.path(), "sacct", "echo COMPLETED");
        let client: Arc<dyn SchedulerClient> =
            Arc::new(SlurmClient::new(submit, status, accounting));

        let script = dir.path().join("preSGT.slurm");
        fs::write(&script, "#!/bin/bash\n").unwrap();
        let job_id = client.submit(&script, dir.path()).await.unwrap();
        assert_eq!(job_id, "77");
        assert!(dir.path().join("submit_dir").exists());

        let interval = Duration::from_millis(5);
        let watch = JobWatch::spawn(Arc::clone(&client), job_id.clone(), interval);
        let queries = watch
            .wait(Duration::from_millis(5), |_, _| {})
            .await
            .unwrap();
        assert_eq!(queries, 3);
        assert_eq!(client.final_state(&job_id).await.unwrap(), JobState::Completed);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_status_query_ends_watch_with_error() {
        let dir = tempdir().unwrap();
        let status = write_stub(
            dir.path(),
            "squeue",
            "echo \"slurm_load_jobs error: Socket timed out\" >&2\nexit 1",
        );
        let client: Arc<dyn SchedulerClient> =
            Arc::new(SlurmClient::new("sbatch", status, "sacct"));

        match client.query_status("77").await {
            Err(FlowError::Scheduler { reason, .. }) => {
                assert_eq!(reason, "slurm_load_jobs error: Socket timed out")
            }
            other => panic!("unexpected status result: {other:?}"),
        }

        let interval = Duration::from_millis(5);
        let watch = JobWatch::spawn(Arc::clone(&client), "77".to_string(), interval);
        let err = watch
            .wait(Duration::from_millis(5), |_, _| {})
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::Scheduler { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_invalid_job_id_means_job_left_queue() {
        let dir = tempdir().unwrap();
        let status = write_stub(
            dir.path(),
            "squeue",
            "echo \"slurm_load_jobs error: Invalid job id specified\" >&2\nexit 1",
        );
        let client: Arc<dyn SchedulerClient> =
            Arc::new(SlurmClient::new("sbatch", status, "sacct"));

        assert_eq!(client.query_status("77").await.unwrap(), "");

        let interval = Duration::from_millis(5);
        let watch = JobWatch::spawn(Arc::clone(&client), "77".to_string(), interval);
        let queries = watch
            .wait(Duration::from_millis(5), |_, _| {})
            .await
            .unwrap();
        assert_eq!(queries, 1);
    }

    #[tokio::test]
    async fn test_fake_status_failure_for_matching_jobs() {
        let dir = tempdir().unwrap();
        let scheduler = FakeScheduler::new(2).failing_status_for("/A_1/");
        let failing = scheduler
            .submit(&dir.path().join("A_1/preSGT.slurm"), dir.path())
            .await
            .unwrap();
        let healthy = scheduler
            .submit(&dir.path().join("B_2/preSGT.slurm"), dir.path())
            .await
            .unwrap();

        assert!(matches!(
            scheduler.query_status(&failing).await,
            Err(FlowError::Scheduler { .. })
        ));
        assert!(scheduler.query_status(&healthy).await.unwrap().starts_with("Slurm job"));
    }

    #[tokio::test]
    async fn test_failed_submission_is_scheduler_error() {
        let dir = tempdir().unwrap();
        let client = SlurmClient::new("false", "squeue", "sacct");
        let err = client
            .submit(&dir.path().join("x.slurm"), dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::Scheduler { .. }));
    }
}
