//! Batch Dispatcher
//!
//! Allocates a run id and working directory per site, then runs the site
//! pipelines on a bounded pool. Each pipeline owns its directory,
//! checkpoint, and registry connection; a failing site never stops its
//! siblings.
//!
//! # Run Identifiers
//!
//! - Fresh batches start at `max(Run_ID) + 1` in the registry and hand out
//!   consecutive ids in site order.
//! - Restarted batches start at the smallest numeric suffix among the
//!   existing `<site>_<id>` directories under the output path.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::task::{self, JoinError};

use crate::config::Config;
use crate::error::{FlowError, FlowResult};
use crate::inputs::{write_site_cfg, RuptureGenerator};
use crate::monitoring::{ExecutionTimeline, ProgressReporter, ResourceMonitor};
use crate::registry::{NewRun, Registry};
use crate::stages::{default_factory, StageContext, StageFactory};
use crate::workflow::{Checkpoint, StageId, WorkflowDefinition, CYBERSHAKE_WORKFLOW};

use super::engine::PipelineRunner;
use super::executor::JobExecutor;

/// Exit code of a batch in which any pipeline failed.
pub const PIPELINE_FAILURE_EXIT_CODE: u8 = 5;

/// Interval for resource monitoring samples.
const MONITOR_SAMPLE_INTERVAL: Duration = Duration::from_millis(500);

/// One site pipeline of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteRun {
    pub site: String,
    pub run_id: i64,
    pub working_dir: PathBuf,
    pub lane: usize,
}

impl SiteRun {
    /// Directory name, `<site>_<run id>`.
    pub fn name(&self) -> String {
        format!("{}_{}", self.site, self.run_id)
    }
}

/// Lifecycle state of a site pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    NotStarted,
    InProgress,
    Completed,
    /// The checkpoint already named the last stage
    AlreadyDone,
    /// The site could not be resolved; nothing was attempted
    Skipped { reason: String },
    Failed { stage: Option<StageId>, error: String },
}

impl RunStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, RunStatus::Failed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            RunStatus::NotStarted => "not started",
            RunStatus::InProgress => "in progress",
            RunStatus::Completed => "completed",
            RunStatus::AlreadyDone => "already done",
            RunStatus::Skipped { .. } => "skipped",
            RunStatus::Failed { .. } => "failed",
        }
    }
}

/// Result of one site pipeline.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run: SiteRun,
    pub status: RunStatus,
    /// Stages processed by this invocation
    pub stages: Vec<StageId>,
    pub timeline: ExecutionTimeline,
    pub elapsed: Duration,
}

impl RunOutcome {
    fn new(run: SiteRun) -> Self {
        Self {
            run,
            status: RunStatus::NotStarted,
            stages: Vec::new(),
            timeline: ExecutionTimeline::new(),
            elapsed: Duration::ZERO,
        }
    }

    fn transition(&mut self, status: RunStatus) {
        debug!(
            "{}: {} -> {}",
            self.run.name(),
            self.status.label(),
            status.label()
        );
        self.status = status;
    }
}

/// Outcome of a whole batch, in site order.
#[derive(Debug)]
pub struct BatchReport {
    pub outcomes: Vec<RunOutcome>,
    pub elapsed: Duration,
    pub resource_summary: String,
}

impl BatchReport {
    pub fn count(&self, label: &str) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status.label() == label)
            .count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &RunOutcome> {
        self.outcomes.iter().filter(|o| o.status.is_failure())
    }

    /// Process exit code: 0 unless at least one pipeline failed.
    pub fn exit_code(&self) -> u8 {
        if self.failures().next().is_some() {
            PIPELINE_FAILURE_EXIT_CODE
        } else {
            0
        }
    }
}

/// Lookups resolved once per batch.
#[derive(Debug, Clone, Copy)]
struct BatchIds {
    erf_id: i64,
    model_id: i64,
}

struct Shared {
    config: Arc<Config>,
    executor: JobExecutor,
    factory: StageFactory,
    definition: &'static WorkflowDefinition,
    dry_run: bool,
    ids: BatchIds,
}

enum SitePhase {
    Completed(Vec<StageId>),
    AlreadyDone,
    Skipped(String),
}

/// Runs a batch of site pipelines.
pub struct Dispatcher {
    config: Arc<Config>,
    executor: JobExecutor,
    factory: StageFactory,
    definition: &'static WorkflowDefinition,
    dry_run: bool,
}

impl Dispatcher {
    /// Dispatcher running the CyberShake workflow through the scheduler
    /// configured in `config`.
    pub fn new(config: Config) -> Self {
        let executor = JobExecutor::from_config(&config.scheduler);
        Self {
            config: Arc::new(config),
            executor,
            factory: default_factory(),
            definition: &CYBERSHAKE_WORKFLOW,
            dry_run: false,
        }
    }

    pub fn with_executor(mut self, executor: JobExecutor) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_stage_factory(mut self, factory: StageFactory) -> Self {
        self.factory = factory;
        self
    }

    pub fn set_dry_run(&mut self, dry_run: bool) {
        self.dry_run = dry_run;
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Assigns run ids, directories, and lanes to the configured sites.
    pub fn plan(&self, registry: &Registry) -> FlowResult<Vec<SiteRun>> {
        plan_runs(&self.config, registry)
    }

    /// Prepares the batch and runs every site pipeline.
    ///
    /// Fails only for batch-wide problems (registry unreachable, forecast
    /// or velocity model unknown); per-site failures land in the report.
    pub async fn run(&self) -> FlowResult<BatchReport> {
        let start_time = Instant::now();
        let config = &self.config;

        let (ids, runs) = {
            let config = Arc::clone(config);
            task::spawn_blocking(move || prepare_batch(&config))
                .await
                .map_err(|e| aborted("batch preparation", e))??
        };

        let workers = config.compute.workers.max(1);
        info!(
            "Dispatching {} site(s) (workers: {}, restart: {}, dry run: {})",
            runs.len(),
            workers,
            config.compute.restart,
            self.dry_run
        );

        let shared = Arc::new(Shared {
            config: Arc::clone(&self.config),
            executor: self.executor.clone(),
            factory: Arc::clone(&self.factory),
            definition: self.definition,
            dry_run: self.dry_run,
            ids,
        });

        // Start resource monitoring
        let monitor_running = Arc::new(AtomicBool::new(true));
        let monitor_flag = Arc::clone(&monitor_running);
        let monitor_handle = thread::spawn(move || {
            let mut monitor = ResourceMonitor::new();
            while monitor_flag.load(Ordering::Relaxed) {
                monitor.sample();
                thread::sleep(MONITOR_SAMPLE_INTERVAL);
            }
            monitor
        });

        let (tx, mut rx) = mpsc::unbounded_channel::<(usize, RunOutcome)>();
        let mut slots: Vec<Option<RunOutcome>> = runs.iter().map(|_| None).collect();
        let mut pending = runs.into_iter().enumerate();
        let mut running_count = 0;

        loop {
            while running_count < workers {
                let Some((idx, run)) = pending.next() else {
                    break;
                };

                info!("Starting {} (lane {})", run.name(), run.lane);
                let tx = tx.clone();
                let shared = Arc::clone(&shared);

                tokio::spawn(async move {
                    let fallback = run.clone();
                    let outcome = match tokio::spawn(run_site(shared, run)).await {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            let mut outcome = RunOutcome::new(fallback);
                            outcome.transition(RunStatus::Failed {
                                stage: None,
                                error: format!("pipeline task aborted: {}", e),
                            });
                            outcome
                        }
                    };
                    if tx.send((idx, outcome)).is_err() {
                        error!("Failed to send completion signal");
                    }
                });

                running_count += 1;
            }

            if running_count == 0 {
                break;
            }

            let Some((idx, outcome)) = rx.recv().await else {
                break;
            };
            running_count -= 1;

            match &outcome.status {
                RunStatus::Failed { error: e, .. } => {
                    error!("{} failed: {}", outcome.run.name(), e)
                }
                status => info!("{} {}", outcome.run.name(), status.label()),
            }
            slots[idx] = Some(outcome);
        }

        // Stop monitoring
        monitor_running.store(false, Ordering::Relaxed);
        let resource_summary = match task::spawn_blocking(move || monitor_handle.join()).await {
            Ok(Ok(monitor)) => monitor.summary(),
            _ => "Monitor thread panicked".to_string(),
        };

        Ok(BatchReport {
            outcomes: slots.into_iter().flatten().collect(),
            elapsed: start_time.elapsed(),
            resource_summary,
        })
    }
}

/// Progress lane of a run: odd slots, alternating between the first two.
pub fn lane_for(run_id: i64, workers: usize) -> usize {
    let slots = 2 * workers.max(1) as i64;
    ((((run_id % 2) + 1) * 2 - 1) % slots) as usize
}

/// Opens the registry, imports CSV tables when asked, resolves the batch
/// identifiers, and plans the runs.
fn prepare_batch(config: &Config) -> FlowResult<(BatchIds, Vec<SiteRun>)> {
    fs::create_dir_all(&config.output.path)?;

    let registry = Registry::open(&config.input.database.path)?;
    if config.input.database.populate {
        if let Some(dir) = &config.input.database.import_from {
            let rows = registry.import_csv_dir(dir)?;
            info!("Imported {} registry rows from {}", rows, dir.display());
        }
    }
    let ids = resolve_ids(&registry, config)?;
    Ok((ids, plan_runs(config, &registry)?))
}

fn plan_runs(config: &Config, registry: &Registry) -> FlowResult<Vec<SiteRun>> {
    let base = &config.output.path;
    let workers = config.compute.workers.max(1);

    let first = if config.compute.restart {
        match restart_run_id(base)? {
            Some(id) => id,
            None => {
                warn!(
                    "Restart requested but no run directories under {}; starting fresh",
                    base.display()
                );
                registry.get_valid_run_id()?
            }
        }
    } else {
        registry.get_valid_run_id()?
    };

    Ok(config
        .input
        .sites
        .iter()
        .zip(first..)
        .map(|(site, run_id)| SiteRun {
            site: site.clone(),
            run_id,
            working_dir: base.join(format!("{}_{}", site, run_id)),
            lane: lane_for(run_id, workers),
        })
        .collect())
}

fn aborted(what: &str, e: JoinError) -> FlowError {
    FlowError::Io(io::Error::new(
        io::ErrorKind::Other,
        format!("{} aborted: {}", what, e),
    ))
}

/// Smallest numeric suffix among `<name>_<id>` directories in `base`.
pub fn restart_run_id(base: &Path) -> io::Result<Option<i64>> {
    let entries = match fs::read_dir(base) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    let mut min: Option<i64> = None;
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.ends_with(|c: char| c.is_ascii_digit()) {
            continue;
        }
        if let Some(Ok(id)) = name.rsplit('_').next().map(str::parse::<i64>) {
            min = Some(min.map_or(id, |m| m.min(id)));
        }
    }
    Ok(min)
}

fn resolve_ids(registry: &Registry, config: &Config) -> FlowResult<BatchIds> {
    let erf = &config.input.erf.name;
    let erf_id = registry.erf_id(erf)?.ok_or_else(|| {
        FlowError::Lookup(format!("rupture forecast '{}' not found in registry", erf))
    })?;

    let model = &config.input.model.name;
    let model_id = registry.model_id(model)?.ok_or_else(|| {
        FlowError::Lookup(format!("velocity model '{}' not found in registry", model))
    })?;

    debug!(
        "Resolved ERF '{}' -> {}, model '{}' -> {}",
        erf, erf_id, model, model_id
    );
    Ok(BatchIds { erf_id, model_id })
}

async fn run_site(shared: Arc<Shared>, run: SiteRun) -> RunOutcome {
    let started = Instant::now();
    let progress = ProgressReporter::new(&run.site, run.run_id, run.lane);
    let mut outcome = RunOutcome::new(run.clone());
    outcome.transition(RunStatus::InProgress);

    let mut timeline = ExecutionTimeline::new();
    let status = match execute_site(&shared, &run, &progress, &mut timeline).await {
        Ok(SitePhase::Completed(stages)) => {
            outcome.stages = stages;
            RunStatus::Completed
        }
        Ok(SitePhase::AlreadyDone) => RunStatus::AlreadyDone,
        Ok(SitePhase::Skipped(reason)) => RunStatus::Skipped { reason },
        Err(e) => RunStatus::Failed {
            stage: e.stage(),
            error: e.to_string(),
        },
    };

    outcome.transition(status);
    outcome.timeline = timeline;
    outcome.elapsed = started.elapsed();
    outcome
}

/// What a run needs once its directory and registry rows are in place.
struct PreparedSite {
    registry: Registry,
    checkpoint: Checkpoint,
    resume: Option<String>,
    rupture_root: PathBuf,
    /// Short name as stored in the registry
    site: String,
}

enum Preparation {
    Ready(PreparedSite),
    AlreadyDone,
    Skipped(String),
}

/// Directory setup, checkpoint load, run registration, and input
/// generation for one run. Runs on the blocking pool.
fn prepare_site(shared: &Shared, run: &SiteRun, tag: &str) -> FlowResult<Preparation> {
    let config = &shared.config;
    let dir = run.working_dir.as_path();
    let checkpoint = Checkpoint::new(dir, &config.compute.restart_file);

    let resume = if config.compute.restart && dir.is_dir() {
        checkpoint.load()?
    } else {
        fs::create_dir_all(dir)?;
        checkpoint.clear()?;
        None
    };

    if shared.definition.is_complete(resume.as_deref()) {
        info!("{} already completed, nothing to do", tag);
        return Ok(Preparation::AlreadyDone);
    }
    // Reject an unreadable checkpoint before touching the registry
    shared.definition.remaining_after(resume.as_deref())?;

    let registry = Registry::open(&config.input.database.path)?;
    let Some(site_id) = registry.site_id(&run.site)? else {
        warn!("{} site not found in registry, skipping", tag);
        return Ok(Preparation::Skipped(format!(
            "site '{}' not found in registry",
            run.site
        )));
    };

    let erf_id = shared.ids.erf_id;
    if !shared.dry_run {
        let inserted = registry.add_run_info(&NewRun {
            run_id: run.run_id,
            site_id,
            erf_id,
            model_id: shared.ids.model_id,
            source_frequency: config.compute.setup.source_frequency,
            frequency: config.compute.setup.frequency,
        })?;
        if !inserted {
            debug!("{} run already registered", tag);
        }
    }

    let rupture_root = match &config.input.erf.ruptures {
        Some(root) => root.clone(),
        None => {
            let root = dir.join("ruptures");
            RuptureGenerator::new(root.join(format!("Ruptures_erf{}", erf_id)))
                .with_focal_mechanism(config.compute.setup.focal_mechanism)
                .generate(&registry, erf_id, &run.site)?;
            root
        }
    };

    write_site_cfg(dir, &config.input.cybershake.path, &rupture_root)?;

    let site = registry
        .site_short_name(&run.site)?
        .unwrap_or_else(|| run.site.clone());

    Ok(Preparation::Ready(PreparedSite {
        registry,
        checkpoint,
        resume,
        rupture_root,
        site,
    }))
}

async fn execute_site(
    shared: &Arc<Shared>,
    run: &SiteRun,
    progress: &ProgressReporter,
    timeline: &mut ExecutionTimeline,
) -> FlowResult<SitePhase> {
    let preparation = {
        let shared = Arc::clone(shared);
        let run = run.clone();
        let tag = progress.tag();
        task::spawn_blocking(move || prepare_site(&shared, &run, &tag))
            .await
            .map_err(|e| aborted("site preparation", e))??
    };

    let prepared = match preparation {
        Preparation::Ready(prepared) => prepared,
        Preparation::AlreadyDone => return Ok(SitePhase::AlreadyDone),
        Preparation::Skipped(reason) => return Ok(SitePhase::Skipped(reason)),
    };

    let ctx = StageContext {
        config: &shared.config,
        registry: &prepared.registry,
        checkpoint: &prepared.checkpoint,
        run_id: run.run_id,
        site: &prepared.site,
        erf_id: shared.ids.erf_id,
        working_dir: &run.working_dir,
        rupture_root: &prepared.rupture_root,
    };

    let mut runner = PipelineRunner::new(shared.definition, &shared.factory, &shared.executor);
    runner.set_dry_run(shared.dry_run);
    let stages = runner
        .run(&ctx, prepared.resume.as_deref(), progress, timeline)
        .await?;

    Ok(SitePhase::Completed(stages))
}
