//! Lane-tagged Progress Reporting
//!
//! Each concurrently running pipeline gets a numeric lane so interleaved
//! log lines from different sites can be told apart.

use std::time::Duration;

use log::{info, warn};

use crate::workflow::StageId;

/// Progress reporter of one site pipeline.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    site: String,
    run_id: i64,
    lane: usize,
}

impl ProgressReporter {
    pub fn new(site: impl Into<String>, run_id: i64, lane: usize) -> Self {
        Self {
            site: site.into(),
            run_id,
            lane,
        }
    }

    /// Prefix shared by every line of this pipeline.
    pub fn tag(&self) -> String {
        format!("[lane {:>2}] {}_{}", self.lane, self.site, self.run_id)
    }

    pub fn stage_started(&self, stage: StageId) {
        info!("{} {} started", self.tag(), stage);
    }

    /// Periodic status of a scheduled job.
    pub fn job_status(
        &self,
        stage: StageId,
        status: &str,
        elapsed: Duration,
        limit: Option<Duration>,
    ) {
        let status = if status.is_empty() { "submitted" } else { status };
        match limit {
            Some(limit) => info!(
                "{} {} STATUS: {} [{}s / {}s]",
                self.tag(),
                stage,
                status,
                elapsed.as_secs(),
                limit.as_secs()
            ),
            None => info!(
                "{} {} STATUS: {} [{}s]",
                self.tag(),
                stage,
                status,
                elapsed.as_secs()
            ),
        }
    }

    pub fn stage_completed(&self, stage: StageId, elapsed: Duration) {
        info!("{} {} completed! ({:.1?})", self.tag(), stage, elapsed);
    }

    pub fn stage_script_only(&self, stage: StageId, script: &str) {
        info!("{} [DRY RUN] {} -> {}", self.tag(), stage, script);
    }

    pub fn stage_failed(&self, stage: StageId, reason: &str) {
        warn!("{} {} failed: {}", self.tag(), stage, reason);
    }
}
