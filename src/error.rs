//! Error Types
//!
//! A single error enum covers every failure category the engine can hit.
//! Each category maps to a distinct process exit code so callers (and
//! batch scripts wrapping the CLI) can tell configuration problems apart
//! from pipeline failures.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::workflow::StageId;

/// Convenience alias used throughout the crate.
pub type FlowResult<T> = Result<T, FlowError>;

/// Errors produced by the workflow engine.
#[derive(Debug, Error)]
pub enum FlowError {
    /// Missing or invalid configuration; fatal before any dispatch.
    #[error("configuration error: {0}")]
    Config(String),

    /// A work unit or external identifier could not be resolved.
    #[error("lookup error: {0}")]
    Lookup(String),

    /// Stage script construction failed.
    #[error("failed to build stage '{stage}': {reason}")]
    StageBuild { stage: StageId, reason: String },

    /// Stage execution failed; fatal to the owning pipeline run.
    #[error("stage '{stage}' failed: {source}")]
    StageExecution {
        stage: StageId,
        #[source]
        source: Box<FlowError>,
    },

    /// A locally executed script exited with a non-zero status.
    #[error("script '{}' exited with {}: {stderr}", script.display(), exit_label(*code))]
    LocalExecution {
        script: PathBuf,
        code: Option<i32>,
        stderr: String,
    },

    /// A scheduler command (submission, status, accounting) failed.
    #[error("scheduler command '{command}' failed: {reason}")]
    Scheduler { command: String, reason: String },

    /// The scheduler reports the job ended in a non-successful state.
    #[error("scheduler job {job_id} finished in state {state}")]
    JobFailed { job_id: String, state: String },

    /// The checkpoint names a stage that is not part of the workflow.
    #[error("unrecognized checkpoint token '{0}' (not a stage of this workflow)")]
    UnknownCheckpoint(String),

    /// Run registry failure.
    #[error("registry error: {0}")]
    Registry(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

fn exit_label(code: Option<i32>) -> String {
    match code {
        Some(c) => format!("exit code {}", c),
        None => "a signal".to_string(),
    }
}

impl FlowError {
    /// Wraps an execution failure with the stage it belongs to.
    pub fn in_stage(self, stage: StageId) -> Self {
        match self {
            already @ FlowError::StageExecution { .. } => already,
            other => FlowError::StageExecution {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// Stage the failure is attributed to, if any.
    pub fn stage(&self) -> Option<StageId> {
        match self {
            FlowError::StageBuild { stage, .. } | FlowError::StageExecution { stage, .. } => {
                Some(*stage)
            }
            _ => None,
        }
    }

    /// Process exit code for this error category.
    pub fn exit_code(&self) -> u8 {
        match self {
            FlowError::Config(_) => 2,
            FlowError::Lookup(_) => 3,
            FlowError::Registry(_) => 4,
            FlowError::StageBuild { .. }
            | FlowError::StageExecution { .. }
            | FlowError::LocalExecution { .. }
            | FlowError::Scheduler { .. }
            | FlowError::JobFailed { .. }
            | FlowError::UnknownCheckpoint(_) => 5,
            FlowError::Io(_) => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_stage_wraps_once() {
        let err = FlowError::Scheduler {
            command: "sbatch x".into(),
            reason: "boom".into(),
        }
        .in_stage(StageId::PreSgt)
        .in_stage(StageId::PreAwp);

        match err {
            FlowError::StageExecution { stage, source } => {
                assert_eq!(stage, StageId::PreSgt);
                assert!(matches!(*source, FlowError::Scheduler { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_exit_codes_per_category() {
        assert_eq!(FlowError::Config("x".into()).exit_code(), 2);
        assert_eq!(FlowError::Lookup("x".into()).exit_code(), 3);
        assert_eq!(FlowError::UnknownCheckpoint("x".into()).exit_code(), 5);
        assert_eq!(
            FlowError::Io(io::Error::new(io::ErrorKind::Other, "x")).exit_code(),
            1
        );
    }

    #[test]
    fn test_local_execution_message() {
        let err = FlowError::LocalExecution {
            script: PathBuf::from("/tmp/rupVar.sh"),
            code: Some(3),
            stderr: "missing file".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("rupVar.sh"));
        assert!(msg.contains("exit code 3"));
        assert!(msg.contains("missing file"));
    }

    #[test]
    fn test_stage_attribution() {
        let err = FlowError::Lookup("x".into()).in_stage(StageId::RunDs);
        assert_eq!(err.stage(), Some(StageId::RunDs));
        assert_eq!(err.exit_code(), 5);
        assert_eq!(FlowError::Config("x".into()).stage(), None);
    }
}
