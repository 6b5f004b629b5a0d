//! Workflow Definition
//!
//! The fixed, linear sequence of CyberShake stages and the restart-skip
//! logic applied over it.
//!
//! # Stage Order
//!
//! ```text
//! preSGT -> preAWP -> AWPX -> AWPY -> checkX -> checkY
//!        -> postX -> postY -> rupVar -> runDS -> cleanUp
//! ```

use std::fmt;
use std::str::FromStr;

use log::debug;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::{FlowError, FlowResult};

/// Identifier of one pipeline stage.
///
/// The serialized token (see [`StageId::token`]) is what lands in the
/// checkpoint file and in generated script file names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageId {
    /// Source geometry preparation (site location, fault list, radius file)
    #[serde(rename = "preSGT")]
    PreSgt,
    /// Mesh input generation for the wave propagation solver
    #[serde(rename = "preAWP")]
    PreAwp,
    /// Strain Green tensor solve, X component
    #[serde(rename = "AWPX")]
    AwpX,
    /// Strain Green tensor solve, Y component
    #[serde(rename = "AWPY")]
    AwpY,
    #[serde(rename = "checkX")]
    CheckX,
    #[serde(rename = "checkY")]
    CheckY,
    #[serde(rename = "postX")]
    PostX,
    #[serde(rename = "postY")]
    PostY,
    /// Rupture variation population
    #[serde(rename = "rupVar")]
    RupVar,
    /// Seismogram synthesis (DirectSynth)
    #[serde(rename = "runDS")]
    RunDs,
    #[serde(rename = "cleanUp")]
    CleanUp,
}

impl StageId {
    /// Every stage kind, in pipeline order.
    pub const ALL: [StageId; 11] = [
        StageId::PreSgt,
        StageId::PreAwp,
        StageId::AwpX,
        StageId::AwpY,
        StageId::CheckX,
        StageId::CheckY,
        StageId::PostX,
        StageId::PostY,
        StageId::RupVar,
        StageId::RunDs,
        StageId::CleanUp,
    ];

    /// Token used in checkpoint files and script names.
    pub fn token(self) -> &'static str {
        match self {
            StageId::PreSgt => "preSGT",
            StageId::PreAwp => "preAWP",
            StageId::AwpX => "AWPX",
            StageId::AwpY => "AWPY",
            StageId::CheckX => "checkX",
            StageId::CheckY => "checkY",
            StageId::PostX => "postX",
            StageId::PostY => "postY",
            StageId::RupVar => "rupVar",
            StageId::RunDs => "runDS",
            StageId::CleanUp => "cleanUp",
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for StageId {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StageId::ALL
            .iter()
            .copied()
            .find(|stage| stage.token() == s)
            .ok_or_else(|| FlowError::UnknownCheckpoint(s.to_string()))
    }
}

/// The CyberShake pipeline shared by every site run in this process.
pub static CYBERSHAKE_WORKFLOW: Lazy<WorkflowDefinition> =
    Lazy::new(|| WorkflowDefinition::new(StageId::ALL.to_vec()));

/// An ordered, immutable sequence of stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowDefinition {
    stages: Vec<StageId>,
}

impl WorkflowDefinition {
    /// Creates a definition from an ordered stage list.
    pub fn new(stages: Vec<StageId>) -> Self {
        Self { stages }
    }

    /// Returns the stages in execution order.
    pub fn stages(&self) -> &[StageId] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Returns the terminal stage, if any.
    pub fn last_stage(&self) -> Option<StageId> {
        self.stages.last().copied()
    }

    /// Returns true when a checkpoint token marks the whole pipeline done.
    pub fn is_complete(&self, checkpoint: Option<&str>) -> bool {
        match (checkpoint, self.last_stage()) {
            (Some(token), Some(last)) => token == last.token(),
            _ => false,
        }
    }

    /// Resolves which stages still have to run given a checkpoint token.
    ///
    /// Stages up to and including the checkpointed one are skipped; every
    /// later stage is returned in order. A token that names no stage of
    /// this definition is rejected rather than silently skipping the rest
    /// of the pipeline.
    pub fn remaining_after(&self, checkpoint: Option<&str>) -> FlowResult<Vec<StageId>> {
        let Some(token) = checkpoint else {
            return Ok(self.stages.clone());
        };

        let position = self
            .stages
            .iter()
            .position(|stage| stage.token() == token)
            .ok_or_else(|| FlowError::UnknownCheckpoint(token.to_string()))?;

        for skipped in &self.stages[..=position] {
            debug!("Skipping completed stage '{}'", skipped);
        }

        Ok(self.stages[position + 1..].to_vec())
    }
}

impl<'a> IntoIterator for &'a WorkflowDefinition {
    type Item = &'a StageId;
    type IntoIter = std::slice::Iter<'a, StageId>;

    fn into_iter(self) -> Self::IntoIter {
        self.stages.iter()
    }
}
