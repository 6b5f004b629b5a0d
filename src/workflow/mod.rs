//! Workflow Definition Module
//!
//! The fixed per-site stage sequence and the checkpoint that lets a
//! pipeline resume after the last stage it finished.
//!
//! # Structure
//!
//! - [`definition`]: Stage identifiers and the ordered workflow
//! - [`state`]: Single-token checkpoint file

pub mod definition;
pub mod state;

pub use definition::{StageId, WorkflowDefinition, CYBERSHAKE_WORKFLOW};
pub use state::{Checkpoint, DEFAULT_CHECKPOINT_FILE};
