//! Configuration Data Model
//!
//! Typed view of the run configuration document.
//!
//! # Example JSON Format
//!
//! ```json
//! {
//!   "output": { "path": "/scratch/runs" },
//!   "input": {
//!     "sites": ["USC", "PAS"],
//!     "region": "LA",
//!     "database": { "path": "/data/cs.db", "populate": false },
//!     "ERF": { "name": "Mean UCERF 2.0" },
//!     "model": {
//!       "name": "CVM-S4", "box": "model_box", "gridOut": "gridout",
//!       "coords": "model_coords", "path": "/data/awp.media"
//!     },
//!     "cyberShake": { "path": "/apps/cybershake", "gravesPitarka": "3" }
//!   },
//!   "compute": {
//!     "workers": 2,
//!     "restart": false,
//!     "resources": {
//!       "time": 7200, "nodes": 4, "task-per-node": 48,
//!       "cpus-per-task": 1, "qos": "debug"
//!     },
//!     "decomposition": { "x": 4, "y": 4, "z": 2 },
//!     "setup": {
//!       "spacing": 0.2, "frequency": 0.5, "sourceFrequency": 1.0,
//!       "focalMechanism": { "dip": 90.0, "strike": 0.0, "rake": 180.0 },
//!       "periods": [2, 3, 5, 10]
//!     }
//!   }
//! }
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::workflow::state::DEFAULT_CHECKPOINT_FILE;

/// Root configuration document.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    pub output: OutputConfig,
    pub input: InputConfig,
    pub compute: ComputeConfig,

    /// Batch scheduler commands and polling behaviour
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct OutputConfig {
    /// Base directory under which every `<site>_<runId>` directory is created
    pub path: PathBuf,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct InputConfig {
    /// Site names (full or short) to compute, in dispatch order
    pub sites: Vec<String>,

    /// Region tag used in rupture list file names
    pub region: String,

    pub database: DatabaseConfig,

    #[serde(rename = "ERF")]
    pub erf: ErfConfig,

    pub model: ModelConfig,

    #[serde(rename = "cyberShake")]
    pub cybershake: CyberShakeConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,

    /// Import CSV tables from `import_from` before dispatching
    #[serde(default)]
    pub populate: bool,

    #[serde(rename = "importFrom", default, skip_serializing_if = "Option::is_none")]
    pub import_from: Option<PathBuf>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ErfConfig {
    /// Earthquake rupture forecast name, matched as a substring
    pub name: String,

    /// Root holding pre-generated `Ruptures_erf<id>/` trees. When absent,
    /// every run generates its own descriptors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ruptures: Option<PathBuf>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ModelConfig {
    /// Velocity model name as registered in the database
    pub name: String,
    #[serde(rename = "box")]
    pub model_box: String,
    #[serde(rename = "gridOut")]
    pub grid_out: String,
    pub coords: String,
    /// Velocity mesh file
    pub path: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CyberShakeConfig {
    /// CyberShake installation root
    pub path: PathBuf,
    #[serde(rename = "gravesPitarka")]
    pub graves_pitarka: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ComputeConfig {
    /// Maximum number of site pipelines in flight
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Resume existing run directories from their checkpoints
    #[serde(default)]
    pub restart: bool,

    /// Checkpoint file name inside each run directory
    #[serde(rename = "restartFile", default = "default_restart_file")]
    pub restart_file: String,

    pub resources: Resources,
    pub decomposition: Decomposition,
    pub setup: Setup,
}

/// Scheduler resource directives shared by the stage builders.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Resources {
    /// Wall-time budget in seconds
    pub time: f64,
    pub nodes: u32,
    #[serde(rename = "task-per-node")]
    pub tasks_per_node: u32,
    #[serde(rename = "cpus-per-task")]
    pub cpus_per_task: u32,
    /// Queue (QoS) class
    pub qos: String,
}

/// Domain decomposition of the wave propagation mesh.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Decomposition {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl Decomposition {
    /// Total solver task count.
    pub fn tasks(&self) -> u32 {
        self.x * self.y * self.z
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Setup {
    pub spacing: f64,
    pub frequency: f64,
    #[serde(rename = "sourceFrequency")]
    pub source_frequency: f64,
    #[serde(rename = "focalMechanism", default)]
    pub focal_mechanism: FocalMechanism,
    #[serde(default)]
    pub periods: Vec<f64>,
}

/// Fault orientation written into generated rupture descriptors.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq)]
pub struct FocalMechanism {
    pub dip: f64,
    pub strike: f64,
    pub rake: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SchedulerConfig {
    #[serde(default = "default_submit")]
    pub submit: String,

    #[serde(default = "default_status")]
    pub status: String,

    #[serde(default = "default_accounting")]
    pub accounting: String,

    #[serde(rename = "pollIntervalMs", default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Check the accounting record of a job once it leaves the queue
    #[serde(rename = "verifyFinalState", default = "default_true")]
    pub verify_final_state: bool,
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            submit: default_submit(),
            status: default_status(),
            accounting: default_accounting(),
            poll_interval_ms: default_poll_interval_ms(),
            verify_final_state: true,
        }
    }
}

fn default_workers() -> usize {
    num_cpus::get()
}

fn default_restart_file() -> String {
    DEFAULT_CHECKPOINT_FILE.to_string()
}

fn default_submit() -> String {
    "sbatch".to_string()
}

fn default_status() -> String {
    "squeue".to_string()
}

fn default_accounting() -> String {
    "sacct".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}
