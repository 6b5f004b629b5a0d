//! SeisFlow - CyberShake Workflow Engine
//!
//! Drives batches of CyberShake seismic hazard runs on a Slurm cluster.
//! Every site goes through the same fixed sequence of stages; each stage
//! is a generated shell script that either runs locally or is submitted to
//! the scheduler and polled until it leaves the queue. Progress is
//! checkpointed per run directory so an interrupted batch can be resumed.
//!
//! # Architecture
//!
//! - [`config`]: Run configuration loading and validation
//! - [`registry`]: SQLite run registry and CyberShake lookup tables
//! - [`inputs`]: Rupture descriptors and per-run tool configuration
//! - [`workflow`]: Stage identifiers, ordering, and checkpoints
//! - [`stages`]: Script builders for every stage kind
//! - [`execution`]: Job launch, pipeline sequencing, and the worker pool
//! - [`monitoring`]: Progress lines, timing, and resource usage
//!
//! # Example
//!
//! ```rust,no_run
//! use seisflow::config::load_config;
//! use seisflow::execution::Dispatcher;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = load_config("setup.json")?;
//!     let report = Dispatcher::new(config).run().await?;
//!     println!("{} runs completed", report.count("completed"));
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod execution;
pub mod inputs;
pub mod monitoring;
pub mod registry;
pub mod stages;
pub mod workflow;

// Re-export commonly used types
pub use config::{load_config, Config};
pub use error::{FlowError, FlowResult};
pub use execution::{BatchReport, Dispatcher, RunStatus};
pub use registry::Registry;
pub use workflow::{StageId, CYBERSHAKE_WORKFLOW};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "SeisFlow";
