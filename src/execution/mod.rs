//! Workflow Execution Module
//!
//! Runs site pipelines: launching stage scripts locally or through the
//! batch scheduler, driving one pipeline through its stages, and bounding
//! how many pipelines are in flight.
//!
//! # Architecture
//!
//! - [`dispatcher`]: Batch preparation and the bounded worker pool
//! - [`engine`]: Stage sequencing and checkpoint resume for one site
//! - [`executor`]: Local vs scheduled launch of a single script
//! - [`local`]: Direct `bash` execution
//! - [`scheduler`]: Slurm submission, queue polling, and accounting

pub mod dispatcher;
pub mod engine;
pub mod executor;
pub mod local;
pub mod scheduler;

pub use dispatcher::{BatchReport, Dispatcher, RunOutcome, RunStatus, SiteRun};
pub use engine::PipelineRunner;
pub use executor::{JobExecutor, JobOutcome, JobRequest};
pub use scheduler::{JobState, SchedulerClient, SlurmClient};
