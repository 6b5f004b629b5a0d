//! Monitoring Module
//!
//! Progress output, stage timing, and orchestrator resource usage.
//!
//! # Components
//!
//! - [`ProgressReporter`]: Lane-tagged per-pipeline progress lines
//! - [`ExecutionTimeline`]: Stage start/end timing for the run report
//! - [`ResourceMonitor`]: CPU and memory usage of the orchestrator

pub mod progress;
pub mod resource;
pub mod timeline;

pub use progress::ProgressReporter;
pub use resource::{ResourceMonitor, ResourceSample};
pub use timeline::{EventType, ExecutionTimeline, TimelineEvent};
