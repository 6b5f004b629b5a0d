//! Orchestrator Resource Monitoring
//!
//! Samples CPU and memory of the orchestrating process while a batch of
//! site pipelines is in flight. The heavy lifting happens on the cluster;
//! this only shows how much the local side costs (script generation,
//! rupture descriptors, local stages).

use std::time::{Duration, Instant};

use log::warn;
use sysinfo::{get_current_pid, Pid, ProcessRefreshKind, System};

/// A single resource usage sample.
#[derive(Debug, Clone)]
pub struct ResourceSample {
    pub timestamp: Instant,
    /// CPU usage percentage (0-100+)
    pub cpu_usage: f32,
    pub memory_mb: u64,
}

/// Monitors resource usage of the current process.
pub struct ResourceMonitor {
    system: System,
    process_id: Option<Pid>,
    samples: Vec<ResourceSample>,
    warmup_done: bool,
    last_sample: Option<Instant>,
    min_interval: Duration,
}

impl ResourceMonitor {
    pub fn new() -> Self {
        let process_id = match get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                warn!("Resource monitoring disabled: {}", e);
                None
            }
        };

        Self {
            system: System::new(),
            process_id,
            samples: Vec::new(),
            warmup_done: false,
            last_sample: None,
            min_interval: Duration::from_millis(250),
        }
    }

    /// Sets the minimum interval between samples.
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    /// Takes a resource usage sample.
    ///
    /// The first call only primes CPU accounting; later calls are
    /// rate-limited by `min_interval`.
    pub fn sample(&mut self) {
        let Some(pid) = self.process_id else {
            return;
        };
        let now = Instant::now();
        let refresh_kind = ProcessRefreshKind::new().with_cpu().with_memory();

        if !self.warmup_done {
            self.system.refresh_processes_specifics(refresh_kind);
            self.warmup_done = true;
            self.last_sample = Some(now);
            return;
        }

        if let Some(last) = self.last_sample {
            if now.duration_since(last) < self.min_interval {
                return;
            }
        }

        self.system.refresh_processes_specifics(refresh_kind);
        self.last_sample = Some(now);

        if let Some(process) = self.system.process(pid) {
            self.samples.push(ResourceSample {
                timestamp: now,
                cpu_usage: process.cpu_usage(),
                memory_mb: process.memory() / (1024 * 1024),
            });
        }
    }

    /// Returns a human-readable summary of resource usage.
    pub fn summary(&self) -> String {
        if self.samples.is_empty() {
            return "No resource data collected".to_string();
        }

        let avg_cpu: f32 =
            self.samples.iter().map(|s| s.cpu_usage).sum::<f32>() / self.samples.len() as f32;

        format!(
            "Orchestrator usage: avg CPU {:.1}%, peak memory {} MB ({} samples)",
            avg_cpu,
            self.peak_memory_mb(),
            self.samples.len()
        )
    }

    pub fn samples(&self) -> &[ResourceSample] {
        &self.samples
    }

    /// Returns the peak memory usage in MB.
    pub fn peak_memory_mb(&self) -> u64 {
        self.samples.iter().map(|s| s.memory_mb).max().unwrap_or(0)
    }
}

impl Default for ResourceMonitor {
    fn default() -> Self {
        Self::new()
    }
}
