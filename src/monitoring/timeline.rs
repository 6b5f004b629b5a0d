//! Stage Timeline
//!
//! Tracks stage start/end times within one site pipeline for the
//! per-run report.

use std::time::{Duration, Instant};

use crate::workflow::StageId;

/// Type of timeline event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// Stage started building
    Started,
    /// Stage postprocess finished
    Completed,
    /// Stage failed in build, execute, or postprocess
    Failed,
}

/// A single event in the stage timeline.
#[derive(Debug, Clone)]
pub struct TimelineEvent {
    pub stage: StageId,
    pub event_type: EventType,
    pub timestamp: Instant,
}

/// Records when each stage of a pipeline starts and ends.
#[derive(Debug, Clone)]
pub struct ExecutionTimeline {
    events: Vec<TimelineEvent>,
}

impl ExecutionTimeline {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn add_event(&mut self, stage: StageId, event_type: EventType) {
        self.events.push(TimelineEvent {
            stage,
            event_type,
            timestamp: Instant::now(),
        });
    }

    /// Returns the duration of every finished stage, in start order.
    pub fn durations(&self) -> Vec<(StageId, Duration)> {
        let mut open: Vec<(StageId, Instant)> = Vec::new();
        let mut finished = Vec::new();

        for event in &self.events {
            match event.event_type {
                EventType::Started => open.push((event.stage, event.timestamp)),
                EventType::Completed | EventType::Failed => {
                    if let Some(idx) = open.iter().position(|(s, _)| *s == event.stage) {
                        let (stage, started) = open.remove(idx);
                        finished.push((stage, event.timestamp.duration_since(started)));
                    }
                }
            }
        }

        finished
    }

    /// Renders one line per finished stage with a bar scaled to the
    /// longest stage.
    pub fn render(&self) -> String {
        let durations = self.durations();
        let mut output = String::new();

        let Some(longest) = durations.iter().map(|(_, d)| d.as_millis()).max() else {
            return output;
        };

        for (stage, duration) in &durations {
            let width = if longest == 0 {
                1
            } else {
                ((duration.as_millis() as f64 / longest as f64) * 30.0).max(1.0) as usize
            };
            output.push_str(&format!(
                "  {:8} |{:30}| {:.1?}\n",
                stage.token(),
                "#".repeat(width),
                duration
            ));
        }

        output
    }
}

impl Default for ExecutionTimeline {
    fn default() -> Self {
        Self::new()
    }
}
