//! Turning tasks into step sequences.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

use dispatch_protocol::Task;

use crate::step::Step;

/// Maps a task to the steps that carry it out.
pub trait StepPlanner: Send + Sync {
    fn plan(&self, task: &Task) -> Vec<Step>;
}

/// Built-in demonstration mission: take off, hover, land.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SampleMission {
    pub takeoff_altitude_m: f64,
    pub hover_seconds: f64,
}

impl Default for SampleMission {
    fn default() -> Self {
        Self {
            takeoff_altitude_m: 5.0,
            hover_seconds: 8.0,
        }
    }
}

impl SampleMission {
    pub fn steps(&self) -> Vec<Step> {
        let hover = Duration::try_from_secs_f64(self.hover_seconds).unwrap_or_default();
        vec![
            Step::take_off(self.takeoff_altitude_m),
            Step::idle(hover),
            Step::land(),
        ]
    }
}

impl StepPlanner for SampleMission {
    fn plan(&self, _task: &Task) -> Vec<Step> {
        self.steps()
    }
}

/// Reads `{"steps": [...]}` from the task payload.
///
/// Tasks without a usable step list get the sample mission.
#[derive(Debug, Clone, Default)]
pub struct PayloadPlanner {
    fallback: SampleMission,
}

impl PayloadPlanner {
    pub fn new(fallback: SampleMission) -> Self {
        Self { fallback }
    }
}

impl StepPlanner for PayloadPlanner {
    fn plan(&self, task: &Task) -> Vec<Step> {
        let Some(raw) = task.payload.get("steps") else {
            return self.fallback.steps();
        };
        match serde_json::from_value::<Vec<Step>>(raw.clone()) {
            Ok(steps) if !steps.is_empty() => steps,
            Ok(_) => self.fallback.steps(),
            Err(e) => {
                warn!(task = %task.id, error = %e, "unusable step list, using sample mission");
                self.fallback.steps()
            }
        }
    }
}
