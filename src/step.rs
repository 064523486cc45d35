//! Steps and step sequences
//!
//! A step is one indivisible unit of a task's execution. Steps are a closed
//! set; each knows how to run itself against the [`MissionScheduler`] and
//! resolves when the underlying action has completed.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::collab::{Coordinates, Direction};
use crate::error::Result;
use crate::scheduler::MissionScheduler;

/// Where a fly-to step goes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlyTarget {
    /// Relative to the current position.
    Heading { direction: Direction, meters: f64 },
    /// An absolute position, descending to `altitude` over it.
    Point { coordinates: Coordinates, altitude: f64 },
}

/// One unit of work for the aircraft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Step {
    TakeOff {
        altitude: f64,
    },
    Idle {
        #[serde(rename = "seconds", with = "duration_secs")]
        duration: Duration,
    },
    Land,
    FlyTo {
        #[serde(flatten)]
        target: FlyTarget,
    },
}

impl Step {
    pub fn take_off(altitude: f64) -> Self {
        Step::TakeOff { altitude }
    }

    pub fn idle(duration: Duration) -> Self {
        Step::Idle { duration }
    }

    pub fn land() -> Self {
        Step::Land
    }

    pub fn fly_heading(direction: Direction, meters: f64) -> Self {
        Step::FlyTo {
            target: FlyTarget::Heading { direction, meters },
        }
    }

    pub fn fly_to(coordinates: Coordinates, altitude: f64) -> Self {
        Step::FlyTo {
            target: FlyTarget::Point {
                coordinates,
                altitude,
            },
        }
    }

    /// Run the step; resolves once its action has completed.
    pub async fn execute(&self, scheduler: &MissionScheduler) -> Result<()> {
        match self {
            Step::TakeOff { altitude } => scheduler.take_off(*altitude).await,
            Step::Idle { duration } => {
                tokio::time::sleep(*duration).await;
                Ok(())
            }
            Step::Land => scheduler.land().await,
            Step::FlyTo {
                target: FlyTarget::Heading { direction, meters },
            } => scheduler.fly_direction(*direction, *meters).await,
            Step::FlyTo {
                target: FlyTarget::Point {
                    coordinates,
                    altitude,
                },
            } => scheduler.fly_to(*coordinates, *altitude).await,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::TakeOff { altitude } => write!(f, "Taking off to {} m", altitude),
            Step::Idle { duration } => write!(f, "Idling for {:?}", duration),
            Step::Land => write!(f, "Landing"),
            Step::FlyTo {
                target: FlyTarget::Heading { direction, meters },
            } => write!(f, "Flying {} m {}", meters, direction),
            Step::FlyTo {
                target: FlyTarget::Point {
                    coordinates,
                    altitude,
                },
            } => write!(f, "Flying to {} at {} m", coordinates, altitude),
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone)]
struct SequencedStep {
    step: Step,
    done: bool,
}

/// Ordered, appendable list of steps with a forward-only cursor.
///
/// The cursor is `None` before the first step is dispatched and otherwise
/// points at the step most recently handed out. It never points past the
/// last step: when the sequence is exhausted the cursor stays on the final
/// index, so steps appended later are handed out exactly once, in order.
#[derive(Debug, Clone, Default)]
pub struct StepSequence {
    steps: Vec<SequencedStep>,
    cursor: Option<usize>,
}

impl StepSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, step: Step) {
        self.steps.push(SequencedStep { step, done: false });
    }

    pub fn extend(&mut self, steps: impl IntoIterator<Item = Step>) {
        for step in steps {
            self.push(step);
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    /// The step under the cursor.
    pub fn current(&self) -> Option<&Step> {
        self.cursor
            .and_then(|i| self.steps.get(i))
            .map(|entry| &entry.step)
    }

    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        self.steps.iter().map(|entry| &entry.step)
    }

    /// Move to the next step and hand it out, or `None` when exhausted.
    pub fn advance(&mut self) -> Option<(usize, Step)> {
        let next = self.cursor.map_or(0, |c| c + 1);
        let entry = self.steps.get(next)?;
        self.cursor = Some(next);
        Some((next, entry.step.clone()))
    }

    pub fn mark_done(&mut self, index: usize) {
        if let Some(entry) = self.steps.get_mut(index) {
            entry.done = true;
        }
    }

    pub fn is_done(&self, index: usize) -> bool {
        self.steps.get(index).is_some_and(|entry| entry.done)
    }

    /// Number of steps marked done.
    pub fn done_count(&self) -> usize {
        self.steps.iter().filter(|entry| entry.done).count()
    }

    /// Rewind the cursor and clear every done flag.
    pub fn reset(&mut self) {
        self.cursor = None;
        for entry in &mut self.steps {
            entry.done = false;
        }
    }

    /// Drop every step.
    pub fn clear(&mut self) {
        self.steps.clear();
        self.cursor = None;
    }
}
