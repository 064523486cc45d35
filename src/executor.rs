//! Step executor
//!
//! Drives a [`StepSequence`] through the [`MissionScheduler`], one step at a
//! time. Each run is a spawned driver task tagged with a run number; stopping
//! bumps the run number and aborts the driver, which resets the logical
//! pointer without retracting whatever the aircraft is already doing.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{DispatchError, Result};
use crate::log::EventLog;
use crate::retry::RetryPolicy;
use crate::scheduler::MissionScheduler;
use crate::step::{Step, StepSequence};

/// Executor tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Wait between start attempts while the aircraft is not ready.
    pub ready_retry: RetryPolicy,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            ready_retry: RetryPolicy::fixed(std::time::Duration::from_secs(1)),
        }
    }
}

/// Phase of the executor's current run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// Nothing started yet.
    Idle,
    /// A driver is dispatching steps.
    Running,
    /// Every step was dispatched and completed.
    Completed,
    /// The run was stopped.
    Stopped,
}

/// Observable executor state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorProgress {
    /// Run number; bumped by every start and stop.
    pub run: u64,
    pub phase: RunPhase,
    pub cursor: Option<usize>,
    pub len: usize,
    pub done: usize,
}

/// How a run ended, from the perspective of whoever started it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    /// Stopped, or replaced by a newer run.
    Superseded,
}

/// Handle on a started run.
#[derive(Debug)]
pub struct RunTicket {
    run: u64,
    progress: watch::Receiver<ExecutorProgress>,
}

impl RunTicket {
    pub fn run(&self) -> u64 {
        self.run
    }

    /// Wait for the run to complete or be superseded.
    pub async fn finished(mut self) -> RunOutcome {
        loop {
            {
                let progress = self.progress.borrow_and_update();
                if progress.run != self.run || progress.phase == RunPhase::Stopped {
                    return RunOutcome::Superseded;
                }
                if progress.phase == RunPhase::Completed {
                    return RunOutcome::Completed;
                }
            }
            if self.progress.changed().await.is_err() {
                return RunOutcome::Superseded;
            }
        }
    }
}

#[derive(Debug)]
struct ExecutorState {
    sequence: StepSequence,
    run: u64,
    phase: RunPhase,
    driver: Option<JoinHandle<()>>,
}

/// Advances a step sequence, exactly one step at a time.
pub struct StepExecutor {
    scheduler: Arc<MissionScheduler>,
    log: Arc<dyn EventLog>,
    config: ExecutorConfig,
    state: Mutex<ExecutorState>,
    progress: watch::Sender<ExecutorProgress>,
}

impl StepExecutor {
    pub fn new(
        scheduler: Arc<MissionScheduler>,
        log: Arc<dyn EventLog>,
        config: ExecutorConfig,
    ) -> Self {
        let (progress, _) = watch::channel(ExecutorProgress {
            run: 0,
            phase: RunPhase::Idle,
            cursor: None,
            len: 0,
            done: 0,
        });
        Self {
            scheduler,
            log,
            config,
            state: Mutex::new(ExecutorState {
                sequence: StepSequence::new(),
                run: 0,
                phase: RunPhase::Idle,
                driver: None,
            }),
            progress,
        }
    }

    pub fn scheduler(&self) -> &Arc<MissionScheduler> {
        &self.scheduler
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, ExecutorState> {
        // A panic inside a critical section leaves the sequence consistent,
        // so a poisoned lock is still usable.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, state: &ExecutorState) {
        self.progress.send_replace(ExecutorProgress {
            run: state.run,
            phase: state.phase,
            cursor: state.sequence.cursor(),
            len: state.sequence.len(),
            done: state.sequence.done_count(),
        });
    }

    /// Current progress snapshot.
    pub fn progress(&self) -> ExecutorProgress {
        self.progress.borrow().clone()
    }

    /// Follow progress changes.
    pub fn subscribe(&self) -> watch::Receiver<ExecutorProgress> {
        self.progress.subscribe()
    }

    /// Steps currently in the sequence.
    pub fn steps(&self) -> Vec<Step> {
        self.lock().sequence.steps().cloned().collect()
    }

    /// Append a step. Legal at any time.
    pub fn add(self: &Arc<Self>, step: Step) {
        self.add_all([step]);
    }

    /// Append steps. Legal at any time.
    ///
    /// Appending to a run that already completed resumes it from the first
    /// new step.
    pub fn add_all(self: &Arc<Self>, steps: impl IntoIterator<Item = Step>) {
        let mut state = self.lock();
        state.sequence.extend(steps);
        if state.phase == RunPhase::Completed {
            debug!(run = state.run, "resuming completed run for appended steps");
            state.phase = RunPhase::Running;
            let run = state.run;
            state.driver = Some(self.spawn_driver(run));
        }
        self.publish(&state);
    }

    /// Start the sequence from its first step.
    ///
    /// Waits (per the ready retry policy) for the aircraft to become ready.
    /// Refuses to start while a mission is active on the timeline.
    pub async fn start_task(self: &Arc<Self>) -> Result<RunTicket> {
        self.log.add("Starting Task");

        let mut waits = 0u32;
        while !self.scheduler.aircraft_ready() {
            if !self.config.ready_retry.allows(waits) {
                self.log.add("Aircraft never became ready, giving up");
                return Err(DispatchError::AircraftNotReady);
            }
            self.log.add("Aircraft not ready, retrying start");
            let delay = self.config.ready_retry.delay_for(waits);
            waits += 1;
            tokio::time::sleep(delay).await;
        }

        if self.scheduler.mission_is_active() == Some(true) {
            self.log.add("A mission is already active, not starting task");
            return Err(DispatchError::MissionActive);
        }

        let mut state = self.lock();
        if let Some(driver) = state.driver.take() {
            driver.abort();
        }
        state.run += 1;
        self.log.add("Resetting Task Steps");
        state.sequence.reset();
        state.phase = RunPhase::Running;
        let run = state.run;
        state.driver = Some(self.spawn_driver(run));
        self.publish(&state);

        Ok(RunTicket {
            run,
            progress: self.progress.subscribe(),
        })
    }

    /// Abort the timeline and rewind the sequence.
    ///
    /// Whatever the aircraft is already doing keeps going; only the logical
    /// pointer is reset.
    pub fn stop_task(&self) {
        self.scheduler.stop_mission_if_running();

        let mut state = self.lock();
        if let Some(driver) = state.driver.take() {
            driver.abort();
        }
        state.run += 1;
        state.phase = RunPhase::Stopped;
        self.log.add("Resetting Task Steps");
        state.sequence.reset();
        self.publish(&state);
    }

    /// Stop, then discard every step.
    pub fn stop_and_clear_task(&self) {
        self.stop_task();
        let mut state = self.lock();
        state.sequence.clear();
        self.publish(&state);
    }

    fn spawn_driver(self: &Arc<Self>, run: u64) -> JoinHandle<()> {
        let executor = Arc::clone(self);
        tokio::spawn(async move {
            while executor.execute_next_step(run).await {}
        })
    }

    /// Dispatch the next step of `run` and wait for it to complete.
    ///
    /// Returns `false` once the sequence is exhausted or the run is stale.
    async fn execute_next_step(&self, run: u64) -> bool {
        let next = {
            let mut state = self.lock();
            if state.run != run {
                return false;
            }
            let next = state.sequence.advance();
            if next.is_none() {
                state.phase = RunPhase::Completed;
                state.driver = None;
            }
            self.publish(&state);
            next
        };

        let Some((index, step)) = next else {
            self.log.add("No step to execute");
            return false;
        };

        self.log.add(&step.to_string());
        if let Err(e) = step.execute(&self.scheduler).await {
            self.log
                .add(&format!("Step {} ({}) failed: {}", index, step, e));
        }

        let mut state = self.lock();
        if state.run != run {
            return false;
        }
        state.sequence.mark_done(index);
        self.publish(&state);
        true
    }
}
