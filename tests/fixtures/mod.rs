//! Scripted collaborators for the integration tests.
//!
//! - `ScriptedMissionControl`: busy N times, reject N times, instant or held missions
//! - `RecordingAircraft`: records direct commands, optional latency and readiness script
//! - `RecordingFeed`: test-driven task lists and tables, records published claims
//! - `Rig`: a full single-drone stack over the above

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use drone_dispatch::error::{FlightError, ScheduleRejected};
use drone_dispatch::executor::ExecutorConfig;
use drone_dispatch::scheduler::SchedulerConfig;
use drone_dispatch::sim::FlatEarth;
use drone_dispatch::{
    Aircraft, ClaimAssertion, Coordinates, EventLog, MemoryLog, MissionControl, MissionScheduler,
    RetryPolicy, SampleMission, SharedTaskTable, StepExecutor, StepPlanner, Task, TaskCoordinator,
    TaskFeed, TaskTable, TimelineEvent, WaypointMission,
};

pub fn home() -> Coordinates {
    Coordinates::new(46.4983, 11.3548)
}

/// Let every runnable task make progress without moving far in virtual time.
pub async fn settle() {
    for _ in 0..5 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

/// Scheduler config with short fixed delays.
pub fn fast_scheduler_config() -> SchedulerConfig {
    SchedulerConfig {
        busy_retry: RetryPolicy::fixed(Duration::from_millis(100)).with_max_attempts(10),
        reject_retry: RetryPolicy::fixed(Duration::from_millis(100)).with_max_attempts(10),
        ..SchedulerConfig::default()
    }
}

#[derive(Debug, Default)]
struct TimelineScript {
    busy_remaining: u32,
    reject_remaining: u32,
    hold_missions: bool,
    running: bool,
    scheduled: Option<WaypointMission>,
    missions: Vec<WaypointMission>,
    busy_checks: u32,
    schedule_calls: u32,
    stop_calls: u32,
    unschedule_calls: u32,
    start_calls: u32,
}

/// Mission control that follows a script.
pub struct ScriptedMissionControl {
    script: Mutex<TimelineScript>,
    events: broadcast::Sender<TimelineEvent>,
}

impl Default for ScriptedMissionControl {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedMissionControl {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            script: Mutex::new(TimelineScript::default()),
            events,
        }
    }

    /// Report busy for the next `n` busy checks.
    pub fn busy_times(self, n: u32) -> Self {
        self.script.lock().unwrap().busy_remaining = n;
        self
    }

    /// Reject the next `n` schedule calls.
    pub fn reject_times(self, n: u32) -> Self {
        self.script.lock().unwrap().reject_remaining = n;
        self
    }

    /// Keep started missions running until `finish_mission`.
    pub fn hold_missions(self) -> Self {
        self.script.lock().unwrap().hold_missions = true;
        self
    }

    /// Pretend something else is running on the timeline.
    pub fn set_running(&self, running: bool) {
        self.script.lock().unwrap().running = running;
    }

    pub fn finish_mission(&self) {
        self.script.lock().unwrap().running = false;
        let _ = self.events.send(TimelineEvent::Finished);
    }

    pub fn missions(&self) -> Vec<WaypointMission> {
        self.script.lock().unwrap().missions.clone()
    }

    pub fn busy_checks(&self) -> u32 {
        self.script.lock().unwrap().busy_checks
    }

    pub fn schedule_calls(&self) -> u32 {
        self.script.lock().unwrap().schedule_calls
    }

    pub fn stop_calls(&self) -> u32 {
        self.script.lock().unwrap().stop_calls
    }

    pub fn unschedule_calls(&self) -> u32 {
        self.script.lock().unwrap().unschedule_calls
    }

    pub fn start_calls(&self) -> u32 {
        self.script.lock().unwrap().start_calls
    }
}

impl MissionControl for ScriptedMissionControl {
    fn is_timeline_busy(&self) -> bool {
        let mut script = self.script.lock().unwrap();
        script.busy_checks += 1;
        if script.busy_remaining > 0 {
            script.busy_remaining -= 1;
            return true;
        }
        script.running
    }

    fn schedule(&self, mission: &WaypointMission) -> Result<(), ScheduleRejected> {
        let mut script = self.script.lock().unwrap();
        script.schedule_calls += 1;
        if script.reject_remaining > 0 {
            script.reject_remaining -= 1;
            return Err(ScheduleRejected::new("rejected by script"));
        }
        script.scheduled = Some(mission.clone());
        Ok(())
    }

    fn stop_timeline(&self) {
        let was_running = {
            let mut script = self.script.lock().unwrap();
            script.stop_calls += 1;
            std::mem::replace(&mut script.running, false)
        };
        if was_running {
            let _ = self.events.send(TimelineEvent::Stopped);
        }
    }

    fn unschedule_all(&self) {
        let mut script = self.script.lock().unwrap();
        script.unschedule_calls += 1;
        script.scheduled = None;
    }

    fn reset_marker(&self) {}

    fn start_timeline(&self) {
        let hold = {
            let mut script = self.script.lock().unwrap();
            script.start_calls += 1;
            let Some(mission) = script.scheduled.take() else {
                return;
            };
            script.missions.push(mission);
            script.running = script.hold_missions;
            script.hold_missions
        };
        let _ = self.events.send(TimelineEvent::Started);
        if !hold {
            let _ = self.events.send(TimelineEvent::Finished);
        }
    }

    fn subscribe_events(&self) -> broadcast::Receiver<TimelineEvent> {
        self.events.subscribe()
    }
}

#[derive(Debug, Default)]
struct AircraftScript {
    position: Option<Coordinates>,
    not_ready_checks: u32,
    never_ready: bool,
    command_latency: Duration,
    commands: Vec<String>,
}

/// Aircraft that records every direct command.
pub struct RecordingAircraft {
    script: Mutex<AircraftScript>,
}

impl Default for RecordingAircraft {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingAircraft {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(AircraftScript {
                position: Some(home()),
                ..AircraftScript::default()
            }),
        }
    }

    pub fn without_position(self) -> Self {
        self.script.lock().unwrap().position = None;
        self
    }

    /// Report not ready for the next `n` readiness checks.
    pub fn not_ready_times(self, n: u32) -> Self {
        self.script.lock().unwrap().not_ready_checks = n;
        self
    }

    pub fn never_ready(self) -> Self {
        self.script.lock().unwrap().never_ready = true;
        self
    }

    /// Each take-off and landing takes `latency` to complete.
    pub fn with_latency(self, latency: Duration) -> Self {
        self.script.lock().unwrap().command_latency = latency;
        self
    }

    /// Commands in the order they were issued, e.g. `take_off 5`, `land`.
    pub fn commands(&self) -> Vec<String> {
        self.script.lock().unwrap().commands.clone()
    }

    fn record(&self, command: String) -> Duration {
        let mut script = self.script.lock().unwrap();
        script.commands.push(command);
        script.command_latency
    }
}

#[async_trait]
impl Aircraft for RecordingAircraft {
    fn is_ready(&self) -> bool {
        let mut script = self.script.lock().unwrap();
        if script.never_ready {
            return false;
        }
        if script.not_ready_checks > 0 {
            script.not_ready_checks -= 1;
            return false;
        }
        true
    }

    fn position(&self) -> Option<Coordinates> {
        self.script.lock().unwrap().position
    }

    async fn take_off(&self, altitude: f64) -> Result<(), FlightError> {
        let latency = self.record(format!("take_off {}", altitude));
        tokio::time::sleep(latency).await;
        Ok(())
    }

    async fn land(&self) -> Result<(), FlightError> {
        let latency = self.record("land".to_string());
        tokio::time::sleep(latency).await;
        Ok(())
    }
}

/// Feed driven by the test.
pub struct RecordingFeed {
    task_lists: broadcast::Sender<Vec<Task>>,
    tables: broadcast::Sender<TaskTable>,
    claims: Mutex<Vec<ClaimAssertion>>,
}

impl Default for RecordingFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingFeed {
    pub fn new() -> Self {
        let (task_lists, _) = broadcast::channel(16);
        let (tables, _) = broadcast::channel(16);
        Self {
            task_lists,
            tables,
            claims: Mutex::new(Vec::new()),
        }
    }

    pub fn push_tasks(&self, tasks: Vec<Task>) {
        let _ = self.task_lists.send(tasks);
    }

    pub fn push_table(&self, table: TaskTable) {
        let _ = self.tables.send(table);
    }

    pub fn claims(&self) -> Vec<ClaimAssertion> {
        self.claims.lock().unwrap().clone()
    }
}

impl TaskFeed for RecordingFeed {
    fn subscribe_task_lists(&self) -> broadcast::Receiver<Vec<Task>> {
        self.task_lists.subscribe()
    }

    fn subscribe_tables(&self) -> broadcast::Receiver<TaskTable> {
        self.tables.subscribe()
    }

    fn publish_claim(&self, assertion: ClaimAssertion) {
        self.claims.lock().unwrap().push(assertion);
    }
}

/// One drone's stack over scripted collaborators.
pub struct Rig {
    pub aircraft: Arc<RecordingAircraft>,
    pub mission_control: Arc<ScriptedMissionControl>,
    pub feed: Arc<RecordingFeed>,
    pub log: Arc<MemoryLog>,
    pub scheduler: Arc<MissionScheduler>,
    pub executor: Arc<StepExecutor>,
    pub coordinator: Arc<TaskCoordinator>,
}

pub struct RigBuilder {
    drone_id: String,
    aircraft: RecordingAircraft,
    mission_control: Option<ScriptedMissionControl>,
    scheduler: SchedulerConfig,
    executor: ExecutorConfig,
    planner: Arc<dyn StepPlanner>,
}

impl RigBuilder {
    pub fn new(drone_id: &str) -> Self {
        Self {
            drone_id: drone_id.to_string(),
            aircraft: RecordingAircraft::new(),
            mission_control: Some(ScriptedMissionControl::new()),
            scheduler: fast_scheduler_config(),
            executor: ExecutorConfig::default(),
            planner: Arc::new(SampleMission::default()),
        }
    }

    pub fn aircraft(mut self, aircraft: RecordingAircraft) -> Self {
        self.aircraft = aircraft;
        self
    }

    pub fn mission_control(mut self, mission_control: ScriptedMissionControl) -> Self {
        self.mission_control = Some(mission_control);
        self
    }

    pub fn scheduler_config(mut self, config: SchedulerConfig) -> Self {
        self.scheduler = config;
        self
    }

    pub fn executor_config(mut self, config: ExecutorConfig) -> Self {
        self.executor = config;
        self
    }

    pub fn planner(mut self, planner: impl StepPlanner + 'static) -> Self {
        self.planner = Arc::new(planner);
        self
    }

    pub fn build(self) -> Rig {
        let aircraft = Arc::new(self.aircraft);
        let mission_control = Arc::new(self.mission_control.unwrap_or_default());
        let feed = Arc::new(RecordingFeed::new());
        let log = Arc::new(MemoryLog::new());
        let event_log: Arc<dyn EventLog> = log.clone();

        let scheduler = Arc::new(MissionScheduler::new(
            aircraft.clone(),
            Some(mission_control.clone() as Arc<dyn MissionControl>),
            Arc::new(FlatEarth),
            event_log.clone(),
            self.scheduler,
        ));
        let executor = Arc::new(StepExecutor::new(
            scheduler.clone(),
            event_log.clone(),
            self.executor,
        ));
        let coordinator = Arc::new(TaskCoordinator::new(
            self.drone_id,
            Arc::new(SharedTaskTable::new()),
            feed.clone(),
            executor.clone(),
            self.planner,
            event_log,
        ));

        Rig {
            aircraft,
            mission_control,
            feed,
            log,
            scheduler,
            executor,
            coordinator,
        }
    }
}

/// Scheduler with no mission control at all.
pub fn scheduler_without_mission_control(log: Arc<MemoryLog>) -> MissionScheduler {
    MissionScheduler::new(
        Arc::new(RecordingAircraft::new()),
        None,
        Arc::new(FlatEarth),
        log,
        fast_scheduler_config(),
    )
}
