//! Simulated aircraft and timeline
//!
//! One `SimAircraft` plays both collaborator roles of a real drone: direct
//! flight commands and the mission timeline. Time is real tokio time, so
//! tests can run it paused.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::collab::{Aircraft, Coordinates, MissionControl, TimelineEvent, WaypointMission};
use crate::error::{FlightError, ScheduleRejected};

use super::failure::{FailureInjector, SimOperation};
use super::geo::FlatEarth;

/// Flight characteristics of the simulated aircraft.
#[derive(Debug, Clone)]
pub struct SimProfile {
    /// Horizontal speed between waypoints
    pub speed_mps: f64,
    /// Vertical speed for take-off, landing and altitude changes
    pub climb_mps: f64,
    /// Capacity of the timeline event channel
    pub event_capacity: usize,
}

impl Default for SimProfile {
    fn default() -> Self {
        Self {
            speed_mps: 10.0,
            climb_mps: 2.0,
            event_capacity: 64,
        }
    }
}

#[derive(Debug, Default)]
struct FlightState {
    position: Option<Coordinates>,
    altitude: f64,
    in_air: bool,
    scheduled: Option<WaypointMission>,
    marker: usize,
    running: Option<JoinHandle<()>>,
    missions_flown: u32,
    stop_calls: u32,
}

struct Inner {
    profile: SimProfile,
    state: Mutex<FlightState>,
    failures: Mutex<FailureInjector>,
    events: broadcast::Sender<TimelineEvent>,
    /// Direct commands run one after another, like on the real autopilot.
    commands: tokio::sync::Mutex<()>,
}

/// In-process aircraft with a single timeline.
#[derive(Clone)]
pub struct SimAircraft {
    inner: Arc<Inner>,
}

impl SimAircraft {
    /// A grounded aircraft at `home`.
    pub fn new(home: Coordinates) -> Self {
        Self::with_profile(home, SimProfile::default())
    }

    pub fn with_profile(home: Coordinates, profile: SimProfile) -> Self {
        let (events, _) = broadcast::channel(profile.event_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                profile,
                state: Mutex::new(FlightState {
                    position: Some(home),
                    ..FlightState::default()
                }),
                failures: Mutex::new(FailureInjector::new()),
                events,
                commands: tokio::sync::Mutex::new(()),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, FlightState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Access the failure table.
    pub fn failures(&self) -> MutexGuard<'_, FailureInjector> {
        self.inner
            .failures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check(&self, op: SimOperation) -> Option<String> {
        self.failures().check(op)
    }

    /// Make the position unavailable (or available again).
    pub fn set_position(&self, position: Option<Coordinates>) {
        self.state().position = position;
    }

    pub fn altitude(&self) -> f64 {
        self.state().altitude
    }

    pub fn in_air(&self) -> bool {
        self.state().in_air
    }

    /// Missions that ran to completion.
    pub fn missions_flown(&self) -> u32 {
        self.state().missions_flown
    }

    /// How often `stop_timeline` was called.
    pub fn stop_calls(&self) -> u32 {
        self.state().stop_calls
    }

    fn emit(&self, event: TimelineEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }

    async fn vertical(&self, op: SimOperation, from: f64, to: f64) -> Result<(), FlightError> {
        if let Some(reason) = self.check(op) {
            return Err(FlightError(reason));
        }
        let extra = self.inner.failures.lock().ok().and_then(|f| f.delay_for(op));
        let secs = (to - from).abs() / self.inner.profile.climb_mps.max(0.1);
        let duration = Duration::try_from_secs_f64(secs).unwrap_or_default() + extra.unwrap_or_default();
        tokio::time::sleep(duration).await;
        Ok(())
    }

    /// Fly `mission`, publishing Finished at the end.
    async fn fly(self, mission: WaypointMission) {
        for waypoint in &mission.waypoints {
            let (from, from_alt) = {
                let state = self.state();
                (state.position, state.altitude)
            };
            let horizontal = from
                .map(|p| FlatEarth::distance_m(p, waypoint.coordinates))
                .unwrap_or(0.0);
            let secs = horizontal / self.inner.profile.speed_mps.max(0.1)
                + (waypoint.altitude - from_alt).abs() / self.inner.profile.climb_mps.max(0.1);
            tokio::time::sleep(Duration::try_from_secs_f64(secs).unwrap_or_default()).await;

            let mut state = self.state();
            state.position = Some(waypoint.coordinates);
            state.altitude = waypoint.altitude;
            state.marker += 1;
        }

        {
            let mut state = self.state();
            state.running = None;
            state.missions_flown += 1;
        }
        debug!(waypoints = mission.waypoints.len(), "sim mission finished");
        self.emit(TimelineEvent::Finished);
    }
}

#[async_trait]
impl Aircraft for SimAircraft {
    fn is_ready(&self) -> bool {
        self.check(SimOperation::Ready).is_none()
    }

    fn position(&self) -> Option<Coordinates> {
        self.state().position
    }

    async fn take_off(&self, altitude: f64) -> Result<(), FlightError> {
        let _command = self.inner.commands.lock().await;
        let from = self.altitude();
        self.vertical(SimOperation::TakeOff, from, altitude).await?;
        let mut state = self.state();
        state.altitude = altitude;
        state.in_air = true;
        Ok(())
    }

    async fn land(&self) -> Result<(), FlightError> {
        let _command = self.inner.commands.lock().await;
        let from = self.altitude();
        self.vertical(SimOperation::Land, from, 0.0).await?;
        let mut state = self.state();
        state.altitude = 0.0;
        state.in_air = false;
        Ok(())
    }
}

impl MissionControl for SimAircraft {
    fn is_timeline_busy(&self) -> bool {
        if self.check(SimOperation::TimelineBusy).is_some() {
            return true;
        }
        self.state().running.is_some()
    }

    fn schedule(&self, mission: &WaypointMission) -> Result<(), ScheduleRejected> {
        if let Some(reason) = self.check(SimOperation::Schedule) {
            return Err(ScheduleRejected::new(reason));
        }
        if !mission.is_well_formed() {
            return Err(ScheduleRejected::new("mission has invalid waypoints"));
        }
        self.state().scheduled = Some(mission.clone());
        Ok(())
    }

    fn stop_timeline(&self) {
        let stopped = {
            let mut state = self.state();
            state.stop_calls += 1;
            state.running.take()
        };
        if let Some(flight) = stopped {
            flight.abort();
            self.emit(TimelineEvent::Stopped);
        }
    }

    fn unschedule_all(&self) {
        let mut state = self.state();
        state.scheduled = None;
        state.marker = 0;
    }

    fn reset_marker(&self) {
        self.state().marker = 0;
    }

    fn start_timeline(&self) {
        let mut state = self.state();
        if state.running.is_some() {
            return;
        }
        let Some(mission) = state.scheduled.take() else {
            drop(state);
            self.emit(TimelineEvent::Error("nothing scheduled".to_string()));
            return;
        };
        state.running = Some(tokio::spawn(self.clone().fly(mission)));
        drop(state);
        self.emit(TimelineEvent::Started);
    }

    fn subscribe_events(&self) -> broadcast::Receiver<TimelineEvent> {
        self.inner.events.subscribe()
    }
}
