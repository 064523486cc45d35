//! Mission scheduler
//!
//! Owns the shared timeline. Navigation steps become waypoint missions that
//! are scheduled one at a time:
//!
//! ```text
//! Idle → (busy? stop, unschedule, wait)* → Scheduled → Running
//!      → {Finished | Stopped | Paused ⇄ Running} → Idle
//! ```
//!
//! Take-off and landing bypass the timeline and go straight to the aircraft.
//! Each runs in its own task, so a caller that stops waiting does not
//! retract a command the aircraft is already carrying out.

use std::future::Future;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::collab::{
    Aircraft, Coordinates, Direction, DroneState, Geospatial, MissionControl, TimelineEvent,
    WaypointMission,
};
use crate::error::{DispatchError, FlightError, Result};
use crate::log::EventLog;
use crate::retry::RetryPolicy;

/// Scheduler tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Backoff while the timeline is occupied.
    pub busy_retry: RetryPolicy,
    /// Backoff after mission control rejects a mission.
    pub reject_retry: RetryPolicy,
    /// Altitude for the legs between origin and target.
    pub cruise_altitude_m: f64,
    /// Altitude over the target for relative (direction + distance) flights.
    pub survey_altitude_m: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            busy_retry: RetryPolicy::default(),
            reject_retry: RetryPolicy::default(),
            cruise_altitude_m: 15.0,
            survey_altitude_m: 6.0,
        }
    }
}

/// Serializes navigation commands onto the timeline.
pub struct MissionScheduler {
    aircraft: Arc<dyn Aircraft>,
    mission_control: Option<Arc<dyn MissionControl>>,
    geo: Arc<dyn Geospatial>,
    log: Arc<dyn EventLog>,
    config: SchedulerConfig,
    drone_state: Arc<Mutex<DroneState>>,
}

impl MissionScheduler {
    pub fn new(
        aircraft: Arc<dyn Aircraft>,
        mission_control: Option<Arc<dyn MissionControl>>,
        geo: Arc<dyn Geospatial>,
        log: Arc<dyn EventLog>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            aircraft,
            mission_control,
            geo,
            log,
            config,
            drone_state: Arc::new(Mutex::new(DroneState::OnGround)),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn drone_state(&self) -> DroneState {
        self.drone_state
            .lock()
            .map(|s| *s)
            .unwrap_or(DroneState::OnGround)
    }

    pub fn aircraft_ready(&self) -> bool {
        self.aircraft.is_ready()
    }

    /// Whether the timeline is running; `None` without mission control.
    pub fn mission_is_active(&self) -> Option<bool> {
        self.mission_control.as_ref().map(|mc| mc.is_timeline_busy())
    }

    /// Log timeline lifecycle events until the event stream closes.
    ///
    /// Returns `None` when there is no mission control to listen to.
    pub fn listen_for_events(&self) -> Option<JoinHandle<()>> {
        let mut events = self.mission_control.as_ref()?.subscribe_events();
        let log = Arc::clone(&self.log);
        Some(tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => log.add(&describe_event(&event)),
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "timeline event listener lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }))
    }

    /// Stop and unschedule the timeline if it is running.
    pub fn stop_mission_if_running(&self) {
        let Some(mc) = &self.mission_control else {
            self.log
                .add("Failed to stop mission: Mission Control is unavailable");
            return;
        };

        if mc.is_timeline_busy() {
            self.log
                .add("Stopping current mission and unscheduling everything...");
            halt(mc.as_ref());
        } else {
            self.log.add("No mission to stop");
        }
    }

    /// Take off directly through the aircraft.
    pub async fn take_off(&self, altitude: f64) -> Result<()> {
        let aircraft = Arc::clone(&self.aircraft);
        self.direct_command(DroneState::InAir, "Take off command sent", async move {
            aircraft.take_off(altitude).await
        })
        .await
    }

    /// Land directly through the aircraft.
    pub async fn land(&self) -> Result<()> {
        let aircraft = Arc::clone(&self.aircraft);
        self.direct_command(DroneState::OnGround, "Landing command sent", async move {
            aircraft.land().await
        })
        .await
    }

    /// Run `command` to completion in its own task and wait for it.
    ///
    /// Dropping the returned future only stops the wait; the command still
    /// finishes and still updates the drone state.
    async fn direct_command<F>(&self, after: DroneState, sent: &'static str, command: F) -> Result<()>
    where
        F: Future<Output = std::result::Result<(), FlightError>> + Send + 'static,
    {
        let drone_state = Arc::clone(&self.drone_state);
        let log = Arc::clone(&self.log);
        let command = tokio::spawn(async move {
            command.await?;
            log.add(sent);
            if let Ok(mut state) = drone_state.lock() {
                *state = after;
            }
            Ok::<(), FlightError>(())
        });

        match command.await {
            Ok(result) => result.map_err(DispatchError::from),
            Err(e) => Err(FlightError(format!("command task ended: {}", e)).into()),
        }
    }

    /// Fly `meters` in `direction` from the current position and back.
    pub async fn fly_direction(&self, direction: Direction, meters: f64) -> Result<()> {
        let origin = self.current_position()?;
        let (north, east) = direction.offset(meters);
        let target = self.geo.offset(origin, north, east);
        self.fly_between(origin, target, self.config.survey_altitude_m)
            .await
    }

    /// Fly to `coordinates`, descend to `altitude`, and return.
    pub async fn fly_to(&self, coordinates: Coordinates, altitude: f64) -> Result<()> {
        let origin = self.current_position()?;
        self.fly_between(origin, coordinates, altitude).await
    }

    fn current_position(&self) -> Result<Coordinates> {
        self.aircraft.position().ok_or_else(|| {
            self.log.add("Cannot retrieve current location");
            DispatchError::NoPosition
        })
    }

    async fn fly_between(&self, origin: Coordinates, target: Coordinates, altitude: f64) -> Result<()> {
        for point in [origin, target] {
            if !self.geo.is_valid(point) {
                self.log.add("Invalid coordinates");
                self.log.add("Mission is nil. Abort.");
                return Err(DispatchError::InvalidCoordinates(point));
            }
        }

        let mission =
            WaypointMission::out_and_back(origin, target, self.config.cruise_altitude_m, altitude);
        self.clear_schedule_and_execute(mission).await
    }

    /// Put `mission` on the timeline and wait for it to end.
    ///
    /// A busy timeline is stopped and cleared, then the call waits and
    /// retries; a rejected mission is retried after a wait. Both are bounded
    /// by their retry policies.
    pub async fn clear_schedule_and_execute(&self, mission: WaypointMission) -> Result<()> {
        let Some(mc) = &self.mission_control else {
            self.log
                .add("Failed to schedule: Mission Control is unavailable");
            return Err(DispatchError::MissionControlUnavailable);
        };

        let mut busy_retries = 0u32;
        let mut rejections = 0u32;
        loop {
            if mc.is_timeline_busy() {
                if !self.config.busy_retry.allows(busy_retries) {
                    self.log.add(&format!(
                        "Failed to schedule: timeline still busy after {} retries",
                        busy_retries
                    ));
                    return Err(DispatchError::TimelineBusy {
                        retries: busy_retries,
                    });
                }
                self.log
                    .add("Stopping current mission and unscheduling everything...");
                halt(mc.as_ref());
                let delay = self.config.busy_retry.delay_for(busy_retries);
                debug!(retry = busy_retries + 1, delay_ms = delay.as_millis() as u64, "timeline busy");
                busy_retries += 1;
                tokio::time::sleep(delay).await;
                continue;
            }

            match mc.schedule(&mission) {
                Ok(()) => break,
                Err(rejected) => {
                    self.log
                        .add(&format!("Failed to schedule: {}", rejected));
                    if !self.config.reject_retry.allows(rejections) {
                        return Err(DispatchError::ScheduleRejected {
                            retries: rejections,
                            reason: rejected.reason,
                        });
                    }
                    let delay = self.config.reject_retry.delay_for(rejections);
                    warn!(retry = rejections + 1, reason = %rejected, "mission rejected");
                    rejections += 1;
                    tokio::time::sleep(delay).await;
                }
            }
        }

        // Subscribe before starting so the mission's own events are not missed.
        let mut events = mc.subscribe_events();
        self.log.add("Starting timeline");
        mc.reset_marker();
        mc.start_timeline();

        loop {
            match events.recv().await {
                Ok(TimelineEvent::Finished) => return Ok(()),
                Ok(TimelineEvent::Stopped) => {
                    debug!("mission stopped before finishing");
                    return Ok(());
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "mission completion wait lagged");
                    if !mc.is_timeline_busy() {
                        return Ok(());
                    }
                }
                Err(RecvError::Closed) => return Err(DispatchError::TimelineClosed),
            }
        }
    }
}

fn halt(mc: &dyn MissionControl) {
    mc.stop_timeline();
    mc.unschedule_all();
}

fn describe_event(event: &TimelineEvent) -> String {
    match event {
        TimelineEvent::Started => "Mission Scheduler started mission".to_string(),
        TimelineEvent::Stopped => "Mission Scheduler is ready".to_string(),
        TimelineEvent::Paused => "Mission Scheduler paused mission".to_string(),
        TimelineEvent::Resumed => "Mission Scheduler resumed mission".to_string(),
        TimelineEvent::Finished => "Mission Scheduler finished mission".to_string(),
        TimelineEvent::Error(message) => format!("Mission Control reported error: {}", message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_descriptions() {
        assert_eq!(
            describe_event(&TimelineEvent::Started),
            "Mission Scheduler started mission"
        );
        assert_eq!(
            describe_event(&TimelineEvent::Error("gps lost".to_string())),
            "Mission Control reported error: gps lost"
        );
    }

    #[test]
    fn test_default_altitudes() {
        let config = SchedulerConfig::default();
        assert_eq!(config.cruise_altitude_m, 15.0);
        assert_eq!(config.survey_altitude_m, 6.0);
        assert_eq!(config.busy_retry.max_attempts, Some(10));
    }
}
