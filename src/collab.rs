//! Collaborator interfaces
//!
//! The flight driver, geospatial math and the pub/sub feed live outside this
//! crate. The dispatch core only sees them through these traits; `crate::sim`
//! provides in-process implementations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

use dispatch_protocol::{ClaimAssertion, Task, TaskTable};

use crate::error::{FlightError, ScheduleRejected};

/// WGS84 position in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Finite and within the latitude/longitude ranges.
    pub fn is_well_formed(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.6}, {:.6})", self.latitude, self.longitude)
    }
}

/// Compass direction for relative flights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    North,
    South,
    East,
    West,
}

impl Direction {
    /// Split `meters` into `(meters_north, meters_east)`.
    pub fn offset(self, meters: f64) -> (f64, f64) {
        match self {
            Direction::North => (meters, 0.0),
            Direction::South => (-meters, 0.0),
            Direction::East => (0.0, meters),
            Direction::West => (0.0, -meters),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Direction::North => "north",
            Direction::South => "south",
            Direction::East => "east",
            Direction::West => "west",
        };
        f.write_str(name)
    }
}

/// Coarse flight state tracked from take-off and landing completions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DroneState {
    OnGround,
    InAir,
}

/// One waypoint of a navigation mission.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub coordinates: Coordinates,
    /// Altitude above the take-off point, in meters.
    pub altitude: f64,
}

/// A navigation command for the timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaypointMission {
    pub waypoints: Vec<Waypoint>,
}

impl WaypointMission {
    /// The fixed out-and-back template: climb to cruise over the origin,
    /// cruise to the target, descend to `altitude`, climb back and return.
    pub fn out_and_back(origin: Coordinates, target: Coordinates, cruise: f64, altitude: f64) -> Self {
        let start = Waypoint {
            coordinates: origin,
            altitude: cruise,
        };
        let over_target = Waypoint {
            coordinates: target,
            altitude: cruise,
        };
        let low = Waypoint {
            coordinates: target,
            altitude,
        };
        Self {
            waypoints: vec![start, over_target, low, over_target, start],
        }
    }

    /// Whether every waypoint has well-formed coordinates.
    pub fn is_well_formed(&self) -> bool {
        !self.waypoints.is_empty() && self.waypoints.iter().all(|w| w.coordinates.is_well_formed())
    }
}

/// Timeline lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimelineEvent {
    Started,
    Stopped,
    Paused,
    Resumed,
    /// The scheduled mission ran to its end.
    Finished,
    /// The timeline reported an error without changing state.
    Error(String),
}

/// Direct flight commands and position.
#[async_trait]
pub trait Aircraft: Send + Sync {
    /// Whether a connected aircraft is available.
    fn is_ready(&self) -> bool;

    /// Current position, if the aircraft can report one.
    fn position(&self) -> Option<Coordinates>;

    /// Take off and climb to `altitude`; resolves when the command completes.
    async fn take_off(&self, altitude: f64) -> Result<(), FlightError>;

    /// Land; resolves when the command completes.
    async fn land(&self) -> Result<(), FlightError>;
}

/// The single shared execution timeline.
pub trait MissionControl: Send + Sync {
    fn is_timeline_busy(&self) -> bool;
    fn schedule(&self, mission: &WaypointMission) -> Result<(), ScheduleRejected>;
    fn stop_timeline(&self);
    fn unschedule_all(&self);
    /// Move the timeline's position marker back to the first element.
    fn reset_marker(&self);
    fn start_timeline(&self);
    fn subscribe_events(&self) -> broadcast::Receiver<TimelineEvent>;
}

/// Coordinate math.
pub trait Geospatial: Send + Sync {
    /// Move `origin` by the given distances in meters.
    fn offset(&self, origin: Coordinates, meters_north: f64, meters_east: f64) -> Coordinates;

    fn is_valid(&self, coordinates: Coordinates) -> bool {
        coordinates.is_well_formed()
    }
}

/// The fleet's pub/sub feed.
pub trait TaskFeed: Send + Sync {
    /// Inbound task-list snapshots.
    fn subscribe_task_lists(&self) -> broadcast::Receiver<Vec<Task>>;

    /// Inbound claim-table snapshots from the arbiter.
    fn subscribe_tables(&self) -> broadcast::Receiver<TaskTable>;

    /// Publish a claim assertion. Fire-and-forget, at most once.
    fn publish_claim(&self, assertion: ClaimAssertion);
}
