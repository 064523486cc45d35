//! Drone Dispatch - task claiming and step execution for a drone fleet
//!
//! Each drone runs a [`TaskCoordinator`] that races the rest of the fleet for
//! tasks on a shared, externally arbitrated claim table, and a
//! [`StepExecutor`] that flies the claimed task one step at a time through a
//! [`MissionScheduler`].

pub mod collab;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod log;
pub mod node;
pub mod plan;
pub mod retry;
pub mod scheduler;
pub mod sim;
pub mod step;
pub mod table;

pub use collab::{
    Aircraft, Coordinates, Direction, DroneState, Geospatial, MissionControl, TaskFeed,
    TimelineEvent, Waypoint, WaypointMission,
};
pub use config::{DispatchConfig, EffectiveConfig};
pub use coordinator::TaskCoordinator;
pub use error::{DispatchError, Result};
pub use executor::{ExecutorProgress, RunOutcome, RunPhase, RunTicket, StepExecutor};
pub use log::{EventLog, MemoryLog, TracingLog};
pub use node::{Collaborators, DroneNode, NodeHandle};
pub use plan::{PayloadPlanner, SampleMission, StepPlanner};
pub use retry::RetryPolicy;
pub use scheduler::MissionScheduler;
pub use step::{FlyTarget, Step, StepSequence};
pub use table::{SharedTaskTable, TableStream};

pub use dispatch_protocol::{ClaimAssertion, ClaimState, DroneClaim, Task, TaskTable};
