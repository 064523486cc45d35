//! One drone's dispatch stack, wired together.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::info;

use crate::collab::{Aircraft, Geospatial, MissionControl, TaskFeed};
use crate::config::DispatchConfig;
use crate::coordinator::{CoordinatorHandle, TaskCoordinator};
use crate::executor::StepExecutor;
use crate::log::{EventLog, TracingLog};
use crate::plan::{PayloadPlanner, StepPlanner};
use crate::scheduler::MissionScheduler;
use crate::table::SharedTaskTable;

/// External services a node talks to.
pub struct Collaborators {
    pub aircraft: Arc<dyn Aircraft>,
    pub mission_control: Option<Arc<dyn MissionControl>>,
    pub geo: Arc<dyn Geospatial>,
    pub feed: Arc<dyn TaskFeed>,
    /// Defaults to a [`PayloadPlanner`] over the configured sample mission.
    pub planner: Option<Arc<dyn StepPlanner>>,
    /// Defaults to a [`TracingLog`] for the drone.
    pub log: Option<Arc<dyn EventLog>>,
}

/// Table, coordinator, executor and scheduler for one drone.
pub struct DroneNode {
    drone_id: String,
    coordinator: Arc<TaskCoordinator>,
}

impl DroneNode {
    pub fn assemble(config: &DispatchConfig, collaborators: Collaborators) -> Self {
        let drone_id = config.drone_id_or_generate();
        let log = collaborators
            .log
            .unwrap_or_else(|| Arc::new(TracingLog::new(drone_id.clone())) as Arc<dyn EventLog>);
        let planner = collaborators
            .planner
            .unwrap_or_else(|| Arc::new(PayloadPlanner::new(config.mission.clone())) as Arc<dyn StepPlanner>);

        let scheduler = Arc::new(MissionScheduler::new(
            collaborators.aircraft,
            collaborators.mission_control,
            collaborators.geo,
            Arc::clone(&log),
            config.scheduler.clone(),
        ));
        let executor = Arc::new(StepExecutor::new(
            scheduler,
            Arc::clone(&log),
            config.executor.clone(),
        ));
        let coordinator = Arc::new(TaskCoordinator::new(
            drone_id.clone(),
            Arc::new(SharedTaskTable::new()),
            collaborators.feed,
            executor,
            planner,
            log,
        ));

        Self {
            drone_id,
            coordinator,
        }
    }

    pub fn drone_id(&self) -> &str {
        &self.drone_id
    }

    pub fn coordinator(&self) -> &Arc<TaskCoordinator> {
        &self.coordinator
    }

    /// Start listening to the feed and the timeline, then look for work.
    pub fn start(&self) -> NodeHandle {
        info!(drone = %self.drone_id, "starting drone node");
        let events = self.coordinator.executor().scheduler().listen_for_events();
        let loops = self.coordinator.spawn();
        let coordinator = Arc::clone(&self.coordinator);
        let scan = tokio::spawn(async move {
            coordinator.scan_for_task().await;
        });

        NodeHandle {
            drone_id: self.drone_id.clone(),
            loops: Some(loops),
            background: events.into_iter().chain([scan]).collect(),
        }
    }
}

/// A running node.
pub struct NodeHandle {
    drone_id: String,
    loops: Option<CoordinatorHandle>,
    background: Vec<JoinHandle<()>>,
}

impl NodeHandle {
    pub fn drone_id(&self) -> &str {
        &self.drone_id
    }

    /// Stop the feed pumps and background listeners.
    ///
    /// Work already handed to the aircraft is not recalled.
    pub async fn shutdown(mut self) {
        if let Some(loops) = self.loops.take() {
            loops.shutdown().await;
        }
        for task in self.background.drain(..) {
            task.abort();
        }
        info!(drone = %self.drone_id, "drone node stopped");
    }
}

impl Drop for NodeHandle {
    fn drop(&mut self) {
        for task in &self.background {
            task.abort();
        }
    }
}
