//! Simulated feed broker and claim arbiter
//!
//! Stands in for the fleet's pub/sub service. Every message passes through
//! the wire encoding on its way to subscribers. Claims are arbitrated first
//! come, first served: the first claim on an available task wins, and every
//! decision is published as a new table version.

use std::sync::{Mutex, MutexGuard};

use tokio::sync::broadcast;
use tracing::{debug, warn};

use dispatch_protocol::{
    ClaimAssertion, ClaimState, DroneClaim, FeedMessage, ProtocolError, TableSync, Task,
    TaskListAdvertise, TaskTable,
};

use crate::collab::TaskFeed;

/// Delivery faults the broker can inject.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeliveryFaults {
    /// Deliver every table snapshot twice.
    pub duplicate_tables: bool,
    /// After each table snapshot, redeliver the one before it.
    pub replay_stale_tables: bool,
}

#[derive(Debug, Default)]
struct BrokerState {
    table: TaskTable,
    previous: Option<TaskTable>,
    assertions: Vec<ClaimAssertion>,
}

/// In-process feed and arbiter.
pub struct SimBroker {
    task_lists: broadcast::Sender<Vec<Task>>,
    tables: broadcast::Sender<TaskTable>,
    faults: DeliveryFaults,
    state: Mutex<BrokerState>,
}

impl Default for SimBroker {
    fn default() -> Self {
        Self::new(DeliveryFaults::default())
    }
}

impl SimBroker {
    pub fn new(faults: DeliveryFaults) -> Self {
        let (task_lists, _) = broadcast::channel(64);
        let (tables, _) = broadcast::channel(256);
        Self {
            task_lists,
            tables,
            faults,
            state: Mutex::new(BrokerState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The arbiter's current table.
    pub fn table(&self) -> TaskTable {
        self.state().table.clone()
    }

    /// Every claim assertion received, in arrival order.
    pub fn assertions(&self) -> Vec<ClaimAssertion> {
        self.state().assertions.clone()
    }

    /// Advertise a task list and publish the resulting table.
    pub fn advertise(&self, tasks: &[Task]) -> Result<(), ProtocolError> {
        let raw = FeedMessage::TaskList(TaskListAdvertise::from_tasks(tasks)).encode();
        let FeedMessage::TaskList(advert) = FeedMessage::decode(&raw)? else {
            return Ok(());
        };
        let tasks = advert.tasks()?;

        let table = {
            let mut state = self.state();
            let next = state.table.merged(&tasks).at_version(state.table.version + 1);
            let previous = std::mem::replace(&mut state.table, next.clone());
            state.previous = Some(previous);
            next
        };
        debug!(tasks = tasks.len(), version = table.version, "advertising task list");
        let _ = self.task_lists.send(tasks);
        self.publish_table(table)
    }

    /// Decide on one assertion; returns the table to publish.
    fn arbitrate(&self, assertion: ClaimAssertion) -> TaskTable {
        let mut state = self.state();
        state.assertions.push(assertion.clone());

        let current = state.table.get(&assertion.task_id).cloned();
        let granted = match (&current, assertion.state) {
            (Some(claim), ClaimState::Claimed) => claim.state == ClaimState::Available,
            (Some(claim), ClaimState::Finished | ClaimState::Available) => {
                claim.state == ClaimState::Claimed && claim.is_held_by(&assertion.drone_id)
            }
            _ => false,
        };

        let version = state.table.version + 1;
        let next = if granted {
            debug!(task = %assertion.task_id, drone = %assertion.drone_id, state = ?assertion.state, "claim granted");
            state.table.with_claim(
                version,
                &assertion.task_id,
                DroneClaim::new(assertion.drone_id.clone(), assertion.state),
            )
        } else {
            debug!(task = %assertion.task_id, drone = %assertion.drone_id, "claim refused");
            state.table.at_version(version)
        };
        let previous = std::mem::replace(&mut state.table, next.clone());
        state.previous = Some(previous);
        next
    }

    fn publish_table(&self, table: TaskTable) -> Result<(), ProtocolError> {
        let raw = FeedMessage::Table(TableSync { table }).encode();
        let FeedMessage::Table(sync) = FeedMessage::decode(&raw)? else {
            return Ok(());
        };

        let _ = self.tables.send(sync.table.clone());
        if self.faults.duplicate_tables {
            let _ = self.tables.send(sync.table);
        }
        if self.faults.replay_stale_tables {
            if let Some(stale) = self.state().previous.clone() {
                let _ = self.tables.send(stale);
            }
        }
        Ok(())
    }
}

impl TaskFeed for SimBroker {
    fn subscribe_task_lists(&self) -> broadcast::Receiver<Vec<Task>> {
        self.task_lists.subscribe()
    }

    fn subscribe_tables(&self) -> broadcast::Receiver<TaskTable> {
        self.tables.subscribe()
    }

    fn publish_claim(&self, assertion: ClaimAssertion) {
        let raw = FeedMessage::Claim(assertion).encode();
        let assertion = match FeedMessage::decode(&raw) {
            Ok(FeedMessage::Claim(assertion)) => assertion,
            Ok(other) => {
                warn!(message = ?other, "unexpected message on claim channel");
                return;
            }
            Err(e) => {
                warn!(error = %e, "dropping undecodable claim");
                return;
            }
        };

        let table = self.arbitrate(assertion);
        if let Err(e) = self.publish_table(table) {
            warn!(error = %e, "failed to publish table");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_advertise_publishes_available_table() {
        let broker = SimBroker::default();
        let mut lists = broker.subscribe_task_lists();
        let mut tables = broker.subscribe_tables();

        broker.advertise(&[Task::new("a"), Task::new("b")]).unwrap();

        assert_eq!(lists.recv().await.unwrap().len(), 2);
        let table = tables.recv().await.unwrap();
        assert_eq!(table.version, 1);
        assert_eq!(table.available_ids().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_first_claim_wins() {
        let broker = SimBroker::default();
        broker.advertise(&[Task::new("a")]).unwrap();

        broker.publish_claim(ClaimAssertion::claim("a", "drone1"));
        broker.publish_claim(ClaimAssertion::claim("a", "drone2"));

        let table = broker.table();
        assert!(table.get("a").unwrap().is_held_by("drone1"));
        assert_eq!(table.version, 3);
        assert_eq!(broker.assertions().len(), 2);
    }

    #[test]
    fn test_finish_only_by_holder() {
        let broker = SimBroker::default();
        broker.advertise(&[Task::new("a")]).unwrap();
        broker.publish_claim(ClaimAssertion::claim("a", "drone1"));

        broker.publish_claim(ClaimAssertion::finish("a", "drone2"));
        assert_eq!(broker.table().get("a").unwrap().state, ClaimState::Claimed);

        broker.publish_claim(ClaimAssertion::finish("a", "drone1"));
        assert_eq!(broker.table().get("a").unwrap().state, ClaimState::Finished);
    }

    #[test]
    fn test_release_returns_task_to_pool() {
        let broker = SimBroker::default();
        broker.advertise(&[Task::new("a")]).unwrap();
        broker.publish_claim(ClaimAssertion::claim("a", "drone1"));

        broker.publish_claim(ClaimAssertion::release("a", "drone2"));
        assert!(broker.table().get("a").unwrap().is_held_by("drone1"));

        broker.publish_claim(ClaimAssertion::release("a", "drone1"));
        assert_eq!(broker.table().get("a").unwrap().state, ClaimState::Available);

        broker.publish_claim(ClaimAssertion::claim("a", "drone2"));
        assert!(broker.table().get("a").unwrap().is_held_by("drone2"));
    }

    #[tokio::test]
    async fn test_faulty_delivery() {
        let broker = SimBroker::new(DeliveryFaults {
            duplicate_tables: true,
            replay_stale_tables: true,
        });
        let mut tables = broker.subscribe_tables();
        broker.advertise(&[Task::new("a")]).unwrap();

        let versions: Vec<u64> = vec![
            tables.recv().await.unwrap().version,
            tables.recv().await.unwrap().version,
            tables.recv().await.unwrap().version,
        ];
        assert_eq!(versions, vec![1, 1, 0]);
    }
}
