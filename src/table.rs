//! Locally cached view of the shared claim table.
//!
//! Two kinds of update feed the cache:
//! - task lists from the feed, merged locally (claims kept, new ids available)
//! - full snapshots from the arbiter, accepted only when strictly newer
//!
//! Every accepted update is published as a new immutable snapshot. Observers
//! see snapshots in publication order; a slow observer may skip straight to
//! the newest one, which is fine because each snapshot supersedes the last.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use tracing::debug;

use dispatch_protocol::task::dedup_by_id;
use dispatch_protocol::{Task, TaskTable};

#[derive(Debug, Default)]
struct CacheState {
    last_remote_version: Option<u64>,
    tasks: BTreeMap<String, Task>,
}

/// Versioned, observable claim table.
#[derive(Debug)]
pub struct SharedTaskTable {
    snapshots: watch::Sender<Arc<TaskTable>>,
    state: Mutex<CacheState>,
}

impl Default for SharedTaskTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedTaskTable {
    /// Empty table at version 0.
    pub fn new() -> Self {
        let (snapshots, _) = watch::channel(Arc::new(TaskTable::default()));
        Self {
            snapshots,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// The latest snapshot.
    pub fn current(&self) -> Arc<TaskTable> {
        self.snapshots.borrow().clone()
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Payload of a task from the most recent task list.
    pub fn task(&self, task_id: &str) -> Option<Task> {
        self.lock().tasks.get(task_id).cloned()
    }

    /// Merge a task list and publish the result.
    pub fn merge(&self, tasks: &[Task]) -> Arc<TaskTable> {
        let tasks = dedup_by_id(tasks.iter().cloned());
        let mut state = self.lock();
        state.tasks = tasks.iter().map(|t| (t.id.clone(), t.clone())).collect();
        let merged = Arc::new(self.current().merged(&tasks));
        debug!(tasks = merged.len(), version = merged.version, "merged task list");
        self.snapshots.send_replace(merged.clone());
        merged
    }

    /// Accept an arbiter snapshot if it is newer than any seen before.
    ///
    /// Returns `false` for duplicates and out-of-order deliveries.
    pub fn apply_remote(&self, table: TaskTable) -> bool {
        let mut state = self.lock();
        if state
            .last_remote_version
            .is_some_and(|seen| table.version <= seen)
        {
            debug!(version = table.version, "dropping stale table snapshot");
            return false;
        }
        state.last_remote_version = Some(table.version);
        debug!(version = table.version, tasks = table.len(), "accepted table snapshot");
        self.snapshots.send_replace(Arc::new(table));
        true
    }

    /// Start observing snapshots from the current one onwards.
    pub fn observe(&self) -> TableStream {
        TableStream {
            rx: self.snapshots.subscribe(),
            primed: false,
        }
    }
}

/// Lazy, unbounded sequence of table snapshots.
///
/// The first `next()` yields the snapshot current at subscription time; later
/// calls wait for newer ones. Create a new stream to restart.
#[derive(Debug)]
pub struct TableStream {
    rx: watch::Receiver<Arc<TaskTable>>,
    primed: bool,
}

impl TableStream {
    /// Next snapshot, or `None` once the table is gone.
    pub async fn next(&mut self) -> Option<Arc<TaskTable>> {
        if !self.primed {
            self.primed = true;
            return Some(self.rx.borrow_and_update().clone());
        }
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// Skip snapshots until one satisfies `predicate`, then stop.
    pub async fn first_matching<F>(mut self, mut predicate: F) -> Option<Arc<TaskTable>>
    where
        F: FnMut(&TaskTable) -> bool,
    {
        loop {
            let table = self.next().await?;
            if predicate(&table) {
                return Some(table);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch_protocol::{ClaimState, DroneClaim};

    #[test]
    fn test_merge_publishes_available() {
        let table = SharedTaskTable::new();
        table.merge(&[Task::new("a"), Task::new("b"), Task::new("a")]);
        let current = table.current();
        assert_eq!(current.len(), 2);
        assert_eq!(current.get("a").unwrap().state, ClaimState::Available);
    }

    #[test]
    fn test_merge_keeps_remote_claims() {
        let table = SharedTaskTable::new();
        table.apply_remote(TaskTable::from_claims(
            3,
            [("a", DroneClaim::new("drone2", ClaimState::Claimed))],
        ));
        table.merge(&[Task::new("a"), Task::new("b")]);
        let current = table.current();
        assert!(current.get("a").unwrap().is_held_by("drone2"));
        assert_eq!(current.get("b").unwrap().state, ClaimState::Available);
        assert_eq!(current.version, 3);
    }

    #[test]
    fn test_remote_duplicates_and_stale_dropped() {
        let table = SharedTaskTable::new();
        let v2 = TaskTable::from_claims(2, [("a", DroneClaim::new("d1", ClaimState::Claimed))]);
        let v1 = TaskTable::from_claims(1, [("a", DroneClaim::available())]);

        assert!(table.apply_remote(v2.clone()));
        assert!(!table.apply_remote(v2));
        assert!(!table.apply_remote(v1));
        assert!(table.current().get("a").unwrap().is_held_by("d1"));
    }

    #[test]
    fn test_task_payload_lookup() {
        let table = SharedTaskTable::new();
        table.merge(&[Task::with_payload("a", serde_json::json!({"id": "a", "k": 1}))]);
        assert_eq!(table.task("a").unwrap().payload["k"], 1);
        assert!(table.task("zzz").is_none());
    }

    #[tokio::test]
    async fn test_stream_starts_at_current_and_follows() {
        let table = SharedTaskTable::new();
        table.merge(&[Task::new("a")]);
        let mut stream = table.observe();
        assert_eq!(stream.next().await.unwrap().len(), 1);

        table.merge(&[Task::new("a"), Task::new("b")]);
        assert_eq!(stream.next().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_first_matching_skips() {
        let table = Arc::new(SharedTaskTable::new());
        table.apply_remote(TaskTable::from_claims(
            1,
            [("a", DroneClaim::new("d1", ClaimState::Claimed))],
        ));

        let waiter = {
            let stream = table.observe();
            tokio::spawn(async move { stream.first_matching(|t| t.has_available()).await })
        };
        tokio::task::yield_now().await;

        table.apply_remote(TaskTable::from_claims(2, [("b", DroneClaim::available())]));
        let found = waiter.await.unwrap().unwrap();
        assert_eq!(found.version, 2);
    }
}
