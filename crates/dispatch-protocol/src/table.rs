//! The shared claim table.
//!
//! A `TaskTable` is an immutable snapshot: every change produces a new table.
//! The arbiter stamps each snapshot it publishes with a monotonically
//! increasing `version`; local merges keep the version they started from.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::task::Task;

/// Claim state of a single task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimState {
    /// Nobody currently owns the task.
    Available,
    /// A drone owns the task.
    Claimed,
    /// The owning drone completed the task.
    Finished,
}

/// Claim record for one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroneClaim {
    /// Drone that last held the claim, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drone_id: Option<String>,
    /// Current claim state.
    pub state: ClaimState,
}

impl DroneClaim {
    /// An unowned, available claim.
    pub fn available() -> Self {
        Self {
            drone_id: None,
            state: ClaimState::Available,
        }
    }

    /// A claim in `state` attributed to `drone_id`.
    pub fn new(drone_id: impl Into<String>, state: ClaimState) -> Self {
        Self {
            drone_id: Some(drone_id.into()),
            state,
        }
    }

    /// Whether this claim is attributed to `drone_id`.
    pub fn is_held_by(&self, drone_id: &str) -> bool {
        self.drone_id.as_deref() == Some(drone_id)
    }
}

/// Snapshot of every task's claim, keyed by task id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskTable {
    /// Arbiter-assigned snapshot version.
    #[serde(default)]
    pub version: u64,
    /// Claims keyed by task id.
    #[serde(default, rename = "table")]
    claims: BTreeMap<String, DroneClaim>,
}

impl TaskTable {
    /// Create an empty table at `version`.
    pub fn new(version: u64) -> Self {
        Self {
            version,
            claims: BTreeMap::new(),
        }
    }

    /// Build a table from `(task_id, claim)` pairs. Later duplicates win.
    pub fn from_claims<I, S>(version: u64, claims: I) -> Self
    where
        I: IntoIterator<Item = (S, DroneClaim)>,
        S: Into<String>,
    {
        Self {
            version,
            claims: claims.into_iter().map(|(id, c)| (id.into(), c)).collect(),
        }
    }

    /// Look up the claim for a task.
    pub fn get(&self, task_id: &str) -> Option<&DroneClaim> {
        self.claims.get(task_id)
    }

    /// Number of tasks in the table.
    pub fn len(&self) -> usize {
        self.claims.len()
    }

    /// Whether the table has no tasks.
    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }

    /// Iterate over claims in task id order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &DroneClaim)> {
        self.claims.iter().map(|(id, claim)| (id.as_str(), claim))
    }

    /// Whether any task is available.
    pub fn has_available(&self) -> bool {
        self.claims.values().any(|c| c.state == ClaimState::Available)
    }

    /// Ids of available tasks in lexicographic order.
    pub fn available_ids(&self) -> impl Iterator<Item = &str> {
        self.iter()
            .filter(|(_, claim)| claim.state == ClaimState::Available)
            .map(|(id, _)| id)
    }

    /// Merge the latest task list into this table.
    ///
    /// Claims for ids still present are preserved, new ids enter as
    /// available, and ids missing from `tasks` are dropped. The version is
    /// left unchanged.
    pub fn merged(&self, tasks: &[Task]) -> TaskTable {
        let claims = tasks
            .iter()
            .map(|task| {
                let claim = self
                    .claims
                    .get(&task.id)
                    .cloned()
                    .unwrap_or_else(DroneClaim::available);
                (task.id.clone(), claim)
            })
            .collect();
        TaskTable {
            version: self.version,
            claims,
        }
    }

    /// Copy of this table with `task_id` set to `claim` at `version`.
    pub fn with_claim(&self, version: u64, task_id: &str, claim: DroneClaim) -> TaskTable {
        let mut claims = self.claims.clone();
        claims.insert(task_id.to_string(), claim);
        TaskTable { version, claims }
    }

    /// Copy of this table re-stamped at `version`.
    pub fn at_version(&self, version: u64) -> TaskTable {
        TaskTable {
            version,
            claims: self.claims.clone(),
        }
    }
}
