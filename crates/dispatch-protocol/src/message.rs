//! Feed envelopes.
//!
//! Every object on the feed is a JSON object tagged with `object_type`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::table::{ClaimState, TaskTable};
use crate::task::Task;

/// Advertised task list. The details are a JSON-encoded array of tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskListAdvertise {
    /// JSON array of task objects, each with a string `id`.
    pub json_details: String,
}

impl TaskListAdvertise {
    /// Encode a task list for advertising.
    pub fn from_tasks(tasks: &[Task]) -> Self {
        let entries: Vec<serde_json::Value> = tasks
            .iter()
            .map(|task| match &task.payload {
                serde_json::Value::Object(map) => {
                    let mut map = map.clone();
                    map.insert("id".to_string(), serde_json::Value::String(task.id.clone()));
                    serde_json::Value::Object(map)
                }
                _ => serde_json::json!({ "id": task.id }),
            })
            .collect();
        Self {
            json_details: serde_json::Value::Array(entries).to_string(),
        }
    }

    /// Decode the advertised tasks.
    pub fn tasks(&self) -> Result<Vec<Task>, ProtocolError> {
        Task::parse_list(&self.json_details)
    }
}

/// Full table snapshot published by the arbiter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSync {
    /// The snapshot.
    pub table: TaskTable,
}

/// A drone's assertion about a task's claim. Delivered at most once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimAssertion {
    /// Task being claimed or released.
    pub task_id: String,
    /// Asserting drone.
    pub drone_id: String,
    /// Requested state (`claimed` or `finished`).
    pub state: ClaimState,
    /// When the drone made the assertion.
    pub asserted_at: DateTime<Utc>,
}

impl ClaimAssertion {
    /// Assert ownership of `task_id`.
    pub fn claim(task_id: impl Into<String>, drone_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            drone_id: drone_id.into(),
            state: ClaimState::Claimed,
            asserted_at: Utc::now(),
        }
    }

    /// Assert completion of `task_id`.
    pub fn finish(task_id: impl Into<String>, drone_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            drone_id: drone_id.into(),
            state: ClaimState::Finished,
            asserted_at: Utc::now(),
        }
    }

    /// Hand `task_id` back to the pool.
    pub fn release(task_id: impl Into<String>, drone_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            drone_id: drone_id.into(),
            state: ClaimState::Available,
            asserted_at: Utc::now(),
        }
    }
}

/// Any object that travels on the feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "object_type")]
pub enum FeedMessage {
    #[serde(rename = "idrone.sync.task")]
    TaskList(TaskListAdvertise),
    #[serde(rename = "idrone.sync.table")]
    Table(TableSync),
    #[serde(rename = "idrone.sync.claim")]
    Claim(ClaimAssertion),
}

impl FeedMessage {
    /// Decode a feed message from JSON.
    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|e| ProtocolError::malformed("feed message", &e))?;
        let object_type = value
            .get("object_type")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        match object_type.as_str() {
            crate::OBJECT_TYPE_TASKS | crate::OBJECT_TYPE_TABLE | crate::OBJECT_TYPE_CLAIM => {
                serde_json::from_value(value).map_err(|e| ProtocolError::malformed(&object_type, &e))
            }
            other => Err(ProtocolError::unknown_object_type(other)),
        }
    }

    /// Encode this message as JSON.
    pub fn encode(&self) -> String {
        // A derived Serialize over strings, maps and enums cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}
