//! Tasks as they arrive from the feed.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::ProtocolError;

/// A unit of work identified by a stable id.
///
/// The payload is opaque to the claim machinery; only step planners look
/// inside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Stable task identifier.
    pub id: String,
    /// Everything the feed sent for this task, including the id.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Task {
    /// Create a task with an empty payload.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            payload: serde_json::Value::Null,
        }
    }

    /// Create a task with a payload.
    pub fn with_payload(id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            payload,
        }
    }

    /// Parse the feed's JSON task details into tasks.
    ///
    /// The details are a JSON array of objects, each carrying a string `id`.
    /// Later duplicates of an id are dropped.
    pub fn parse_list(details: &str) -> Result<Vec<Task>, ProtocolError> {
        let entries: Vec<serde_json::Value> =
            serde_json::from_str(details).map_err(|e| ProtocolError::malformed("task list", &e))?;

        let mut tasks = Vec::with_capacity(entries.len());
        for (index, entry) in entries.into_iter().enumerate() {
            let id = entry
                .get("id")
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .ok_or_else(|| ProtocolError::missing_task_id(index))?
                .to_string();
            tasks.push(Task { id, payload: entry });
        }
        Ok(dedup_by_id(tasks))
    }
}

/// Drop tasks whose id was already seen, keeping the first occurrence.
pub fn dedup_by_id(tasks: impl IntoIterator<Item = Task>) -> Vec<Task> {
    let mut seen = HashSet::new();
    tasks
        .into_iter()
        .filter(|task| seen.insert(task.id.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_parse_list_keeps_payload() {
        let tasks = Task::parse_list(r#"[{"id":"a","kind":"survey"},{"id":"b"}]"#).unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].id, "a");
        assert_eq!(tasks[0].payload["kind"], "survey");
    }

    #[test]
    fn test_parse_list_dedups() {
        let tasks = Task::parse_list(r#"[{"id":"a","n":1},{"id":"a","n":2},{"id":"b"}]"#).unwrap();
        let ids: Vec<_> = tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(tasks[0].payload["n"], 1);
    }

    #[test]
    fn test_parse_list_rejects_missing_id() {
        let err = Task::parse_list(r#"[{"id":"a"},{"name":"x"}]"#).unwrap_err();
        assert_eq!(err.code, ErrorCode::MissingTaskId);
    }

    #[test]
    fn test_parse_list_rejects_garbage() {
        let err = Task::parse_list("not json").unwrap_err();
        assert_eq!(err.code, ErrorCode::Malformed);
    }
}
