//! Error types for feed messages.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for malformed feed traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Payload is not valid JSON or does not match the expected shape.
    Malformed,
    /// A task entry has no usable identifier.
    MissingTaskId,
    /// The envelope names an object type this crate does not know.
    UnknownObjectType,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed => write!(f, "MALFORMED"),
            Self::MissingTaskId => write!(f, "MISSING_TASK_ID"),
            Self::UnknownObjectType => write!(f, "UNKNOWN_OBJECT_TYPE"),
        }
    }
}

/// Error raised while decoding feed messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable, single-line message.
    pub message: String,
    /// Optional machine-readable details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ProtocolError {
    /// Create a new protocol error.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Create a MALFORMED error from a serde failure.
    pub fn malformed(what: &str, err: &serde_json::Error) -> Self {
        Self {
            code: ErrorCode::Malformed,
            message: format!("malformed {}: {}", what, err),
            data: Some(serde_json::json!({ "line": err.line(), "column": err.column() })),
        }
    }

    /// Create a MISSING_TASK_ID error for the entry at `index`.
    pub fn missing_task_id(index: usize) -> Self {
        Self {
            code: ErrorCode::MissingTaskId,
            message: format!("task entry {} has no string 'id'", index),
            data: Some(serde_json::json!({ "index": index })),
        }
    }

    /// Create an UNKNOWN_OBJECT_TYPE error.
    pub fn unknown_object_type(object_type: &str) -> Self {
        Self {
            code: ErrorCode::UnknownObjectType,
            message: format!("unknown object type: {}", object_type),
            data: Some(serde_json::json!({ "object_type": object_type })),
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ProtocolError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_code() {
        let err = ProtocolError::missing_task_id(3);
        assert_eq!(err.to_string(), "MISSING_TASK_ID: task entry 3 has no string 'id'");
        assert_eq!(err.data.unwrap()["index"], 3);
    }

    #[test]
    fn test_code_serializes_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::UnknownObjectType).unwrap();
        assert_eq!(json, "\"UNKNOWN_OBJECT_TYPE\"");
    }
}
