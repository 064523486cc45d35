//! Error types for dispatch operations.
//!
//! Nothing here is fatal to the process. Components log these and either
//! retry or give up on the single operation that failed.

use crate::collab::Coordinates;

/// Errors raised while scheduling or executing steps.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("timeline still busy after {retries} stop-and-retry cycles")]
    TimelineBusy { retries: u32 },

    #[error("mission rejected after {retries} retries: {reason}")]
    ScheduleRejected { retries: u32, reason: String },

    #[error("mission control is unavailable")]
    MissionControlUnavailable,

    #[error("aircraft is not ready")]
    AircraftNotReady,

    #[error("a mission is already active")]
    MissionActive,

    #[error("current aircraft position is unknown")]
    NoPosition,

    #[error("invalid coordinates {0}")]
    InvalidCoordinates(Coordinates),

    #[error("timeline event stream closed")]
    TimelineClosed,

    #[error("flight command failed: {0}")]
    Flight(#[from] FlightError),
}

impl DispatchError {
    /// Whether the failure came from a resource that may free up on its own.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DispatchError::TimelineBusy { .. }
                | DispatchError::ScheduleRejected { .. }
                | DispatchError::AircraftNotReady
                | DispatchError::MissionActive
        )
    }
}

/// Failure reported by the aircraft for a direct command.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct FlightError(pub String);

/// Mission control refused to schedule a mission.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}")]
pub struct ScheduleRejected {
    pub reason: String,
}

impl ScheduleRejected {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Crate result alias.
pub type Result<T> = std::result::Result<T, DispatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(DispatchError::TimelineBusy { retries: 3 }.is_transient());
        assert!(DispatchError::MissionActive.is_transient());
        assert!(!DispatchError::NoPosition.is_transient());
        assert!(!DispatchError::MissionControlUnavailable.is_transient());
    }

    #[test]
    fn test_flight_error_converts() {
        let err: DispatchError = FlightError("motors did not spin up".to_string()).into();
        assert_eq!(err.to_string(), "flight command failed: motors did not spin up");
    }
}
