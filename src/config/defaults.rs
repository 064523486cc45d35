//! Built-in defaults (layer 1) and the typed settings they describe.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::executor::ExecutorConfig;
use crate::plan::SampleMission;
use crate::scheduler::SchedulerConfig;

/// Settings for one drone node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Fleet-unique drone id; generated when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drone_id: Option<String>,

    pub scheduler: SchedulerConfig,

    pub executor: ExecutorConfig,

    /// Steps flown for tasks whose payload carries no step list.
    pub mission: SampleMission,
}

impl DispatchConfig {
    /// Defaults as a JSON value for merging.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// The configured drone id, or a fresh random one.
    pub fn drone_id_or_generate(&self) -> String {
        match &self.drone_id {
            Some(id) => id.clone(),
            None => {
                let uuid = uuid::Uuid::new_v4().simple().to_string();
                format!("drone-{}", &uuid[..8])
            }
        }
    }

    /// Range checks the type system does not cover.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(id) = &self.drone_id {
            if id.trim().is_empty() {
                return Err("drone_id must not be empty".to_string());
            }
        }

        self.scheduler
            .busy_retry
            .validate()
            .map_err(|e| format!("scheduler.busy_retry: {}", e))?;
        self.scheduler
            .reject_retry
            .validate()
            .map_err(|e| format!("scheduler.reject_retry: {}", e))?;
        self.executor
            .ready_retry
            .validate()
            .map_err(|e| format!("executor.ready_retry: {}", e))?;

        for (name, value) in [
            ("scheduler.cruise_altitude_m", self.scheduler.cruise_altitude_m),
            ("scheduler.survey_altitude_m", self.scheduler.survey_altitude_m),
            ("mission.takeoff_altitude_m", self.mission.takeoff_altitude_m),
        ] {
            if !value.is_finite() || value <= 0.0 || value > 500.0 {
                return Err(format!("{} must be in (0, 500], got {}", name, value));
            }
        }

        if !self.mission.hover_seconds.is_finite() || self.mission.hover_seconds < 0.0 {
            return Err(format!(
                "mission.hover_seconds must be >= 0, got {}",
                self.mission.hover_seconds
            ));
        }

        Ok(())
    }
}
