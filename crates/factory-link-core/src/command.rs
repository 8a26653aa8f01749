//! Command model for the control endpoint.

use crate::ValidationError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Command types accepted by the control endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandType {
    ResetFuse,
    ToggleBuilding,
    SetRecipe,
    SetOverclock,
    SetSwitch,
}

impl CommandType {
    pub const ALL: [CommandType; 5] = [
        CommandType::ResetFuse,
        CommandType::ToggleBuilding,
        CommandType::SetRecipe,
        CommandType::SetOverclock,
        CommandType::SetSwitch,
    ];

    /// Wire name, e.g. `RESET_FUSE`.
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandType::ResetFuse => "RESET_FUSE",
            CommandType::ToggleBuilding => "TOGGLE_BUILDING",
            CommandType::SetRecipe => "SET_RECIPE",
            CommandType::SetOverclock => "SET_OVERCLOCK",
            CommandType::SetSwitch => "SET_SWITCH",
        }
    }

    /// Capability flag that must be enabled before this type may be submitted.
    pub fn feature(&self) -> &'static str {
        match self {
            CommandType::ResetFuse => "resetFuse",
            CommandType::ToggleBuilding => "toggleBuilding",
            CommandType::SetRecipe => "setRecipe",
            CommandType::SetOverclock => "setOverclock",
            CommandType::SetSwitch => "setSwitch",
        }
    }

    /// Check `payload` against this type's local shape rules.
    pub fn validate_payload(&self, payload: &Value) -> Result<(), ValidationError> {
        match self {
            CommandType::ResetFuse => {
                let p: ResetFuse = shaped(self, payload)?;
                if p.circuit_id < 0 {
                    return Err(ValidationError::field("circuitId", "must not be negative"));
                }
            }
            CommandType::ToggleBuilding => {
                let p: ToggleBuilding = shaped(self, payload)?;
                non_empty("buildingId", &p.building_id)?;
            }
            CommandType::SetRecipe => {
                let p: SetRecipe = shaped(self, payload)?;
                non_empty("buildingId", &p.building_id)?;
                non_empty("recipe", &p.recipe)?;
            }
            CommandType::SetOverclock => {
                let p: SetOverclock = shaped(self, payload)?;
                non_empty("buildingId", &p.building_id)?;
                if !(1.0..=250.0).contains(&p.clock_percent) {
                    return Err(ValidationError::field(
                        "clockPercent",
                        format!("{} outside 1..=250", p.clock_percent),
                    ));
                }
            }
            CommandType::SetSwitch => {
                let p: SetSwitch = shaped(self, payload)?;
                non_empty("switchId", &p.switch_id)?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CommandType::ALL
            .into_iter()
            .find(|ty| ty.as_str() == s)
            .ok_or_else(|| ValidationError::field("type", format!("unknown command type {s}")))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ResetFuse {
    circuit_id: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ToggleBuilding {
    building_id: String,
    #[allow(dead_code)]
    enabled: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct SetRecipe {
    building_id: String,
    recipe: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct SetOverclock {
    building_id: String,
    clock_percent: f64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct SetSwitch {
    switch_id: String,
    #[allow(dead_code)]
    on: bool,
}

fn shaped<T: DeserializeOwned>(ty: &CommandType, payload: &Value) -> Result<T, ValidationError> {
    T::deserialize(payload).map_err(|e| ValidationError::schema(ty, e))
}

fn non_empty(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::field(field, "must not be empty"))
    } else {
        Ok(())
    }
}

/// Execution status. Ordered; `Succeeded` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl CommandStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CommandStatus::Succeeded | CommandStatus::Failed)
    }
}

/// Body of `POST /commands`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub idempotency_key: String,
    #[serde(rename = "type")]
    pub command_type: CommandType,
    pub payload: Value,
}

/// Server view of a command, returned by `POST /commands` and
/// `GET /commands/:id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandSnapshot {
    pub command_id: String,
    pub status: CommandStatus,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Asynchronous status change pushed on the control stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlEvent {
    CommandStatus(CommandSnapshot),
}
