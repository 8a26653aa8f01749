//! Telemetry record schemas.
//!
//! Field names follow the telemetry mod's PascalCase keys. Required fields have
//! no default; a record missing one fails to decode and the whole payload is
//! dropped.

use crate::Topic;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A record type published under exactly one topic.
pub trait TopicRecord: DeserializeOwned + Send + 'static {
    const TOPIC: Topic;
}

/// World position of a building.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Location {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Power generator building.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generator {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "ClassName", default)]
    pub class_name: String,
    #[serde(default)]
    pub location: Location,
    #[serde(rename = "BaseProd")]
    pub base_prod: f64,
    #[serde(rename = "DynamicProdCapacity", default)]
    pub dynamic_prod_capacity: f64,
    #[serde(rename = "FuelAmount", default)]
    pub fuel_amount: f64,
}

/// Electrical power-distribution group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerCircuit {
    #[serde(rename = "CircuitGroupID")]
    pub circuit_group_id: i64,
    #[serde(rename = "PowerProduction")]
    pub power_production: f64,
    #[serde(rename = "PowerConsumed")]
    pub power_consumed: f64,
    #[serde(rename = "PowerCapacity", default)]
    pub power_capacity: f64,
    #[serde(rename = "PowerMaxConsumed", default)]
    pub power_max_consumed: f64,
    #[serde(rename = "BatteryPercent", default)]
    pub battery_percent: f64,
    #[serde(rename = "FuseTriggered", default)]
    pub fuse_triggered: bool,
}

/// Production building running a recipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Machine {
    #[serde(rename = "ID", default)]
    pub id: Option<String>,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "ClassName")]
    pub class_name: String,
    #[serde(default)]
    pub location: Location,
    #[serde(rename = "Recipe")]
    pub recipe: String,
    #[serde(rename = "Productivity")]
    pub productivity: f64,
    #[serde(rename = "ManuSpeed", default)]
    pub manu_speed: f64,
    #[serde(rename = "IsProducing", default)]
    pub is_producing: bool,
}

impl Machine {
    /// Stable entity key: the mod's building id when present, otherwise the
    /// class name and rounded position.
    pub fn key(&self) -> String {
        match &self.id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => format!(
                "{}@{:.0},{:.0},{:.0}",
                self.class_name, self.location.x, self.location.y, self.location.z
            ),
        }
    }
}

/// Conveyor belt segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Belt {
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(default)]
    pub location: Location,
    #[serde(rename = "ItemsPerMinute")]
    pub items_per_minute: f64,
    #[serde(rename = "Length", default)]
    pub length: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Train {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "TrainStation")]
    pub train_station: String,
    #[serde(rename = "Status")]
    pub status: String,
    #[serde(rename = "Derailed", default)]
    pub derailed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Drone {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "HomeStation", default)]
    pub home_station: String,
    #[serde(rename = "FlyingSpeed")]
    pub flying_speed: f64,
}

/// Production statistics for one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProdStat {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "ClassName", default)]
    pub class_name: String,
    #[serde(rename = "ProdPercent")]
    pub prod_percent: f64,
    #[serde(rename = "ConsPercent", default)]
    pub cons_percent: f64,
    #[serde(rename = "CurrentProd", default)]
    pub current_prod: f64,
    #[serde(rename = "CurrentConsumed", default)]
    pub current_consumed: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemAmount {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Amount")]
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageContainer {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "ClassName", default)]
    pub class_name: String,
    #[serde(default)]
    pub location: Location,
    #[serde(rename = "Inventory")]
    pub inventory: Vec<ItemAmount>,
}

/// Save-session metadata. Published as a single object rather than an array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    #[serde(rename = "SessionName")]
    pub session_name: String,
    #[serde(rename = "IsPaused", default)]
    pub is_paused: bool,
    #[serde(rename = "TotalPlayDuration", default)]
    pub total_play_duration: f64,
}

impl TopicRecord for Generator {
    const TOPIC: Topic = Topic::Generators;
}

impl TopicRecord for PowerCircuit {
    const TOPIC: Topic = Topic::Power;
}

impl TopicRecord for Machine {
    const TOPIC: Topic = Topic::Factory;
}

impl TopicRecord for Belt {
    const TOPIC: Topic = Topic::Belts;
}

impl TopicRecord for Train {
    const TOPIC: Topic = Topic::Trains;
}

impl TopicRecord for Drone {
    const TOPIC: Topic = Topic::Drones;
}

impl TopicRecord for ProdStat {
    const TOPIC: Topic = Topic::ProdStats;
}

impl TopicRecord for StorageContainer {
    const TOPIC: Topic = Topic::Storage;
}

impl TopicRecord for SessionInfo {
    const TOPIC: Topic = Topic::SessionInfo;
}
