//! A small plausible save for local runs.

use factory_link_core::Topic;
use serde_json::{Value, json};

/// Pull bodies for every topic.
pub fn sample_topics() -> Vec<(Topic, Value)> {
    vec![
        (
            Topic::Generators,
            json!([{
                "Name": "Coal Generator",
                "ClassName": "Build_GeneratorCoal_C",
                "location": {"x": 1200.0, "y": -340.0, "z": 0.0},
                "BaseProd": 75.0,
                "DynamicProdCapacity": 75.0,
                "FuelAmount": 48.0,
            }]),
        ),
        (Topic::Power, power_body(1, 150.0, 96.5)),
        (
            Topic::Factory,
            json!([{
                "ID": "Build_SmelterMk1_C_2147",
                "Name": "Smelter",
                "ClassName": "Build_SmelterMk1_C",
                "location": {"x": 800.0, "y": 120.0, "z": 0.0},
                "Recipe": "Iron Ingot",
                "Productivity": 98.2,
                "ManuSpeed": 100.0,
                "IsProducing": true,
            }]),
        ),
        (
            Topic::Belts,
            json!([{"Name": "Conveyor Belt Mk.2", "ItemsPerMinute": 120.0, "Length": 24.0}]),
        ),
        (
            Topic::Trains,
            json!([{"Name": "Ore Hauler", "TrainStation": "North Mine", "Status": "Self-Driving"}]),
        ),
        (
            Topic::Drones,
            json!([{"Name": "Drone 1", "HomeStation": "Hub", "FlyingSpeed": 42.0}]),
        ),
        (
            Topic::ProdStats,
            json!([{"Name": "Iron Ingot", "ProdPercent": 87.0, "CurrentProd": 60.0, "CurrentConsumed": 45.0}]),
        ),
        (
            Topic::Storage,
            json!([{
                "Name": "Storage Container",
                "Inventory": [{"Name": "Iron Plate", "Amount": 812.0}],
            }]),
        ),
        (
            Topic::SessionInfo,
            json!({"SessionName": "Mock Save", "IsPaused": false, "TotalPlayDuration": 3600.0}),
        ),
    ]
}

/// One-circuit power body.
pub fn power_body(circuit: i64, production: f64, consumed: f64) -> Value {
    json!([{
        "CircuitGroupID": circuit,
        "PowerProduction": production,
        "PowerConsumed": consumed,
        "PowerCapacity": 200.0,
        "PowerMaxConsumed": 120.0,
        "BatteryPercent": 64.0,
        "FuseTriggered": false,
    }])
}
