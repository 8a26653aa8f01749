//! Shape-based classification of unenveloped telemetry frames.
//!
//! Stream frames carry no topic tag. A frame is either an array of records or
//! a lone record; the first record's keys are tested against [`RULES`] in
//! order and the first rule whose keys are all present names the topic. The
//! records are then decoded with that topic's schema.

use crate::records::{
    Belt, Drone, Generator, Machine, PowerCircuit, ProdStat, SessionInfo, StorageContainer, Train,
};
use crate::{Topic, ValidationError};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// One classification rule: a record belongs to `topic` when it has every key.
#[derive(Debug, Clone, Copy)]
pub struct ShapeRule {
    pub topic: Topic,
    pub keys: &'static [&'static str],
}

impl ShapeRule {
    pub fn matches(&self, record: &Map<String, Value>) -> bool {
        self.keys.iter().all(|key| record.contains_key(*key))
    }
}

/// Classification rules, highest priority first.
pub const RULES: &[ShapeRule] = &[
    ShapeRule {
        topic: Topic::Generators,
        keys: &["BaseProd"],
    },
    ShapeRule {
        topic: Topic::Power,
        keys: &["CircuitGroupID", "PowerProduction"],
    },
    ShapeRule {
        topic: Topic::Factory,
        keys: &["Recipe", "Productivity"],
    },
    ShapeRule {
        topic: Topic::Belts,
        keys: &["ItemsPerMinute"],
    },
    ShapeRule {
        topic: Topic::Trains,
        keys: &["TrainStation", "Status"],
    },
    ShapeRule {
        topic: Topic::Drones,
        keys: &["FlyingSpeed"],
    },
    ShapeRule {
        topic: Topic::ProdStats,
        keys: &["ProdPercent"],
    },
    ShapeRule {
        topic: Topic::Storage,
        keys: &["Inventory"],
    },
    ShapeRule {
        topic: Topic::SessionInfo,
        keys: &["SessionName"],
    },
];

/// Normalize a frame into its list of records. A lone object becomes a
/// singleton; anything else that is not an array yields `None`.
pub fn records_of(frame: Value) -> Option<Vec<Value>> {
    match frame {
        Value::Array(items) => Some(items),
        Value::Object(_) => Some(vec![frame]),
        _ => None,
    }
}

/// Pick the topic of a record list using `rules`.
pub fn classify_with(rules: &[ShapeRule], records: &[Value]) -> Option<Topic> {
    let first = records.first()?.as_object()?;
    rules
        .iter()
        .find(|rule| rule.matches(first))
        .map(|rule| rule.topic)
}

/// Pick the topic of a record list using the default [`RULES`].
pub fn classify(records: &[Value]) -> Option<Topic> {
    classify_with(RULES, records)
}

/// A decoded, validated telemetry payload. Serializes as its bare record
/// array.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TelemetryEvent {
    Generators(Vec<Generator>),
    Power(Vec<PowerCircuit>),
    Factory(Vec<Machine>),
    Belts(Vec<Belt>),
    Trains(Vec<Train>),
    Drones(Vec<Drone>),
    ProdStats(Vec<ProdStat>),
    Storage(Vec<StorageContainer>),
    SessionInfo(Vec<SessionInfo>),
}

impl TelemetryEvent {
    pub fn topic(&self) -> Topic {
        match self {
            TelemetryEvent::Generators(_) => Topic::Generators,
            TelemetryEvent::Power(_) => Topic::Power,
            TelemetryEvent::Factory(_) => Topic::Factory,
            TelemetryEvent::Belts(_) => Topic::Belts,
            TelemetryEvent::Trains(_) => Topic::Trains,
            TelemetryEvent::Drones(_) => Topic::Drones,
            TelemetryEvent::ProdStats(_) => Topic::ProdStats,
            TelemetryEvent::Storage(_) => Topic::Storage,
            TelemetryEvent::SessionInfo(_) => Topic::SessionInfo,
        }
    }

    /// Number of records carried.
    pub fn len(&self) -> usize {
        match self {
            TelemetryEvent::Generators(v) => v.len(),
            TelemetryEvent::Power(v) => v.len(),
            TelemetryEvent::Factory(v) => v.len(),
            TelemetryEvent::Belts(v) => v.len(),
            TelemetryEvent::Trains(v) => v.len(),
            TelemetryEvent::Drones(v) => v.len(),
            TelemetryEvent::ProdStats(v) => v.len(),
            TelemetryEvent::Storage(v) => v.len(),
            TelemetryEvent::SessionInfo(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decode records already known to belong to `topic`.
    pub fn decode(topic: Topic, records: Vec<Value>) -> Result<Self, ValidationError> {
        Ok(match topic {
            Topic::Generators => TelemetryEvent::Generators(typed(topic, records)?),
            Topic::Power => TelemetryEvent::Power(typed(topic, records)?),
            Topic::Factory => TelemetryEvent::Factory(typed(topic, records)?),
            Topic::Belts => TelemetryEvent::Belts(typed(topic, records)?),
            Topic::Trains => TelemetryEvent::Trains(typed(topic, records)?),
            Topic::Drones => TelemetryEvent::Drones(typed(topic, records)?),
            Topic::ProdStats => TelemetryEvent::ProdStats(typed(topic, records)?),
            Topic::Storage => TelemetryEvent::Storage(typed(topic, records)?),
            Topic::SessionInfo => TelemetryEvent::SessionInfo(typed(topic, records)?),
        })
    }

    /// Classify and decode one raw stream frame.
    pub fn from_frame(text: &str) -> Result<Self, FrameError> {
        let frame: Value =
            serde_json::from_str(text).map_err(|e| FrameError::NotJson(e.to_string()))?;
        let records = records_of(frame).ok_or(FrameError::Unclassified)?;
        let topic = classify(&records).ok_or(FrameError::Unclassified)?;
        Self::decode(topic, records).map_err(|source| FrameError::Invalid { topic, source })
    }
}

fn typed<T: DeserializeOwned>(topic: Topic, records: Vec<Value>) -> Result<Vec<T>, ValidationError> {
    serde_json::from_value(Value::Array(records)).map_err(|e| ValidationError::schema(topic, e))
}

/// Why a stream frame produced no event.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FrameError {
    #[error("frame is not JSON: {0}")]
    NotJson(String),
    #[error("frame matches no known topic shape")]
    Unclassified,
    #[error("{topic} frame failed validation: {source}")]
    Invalid {
        topic: Topic,
        source: ValidationError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn topic_of(frame: Value) -> Option<Topic> {
        classify(&records_of(frame)?)
    }

    #[test]
    fn power_circuit_frame() {
        let event = TelemetryEvent::from_frame(
            r#"[{"CircuitGroupID":1,"PowerProduction":10,"PowerConsumed":5,"PowerCapacity":30}]"#,
        )
        .unwrap();
        match event {
            TelemetryEvent::Power(circuits) => {
                assert_eq!(circuits.len(), 1);
                assert_eq!(circuits[0].circuit_group_id, 1);
                assert_eq!(circuits[0].power_consumed, 5.0);
            }
            other => panic!("expected power event, got {other:?}"),
        }
    }

    #[test]
    fn belt_frame() {
        let event = TelemetryEvent::from_frame(r#"[{"ItemsPerMinute":40,"Name":"Belt Mk2"}]"#)
            .unwrap();
        assert_eq!(event.topic(), Topic::Belts);
    }

    #[test]
    fn unknown_shape_is_unclassified() {
        assert_eq!(
            TelemetryEvent::from_frame(r#"[{"foo":1}]"#),
            Err(FrameError::Unclassified)
        );
    }

    #[test]
    fn non_json_and_scalars_are_rejected() {
        assert!(matches!(
            TelemetryEvent::from_frame("not json"),
            Err(FrameError::NotJson(_))
        ));
        assert_eq!(TelemetryEvent::from_frame("42"), Err(FrameError::Unclassified));
        assert_eq!(TelemetryEvent::from_frame("[]"), Err(FrameError::Unclassified));
        assert_eq!(TelemetryEvent::from_frame("[1,2]"), Err(FrameError::Unclassified));
    }

    #[test]
    fn shape_match_but_schema_failure() {
        let err = TelemetryEvent::from_frame(
            r#"[{"CircuitGroupID":"one","PowerProduction":10,"PowerConsumed":5}]"#,
        )
        .unwrap_err();
        assert!(matches!(err, FrameError::Invalid { topic: Topic::Power, .. }));
    }

    #[test]
    fn lone_object_is_wrapped() {
        let event =
            TelemetryEvent::from_frame(r#"{"SessionName":"Northern Forest","IsPaused":false}"#)
                .unwrap();
        assert_eq!(event.topic(), Topic::SessionInfo);
        assert_eq!(event.len(), 1);
    }

    #[test]
    fn generator_rule_outranks_power_rule() {
        // Generators also report their circuit; the more specific rule wins.
        let frame = json!([{
            "Name": "Coal Generator",
            "BaseProd": 75.0,
            "CircuitGroupID": 2,
            "PowerProduction": 75.0,
        }]);
        assert_eq!(topic_of(frame), Some(Topic::Generators));
    }

    #[test]
    fn only_first_record_is_inspected() {
        let frame = json!([{"ItemsPerMinute": 60}, {"CircuitGroupID": 1, "PowerProduction": 1}]);
        assert_eq!(topic_of(frame), Some(Topic::Belts));
    }

    #[test]
    fn each_rule_matches_its_own_keys() {
        for rule in RULES {
            let record: Map<String, Value> = rule
                .keys
                .iter()
                .map(|key| (key.to_string(), Value::Null))
                .collect();
            assert_eq!(
                classify_with(RULES, &[Value::Object(record)]),
                Some(rule.topic),
                "rule for {} shadowed by a higher-priority rule",
                rule.topic
            );
        }
    }

    #[test]
    fn custom_rule_list() {
        let rules = [ShapeRule {
            topic: Topic::Drones,
            keys: &["Anything"],
        }];
        assert_eq!(
            classify_with(&rules, &[json!({"Anything": true})]),
            Some(Topic::Drones)
        );
        assert_eq!(classify_with(&rules, &[json!({"ItemsPerMinute": 1})]), None);
    }

    #[test]
    fn decode_empty_pull_result() {
        let event = TelemetryEvent::decode(Topic::Trains, Vec::new()).unwrap();
        assert!(event.is_empty());
    }
}
