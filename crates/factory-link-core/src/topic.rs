//! Telemetry topics.
//!
//! A topic is the endpoint name the telemetry mod publishes a record type
//! under, e.g. `getPower`. The same name is used for the pull route
//! (`GET /getPower`) and in stream subscription requests.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A named category of telemetry data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Topic {
    Generators,
    Power,
    Factory,
    Belts,
    Trains,
    Drones,
    ProdStats,
    Storage,
    SessionInfo,
}

impl Topic {
    /// Every topic, in classification priority order.
    pub const ALL: [Topic; 9] = [
        Topic::Generators,
        Topic::Power,
        Topic::Factory,
        Topic::Belts,
        Topic::Trains,
        Topic::Drones,
        Topic::ProdStats,
        Topic::Storage,
        Topic::SessionInfo,
    ];

    /// Endpoint name on the telemetry source.
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Generators => "getGenerators",
            Topic::Power => "getPower",
            Topic::Factory => "getFactory",
            Topic::Belts => "getBelts",
            Topic::Trains => "getTrains",
            Topic::Drones => "getDrone",
            Topic::ProdStats => "getProdStats",
            Topic::Storage => "getStorageInv",
            Topic::SessionInfo => "getSessionInfo",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = UnknownTopic;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Topic::ALL
            .into_iter()
            .find(|topic| topic.as_str() == s)
            .ok_or_else(|| UnknownTopic(s.to_string()))
    }
}

impl TryFrom<String> for Topic {
    type Error = UnknownTopic;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Topic> for String {
    fn from(topic: Topic) -> Self {
        topic.as_str().to_string()
    }
}

/// Error parsing a topic name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown telemetry topic: {0}")]
pub struct UnknownTopic(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_endpoint_name() {
        let topic: Topic = "getPower".parse().unwrap();
        assert_eq!(topic, Topic::Power);
        assert_eq!(topic.to_string(), "getPower");
    }

    #[test]
    fn unknown_name_is_rejected() {
        let err = "getNothing".parse::<Topic>().unwrap_err();
        assert_eq!(err, UnknownTopic("getNothing".into()));
    }

    #[test]
    fn serializes_as_endpoint_name() {
        let json = serde_json::to_string(&vec![Topic::Belts, Topic::Drones]).unwrap();
        assert_eq!(json, r#"["getBelts","getDrone"]"#);
        let back: Vec<Topic> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, vec![Topic::Belts, Topic::Drones]);
    }
}
