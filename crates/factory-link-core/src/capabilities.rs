//! Capability descriptor published by the control endpoint.

use crate::CommandType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default submission ceiling when the descriptor does not state one.
pub const DEFAULT_COMMANDS_PER_SECOND: u32 = 5;

/// `GET /capabilities` document. Fetched once per connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capabilities {
    pub version: String,
    #[serde(default)]
    pub features: BTreeMap<String, bool>,
    #[serde(default)]
    pub limits: Limits,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Limits {
    pub commands_per_second: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            commands_per_second: DEFAULT_COMMANDS_PER_SECOND,
        }
    }
}

impl Capabilities {
    /// Whether the feature flag gating `ty` is present and true.
    pub fn allows(&self, ty: CommandType) -> bool {
        self.features.get(ty.feature()).copied().unwrap_or(false)
    }
}
