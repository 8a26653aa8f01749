//! Validation errors shared by inbound telemetry and outbound commands.

/// A payload failed its schema or a local rule.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("payload does not match the {context} schema: {reason}")]
    Schema { context: String, reason: String },
    #[error("{field}: {reason}")]
    Field { field: &'static str, reason: String },
}

impl ValidationError {
    pub fn schema(context: impl ToString, err: serde_json::Error) -> Self {
        Self::Schema {
            context: context.to_string(),
            reason: err.to_string(),
        }
    }

    pub fn field(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Field {
            field,
            reason: reason.into(),
        }
    }
}
