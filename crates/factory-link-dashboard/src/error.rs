use factory_link_client::ClientError;
use factory_link_core::{CommandType, ValidationError};
use std::path::PathBuf;

/// Why a submission did not produce a ledger entry.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Rejection {
    #[error("rate limited: at most {ceiling} commands per {window_ms}ms")]
    RateLimited { ceiling: u32, window_ms: u64 },
    #[error("{0} is not enabled by the capability descriptor")]
    FeatureDisabled(CommandType),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Client(#[from] ClientError),
}

impl Rejection {
    /// Rejected before any network call.
    pub fn is_local(&self) -> bool {
        !matches!(self, Rejection::Client(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}
