//! Client error taxonomy.

use factory_link_core::ValidationError;
use std::time::Duration;
use tokio_tungstenite::tungstenite;

/// Failure of a client operation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClientError {
    /// Could not reach the endpoint, or the link broke.
    #[error("connection failed: {0}")]
    Connection(String),
    /// The endpoint answered 401 or refused the stream token.
    #[error("authentication rejected")]
    Auth,
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("unexpected HTTP status {status}")]
    Http { status: u16 },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// The endpoint answered with something that is not the expected shape.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// `disconnect()` raced with an in-flight connect.
    #[error("connection attempt cancelled")]
    Cancelled,
}

impl ClientError {
    pub fn is_auth(&self) -> bool {
        matches!(self, ClientError::Auth)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ClientError::Timeout(_))
    }

    pub(crate) fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            ClientError::Timeout(timeout)
        } else if err.is_decode() {
            ClientError::Protocol(err.to_string())
        } else if let Some(status) = err.status() {
            from_status(status.as_u16())
        } else {
            ClientError::Connection(err.to_string())
        }
    }

    pub(crate) fn from_ws(err: tungstenite::Error) -> Self {
        match &err {
            tungstenite::Error::Http(response) if response.status().as_u16() == 401 => {
                ClientError::Auth
            }
            _ => ClientError::Connection(err.to_string()),
        }
    }
}

pub(crate) fn from_status(status: u16) -> ClientError {
    if status == 401 {
        ClientError::Auth
    } else {
        ClientError::Http { status }
    }
}
