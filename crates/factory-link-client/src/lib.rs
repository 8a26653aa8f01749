//! Clients for the factory mod's two endpoints.
//!
//! [`TelemetryClient`] reads the telemetry endpoint: a push stream of
//! classified frames plus timed one-shot pulls. [`CommandClient`] talks to the
//! control endpoint: idempotent command submission and a status stream. Both
//! keep their push channel alive through a [`Reconnector`].

mod control;
mod error;
mod http;
mod listeners;
mod reconnect;
mod telemetry;

pub use control::{AUTH_CLOSE_CODE, CommandClient, ControlConfig, Submitted, idempotency_key};
pub use error::ClientError;
pub use http::REQUEST_TIMEOUT;
pub use listeners::{ListenerId, Listeners};
pub use reconnect::{BackoffPolicy, Effect, Phase, Reconnector, Session, Signal, step};
pub use telemetry::{TelemetryClient, TelemetryConfig};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock ignoring poison; a panic elsewhere must not wedge the client.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
