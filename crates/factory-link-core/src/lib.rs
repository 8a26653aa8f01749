//! Core types for factory-link.
//!
//! This crate holds the wire vocabulary shared by the clients and the
//! dashboard: telemetry topics and record schemas, the shape rules that
//! classify unenveloped stream frames, and the command model of the control
//! endpoint. It performs no I/O.

mod capabilities;
mod classify;
mod clock;
mod command;
mod error;
pub mod records;
mod topic;

pub use capabilities::{Capabilities, DEFAULT_COMMANDS_PER_SECOND, Limits};
pub use classify::{
    FrameError, RULES, ShapeRule, TelemetryEvent, classify, classify_with, records_of,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use command::{CommandSnapshot, CommandStatus, CommandType, ControlEvent, SubmitRequest};
pub use error::ValidationError;
pub use records::TopicRecord;
pub use topic::{Topic, UnknownTopic};

/// Connection lifecycle state of a client channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not connected and not trying to be.
    #[default]
    Disconnected,
    /// Opening a connection or waiting to retry.
    Connecting,
    /// Channel is open.
    Connected,
    /// Retries exhausted or the server refused the client.
    Error,
}
