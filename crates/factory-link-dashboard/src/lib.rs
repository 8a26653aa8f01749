//! State stores behind the dashboard.
//!
//! [`Dashboard`] folds telemetry events into bounded per-entity histories.
//! [`CommandDesk`] gates, throttles and records command submissions and
//! tracks their status. Both are plain owned values: the caller drives them
//! from a single task and feeds them the events its clients deliver.

pub mod config;
mod dashboard;
mod desk;
mod error;
mod history;
mod ledger;

pub use config::Config;
pub use dashboard::{Dashboard, MachineMetrics, PowerMetrics};
pub use desk::CommandDesk;
pub use error::{ConfigError, Rejection};
pub use history::{HistoryStore, MAX_HISTORY, MIN_SNAP_INTERVAL_MS, Snapshot};
pub use ledger::{CommandLedger, LedgerEntry, MAX_COMMAND_LOG, RATE_WINDOW_MS, RateLimit};
