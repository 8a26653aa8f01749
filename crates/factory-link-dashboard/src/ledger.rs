//! Command ledger and local submission throttle.
//!
//! The ledger is a FIFO ring of the most recent submissions. The rate limit
//! counts accepted submissions within the trailing window. Those acceptance
//! times are kept apart from the ring, so eviction never frees a slot early,
//! and a rejected submission (which never becomes an entry) consumes none.

use crate::Rejection;
use factory_link_core::{
    Capabilities, CommandSnapshot, CommandStatus, CommandType, DEFAULT_COMMANDS_PER_SECOND,
};
use serde_json::Value;
use std::collections::VecDeque;

/// Ledger capacity.
pub const MAX_COMMAND_LOG: usize = 50;
/// Trailing window of the rate limit.
pub const RATE_WINDOW_MS: u64 = 1000;

/// One accepted submission and its latest known status.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    pub command_id: String,
    pub idempotency_key: String,
    pub command_type: CommandType,
    pub payload: Value,
    pub status: CommandStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub submitted_at: u64,
    pub updated_at: u64,
}

impl LedgerEntry {
    /// Entry for a submission the server answered with `snapshot`.
    pub fn accepted(
        snapshot: CommandSnapshot,
        idempotency_key: String,
        command_type: CommandType,
        payload: Value,
        now: u64,
    ) -> Self {
        Self {
            command_id: snapshot.command_id,
            idempotency_key,
            command_type,
            payload,
            status: snapshot.status,
            result: snapshot.result,
            error: snapshot.error,
            submitted_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub ceiling: u32,
    pub window_ms: u64,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            ceiling: DEFAULT_COMMANDS_PER_SECOND,
            window_ms: RATE_WINDOW_MS,
        }
    }
}

impl RateLimit {
    /// The descriptor's `commandsPerSecond`, or the default without one.
    pub fn for_capabilities(capabilities: Option<&Capabilities>) -> Self {
        match capabilities {
            Some(caps) => Self {
                ceiling: caps.limits.commands_per_second,
                ..Self::default()
            },
            None => Self::default(),
        }
    }
}

pub struct CommandLedger {
    entries: VecDeque<LedgerEntry>,
    capacity: usize,
    /// `submitted_at` of every entry recorded within the last window.
    recent: VecDeque<u64>,
}

impl Default for CommandLedger {
    fn default() -> Self {
        Self::with_capacity(MAX_COMMAND_LOG)
    }
}

impl CommandLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            recent: VecDeque::new(),
        }
    }

    /// Submissions recorded less than `window_ms` before `now`, counting
    /// ones already evicted from the ring. Only the last [`RATE_WINDOW_MS`]
    /// of history is kept, so longer windows see no further back.
    pub fn submitted_within(&self, now: u64, window_ms: u64) -> usize {
        self.recent
            .iter()
            .filter(|&&at| now.saturating_sub(at) < window_ms)
            .count()
    }

    /// Local checks run before anything is sent: rate limit, capability
    /// gate, payload shape. Without a descriptor every type is disabled.
    pub fn admit(
        &self,
        command_type: CommandType,
        payload: &Value,
        capabilities: Option<&Capabilities>,
        now: u64,
    ) -> Result<(), Rejection> {
        let limit = RateLimit::for_capabilities(capabilities);
        if self.submitted_within(now, limit.window_ms) >= limit.ceiling as usize {
            return Err(Rejection::RateLimited {
                ceiling: limit.ceiling,
                window_ms: limit.window_ms,
            });
        }
        if !capabilities.is_some_and(|caps| caps.allows(command_type)) {
            return Err(Rejection::FeatureDisabled(command_type));
        }
        command_type.validate_payload(payload)?;
        Ok(())
    }

    /// Append `entry`, evicting the oldest past capacity. An entry whose
    /// command id is already present (an idempotent replay) is not added.
    pub fn record(&mut self, entry: LedgerEntry) -> bool {
        if self.get(&entry.command_id).is_some() {
            return false;
        }
        let now = entry.submitted_at;
        self.recent.retain(|&at| now.saturating_sub(at) < RATE_WINDOW_MS);
        self.recent.push_back(now);
        self.entries.push_back(entry);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
        true
    }

    /// Apply a status event to its entry. Unknown ids and entries already in
    /// a terminal status are left alone.
    pub fn apply(&mut self, event: &CommandSnapshot, now: u64) -> bool {
        let Some(entry) = self
            .entries
            .iter_mut()
            .find(|entry| entry.command_id == event.command_id)
        else {
            return false;
        };
        if entry.status.is_terminal() {
            return false;
        }
        entry.status = event.status;
        entry.result = event.result.clone();
        entry.error = event.error.clone();
        entry.updated_at = now;
        true
    }

    pub fn get(&self, command_id: &str) -> Option<&LedgerEntry> {
        self.entries
            .iter()
            .find(|entry| entry.command_id == command_id)
    }

    /// Oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &LedgerEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use factory_link_core::ValidationError;
    use serde_json::json;

    fn caps(features: Value, per_second: u32) -> Capabilities {
        serde_json::from_value(json!({
            "version": "1",
            "features": features,
            "limits": { "commandsPerSecond": per_second },
        }))
        .unwrap()
    }

    fn all_enabled() -> Capabilities {
        caps(
            json!({
                "resetFuse": true,
                "toggleBuilding": true,
                "setRecipe": true,
                "setOverclock": true,
                "setSwitch": true,
            }),
            5,
        )
    }

    fn entry(id: &str, at: u64) -> LedgerEntry {
        LedgerEntry::accepted(
            CommandSnapshot {
                command_id: id.to_string(),
                status: CommandStatus::Queued,
                result: None,
                error: None,
            },
            format!("key-{id}"),
            CommandType::ResetFuse,
            json!({ "circuitId": 1 }),
            at,
        )
    }

    fn event(id: &str, status: CommandStatus) -> CommandSnapshot {
        CommandSnapshot {
            command_id: id.to_string(),
            status,
            result: None,
            error: None,
        }
    }

    #[test]
    fn sixth_in_window_is_rejected_until_it_slides() {
        let caps = all_enabled();
        let payload = json!({ "circuitId": 1 });
        let mut ledger = CommandLedger::new();
        for i in 0..5u64 {
            let now = 1_000 + i * 100;
            ledger
                .admit(CommandType::ResetFuse, &payload, Some(&caps), now)
                .unwrap();
            assert!(ledger.record(entry(&format!("c{i}"), now)));
        }

        let err = ledger
            .admit(CommandType::ResetFuse, &payload, Some(&caps), 1_500)
            .unwrap_err();
        assert_eq!(
            err,
            Rejection::RateLimited {
                ceiling: 5,
                window_ms: RATE_WINDOW_MS
            }
        );
        assert!(err.is_local());
        assert_eq!(ledger.len(), 5);

        // The first entry (t=1000) leaves the window at t=2000.
        assert!(
            ledger
                .admit(CommandType::ResetFuse, &payload, Some(&caps), 1_999)
                .is_err()
        );
        assert!(
            ledger
                .admit(CommandType::ResetFuse, &payload, Some(&caps), 2_000)
                .is_ok()
        );
    }

    #[test]
    fn descriptor_ceiling_overrides_default() {
        let caps = caps(json!({ "resetFuse": true }), 2);
        let payload = json!({ "circuitId": 0 });
        let mut ledger = CommandLedger::new();
        ledger.record(entry("a", 0));
        ledger.record(entry("b", 10));
        assert!(matches!(
            ledger.admit(CommandType::ResetFuse, &payload, Some(&caps), 20),
            Err(Rejection::RateLimited { ceiling: 2, .. })
        ));
    }

    #[test]
    fn feature_gate_and_validation() {
        let ledger = CommandLedger::new();
        let disabled = caps(json!({ "resetFuse": false, "setOverclock": true }), 5);

        assert_eq!(
            ledger.admit(
                CommandType::ResetFuse,
                &json!({ "circuitId": 1 }),
                Some(&disabled),
                0
            ),
            Err(Rejection::FeatureDisabled(CommandType::ResetFuse))
        );
        assert_eq!(
            ledger.admit(CommandType::SetSwitch, &json!({}), Some(&disabled), 0),
            Err(Rejection::FeatureDisabled(CommandType::SetSwitch))
        );
        assert_eq!(
            ledger.admit(
                CommandType::ResetFuse,
                &json!({ "circuitId": 1 }),
                None,
                0
            ),
            Err(Rejection::FeatureDisabled(CommandType::ResetFuse))
        );
        assert!(matches!(
            ledger.admit(
                CommandType::SetOverclock,
                &json!({ "buildingId": "b", "clockPercent": 400 }),
                Some(&disabled),
                0
            ),
            Err(Rejection::Validation(ValidationError::Field { field: "clockPercent", .. }))
        ));
    }

    #[test]
    fn status_events_update_in_place() {
        let mut ledger = CommandLedger::new();
        ledger.record(entry("a", 0));
        ledger.record(entry("b", 0));

        assert!(ledger.apply(&event("a", CommandStatus::Running), 50));
        let mut done = event("a", CommandStatus::Succeeded);
        done.result = Some(json!({ "ok": true }));
        assert!(ledger.apply(&done, 80));
        assert!(!ledger.apply(&event("zzz", CommandStatus::Failed), 90));

        let a = ledger.get("a").unwrap();
        assert_eq!(a.status, CommandStatus::Succeeded);
        assert_eq!(a.result, Some(json!({ "ok": true })));
        assert_eq!(a.updated_at, 80);
        assert_eq!(a.submitted_at, 0);
        assert_eq!(ledger.get("b").unwrap().status, CommandStatus::Queued);
    }

    #[test]
    fn terminal_status_is_sticky() {
        let mut ledger = CommandLedger::new();
        ledger.record(entry("a", 0));
        assert!(ledger.apply(&event("a", CommandStatus::Failed), 10));
        assert!(!ledger.apply(&event("a", CommandStatus::Running), 20));
        assert!(!ledger.apply(&event("a", CommandStatus::Succeeded), 30));
        let a = ledger.get("a").unwrap();
        assert_eq!(a.status, CommandStatus::Failed);
        assert_eq!(a.updated_at, 10);
    }

    #[test]
    fn replayed_id_is_not_duplicated() {
        let mut ledger = CommandLedger::new();
        assert!(ledger.record(entry("a", 0)));
        assert!(!ledger.record(entry("a", 5)));
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.get("a").unwrap().submitted_at, 0);
    }

    #[test]
    fn ring_evicts_oldest() {
        let mut ledger = CommandLedger::new();
        for i in 0..(MAX_COMMAND_LOG as u64 + 3) {
            ledger.record(entry(&format!("c{i}"), i * 1_000));
        }
        assert_eq!(ledger.len(), MAX_COMMAND_LOG);
        let ids: Vec<&str> = ledger.entries().map(|e| e.command_id.as_str()).collect();
        assert_eq!(ids[0], "c3");
        assert_eq!(*ids.last().unwrap(), "c52");
        assert!(ledger.get("c0").is_none());
    }

    #[test]
    fn ceiling_above_ring_capacity_still_throttles() {
        let caps = caps(json!({ "resetFuse": true }), 60);
        let payload = json!({ "circuitId": 1 });
        let mut ledger = CommandLedger::new();

        let mut accepted = 0;
        for i in 0..200 {
            if ledger
                .admit(CommandType::ResetFuse, &payload, Some(&caps), 1_000)
                .is_ok()
            {
                assert!(ledger.record(entry(&format!("c{i}"), 1_000)));
                accepted += 1;
            }
        }
        assert_eq!(accepted, 60);
        assert_eq!(ledger.len(), MAX_COMMAND_LOG);
        assert_eq!(ledger.submitted_within(1_000, RATE_WINDOW_MS), 60);

        assert!(
            ledger
                .admit(CommandType::ResetFuse, &payload, Some(&caps), 1_999)
                .is_err()
        );
        assert!(
            ledger
                .admit(CommandType::ResetFuse, &payload, Some(&caps), 2_000)
                .is_ok()
        );
    }
}
