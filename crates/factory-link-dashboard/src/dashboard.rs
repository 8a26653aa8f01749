//! Telemetry side of the coordinating layer.

use crate::history::{HistoryStore, Snapshot};
use factory_link_core::records::{Machine, PowerCircuit};
use factory_link_core::{Clock, TelemetryEvent, Topic};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerMetrics {
    pub production: f64,
    pub consumed: f64,
    pub capacity: f64,
    pub battery_percent: f64,
}

impl From<&PowerCircuit> for PowerMetrics {
    fn from(circuit: &PowerCircuit) -> Self {
        Self {
            production: circuit.power_production,
            consumed: circuit.power_consumed,
            capacity: circuit.power_capacity,
            battery_percent: circuit.battery_percent,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MachineMetrics {
    pub productivity: f64,
}

impl From<&Machine> for MachineMetrics {
    fn from(machine: &Machine) -> Self {
        Self {
            productivity: machine.productivity,
        }
    }
}

/// Consumes telemetry events: keeps the latest event per topic and the power
/// and machine histories.
pub struct Dashboard {
    clock: Arc<dyn Clock>,
    power: HistoryStore<i64, PowerMetrics>,
    machines: HistoryStore<String, MachineMetrics>,
    latest: BTreeMap<Topic, TelemetryEvent>,
}

impl Dashboard {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            power: HistoryStore::new(),
            machines: HistoryStore::new(),
            latest: BTreeMap::new(),
        }
    }

    /// Stamp `event` with the clock and fold it in. Returns the number of
    /// snapshots kept.
    pub fn ingest(&mut self, event: TelemetryEvent) -> usize {
        let now = self.clock.now_ms();
        let kept = match &event {
            TelemetryEvent::Power(circuits) => circuits
                .iter()
                .filter(|c| {
                    self.power
                        .record(c.circuit_group_id, now, PowerMetrics::from(*c))
                })
                .count(),
            TelemetryEvent::Factory(machines) => machines
                .iter()
                .filter(|m| self.machines.record(m.key(), now, MachineMetrics::from(*m)))
                .count(),
            _ => 0,
        };
        self.latest.insert(event.topic(), event);
        kept
    }

    pub fn latest(&self, topic: Topic) -> Option<&TelemetryEvent> {
        self.latest.get(&topic)
    }

    pub fn power_history(&self, circuit: i64) -> Vec<Snapshot<PowerMetrics>> {
        self.power.series(&circuit).copied().collect()
    }

    /// `key` as produced by [`Machine::key`].
    pub fn machine_history(&self, key: &str) -> Vec<Snapshot<MachineMetrics>> {
        self.machines.series(key).copied().collect()
    }

    /// Circuit ids with history, ascending.
    pub fn circuits(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.power.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use factory_link_core::ManualClock;
    use serde_json::json;

    fn power_event(circuits: &[(i64, f64)]) -> TelemetryEvent {
        let frame: Vec<_> = circuits
            .iter()
            .map(|(id, production)| {
                json!({
                    "CircuitGroupID": id,
                    "PowerProduction": production,
                    "PowerConsumed": 5.0,
                    "BatteryPercent": 40.0,
                })
            })
            .collect();
        TelemetryEvent::from_frame(&json!(frame).to_string()).unwrap()
    }

    #[test]
    fn power_history_per_circuit() {
        let clock = Arc::new(ManualClock::new(0));
        let mut dashboard = Dashboard::new(clock.clone());

        assert_eq!(dashboard.ingest(power_event(&[(1, 10.0), (2, 20.0)])), 2);
        clock.set(1_000);
        assert_eq!(dashboard.ingest(power_event(&[(1, 11.0)])), 0);
        clock.set(2_500);
        assert_eq!(dashboard.ingest(power_event(&[(1, 12.0)])), 1);

        let history = dashboard.power_history(1);
        let times: Vec<u64> = history.iter().map(|s| s.time).collect();
        assert_eq!(times, vec![0, 2_500]);
        assert_eq!(history[1].metrics.production, 12.0);
        assert_eq!(history[1].metrics.battery_percent, 40.0);
        assert_eq!(dashboard.power_history(2).len(), 1);
        assert_eq!(dashboard.circuits(), vec![1, 2]);

        match dashboard.latest(Topic::Power) {
            Some(TelemetryEvent::Power(circuits)) => {
                assert_eq!(circuits[0].power_production, 12.0)
            }
            other => panic!("unexpected latest {other:?}"),
        }
    }

    #[test]
    fn machine_history_by_composite_key() {
        let clock = Arc::new(ManualClock::new(10_000));
        let mut dashboard = Dashboard::new(clock.clone());
        let frame = json!([
            {
                "ID": "Build_AssemblerMk1_C_9",
                "Name": "Assembler",
                "ClassName": "Build_AssemblerMk1_C",
                "Recipe": "Rotor",
                "Productivity": 80.0,
            },
            {
                "Name": "Smelter",
                "ClassName": "Build_SmelterMk1_C",
                "location": {"x": 10.2, "y": 20.7, "z": -3.0},
                "Recipe": "Iron Ingot",
                "Productivity": 100.0,
            },
        ]);
        let event = TelemetryEvent::from_frame(&frame.to_string()).unwrap();
        assert_eq!(dashboard.ingest(event), 2);

        let smelter = dashboard.machine_history("Build_SmelterMk1_C@10,21,-3");
        assert_eq!(smelter.len(), 1);
        assert_eq!(smelter[0].metrics.productivity, 100.0);
        assert_eq!(dashboard.machine_history("Build_AssemblerMk1_C_9")[0].time, 10_000);
    }

    #[test]
    fn other_topics_only_update_latest() {
        let mut dashboard = Dashboard::new(Arc::new(ManualClock::new(0)));
        let event = TelemetryEvent::from_frame(r#"[{"ItemsPerMinute":40}]"#).unwrap();
        assert_eq!(dashboard.ingest(event), 0);
        assert_eq!(dashboard.latest(Topic::Belts).map(|e| e.len()), Some(1));
        assert!(dashboard.latest(Topic::Trains).is_none());
        assert!(dashboard.circuits().is_empty());
    }
}
