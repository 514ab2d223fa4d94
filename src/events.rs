use std::collections::VecDeque;

use bevy::log::warn;
use serde::Serialize;

use crate::executor::Outcome;

const MAX_EVENTS: usize = 500;

/// Out-of-band notifications for the orchestrator.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SandboxEvent {
    OptionSelected { label: String },
    RitualFinished { label: String, outcome: Outcome },
    WatchdogHealed { watchdog: String, detail: String },
}

#[derive(Clone, Debug, Serialize)]
pub struct EventRecord {
    pub seq: u64,
    pub at_ms: u64,
    #[serde(flatten)]
    pub event: SandboxEvent,
}

#[derive(Default)]
pub struct EventBus {
    pub recent: VecDeque<EventRecord>,
    pub dropped_events: u64,
    next_seq: u64,
    undrained: usize,
    last_overflow_log_ms: u64,
}

impl EventBus {
    pub fn emit(&mut self, at_ms: u64, event: SandboxEvent) {
        self.next_seq = self.next_seq.saturating_add(1);
        self.recent.push_back(EventRecord {
            seq: self.next_seq,
            at_ms,
            event,
        });
        self.undrained = self.undrained.saturating_add(1);
        if self.recent.len() > MAX_EVENTS {
            let excess = self.recent.len() - MAX_EVENTS;
            for _ in 0..excess {
                self.recent.pop_front();
            }
            self.dropped_events = self.dropped_events.saturating_add(excess as u64);
            self.undrained = self.undrained.min(self.recent.len());
            if at_ms.saturating_sub(self.last_overflow_log_ms) >= 1000 {
                self.last_overflow_log_ms = at_ms;
                warn!(
                    "[Ritual events] Dropped {} buffered events (total dropped: {})",
                    excess, self.dropped_events
                );
            }
        }
    }

    /// Events emitted since the last drain; the history stays readable.
    pub fn drain_new(&mut self) -> Vec<EventRecord> {
        let start = self.recent.len() - self.undrained.min(self.recent.len());
        self.undrained = 0;
        self.recent.iter().skip(start).cloned().collect()
    }

    pub fn since(&self, seq: u64) -> Vec<EventRecord> {
        self.recent
            .iter()
            .filter(|record| record.seq > seq)
            .cloned()
            .collect()
    }

    pub fn last_seq(&self) -> u64 {
        self.next_seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selected(label: &str) -> SandboxEvent {
        SandboxEvent::OptionSelected {
            label: label.to_string(),
        }
    }

    #[test]
    fn event_bus_tracks_dropped_events() {
        let mut bus = EventBus::default();
        for i in 0..(MAX_EVENTS + 25) {
            bus.emit(i as u64, selected("x"));
        }
        assert_eq!(bus.recent.len(), MAX_EVENTS);
        assert_eq!(bus.dropped_events, 25);
    }

    #[test]
    fn drain_returns_only_new_events() {
        let mut bus = EventBus::default();
        bus.emit(1, selected("a"));
        bus.emit(2, selected("b"));
        assert_eq!(bus.drain_new().len(), 2);
        assert!(bus.drain_new().is_empty());
        bus.emit(3, selected("c"));
        let fresh = bus.drain_new();
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].event, selected("c"));
        assert_eq!(bus.since(1).len(), 2);
    }

    #[test]
    fn records_serialize_flat() {
        let mut bus = EventBus::default();
        bus.emit(
            9,
            SandboxEvent::WatchdogHealed {
                watchdog: "input".to_string(),
                detail: "restored".to_string(),
            },
        );
        let json = serde_json::to_value(&bus.recent[0]).expect("serializes");
        assert_eq!(json["event"], "watchdog_healed");
        assert_eq!(json["watchdog"], "input");
        assert_eq!(json["seq"], 1);
    }
}
