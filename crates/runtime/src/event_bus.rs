use std::collections::VecDeque;

use foundation::LatLon;
use serde::Serialize;

/// What happened during a tracking session.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    PositionUpdated,
    PositionIgnored,
    FeedUnavailable,
    FeedRecovered,
    RouteReady,
    RouteUnavailable,
    WaypointsChanged,
    HistoryRecorded,
}

/// Session event for traceability and the status page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    /// Monotonic sequence number, starting at 0 for the session.
    pub seq: u64,
    pub kind: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub at: Option<LatLon>,
    pub message: String,
}

/// Bounded in-memory event log. The oldest events are dropped once full.
#[derive(Debug)]
pub struct EventBus {
    next_seq: u64,
    capacity: usize,
    events: VecDeque<Event>,
}

impl EventBus {
    pub const DEFAULT_CAPACITY: usize = 256;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            next_seq: 0,
            capacity,
            events: VecDeque::with_capacity(capacity),
        }
    }

    pub fn emit(&mut self, kind: EventKind, message: impl Into<String>) -> u64 {
        self.push(kind, None, message.into())
    }

    pub fn emit_at(&mut self, kind: EventKind, at: LatLon, message: impl Into<String>) -> u64 {
        self.push(kind, Some(at), message.into())
    }

    fn push(&mut self, kind: EventKind, at: Option<LatLon>, message: String) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(Event {
            seq,
            kind,
            at,
            message,
        });
        seq
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }

    /// Up to `n` most recent events, oldest first.
    pub fn recent(&self, n: usize) -> Vec<Event> {
        let skip = self.events.len().saturating_sub(n);
        self.events.iter().skip(skip).cloned().collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::{EventBus, EventKind};
    use foundation::LatLon;

    #[test]
    fn assigns_increasing_sequence_numbers() {
        let mut bus = EventBus::new();
        let a = bus.emit(EventKind::RouteReady, "route");
        let b = bus.emit_at(EventKind::PositionUpdated, LatLon::new(1.0, 2.0), "moved");
        assert_eq!((a, b), (0, 1));
        assert_eq!(bus.len(), 2);
        assert_eq!(bus.recent(1)[0].at, Some(LatLon::new(1.0, 2.0)));
    }

    #[test]
    fn drops_oldest_when_full() {
        let mut bus = EventBus::with_capacity(2);
        bus.emit(EventKind::FeedUnavailable, "a");
        bus.emit(EventKind::FeedUnavailable, "b");
        bus.emit(EventKind::FeedRecovered, "c");
        let msgs: Vec<_> = bus.events().map(|e| e.message.as_str()).collect();
        assert_eq!(msgs, vec!["b", "c"]);
        assert_eq!(bus.events().next().unwrap().seq, 1);
    }

    #[test]
    fn recent_returns_tail_in_order() {
        let mut bus = EventBus::new();
        for i in 0..5 {
            bus.emit(EventKind::PositionUpdated, format!("{i}"));
        }
        let tail: Vec<_> = bus.recent(2).into_iter().map(|e| e.message).collect();
        assert_eq!(tail, vec!["3", "4"]);
        assert_eq!(bus.recent(10).len(), 5);
    }
}
