use std::collections::BTreeMap;

use serde::Serialize;

/// Metric names recorded by a tracking session.
pub mod names {
    pub const FEED_POLLS: &str = "feed.polls";
    pub const FEED_FAILURES: &str = "feed.failures";
    pub const FEED_STALE_SKIPPED: &str = "feed.stale_skipped";
    pub const FEED_CONSECUTIVE_FAILURES: &str = "feed.consecutive_failures";
    pub const ROUTE_REQUESTS: &str = "route.requests";
    pub const ROUTE_CACHE_HITS: &str = "route.cache_hits";
    pub const ROUTE_FAILURES: &str = "route.failures";
    pub const ROUTE_LATENCY_MS: &str = "route.latency_ms";
    pub const RENDER_VEHICLE_UPDATES: &str = "render.vehicle_updates";
    pub const HISTORY_ENTRIES: &str = "history.entries";
}

/// Sorted metric registry.
///
/// Sorted maps keep snapshots in a stable order for logs and the status endpoint.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Metrics {
    counters: BTreeMap<String, u64>,
    gauges: BTreeMap<String, i64>,
    latencies: BTreeMap<String, LatencyStats>,
}

/// Running min/max/mean of a latency in milliseconds.
#[derive(Debug, Copy, Clone, PartialEq, Default, Serialize)]
pub struct LatencyStats {
    pub count: u64,
    pub total_ms: u64,
    pub min_ms: u64,
    pub max_ms: u64,
}

impl LatencyStats {
    pub fn record(&mut self, ms: u64) {
        if self.count == 0 {
            self.min_ms = ms;
            self.max_ms = ms;
        } else {
            self.min_ms = self.min_ms.min(ms);
            self.max_ms = self.max_ms.max(ms);
        }
        self.count += 1;
        self.total_ms = self.total_ms.saturating_add(ms);
    }

    pub fn mean_ms(&self) -> Option<f64> {
        (self.count > 0).then(|| self.total_ms as f64 / self.count as f64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub counters: BTreeMap<String, u64>,
    pub gauges: BTreeMap<String, i64>,
    pub latencies: BTreeMap<String, LatencyStats>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    pub fn inc(&mut self, name: &str) {
        self.inc_by(name, 1);
    }

    pub fn inc_by(&mut self, name: &str, by: u64) {
        *self.counters.entry(name.to_string()).or_insert(0) += by;
    }

    pub fn gauge(&self, name: &str) -> Option<i64> {
        self.gauges.get(name).copied()
    }

    pub fn set_gauge(&mut self, name: &str, value: i64) {
        self.gauges.insert(name.to_string(), value);
    }

    pub fn record_latency(&mut self, name: &str, ms: u64) {
        self.latencies
            .entry(name.to_string())
            .or_default()
            .record(ms);
    }

    pub fn latency(&self, name: &str) -> Option<LatencyStats> {
        self.latencies.get(name).copied()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: self.counters.clone(),
            gauges: self.gauges.clone(),
            latencies: self.latencies.clone(),
        }
    }
}
