//! Registry metrics: call outcomes, listing-cache efficiency and per-capability
//! latency.

use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use dashmap::DashMap;

use crate::error::CapabilityKind;

/// Identifies one capability as seen by the registry that served the call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CapabilityId {
    pub kind: CapabilityKind,
    pub key: String,
}

impl CapabilityId {
    pub fn new(kind: CapabilityKind, key: impl Into<String>) -> Self {
        Self {
            kind,
            key: key.into(),
        }
    }
}

impl fmt::Display for CapabilityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.key)
    }
}

pub struct RegistryMetrics {
    total_calls: AtomicU64,
    successful_calls: AtomicU64,
    failed_calls: AtomicU64,
    timed_out_calls: AtomicU64,
    active_executions: AtomicU64,

    // Aggregated listings
    listing_cache_hits: AtomicU64,
    listing_cache_misses: AtomicU64,
    cache_invalidations: AtomicU64,

    latencies: DashMap<CapabilityId, LatencyStats>,
}

impl RegistryMetrics {
    pub fn new() -> Self {
        Self {
            total_calls: AtomicU64::new(0),
            successful_calls: AtomicU64::new(0),
            failed_calls: AtomicU64::new(0),
            timed_out_calls: AtomicU64::new(0),
            active_executions: AtomicU64::new(0),
            listing_cache_hits: AtomicU64::new(0),
            listing_cache_misses: AtomicU64::new(0),
            cache_invalidations: AtomicU64::new(0),
            latencies: DashMap::new(),
        }
    }

    pub fn record_call_start(&self) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.active_executions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_call_end(&self, id: &CapabilityId, success: bool, duration_ms: u64) {
        self.active_executions.fetch_sub(1, Ordering::Relaxed);

        if success {
            self.successful_calls.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_calls.fetch_add(1, Ordering::Relaxed);
        }

        self.latencies
            .entry(id.clone())
            .or_insert_with(LatencyStats::new)
            .record(duration_ms);
    }

    /// A call that named nothing the registry knows. Counted as a failure but
    /// kept out of the latency map, whose keys stay bounded by the inventory.
    pub fn record_unresolved_call_end(&self) {
        self.active_executions.fetch_sub(1, Ordering::Relaxed);
        self.failed_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Counted in addition to the failure recorded by `record_call_end`.
    pub fn record_timeout(&self) {
        self.timed_out_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.listing_cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.listing_cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalidation(&self) {
        self.cache_invalidations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_calls: self.total_calls.load(Ordering::Relaxed),
            successful_calls: self.successful_calls.load(Ordering::Relaxed),
            failed_calls: self.failed_calls.load(Ordering::Relaxed),
            timed_out_calls: self.timed_out_calls.load(Ordering::Relaxed),
            active_executions: self.active_executions.load(Ordering::Relaxed),
            listing_cache_hits: self.listing_cache_hits.load(Ordering::Relaxed),
            listing_cache_misses: self.listing_cache_misses.load(Ordering::Relaxed),
            cache_invalidations: self.cache_invalidations.load(Ordering::Relaxed),
        }
    }

    pub fn latency(&self, id: &CapabilityId) -> Option<LatencySnapshot> {
        self.latencies.get(id).map(|stats| stats.snapshot())
    }

    pub fn all_latencies(&self) -> Vec<(CapabilityId, LatencySnapshot)> {
        self.latencies
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().snapshot()))
            .collect()
    }

    /// Reset counters. In-flight executions are left alone.
    pub fn reset(&self) {
        self.total_calls.store(0, Ordering::Relaxed);
        self.successful_calls.store(0, Ordering::Relaxed);
        self.failed_calls.store(0, Ordering::Relaxed);
        self.timed_out_calls.store(0, Ordering::Relaxed);
        self.listing_cache_hits.store(0, Ordering::Relaxed);
        self.listing_cache_misses.store(0, Ordering::Relaxed);
        self.cache_invalidations.store(0, Ordering::Relaxed);
        self.latencies.clear();
    }
}

impl Default for RegistryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

struct LatencyStats {
    count: AtomicU64,
    total_ms: AtomicU64,
    min_ms: AtomicU64,
    max_ms: AtomicU64,
}

impl LatencyStats {
    fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            total_ms: AtomicU64::new(0),
            min_ms: AtomicU64::new(u64::MAX),
            max_ms: AtomicU64::new(0),
        }
    }

    fn record(&self, ms: u64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_ms.fetch_add(ms, Ordering::Relaxed);
        self.min_ms.fetch_min(ms, Ordering::Relaxed);
        self.max_ms.fetch_max(ms, Ordering::Relaxed);
    }

    fn snapshot(&self) -> LatencySnapshot {
        let count = self.count.load(Ordering::Relaxed);
        let total = self.total_ms.load(Ordering::Relaxed);
        let min = self.min_ms.load(Ordering::Relaxed);

        LatencySnapshot {
            count,
            avg_ms: if count > 0 { total / count } else { 0 },
            min_ms: if min == u64::MAX { 0 } else { min },
            max_ms: self.max_ms.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub timed_out_calls: u64,
    pub active_executions: u64,
    pub listing_cache_hits: u64,
    pub listing_cache_misses: u64,
    pub cache_invalidations: u64,
}

impl MetricsSnapshot {
    /// Percentage of completed calls that succeeded.
    pub fn success_rate(&self) -> f64 {
        let completed = self.successful_calls + self.failed_calls;
        if completed == 0 {
            100.0
        } else {
            (self.successful_calls as f64 / completed as f64) * 100.0
        }
    }

    /// Percentage of listing requests served from cache.
    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.listing_cache_hits + self.listing_cache_misses;
        if total == 0 {
            0.0
        } else {
            (self.listing_cache_hits as f64 / total as f64) * 100.0
        }
    }
}

#[derive(Debug, Clone)]
pub struct LatencySnapshot {
    pub count: u64,
    pub avg_ms: u64,
    pub min_ms: u64,
    pub max_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(key: &str) -> CapabilityId {
        CapabilityId::new(CapabilityKind::Tool, key)
    }

    #[test]
    fn test_call_metrics() {
        let metrics = RegistryMetrics::new();
        let id = tool("weather_forecast");

        metrics.record_call_start();
        assert_eq!(metrics.snapshot().total_calls, 1);
        assert_eq!(metrics.snapshot().active_executions, 1);

        metrics.record_call_end(&id, true, 100);
        assert_eq!(metrics.snapshot().successful_calls, 1);
        assert_eq!(metrics.snapshot().active_executions, 0);

        metrics.record_call_start();
        metrics.record_timeout();
        metrics.record_call_end(&id, false, 50);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.failed_calls, 1);
        assert_eq!(snapshot.timed_out_calls, 1);
    }

    #[test]
    fn test_latency_stats() {
        let metrics = RegistryMetrics::new();
        let id = tool("t");

        for ms in [100, 200, 150] {
            metrics.record_call_start();
            metrics.record_call_end(&id, true, ms);
        }

        let latency = metrics.latency(&id).unwrap();
        assert_eq!(latency.count, 3);
        assert_eq!(latency.avg_ms, 150);
        assert_eq!(latency.min_ms, 100);
        assert_eq!(latency.max_ms, 200);
    }

    #[test]
    fn test_latency_keyed_by_kind() {
        let metrics = RegistryMetrics::new();
        metrics.record_call_start();
        metrics.record_call_end(&tool("x"), true, 1);
        metrics.record_call_start();
        metrics.record_call_end(&CapabilityId::new(CapabilityKind::Prompt, "x"), true, 1);

        assert_eq!(metrics.all_latencies().len(), 2);
        assert_eq!(tool("x").to_string(), "Tool:x");
    }

    #[test]
    fn test_unresolved_calls_skip_latency() {
        let metrics = RegistryMetrics::new();
        for _ in 0..5 {
            metrics.record_call_start();
            metrics.record_unresolved_call_end();
        }

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.failed_calls, 5);
        assert_eq!(snapshot.active_executions, 0);
        assert!(metrics.all_latencies().is_empty());
    }

    #[test]
    fn test_rates() {
        let metrics = RegistryMetrics::new();
        let id = tool("t");

        for _ in 0..3 {
            metrics.record_call_start();
            metrics.record_call_end(&id, true, 100);
        }
        metrics.record_call_start();
        metrics.record_call_end(&id, false, 100);

        metrics.record_cache_miss();
        metrics.record_cache_hit();

        let snapshot = metrics.snapshot();
        assert!((snapshot.success_rate() - 75.0).abs() < 0.1);
        assert!((snapshot.cache_hit_rate() - 50.0).abs() < 0.1);
    }

    #[test]
    fn test_reset() {
        let metrics = RegistryMetrics::new();
        metrics.record_call_start();
        metrics.record_call_end(&tool("t"), true, 100);
        metrics.record_cache_hit();
        metrics.record_invalidation();

        metrics.reset();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_calls, 0);
        assert_eq!(snapshot.listing_cache_hits, 0);
        assert_eq!(snapshot.cache_invalidations, 0);
        assert!(metrics.all_latencies().is_empty());
    }
}
