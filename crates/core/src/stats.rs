//! In-process counters and histograms backing `health()` and `metrics()`.
//!
//! Events are recorded twice: into the atomics/reservoirs here (so the
//! programmatic surface can be read back without a recorder installed) and
//! into the `metrics` facade (so an embedding application with a Prometheus
//! or other exporter sees the same series).

use metrics::{counter, histogram};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Bounded reservoir for histogram summaries.
const HISTOGRAM_CAPACITY: usize = 1_000;

/// Summary statistics of one histogram series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistogramSummary {
    pub count: u64,
    pub mean: f64,
    pub p50: f64,
    pub p95: f64,
    pub min: f64,
    pub max: f64,
}

/// Point-in-time snapshot of every engine metric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub counters: BTreeMap<String, u64>,
    pub gauges: BTreeMap<String, f64>,
    pub histograms: BTreeMap<String, HistogramSummary>,
}

#[derive(Debug, Default)]
struct Reservoir {
    /// Most recent values, bounded to `HISTOGRAM_CAPACITY`.
    values: Vec<f64>,
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
}

impl Reservoir {
    fn record(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        self.sum += value;
        if self.values.len() == HISTOGRAM_CAPACITY {
            self.values.remove(0);
        }
        self.values.push(value);
    }

    fn summary(&self) -> Option<HistogramSummary> {
        if self.count == 0 {
            return None;
        }
        let mut sorted = self.values.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let pct = |q: f64| {
            let idx = ((sorted.len() as f64 - 1.0) * q).round() as usize;
            sorted[idx]
        };
        Some(HistogramSummary {
            count: self.count,
            mean: self.sum / self.count as f64,
            p50: pct(0.50),
            p95: pct(0.95),
            min: self.min,
            max: self.max,
        })
    }
}

/// Engine-lifetime statistics registry.
#[derive(Debug, Default)]
pub struct EngineStats {
    search_queries: AtomicU64,
    cache_hits: AtomicU64,
    index_builds: AtomicU64,
    index_build_errors: AtomicU64,
    /// Documents skipped during builds (per-document recovered failures).
    build_doc_failures: AtomicU64,
    response_time_ms: Mutex<Reservoir>,
    build_time_seconds: Mutex<Reservoir>,
}

impl EngineStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// A search completed successfully.
    pub fn record_search(&self, elapsed_ms: f64) {
        self.search_queries.fetch_add(1, Ordering::Relaxed);
        self.response_time_ms.lock().record(elapsed_ms);
        counter!("search_queries_total").increment(1);
        histogram!("search_response_time_ms").record(elapsed_ms);
    }

    /// A search was answered from the cache.
    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        counter!("search_cache_hits_total").increment(1);
    }

    /// A build completed; `doc_failures` documents were skipped.
    pub fn record_build(&self, elapsed_secs: f64, doc_failures: u64) {
        self.index_builds.fetch_add(1, Ordering::Relaxed);
        self.build_doc_failures
            .fetch_add(doc_failures, Ordering::Relaxed);
        self.build_time_seconds.lock().record(elapsed_secs);
        counter!("index_builds_total").increment(1);
        histogram!("index_build_time_seconds").record(elapsed_secs);
    }

    /// A build failed outright.
    pub fn record_build_error(&self) {
        self.index_build_errors.fetch_add(1, Ordering::Relaxed);
        counter!("index_build_errors_total").increment(1);
    }

    pub fn search_queries(&self) -> u64 {
        self.search_queries.load(Ordering::Relaxed)
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    /// Mean search latency in milliseconds over the engine lifetime.
    pub fn avg_response_time_ms(&self) -> f64 {
        let r = self.response_time_ms.lock();
        if r.count == 0 {
            0.0
        } else {
            r.sum / r.count as f64
        }
    }

    /// Snapshot every series, folding in the caller-supplied gauges.
    pub fn snapshot(&self, gauges: BTreeMap<String, f64>) -> MetricsSnapshot {
        let mut counters = BTreeMap::new();
        counters.insert(
            "search_queries_total".into(),
            self.search_queries.load(Ordering::Relaxed),
        );
        counters.insert(
            "search_cache_hits_total".into(),
            self.cache_hits.load(Ordering::Relaxed),
        );
        counters.insert(
            "index_builds_total".into(),
            self.index_builds.load(Ordering::Relaxed),
        );
        counters.insert(
            "index_build_errors_total".into(),
            self.index_build_errors.load(Ordering::Relaxed),
        );
        counters.insert(
            "index_build_doc_failures_total".into(),
            self.build_doc_failures.load(Ordering::Relaxed),
        );

        let mut histograms = BTreeMap::new();
        if let Some(summary) = self.response_time_ms.lock().summary() {
            histograms.insert("search_response_time_ms".into(), summary);
        }
        if let Some(summary) = self.build_time_seconds.lock().summary() {
            histograms.insert("index_build_time_seconds".into(), summary);
        }

        MetricsSnapshot {
            counters,
            gauges,
            histograms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let stats = EngineStats::new();
        stats.record_search(12.0);
        stats.record_search(18.0);
        stats.record_cache_hit();
        let snap = stats.snapshot(BTreeMap::new());
        assert_eq!(snap.counters["search_queries_total"], 2);
        assert_eq!(snap.counters["search_cache_hits_total"], 1);
        assert!((stats.avg_response_time_ms() - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_histogram_summary() {
        let stats = EngineStats::new();
        for v in [10.0, 20.0, 30.0, 40.0, 50.0] {
            stats.record_search(v);
        }
        let snap = stats.snapshot(BTreeMap::new());
        let h = &snap.histograms["search_response_time_ms"];
        assert_eq!(h.count, 5);
        assert!((h.mean - 30.0).abs() < 1e-9);
        assert_eq!(h.min, 10.0);
        assert_eq!(h.max, 50.0);
        assert_eq!(h.p50, 30.0);
    }

    #[test]
    fn test_empty_histograms_omitted() {
        let stats = EngineStats::new();
        let snap = stats.snapshot(BTreeMap::new());
        assert!(snap.histograms.is_empty());
        assert_eq!(snap.counters["index_builds_total"], 0);
    }

    #[test]
    fn test_build_error_counter() {
        let stats = EngineStats::new();
        stats.record_build_error();
        let snap = stats.snapshot(BTreeMap::new());
        assert_eq!(snap.counters["index_build_errors_total"], 1);
    }

    #[test]
    fn test_gauges_passthrough() {
        let stats = EngineStats::new();
        let gauges: BTreeMap<String, f64> = [("corpus_size".to_string(), 42.0)].into();
        let snap = stats.snapshot(gauges);
        assert_eq!(snap.gauges["corpus_size"], 42.0);
    }
}
