//! Per-fetcher counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of a fetcher's activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetcherStats {
    /// Lookups requested.
    pub requests: u64,
    /// Lookups answered by an existing cell.
    pub cache_hits: u64,
    /// Bulk fetch invocations.
    pub batches: u64,
    /// Identifiers sent across all bulk fetches.
    pub dispatched_ids: u64,
    /// Bulk fetches that returned an error.
    pub fetch_errors: u64,
}

impl FetcherStats {
    /// Calculate the cache hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.cache_hits as f64 / self.requests as f64
        }
    }

    /// Average identifiers per bulk fetch.
    pub fn mean_batch_size(&self) -> f64 {
        if self.batches == 0 {
            0.0
        } else {
            self.dispatched_ids as f64 / self.batches as f64
        }
    }

    /// Sum two snapshots, for aggregating across fetchers.
    pub fn merge(&self, other: &FetcherStats) -> FetcherStats {
        FetcherStats {
            requests: self.requests + other.requests,
            cache_hits: self.cache_hits + other.cache_hits,
            batches: self.batches + other.batches,
            dispatched_ids: self.dispatched_ids + other.dispatched_ids,
            fetch_errors: self.fetch_errors + other.fetch_errors,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    requests: AtomicU64,
    cache_hits: AtomicU64,
    batches: AtomicU64,
    dispatched_ids: AtomicU64,
    fetch_errors: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn record_request(&self, hit: bool) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_dispatch(&self, ids: usize) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.dispatched_ids.fetch_add(ids as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_fetch_error(&self) {
        self.fetch_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> FetcherStats {
        FetcherStats {
            requests: self.requests.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
            dispatched_ids: self.dispatched_ids.load(Ordering::Relaxed),
            fetch_errors: self.fetch_errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate_and_mean() {
        let stats = FetcherStats {
            requests: 10,
            cache_hits: 4,
            batches: 2,
            dispatched_ids: 6,
            fetch_errors: 0,
        };
        assert!((stats.hit_rate() - 0.4).abs() < 0.001);
        assert!((stats.mean_batch_size() - 3.0).abs() < 0.001);

        let empty = FetcherStats::default();
        assert!((empty.hit_rate() - 0.0).abs() < 0.001);
        assert!((empty.mean_batch_size() - 0.0).abs() < 0.001);
    }

    #[test]
    fn test_counters_snapshot_and_merge() {
        let counters = StatsCounters::default();
        counters.record_request(false);
        counters.record_request(true);
        counters.record_dispatch(1);
        counters.record_fetch_error();

        let snap = counters.snapshot();
        assert_eq!(snap.requests, 2);
        assert_eq!(snap.cache_hits, 1);
        assert_eq!(snap.batches, 1);
        assert_eq!(snap.dispatched_ids, 1);
        assert_eq!(snap.fetch_errors, 1);

        let merged = snap.merge(&snap);
        assert_eq!(merged.requests, 4);
        assert_eq!(merged.fetch_errors, 2);
    }
}
