//! Per-streamer counters.
//!
//! Updated concurrently by readers and search workers with relaxed atomics;
//! a snapshot is a consistent-enough view for reporting.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct Stats {
    seeks: AtomicU64,
    bytes_read: AtomicU64,
    read_nanos: AtomicU64,
    entries_decoded: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    searches: AtomicU64,
    last_search_micros: AtomicU64,
    index_millis: AtomicU64,
    index_from_disk: AtomicBool,
}

/// Point-in-time copy of [`Stats`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub seeks: u64,
    pub bytes_read: u64,
    pub read_time_us: u64,
    pub entries_decoded: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub searches: u64,
    pub last_search_us: u64,
    pub index_time_ms: u64,
    pub index_from_disk: bool,
}

impl StatsSnapshot {
    /// Cache hit ratio in `[0, 1]`, `None` before any lookup
    pub fn cache_hit_ratio(&self) -> Option<f64> {
        let lookups = self.cache_hits + self.cache_misses;
        (lookups > 0).then(|| self.cache_hits as f64 / lookups as f64)
    }
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_seek(&self) {
        self.seeks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_read(&self, bytes: u64, elapsed: Duration) {
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
        self.read_nanos
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn record_decode(&self) {
        self.entries_decoded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_search(&self, elapsed: Duration) {
        self.searches.fetch_add(1, Ordering::Relaxed);
        self.last_search_micros
            .store(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_index(&self, elapsed: Duration, from_disk: bool) {
        self.index_millis
            .store(elapsed.as_millis() as u64, Ordering::Relaxed);
        self.index_from_disk.store(from_disk, Ordering::Relaxed);
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            seeks: self.seeks.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            read_time_us: self.read_nanos.load(Ordering::Relaxed) / 1_000,
            entries_decoded: self.entries_decoded.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            searches: self.searches.load(Ordering::Relaxed),
            last_search_us: self.last_search_micros.load(Ordering::Relaxed),
            index_time_ms: self.index_millis.load(Ordering::Relaxed),
            index_from_disk: self.index_from_disk.load(Ordering::Relaxed),
        }
    }
}
