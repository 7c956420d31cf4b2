//! Cache statistics

use serde::Serialize;

/// Snapshot of cache usage
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Entries currently indexed
    pub entry_count: usize,
    /// Sum of `size_bytes` over all entries
    pub total_size_bytes: u64,
    /// Reads that returned a live value
    pub hits: u64,
    /// Reads that found nothing or an expired entry
    pub misses: u64,
    /// Entries removed by capacity enforcement
    pub evictions: u64,
}

impl CacheStats {
    /// hits / (hits + misses), or 0.0 before any read
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub(crate) fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub(crate) fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub(crate) fn record_eviction(&mut self) {
        self.evictions += 1;
    }
}
