//! Ambient counters/gauges for queue depth, cache hit rate, and retry counts.
//!
//! Grounded in `scheduling::worker::WorkerHealth`'s plain-struct-behind-a-lock
//! stats shape and the counters implied by `database::cache`'s hit/miss
//! bookkeeping, collapsed into one registry guarded by `parking_lot::RwLock`
//! rather than `tokio::sync::RwLock` since these updates never hold across an
//! await point.

use parking_lot::RwLock;

#[derive(Debug, Clone, Copy, Default)]
struct Counters {
    queue_depth: u64,
    warning_threshold_crossings: u64,
    cache_hits: u64,
    cache_misses: u64,
    retries: u64,
    dead_letter_moves: u64,
}

/// A snapshot of the registry's current values, for diagnostics/tests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsSnapshot {
    /// Current non-terminal job count.
    pub queue_depth: u64,
    /// Number of times the queue's warning threshold has been crossed.
    pub warning_threshold_crossings: u64,
    /// Total cache hits across both tiers.
    pub cache_hits: u64,
    /// Total cache misses.
    pub cache_misses: u64,
    /// Total retry attempts recorded.
    pub retries: u64,
    /// Total jobs moved to the dead-letter partition.
    pub dead_letter_moves: u64,
}

impl MetricsSnapshot {
    /// Cache hit rate in `[0.0, 1.0]`, or `0.0` if no accesses were recorded.
    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }
}

/// Process-wide metrics registry.
#[derive(Default)]
pub struct MetricsRegistry {
    counters: RwLock<Counters>,
}

impl MetricsRegistry {
    /// Construct an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the current queue depth gauge.
    pub fn set_queue_depth(&self, depth: u64) {
        self.counters.write().queue_depth = depth;
    }

    /// Record a crossing of the queue's warning threshold.
    pub fn record_warning_threshold_crossed(&self) {
        self.counters.write().warning_threshold_crossings += 1;
    }

    /// Record a cache hit.
    pub fn record_cache_hit(&self) {
        self.counters.write().cache_hits += 1;
    }

    /// Record a cache miss.
    pub fn record_cache_miss(&self) {
        self.counters.write().cache_misses += 1;
    }

    /// Record a retry attempt.
    pub fn record_retry(&self) {
        self.counters.write().retries += 1;
    }

    /// Record a job moved to the dead-letter partition.
    pub fn record_dead_letter_move(&self) {
        self.counters.write().dead_letter_moves += 1;
    }

    /// Read a consistent snapshot of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let counters = *self.counters.read();
        MetricsSnapshot {
            queue_depth: counters.queue_depth,
            warning_threshold_crossings: counters.warning_threshold_crossings,
            cache_hits: counters.cache_hits,
            cache_misses: counters.cache_misses,
            retries: counters.retries,
            dead_letter_moves: counters.dead_letter_moves,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_hit_rate_is_zero_with_no_accesses() {
        let registry = MetricsRegistry::new();
        assert_eq!(registry.snapshot().cache_hit_rate(), 0.0);
    }

    #[test]
    fn cache_hit_rate_reflects_hits_and_misses() {
        let registry = MetricsRegistry::new();
        registry.record_cache_hit();
        registry.record_cache_hit();
        registry.record_cache_hit();
        registry.record_cache_miss();
        assert_eq!(registry.snapshot().cache_hit_rate(), 0.75);
    }

    #[test]
    fn counters_accumulate() {
        let registry = MetricsRegistry::new();
        registry.set_queue_depth(12);
        registry.record_warning_threshold_crossed();
        registry.record_retry();
        registry.record_dead_letter_move();
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.queue_depth, 12);
        assert_eq!(snapshot.warning_threshold_crossings, 1);
        assert_eq!(snapshot.retries, 1);
        assert_eq!(snapshot.dead_letter_moves, 1);
    }
}
