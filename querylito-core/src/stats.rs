use std::sync::atomic::{AtomicU64, Ordering};

/// Query cache statistics.
///
/// Every subscription that wants data counts as one access: a **hit** when the
/// entry was fresh, a **coalesced** access when it attached to a fetch already
/// in flight, and a **miss** when it started a new fetch.
///
/// # Thread Safety
///
/// All counters are atomics updated with `Relaxed` ordering.
///
/// # Examples
///
/// ```
/// use querylito_core::CacheStats;
///
/// let stats = CacheStats::new();
/// stats.record_hit();
/// stats.record_hit();
/// stats.record_coalesced();
/// stats.record_miss();
///
/// assert_eq!(stats.hits(), 2);
/// assert_eq!(stats.total_accesses(), 4);
/// assert!((stats.hit_rate() - 0.5).abs() < 0.001);
/// ```
#[derive(Debug)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    fetches: AtomicU64,
    retries: AtomicU64,
    failures: AtomicU64,
    evictions: AtomicU64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
            fetches: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Records a subscription served from fresh cached data.
    #[inline]
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a subscription that started a new fetch.
    #[inline]
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a subscription that joined an in-flight fetch.
    #[inline]
    pub fn record_coalesced(&self) {
        self.coalesced.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one invocation of a fetch function (first attempt or retry).
    #[inline]
    pub fn record_fetch(&self) {
        self.fetches.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a fetch that failed after exhausting its retries.
    #[inline]
    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn coalesced(&self) -> u64 {
        self.coalesced.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn fetches(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Hits + coalesced + misses.
    #[inline]
    pub fn total_accesses(&self) -> u64 {
        self.hits() + self.coalesced() + self.misses()
    }

    /// Fraction of accesses that did not start a fetch (hits and coalesced).
    ///
    /// Returns 0.0 if there have been no accesses.
    #[inline]
    pub fn hit_rate(&self) -> f64 {
        let total = self.total_accesses();
        if total == 0 {
            0.0
        } else {
            (self.hits() + self.coalesced()) as f64 / total as f64
        }
    }

    #[inline]
    pub fn miss_rate(&self) -> f64 {
        1.0 - self.hit_rate()
    }

    /// Resets all counters to zero.
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.coalesced.store(0, Ordering::Relaxed);
        self.fetches.store(0, Ordering::Relaxed);
        self.retries.store(0, Ordering::Relaxed);
        self.failures.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
    }
}

impl Default for CacheStats {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for CacheStats {
    fn clone(&self) -> Self {
        Self {
            hits: AtomicU64::new(self.hits()),
            misses: AtomicU64::new(self.misses()),
            coalesced: AtomicU64::new(self.coalesced()),
            fetches: AtomicU64::new(self.fetches()),
            retries: AtomicU64::new(self.retries()),
            failures: AtomicU64::new(self.failures()),
            evictions: AtomicU64::new(self.evictions()),
        }
    }
}
