use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default freshness window: subscriptions within this window reuse cached data.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(60);

/// Default idle-retention period before an unobserved entry is evicted.
pub const DEFAULT_GC_TIME: Duration = Duration::from_secs(5 * 60);

/// Default number of automatic retries after a failed fetch.
pub const DEFAULT_RETRIES: u32 = 3;

pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Delay strategy between fetch attempts.
///
/// # Examples
///
/// ```
/// use querylito_core::Backoff;
/// use std::time::Duration;
///
/// let backoff = Backoff::Exponential {
///     base: Duration::from_millis(100),
///     max: Duration::from_millis(350),
/// };
/// assert_eq!(backoff.delay(0), Duration::from_millis(100));
/// assert_eq!(backoff.delay(1), Duration::from_millis(200));
/// assert_eq!(backoff.delay(2), Duration::from_millis(350));
///
/// assert_eq!(Backoff::Fixed(Duration::from_secs(2)).delay(7), Duration::from_secs(2));
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay before every retry.
    Fixed(Duration),
    /// `base * 2^attempt`, capped at `max`.
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    /// Delay before retry number `attempt + 1` (attempt is zero-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { base, max } => {
                let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
                base.saturating_mul(factor).min(max)
            }
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Exponential {
            base: DEFAULT_RETRY_DELAY,
            max: DEFAULT_MAX_RETRY_DELAY,
        }
    }
}

/// How many times a failed fetch is retried, and how long to wait in between.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub backoff: Backoff,
    /// Scale each delay by a random factor in `[0.5, 1.0]`.
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn new(retries: u32) -> Self {
        Self {
            retries,
            ..Self::default()
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(0)
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay to wait after failed attempt number `attempt` (zero-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.backoff.delay(attempt);
        if self.jitter {
            delay.mul_f64(0.5 + fastrand::f64() * 0.5)
        } else {
            delay
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: DEFAULT_RETRIES,
            backoff: Backoff::default(),
            jitter: false,
        }
    }
}

/// Per-subscription options.
///
/// # Examples
///
/// ```
/// use querylito_core::{QueryOptions, RetryPolicy};
/// use std::time::Duration;
///
/// let options = QueryOptions::default()
///     .with_stale_after(Duration::from_secs(10))
///     .with_retry(RetryPolicy::none())
///     .with_enabled(true);
///
/// assert_eq!(options.stale_after, Duration::from_secs(10));
/// assert_eq!(options.retry.retries, 0);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueryOptions {
    /// Freshness window of a successful result.
    pub stale_after: Duration,
    /// Idle-retention period; `None` keeps idle entries until removed explicitly.
    pub gc_time: Option<Duration>,
    pub retry: RetryPolicy,
    /// When false the subscription never triggers a fetch. A new key reports
    /// `Idle`; an existing key reports its current state (cached data, or an
    /// in-flight fetch started by another subscriber).
    pub enabled: bool,
}

impl QueryOptions {
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn with_gc_time(mut self, gc_time: Option<Duration>) -> Self {
        self.gc_time = gc_time;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retry.retries = retries;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            stale_after: DEFAULT_STALE_AFTER,
            gc_time: Some(DEFAULT_GC_TIME),
            retry: RetryPolicy::default(),
            enabled: true,
        }
    }
}

/// Serializable cache configuration.
///
/// Durations are expressed in milliseconds so the struct can be embedded in
/// JSON/TOML/YAML application configs. Missing fields fall back to the defaults.
///
/// # Examples
///
/// ```
/// use querylito_core::CacheConfig;
/// use std::time::Duration;
///
/// let config: CacheConfig = serde_json::from_str(r#"{ "stale_after_ms": 5000, "retry": 1 }"#).unwrap();
/// let options = config.query_options();
/// assert_eq!(options.stale_after, Duration::from_secs(5));
/// assert_eq!(options.retry.retries, 1);
/// assert_eq!(options.gc_time, Some(Duration::from_secs(300)));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Name under which the cache registers its statistics.
    pub name: Option<String>,
    pub stale_after_ms: u64,
    /// `null` disables idle eviction.
    pub gc_time_ms: Option<u64>,
    pub retry: u32,
    pub retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    pub retry_jitter: bool,
}

impl CacheConfig {
    pub fn query_options(&self) -> QueryOptions {
        QueryOptions {
            stale_after: Duration::from_millis(self.stale_after_ms),
            gc_time: self.gc_time_ms.map(Duration::from_millis),
            retry: RetryPolicy {
                retries: self.retry,
                backoff: Backoff::Exponential {
                    base: Duration::from_millis(self.retry_delay_ms),
                    max: Duration::from_millis(self.max_retry_delay_ms),
                },
                jitter: self.retry_jitter,
            },
            enabled: true,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name: None,
            stale_after_ms: DEFAULT_STALE_AFTER.as_millis() as u64,
            gc_time_ms: Some(DEFAULT_GC_TIME.as_millis() as u64),
            retry: DEFAULT_RETRIES,
            retry_delay_ms: DEFAULT_RETRY_DELAY.as_millis() as u64,
            max_retry_delay_ms: DEFAULT_MAX_RETRY_DELAY.as_millis() as u64,
            retry_jitter: false,
        }
    }
}
