//! # Querylito Core
//!
//! Read-through query cache for async data fetching.
//!
//! A caller hands the cache a [`CacheKey`] and a fetch function. The cache
//! serves fresh data from memory, otherwise runs exactly one fetch per key and
//! broadcasts the outcome to every subscriber of that key.
//!
//! ## Features
//!
//! - **Request coalescing**: concurrent subscriptions to one key share a single fetch
//! - **Freshness window**: results younger than `stale_after` are served without fetching
//! - **Stale-while-revalidate**: previous data stays visible while a refetch runs
//! - **Retries**: configurable retry count with fixed or exponential backoff
//! - **Errors as state**: failures are stored on the entry, never thrown
//! - **Idle eviction**: unobserved entries are dropped after `gc_time`
//! - **Invalidation**: by key, key prefix or predicate
//! - **Statistics**: hit/miss/coalesce counters (with the `stats` feature)
//!
//! ## Module Organization
//!
//! - `key` - Structural cache keys
//! - `cache_entry` - Entry state and status transitions
//! - `options` - Per-subscription options, retry policy and serializable config
//! - `query_cache` - The cache itself
//! - `handle` - Subscriber handles
//! - [`invalidation`] - Invalidation scopes
//! - [`global`] - Process-wide cache instance
//!
mod cache_entry;
mod error;
mod handle;
mod key;
mod options;
mod query_cache;
mod stats;

pub mod global;
pub mod invalidation;

#[cfg(feature = "stats")]
pub mod stats_registry;

pub use cache_entry::{EntryInfo, QueryState, QueryStatus};
pub use error::{QueryError, SharedError};
pub use global::{global, reset_global};
pub use handle::ResultHandle;
pub use invalidation::InvalidationScope;
pub use key::{CacheKey, KeyPart};
pub use options::{
    Backoff, CacheConfig, QueryOptions, RetryPolicy, DEFAULT_GC_TIME, DEFAULT_MAX_RETRY_DELAY,
    DEFAULT_RETRIES, DEFAULT_RETRY_DELAY, DEFAULT_STALE_AFTER,
};
pub use query_cache::QueryCache;
pub use stats::CacheStats;
