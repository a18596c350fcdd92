use crate::cache_entry::{CacheEntry, ErasedValue, Fetcher};
use crate::{
    CacheConfig, CacheKey, CacheStats, EntryInfo, InvalidationScope, QueryError, QueryOptions,
    QueryStatus, ResultHandle, RetryPolicy,
};
use dashmap::DashMap;
use futures::FutureExt;
use std::any::TypeId;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::time::Instant;

#[cfg(feature = "stats")]
use crate::stats_registry;

/// A read-through query cache with request coalescing.
///
/// Each [`CacheKey`] maps to one entry. Subscribing to a key returns a
/// [`ResultHandle`] and, depending on the entry state, does one of:
///
/// - **Fresh hit**: the last success is younger than `stale_after`; nothing is fetched
/// - **Coalesce**: a fetch for the key is already in flight; the subscriber joins it
/// - **Fetch**: the entry is missing, stale, invalidated or failed; exactly one fetch
///   is spawned and its outcome is broadcast to every subscriber of the key
///
/// Stale data stays visible while the refetch runs (stale-while-revalidate).
///
/// # Fetch Execution
///
/// Fetches run on spawned tokio tasks, so they finish even when every subscriber
/// has gone away; the result then populates the cache for later subscribers.
/// Failed attempts are retried according to the subscription's [`RetryPolicy`].
/// A fetch that still fails is stored as [`QueryStatus::Error`]; nothing is thrown.
///
/// # Eviction
///
/// An entry with no subscribers and no fetch in flight becomes idle. After
/// `gc_time` it is removed by a timer task (or by [`collect_garbage`](Self::collect_garbage)).
///
/// # Thread Safety
///
/// Entries live in a `DashMap`. The decision to start a fetch is taken while
/// holding the entry's shard lock, which guarantees at most one fetch in flight
/// per key even on a multi-threaded runtime. `QueryCache` is a cheap `Clone`.
///
/// # Examples
///
/// ```
/// use querylito_core::{cache_key, QueryCache, QueryStatus};
/// use std::convert::Infallible;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let cache = QueryCache::new();
///
/// let mut handle = cache.subscribe(
///     cache_key!["regions"],
///     || async { Ok::<_, Infallible>(vec!["North".to_string(), "South".to_string()]) },
///     cache.default_options(),
/// );
///
/// let state = handle.settled().await;
/// assert_eq!(state.status, QueryStatus::Success);
/// assert_eq!(state.data.unwrap().len(), 2);
/// # }
/// ```
#[derive(Clone)]
pub struct QueryCache {
    inner: Arc<Inner>,
}

pub(crate) struct Inner {
    entries: DashMap<CacheKey, CacheEntry>,
    defaults: QueryOptions,
    #[cfg(feature = "stats")]
    stats: Arc<CacheStats>,
}

/// Outcome of attaching a subscriber to an entry.
struct Attached {
    entry_id: u64,
    receiver: watch::Receiver<crate::QueryState<ErasedValue>>,
    spawn: Option<(Handle, Fetcher)>,
}

impl QueryCache {
    /// Creates a cache with [`QueryOptions::default`] as default options.
    pub fn new() -> Self {
        Self::with_options(QueryOptions::default())
    }

    pub fn with_options(defaults: QueryOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: DashMap::new(),
                defaults,
                #[cfg(feature = "stats")]
                stats: Arc::new(CacheStats::new()),
            }),
        }
    }

    /// Creates a cache from a [`CacheConfig`]. A named config also registers
    /// the cache statistics in the [`stats_registry`](crate::stats_registry).
    pub fn with_config(config: &CacheConfig) -> Self {
        let cache = Self::with_options(config.query_options());
        #[cfg(feature = "stats")]
        {
            if let Some(name) = &config.name {
                stats_registry::register(name, Arc::clone(&cache.inner.stats));
            }
        }
        cache
    }

    /// The process-wide cache. See [`global`](crate::global).
    pub fn global() -> &'static QueryCache {
        crate::global::global()
    }

    /// Options this cache was built with; used by subscriptions that don't override them.
    pub fn default_options(&self) -> QueryOptions {
        self.inner.defaults
    }

    /// Subscribes to `key`, fetching through `fetch` when the cached entry is not fresh.
    ///
    /// `fetch` must be idempotent: it is invoked zero or more times depending on the
    /// cache state and the retry policy. The latest subscriber's `fetch` is the one
    /// used by later [`ResultHandle::refetch`] calls.
    ///
    /// Never fails: type mismatches and a missing runtime are reported as
    /// [`QueryStatus::Error`] on the returned handle.
    pub fn subscribe<T, F, Fut, E>(
        &self,
        key: impl Into<CacheKey>,
        fetch: F,
        options: QueryOptions,
    ) -> ResultHandle<T>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        let key = key.into();
        let fetcher: Fetcher = Arc::new(move || {
            fetch()
                .map(|result| {
                    result
                        .map(|value| Arc::new(value) as ErasedValue)
                        .map_err(QueryError::fetch)
                })
                .boxed()
        });

        match self.inner.attach::<T>(&key, fetcher, &options) {
            Ok(attached) => {
                if let Some((runtime, fetcher)) = attached.spawn {
                    self.inner
                        .spawn_fetch(&runtime, key.clone(), attached.entry_id, fetcher, options.retry);
                }
                ResultHandle::attached(
                    key,
                    attached.entry_id,
                    attached.receiver,
                    Arc::clone(&self.inner),
                    options.retry,
                )
            }
            Err(error) => {
                tracing::warn!(key = %key, error = %error, "subscription rejected");
                ResultHandle::detached(key, error)
            }
        }
    }

    /// Subscribes and waits for the fetch to settle, returning the data or the error.
    ///
    /// `options.enabled` is ignored: this always fetches when the entry is not fresh.
    pub async fn fetch_query<T, F, Fut, E>(
        &self,
        key: impl Into<CacheKey>,
        fetch: F,
        options: QueryOptions,
    ) -> Result<T, QueryError>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        let mut handle = self.subscribe(key, fetch, options.with_enabled(true));
        let state = handle.settled().await;
        if state.is_fetching {
            return Err(QueryError::Evicted(handle.key().clone()));
        }
        match state.status {
            QueryStatus::Success => state
                .data
                .ok_or_else(|| QueryError::Evicted(handle.key().clone())),
            _ => Err(state
                .error
                .unwrap_or_else(|| QueryError::Evicted(handle.key().clone()))),
        }
    }

    /// Cached data for `key`, without fetching. `None` if absent or of another type.
    pub fn get_data<T: Clone + 'static>(&self, key: &CacheKey) -> Option<T> {
        let entry = self.inner.entries.get(key)?;
        let state = entry.state.borrow();
        state
            .data
            .as_ref()
            .and_then(|value| value.downcast_ref::<T>())
            .cloned()
    }

    pub fn peek(&self, key: &CacheKey) -> Option<EntryInfo> {
        self.inner.entries.get(key).map(|entry| entry.info(key))
    }

    /// Marks `key` stale; the next subscription refetches. Returns false if absent.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.invalidate_scope(&InvalidationScope::Key(key.clone())) > 0
    }

    /// Marks every key starting with `prefix` stale. Returns the number of entries marked.
    pub fn invalidate_prefix(&self, prefix: &CacheKey) -> usize {
        self.invalidate_scope(&InvalidationScope::Prefix(prefix.clone()))
    }

    pub fn invalidate_all(&self) -> usize {
        self.invalidate_scope(&InvalidationScope::All)
    }

    pub fn invalidate_scope(&self, scope: &InvalidationScope) -> usize {
        self.invalidate_where(|key| scope.matches(key))
    }

    /// Marks every key matching `predicate` stale.
    pub fn invalidate_where<P>(&self, predicate: P) -> usize
    where
        P: Fn(&CacheKey) -> bool,
    {
        let mut count = 0;
        for mut entry in self.inner.entries.iter_mut() {
            if predicate(entry.key()) {
                entry.value_mut().invalidated = true;
                count += 1;
            }
        }
        tracing::debug!(count, "invalidated entries");
        count
    }

    /// Removes `key` immediately. Subscribers keep the last state they observed;
    /// an in-flight fetch for the removed entry still runs but its result is dropped.
    pub fn remove(&self, key: &CacheKey) -> bool {
        self.inner.entries.remove(key).is_some()
    }

    /// Removes every idle entry whose retention period has elapsed.
    pub fn collect_garbage(&self) -> usize {
        let now = Instant::now();
        let mut evicted = 0;
        self.inner.entries.retain(|_, entry| {
            let keep = !entry.is_evictable(now);
            if !keep {
                evicted += 1;
            }
            keep
        });
        for _ in 0..evicted {
            self.inner.record(CacheStats::record_eviction);
        }
        if evicted > 0 {
            tracing::debug!(evicted, "collected idle entries");
        }
        evicted
    }

    /// Removes every entry. Used to isolate tests and on shutdown.
    pub fn clear(&self) {
        self.inner.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    pub fn keys(&self) -> Vec<CacheKey> {
        self.inner
            .entries
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    #[cfg(feature = "stats")]
    pub fn stats(&self) -> &CacheStats {
        &self.inner.stats
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryCache")
            .field("entries", &self.inner.entries.len())
            .field("defaults", &self.inner.defaults)
            .finish()
    }
}

impl Inner {
    #[cfg(feature = "stats")]
    #[inline]
    fn record(&self, f: impl FnOnce(&CacheStats)) {
        f(&self.stats);
    }

    #[cfg(not(feature = "stats"))]
    #[inline]
    fn record(&self, _f: impl FnOnce(&CacheStats)) {}

    /// Registers a subscriber and decides, under the entry lock, whether to fetch.
    fn attach<T: 'static>(
        &self,
        key: &CacheKey,
        fetcher: Fetcher,
        options: &QueryOptions,
    ) -> Result<Attached, QueryError> {
        let mut entry = self
            .entries
            .entry(key.clone())
            .or_insert_with(|| CacheEntry::new::<T>(options.gc_time));

        if entry.value_type != TypeId::of::<T>() {
            return Err(QueryError::TypeMismatch {
                key: key.clone(),
                cached: entry.type_name,
                requested: std::any::type_name::<T>(),
            });
        }

        let needs_fetch =
            options.enabled && !entry.is_fetching() && !entry.is_fresh(options.stale_after);
        // checked before any mutation of the entry
        let runtime = match needs_fetch.then(Handle::try_current) {
            Some(Ok(runtime)) => Some(runtime),
            Some(Err(_)) => {
                let entry_id = entry.id;
                drop(entry);
                self.discard_unused(key, entry_id);
                return Err(QueryError::NoRuntime(key.clone()));
            }
            None => None,
        };

        entry.fetcher = Some(Arc::clone(&fetcher));
        entry.subscribers += 1;
        entry.idle_since = None;
        entry.gc_time = options.gc_time;

        let mut attached = Attached {
            entry_id: entry.id,
            receiver: entry.state.subscribe(),
            spawn: None,
        };

        if let Some(runtime) = runtime {
            tracing::debug!(key = %key, "starting fetch");
            self.record(CacheStats::record_miss);
            entry.begin_fetch();
            attached.spawn = Some((runtime, fetcher));
        } else if !options.enabled {
            tracing::trace!(key = %key, "query disabled, not fetching");
        } else if entry.is_fetching() {
            tracing::trace!(key = %key, "joining in-flight fetch");
            self.record(CacheStats::record_coalesced);
        } else {
            tracing::trace!(key = %key, "fresh cache hit");
            self.record(CacheStats::record_hit);
        }

        Ok(attached)
    }

    /// Removes an entry created by a subscription that was then rejected.
    fn discard_unused(&self, key: &CacheKey, entry_id: u64) {
        self.entries
            .remove_if(key, |_, entry| entry.id == entry_id && entry.fetcher.is_none());
    }

    fn spawn_fetch(
        self: &Arc<Self>,
        runtime: &Handle,
        key: CacheKey,
        entry_id: u64,
        fetcher: Fetcher,
        retry: RetryPolicy,
    ) {
        let inner = Arc::clone(self);
        let guard = FetchGuard {
            inner: Arc::clone(self),
            key: key.clone(),
            entry_id,
            armed: true,
        };
        runtime.spawn(async move {
            let mut guard = guard;
            let outcome = inner.run_fetch(&key, entry_id, &fetcher, retry).await;
            guard.armed = false;
            inner.finish_fetch(&key, entry_id, outcome);
        });
    }

    async fn run_fetch(
        &self,
        key: &CacheKey,
        entry_id: u64,
        fetcher: &Fetcher,
        retry: RetryPolicy,
    ) -> Result<ErasedValue, QueryError> {
        let mut attempt = 0u32;
        loop {
            self.record(CacheStats::record_fetch);
            let result = match AssertUnwindSafe(fetcher()).catch_unwind().await {
                Ok(result) => result,
                Err(_) => Err(QueryError::Panicked(key.clone())),
            };
            let error = match result {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            let failures = attempt + 1;
            if let Some(entry) = self.entries.get(key) {
                if entry.id == entry_id {
                    entry.record_failed_attempt(failures);
                }
            }
            if attempt >= retry.retries {
                return Err(error);
            }

            let delay = retry.delay_for(attempt);
            tracing::debug!(
                key = %key,
                attempt = failures,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "fetch failed, retrying"
            );
            self.record(CacheStats::record_retry);
            attempt += 1;
            tokio::time::sleep(delay).await;
        }
    }

    /// Settles an entry whose fetch task was dropped before completing,
    /// e.g. because its runtime shut down.
    fn abandon_fetch(&self, key: &CacheKey, entry_id: u64) {
        let Some(mut entry) = self.entries.get_mut(key) else {
            return;
        };
        if entry.id != entry_id || !entry.is_fetching() {
            return;
        }
        tracing::debug!(key = %key, "fetch task dropped before settling");
        entry.complete(Err(QueryError::Cancelled(key.clone())));
    }

    fn finish_fetch(
        self: &Arc<Self>,
        key: &CacheKey,
        entry_id: u64,
        outcome: Result<ErasedValue, QueryError>,
    ) {
        match &outcome {
            Ok(_) => tracing::debug!(key = %key, "fetch succeeded"),
            Err(error) => {
                tracing::debug!(key = %key, error = %error, "fetch failed");
                self.record(CacheStats::record_failure);
            }
        }

        let gc_time = {
            let Some(mut entry) = self.entries.get_mut(key) else {
                tracing::debug!(key = %key, "entry removed during fetch, dropping result");
                return;
            };
            if entry.id != entry_id {
                return;
            }
            entry.complete(outcome);
            if entry.subscribers == 0 {
                entry.gc_time
            } else {
                None
            }
        };

        if let Some(gc_time) = gc_time {
            self.schedule_gc(key.clone(), entry_id, gc_time);
        }
    }

    /// Starts a fetch for an existing entry unless one is already in flight.
    pub(crate) fn refetch(self: &Arc<Self>, key: &CacheKey, entry_id: u64, retry: RetryPolicy) -> bool {
        let (runtime, fetcher) = {
            let Some(mut entry) = self.entries.get_mut(key) else {
                return false;
            };
            if entry.id != entry_id || entry.is_fetching() {
                return false;
            }
            let Some(fetcher) = entry.fetcher.clone() else {
                return false;
            };
            let Ok(runtime) = Handle::try_current() else {
                return false;
            };
            entry.begin_fetch();
            (runtime, fetcher)
        };

        tracing::debug!(key = %key, "refetch requested");
        self.spawn_fetch(&runtime, key.clone(), entry_id, fetcher, retry);
        true
    }

    /// Drops one subscriber. The last one starts the idle-retention timer.
    pub(crate) fn release(self: &Arc<Self>, key: &CacheKey, entry_id: u64) {
        let gc_time = {
            let Some(mut entry) = self.entries.get_mut(key) else {
                return;
            };
            if entry.id != entry_id {
                return;
            }
            entry.subscribers = entry.subscribers.saturating_sub(1);
            if entry.subscribers > 0 {
                return;
            }
            entry.idle_since = Some(Instant::now());
            // an in-flight fetch schedules eviction when it completes
            if entry.is_fetching() {
                None
            } else {
                entry.gc_time
            }
        };

        if let Some(gc_time) = gc_time {
            self.schedule_gc(key.clone(), entry_id, gc_time);
        }
    }

    fn schedule_gc(self: &Arc<Self>, key: CacheKey, entry_id: u64, gc_time: Duration) {
        let Ok(runtime) = Handle::try_current() else {
            return;
        };
        let inner = Arc::downgrade(self);
        runtime.spawn(async move {
            tokio::time::sleep(gc_time).await;
            if let Some(inner) = inner.upgrade() {
                inner.evict_if_idle(&key, entry_id);
            }
        });
    }

    fn evict_if_idle(&self, key: &CacheKey, entry_id: u64) -> bool {
        let now = Instant::now();
        let evicted = self
            .entries
            .remove_if(key, |_, entry| entry.id == entry_id && entry.is_evictable(now))
            .is_some();
        if evicted {
            tracing::debug!(key = %key, "evicted idle entry");
            self.record(CacheStats::record_eviction);
        }
        evicted
    }
}

/// Lives inside a spawned fetch; settles the entry if the task is dropped early.
struct FetchGuard {
    inner: Arc<Inner>,
    key: CacheKey,
    entry_id: u64,
    armed: bool,
}

impl Drop for FetchGuard {
    fn drop(&mut self) {
        if self.armed {
            self.inner.abandon_fetch(&self.key, self.entry_id);
        }
    }
}
