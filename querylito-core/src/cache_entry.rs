use crate::{CacheKey, QueryError};
use futures::future::BoxFuture;
use std::any::{Any, TypeId};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Type-erased cached value. Entries are typed by the `TypeId` recorded at creation.
pub(crate) type ErasedValue = Arc<dyn Any + Send + Sync>;

/// Type-erased fetch function registered by the latest subscriber of a key.
pub(crate) type Fetcher =
    Arc<dyn Fn() -> BoxFuture<'static, Result<ErasedValue, QueryError>> + Send + Sync>;

static NEXT_ENTRY_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle status of a cache entry.
///
/// ```text
/// Idle ──► Pending ──► Success
///                 └──► Error
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueryStatus {
    /// Created but never fetched (or disabled).
    Idle,
    /// First fetch in flight, no data yet.
    Pending,
    Success,
    Error,
}

impl QueryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryStatus::Idle => "idle",
            QueryStatus::Pending => "pending",
            QueryStatus::Success => "success",
            QueryStatus::Error => "error",
        }
    }
}

impl fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable state of one key, as seen by its subscribers.
///
/// # Fields
///
/// * `status` - Lifecycle status
/// * `data` - Last successful value; kept while refetching and after a failed refetch
/// * `error` - Last error; cleared by the next success
/// * `is_fetching` - True while a fetch for this key is in flight
/// * `data_updated_at` - When `data` was last replaced
/// * `error_updated_at` - When `error` was last set
/// * `failure_count` - Failed attempts of the current (or last) fetch
#[derive(Clone, Debug)]
pub struct QueryState<T> {
    pub status: QueryStatus,
    pub data: Option<T>,
    pub error: Option<QueryError>,
    pub is_fetching: bool,
    pub data_updated_at: Option<Instant>,
    pub error_updated_at: Option<Instant>,
    pub failure_count: u32,
}

impl<T> QueryState<T> {
    pub(crate) fn idle() -> Self {
        Self {
            status: QueryStatus::Idle,
            data: None,
            error: None,
            is_fetching: false,
            data_updated_at: None,
            error_updated_at: None,
            failure_count: 0,
        }
    }

    pub(crate) fn failed(error: QueryError) -> Self {
        Self {
            status: QueryStatus::Error,
            error: Some(error),
            error_updated_at: Some(Instant::now()),
            ..Self::idle()
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == QueryStatus::Success
    }

    pub fn is_error(&self) -> bool {
        self.status == QueryStatus::Error
    }

    pub fn is_pending(&self) -> bool {
        self.status == QueryStatus::Pending
    }

    /// Returns true unless the data is a success younger than `stale_after`.
    pub fn is_stale(&self, stale_after: Duration) -> bool {
        match (self.status, self.data_updated_at) {
            (QueryStatus::Success, Some(updated)) => updated.elapsed() >= stale_after,
            _ => true,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> QueryState<U> {
        QueryState {
            status: self.status,
            data: self.data.map(f),
            error: self.error,
            is_fetching: self.is_fetching,
            data_updated_at: self.data_updated_at,
            error_updated_at: self.error_updated_at,
            failure_count: self.failure_count,
        }
    }
}

impl QueryState<ErasedValue> {
    /// Clones the erased state into a typed one. `data` is `None` on a type mismatch,
    /// which the cache rules out by checking the entry type on subscribe.
    pub(crate) fn typed<T: Clone + 'static>(&self) -> QueryState<T> {
        QueryState {
            status: self.status,
            data: self
                .data
                .as_ref()
                .and_then(|value| value.downcast_ref::<T>())
                .cloned(),
            error: self.error.clone(),
            is_fetching: self.is_fetching,
            data_updated_at: self.data_updated_at,
            error_updated_at: self.error_updated_at,
            failure_count: self.failure_count,
        }
    }
}

/// Internal record of one key in the cache.
///
/// The state lives in a `watch` channel so every subscriber observes each
/// transition. Everything else is bookkeeping only the cache mutates.
pub(crate) struct CacheEntry {
    /// Unique per entry instance; a removed and recreated key gets a new id.
    pub id: u64,
    pub state: watch::Sender<QueryState<ErasedValue>>,
    pub value_type: TypeId,
    pub type_name: &'static str,
    pub fetcher: Option<Fetcher>,
    pub subscribers: usize,
    pub invalidated: bool,
    pub idle_since: Option<Instant>,
    pub gc_time: Option<Duration>,
}

impl CacheEntry {
    pub fn new<T: 'static>(gc_time: Option<Duration>) -> Self {
        let (state, _) = watch::channel(QueryState::idle());
        Self {
            id: NEXT_ENTRY_ID.fetch_add(1, Ordering::Relaxed),
            state,
            value_type: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            fetcher: None,
            subscribers: 0,
            invalidated: false,
            idle_since: Some(Instant::now()),
            gc_time,
        }
    }

    pub fn is_fetching(&self) -> bool {
        self.state.borrow().is_fetching
    }

    /// Fresh means: successful, not invalidated and younger than `stale_after`.
    pub fn is_fresh(&self, stale_after: Duration) -> bool {
        !self.invalidated && !self.state.borrow().is_stale(stale_after)
    }

    /// Idle, not fetching and retained for at least `gc_time`.
    pub fn is_evictable(&self, now: Instant) -> bool {
        if self.subscribers > 0 || self.is_fetching() {
            return false;
        }
        match (self.idle_since, self.gc_time) {
            (Some(since), Some(gc_time)) => now.saturating_duration_since(since) >= gc_time,
            _ => false,
        }
    }

    /// Marks the start of a fetch. Entries without data go back to `Pending`.
    pub fn begin_fetch(&mut self) {
        self.invalidated = false;
        self.state.send_modify(|state| {
            state.is_fetching = true;
            state.failure_count = 0;
            if state.data.is_none() {
                state.status = QueryStatus::Pending;
                state.error = None;
            }
        });
    }

    pub fn record_failed_attempt(&self, failure_count: u32) {
        self.state.send_modify(|state| state.failure_count = failure_count);
    }

    pub fn complete(&mut self, outcome: Result<ErasedValue, QueryError>) {
        let now = Instant::now();
        self.state.send_modify(|state| {
            state.is_fetching = false;
            match outcome {
                Ok(value) => {
                    state.status = QueryStatus::Success;
                    state.data = Some(value);
                    state.error = None;
                    state.data_updated_at = Some(now);
                    state.failure_count = 0;
                }
                Err(error) => {
                    state.status = QueryStatus::Error;
                    state.error = Some(error);
                    state.error_updated_at = Some(now);
                }
            }
        });
        if self.subscribers == 0 {
            self.idle_since = Some(now);
        }
    }

    pub fn info(&self, key: &CacheKey) -> EntryInfo {
        let state = self.state.borrow();
        EntryInfo {
            key: key.clone(),
            status: state.status,
            is_fetching: state.is_fetching,
            subscriber_count: self.subscribers,
            data_updated_at: state.data_updated_at,
            error_updated_at: state.error_updated_at,
            has_data: state.data.is_some(),
            invalidated: self.invalidated,
            type_name: self.type_name,
        }
    }
}

/// Read-only snapshot of an entry, returned by [`QueryCache::peek`](crate::QueryCache::peek).
#[derive(Clone, Debug, PartialEq)]
pub struct EntryInfo {
    pub key: CacheKey,
    pub status: QueryStatus,
    pub is_fetching: bool,
    pub subscriber_count: usize,
    pub data_updated_at: Option<Instant>,
    pub error_updated_at: Option<Instant>,
    pub has_data: bool,
    pub invalidated: bool,
    pub type_name: &'static str,
}
