use crate::cache_entry::ErasedValue;
use crate::query_cache::Inner;
use crate::{CacheKey, QueryError, QueryState, QueryStatus, RetryPolicy};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::watch;

/// A live subscription to one cache key.
///
/// The handle always reflects the latest state of the shared entry: reads are
/// synchronous snapshots, [`changed`](Self::changed) and [`settled`](Self::settled)
/// wait for the next transitions.
///
/// Dropping the handle removes the subscription. It never cancels a fetch.
pub struct ResultHandle<T> {
    key: CacheKey,
    entry_id: u64,
    receiver: watch::Receiver<QueryState<ErasedValue>>,
    cache: Option<Arc<Inner>>,
    retry: RetryPolicy,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Clone + Send + Sync + 'static> ResultHandle<T> {
    pub(crate) fn attached(
        key: CacheKey,
        entry_id: u64,
        receiver: watch::Receiver<QueryState<ErasedValue>>,
        cache: Arc<Inner>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            key,
            entry_id,
            receiver,
            cache: Some(cache),
            retry,
            _marker: PhantomData,
        }
    }

    /// A handle not backed by any entry, frozen in the error state.
    pub(crate) fn detached(key: CacheKey, error: QueryError) -> Self {
        let (_sender, receiver) = watch::channel(QueryState::failed(error));
        Self {
            key,
            entry_id: 0,
            receiver,
            cache: None,
            retry: RetryPolicy::none(),
            _marker: PhantomData,
        }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn status(&self) -> QueryStatus {
        self.receiver.borrow().status
    }

    /// Last successful value, kept while a refetch is in flight.
    pub fn data(&self) -> Option<T> {
        self.receiver
            .borrow()
            .data
            .as_ref()
            .and_then(|value| value.downcast_ref::<T>())
            .cloned()
    }

    pub fn error(&self) -> Option<QueryError> {
        self.receiver.borrow().error.clone()
    }

    pub fn is_fetching(&self) -> bool {
        self.receiver.borrow().is_fetching
    }

    /// Snapshot of the whole state.
    pub fn state(&self) -> QueryState<T> {
        self.receiver.borrow().typed::<T>()
    }

    /// Waits for the next state transition. Returns `None` once the entry is
    /// gone (removed or evicted) and no further updates can arrive.
    pub async fn changed(&mut self) -> Option<QueryState<T>> {
        self.receiver.changed().await.ok()?;
        Some(self.state())
    }

    /// Waits until no fetch is in flight and returns the resulting state.
    ///
    /// Returns immediately when nothing is fetching (including disabled queries).
    /// If the entry is removed mid-fetch the returned state still has
    /// `is_fetching == true`.
    pub async fn settled(&mut self) -> QueryState<T> {
        let _ = self.receiver.wait_for(|state| !state.is_fetching).await;
        self.state()
    }

    /// Fetches again regardless of freshness, with the latest registered fetch
    /// function. Returns false if a fetch is already in flight (the caller is
    /// then served by it) or the entry no longer exists.
    pub fn refetch(&self) -> bool {
        match &self.cache {
            Some(cache) => cache.refetch(&self.key, self.entry_id, self.retry),
            None => false,
        }
    }
}

impl<T> Drop for ResultHandle<T> {
    fn drop(&mut self) {
        if let Some(cache) = &self.cache {
            cache.release(&self.key, self.entry_id);
        }
    }
}

impl<T> fmt::Debug for ResultHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.receiver.borrow();
        f.debug_struct("ResultHandle")
            .field("key", &self.key)
            .field("status", &state.status)
            .field("is_fetching", &state.is_fetching)
            .finish()
    }
}
