use crate::CacheKey;
use std::error::Error as StdError;
use std::sync::Arc;
use thiserror::Error;

/// Source error of a failed fetch, shared by every subscriber of the key.
pub type SharedError = Arc<dyn StdError + Send + Sync + 'static>;

/// Error state reported by a [`ResultHandle`](crate::ResultHandle).
///
/// Errors are never thrown across the cache boundary: they are stored in the
/// entry and cloned out to every subscriber, which is why this type is `Clone`.
///
/// # Examples
///
/// ```
/// use querylito_core::QueryError;
/// use std::io;
///
/// let err = QueryError::fetch(io::Error::new(io::ErrorKind::Other, "network down"));
/// assert_eq!(err.message(), "network down");
/// assert!(err.downcast_ref::<io::Error>().is_some());
/// ```
#[derive(Clone, Debug, Error)]
pub enum QueryError {
    /// The fetch function failed on every attempt.
    #[error("{0}")]
    Fetch(SharedError),

    /// The key already holds a value of a different type.
    #[error("cache key {key} holds `{cached}`, not `{requested}`")]
    TypeMismatch {
        key: CacheKey,
        cached: &'static str,
        requested: &'static str,
    },

    #[error("no async runtime available to fetch {0}")]
    NoRuntime(CacheKey),

    #[error("fetch for {0} panicked")]
    Panicked(CacheKey),

    /// The fetch task was dropped before it settled, e.g. its runtime shut down.
    #[error("fetch for {0} was cancelled before it settled")]
    Cancelled(CacheKey),

    /// The entry was removed from the cache before its fetch settled.
    #[error("entry for {0} was removed before the fetch settled")]
    Evicted(CacheKey),
}

impl QueryError {
    pub fn fetch<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        QueryError::Fetch(Arc::new(err))
    }

    /// Human readable message; for fetch failures this is the source's message.
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// Returns the fetch source error as `E`, if it is one.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: StdError + 'static,
    {
        match self {
            QueryError::Fetch(source) => source.downcast_ref::<E>(),
            _ => None,
        }
    }

    /// Returns true if both errors are the same shared fetch failure.
    pub fn is_same_failure(&self, other: &QueryError) -> bool {
        match (self, other) {
            (QueryError::Fetch(a), QueryError::Fetch(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}
