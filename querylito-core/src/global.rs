//! Process-wide query cache.
//!
//! The global cache is created lazily on first use and lives until the process
//! exits. Tests share it, so they must call [`reset_global`] to start clean.

use crate::QueryCache;
use once_cell::sync::Lazy;

static GLOBAL_CACHE: Lazy<QueryCache> = Lazy::new(|| {
    tracing::debug!("initialising global query cache");
    QueryCache::new()
});

/// Returns the process-wide [`QueryCache`].
///
/// # Examples
///
/// ```
/// use querylito_core::{global, QueryCache};
///
/// assert!(std::ptr::eq(global(), QueryCache::global()));
/// ```
pub fn global() -> &'static QueryCache {
    &GLOBAL_CACHE
}

/// Removes every entry of the global cache.
pub fn reset_global() {
    GLOBAL_CACHE.clear();
    #[cfg(feature = "stats")]
    GLOBAL_CACHE.stats().reset();
}
