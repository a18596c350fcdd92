use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::CacheStats;

/// Global registry for cache statistics, indexed by cache name.
///
/// Caches built from a [`CacheConfig`](crate::CacheConfig) with a `name`
/// register their statistics here, so they can be inspected without holding
/// the cache itself.
///
/// # Examples
///
/// ```
/// use querylito_core::stats_registry;
///
/// if let Some(stats) = stats_registry::get("lookups") {
///     println!("Hits: {}", stats.hits());
/// }
///
/// for name in stats_registry::list() {
///     println!("Cache: {}", name);
/// }
/// ```
static STATS_REGISTRY: Lazy<RwLock<HashMap<String, Arc<CacheStats>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Register a cache's statistics under `name`, replacing any previous registration.
pub fn register(name: &str, stats: Arc<CacheStats>) {
    STATS_REGISTRY.write().insert(name.to_string(), stats);
}

/// Snapshot of the statistics registered under `name`.
pub fn get(name: &str) -> Option<CacheStats> {
    STATS_REGISTRY
        .read()
        .get(name)
        .map(|stats| (**stats).clone())
}

/// Shared handle to the live statistics registered under `name`.
pub fn get_shared(name: &str) -> Option<Arc<CacheStats>> {
    STATS_REGISTRY.read().get(name).cloned()
}

/// All registered cache names.
pub fn list() -> Vec<String> {
    STATS_REGISTRY.read().keys().cloned().collect()
}

/// Removes every registration. The statistics themselves are not reset.
pub fn clear() {
    STATS_REGISTRY.write().clear();
}

/// Resets the counters registered under `name`. Returns false if unknown.
pub fn reset(name: &str) -> bool {
    match STATS_REGISTRY.read().get(name) {
        Some(stats) => {
            stats.reset();
            true
        }
        None => false,
    }
}
