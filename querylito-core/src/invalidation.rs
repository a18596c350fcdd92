//! # Cache Invalidation
//!
//! Invalidation marks entries stale without dropping their data: the next
//! subscription refetches while still serving the previous value.
//!
//! Entries are selected by an [`InvalidationScope`]:
//! - **Key**: exactly one key
//! - **Prefix**: every key starting with the given parts (e.g. all `["contacts", ..]`)
//! - **All**: every entry
//!
//! # Examples
//!
//! ```
//! use querylito_core::{cache_key, InvalidationScope};
//!
//! let scope = InvalidationScope::Prefix(cache_key!["contacts"]);
//! assert!(scope.matches(&cache_key!["contacts", 3]));
//! assert!(!scope.matches(&cache_key!["regions"]));
//! ```

use crate::CacheKey;

/// Selects which entries an invalidation applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationScope {
    Key(CacheKey),
    Prefix(CacheKey),
    All,
}

impl InvalidationScope {
    pub fn matches(&self, key: &CacheKey) -> bool {
        match self {
            InvalidationScope::Key(exact) => exact == key,
            InvalidationScope::Prefix(prefix) => key.starts_with(prefix),
            InvalidationScope::All => true,
        }
    }
}

impl From<CacheKey> for InvalidationScope {
    fn from(key: CacheKey) -> Self {
        InvalidationScope::Key(key)
    }
}
