//! # Querylito
//!
//! A read-through query cache for async Rust, plus cached lookup queries over a
//! tabular store.
//!
//! ## Features
//!
//! - **Request coalescing**: any number of concurrent subscribers to one key share a single fetch
//! - **Stale-while-revalidate**: cached data stays visible while a background refetch runs
//! - **Errors as state**: a failed fetch is retried, then reported to every subscriber
//! - **Idle eviction**: entries nobody observes are dropped after `gc_time`
//! - **Typed lookups**: contacts, prison units and regions validated into record types
//!
//! ## Quick Start
//!
//! ```rust
//! use querylito::prelude::*;
//! use std::convert::Infallible;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let cache = QueryCache::new();
//!
//! let mut handle = cache.subscribe(
//!     cache_key!["answer"],
//!     || async { Ok::<_, Infallible>(42u32) },
//!     cache.default_options(),
//! );
//!
//! // the first subscriber starts the fetch
//! assert!(handle.is_fetching());
//!
//! let state = handle.settled().await;
//! assert_eq!(state.status, QueryStatus::Success);
//! assert_eq!(state.data, Some(42));
//! # }
//! ```
//!
//! ## Lookup queries
//!
//! ```rust
//! use querylito::prelude::*;
//! use querylito::queries;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let store = Arc::new(MemoryStore::new());
//! store.insert("regions", json!({"id": 5, "name": "West"}));
//! store.insert("prison_units", json!({"id": 1, "name": "A wing", "region_id": 5}));
//!
//! let cache = QueryCache::new();
//! let mut units = queries::use_prison_units(&cache, store);
//! let units = units.settled().await.data.unwrap_or_default();
//!
//! assert_eq!(units[0].regions, Region { id: 5, name: "West".to_string() });
//! # }
//! ```
//!
//! ## Configuration
//!
//! | Option        | Default                             |
//! |---------------|-------------------------------------|
//! | `stale_after` | 60 s                                |
//! | `gc_time`     | 5 min                               |
//! | `retry`       | 3 retries, exponential 1 s .. 30 s  |
//! | `enabled`     | `true`                              |
//!
//! A [`CacheConfig`] can be deserialized with serde and turned into a cache
//! with [`QueryCache::with_config`].
//!
//! ## Process-wide cache
//!
//! [`global()`] returns a lazily created cache shared by the whole process;
//! [`reset_global()`] clears it between tests.

pub use querylito_core::*;
pub use querylito_store::{
    decode_rows, queries, records, Contact, Direction, ErrorClass, Filter, Join, MemoryStore,
    Order, PrisonUnit, Region, Row, SelectQuery, StoreError, TabularStore,
};

pub mod prelude {
    //! The types most callers need.
    pub use querylito_core::{
        cache_key, global, CacheKey, QueryCache, QueryError, QueryOptions, QueryState,
        QueryStatus, ResultHandle, RetryPolicy,
    };
    pub use querylito_store::{
        Contact, MemoryStore, PrisonUnit, Region, SelectQuery, StoreError, TabularStore,
    };
}
