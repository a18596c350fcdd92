//! # Querylito Store
//!
//! The boundary between the query cache and an external tabular store, and the
//! cached lookup queries built on top of it.
//!
//! - [`TabularStore`] - read-only select against a store, one query per call
//! - [`SelectQuery`] - table, one optional left join, equality filters, ordering
//! - [`MemoryStore`] - in-memory store for tests and seeding
//! - [`records`] - typed rows validated at the boundary
//! - [`queries`] - contacts, prison units and regions lookups
//!
//! ```
//! use querylito_core::QueryCache;
//! use querylito_store::{queries, MemoryStore};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let store = Arc::new(MemoryStore::new());
//! store.insert("regions", json!({"id": 2, "name": "South"}));
//! store.insert("regions", json!({"id": 1, "name": "North"}));
//!
//! let cache = QueryCache::new();
//! let mut regions = queries::use_regions(&cache, store);
//! let names: Vec<String> = regions
//!     .settled()
//!     .await
//!     .data
//!     .unwrap_or_default()
//!     .into_iter()
//!     .map(|region| region.name)
//!     .collect();
//!
//! assert_eq!(names, vec!["North", "South"]);
//! # }
//! ```

mod error;
mod memory;
mod query;
mod store;

pub mod queries;
pub mod records;

pub use error::{ErrorClass, StoreError};
pub use memory::MemoryStore;
pub use query::{Direction, Filter, Join, Order, SelectQuery};
pub use records::{Contact, PrisonUnit, Region};
pub use store::{decode_rows, Row, TabularStore};
