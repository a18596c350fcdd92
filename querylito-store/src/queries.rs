//! The lookup queries: contacts, prison units and regions.
//!
//! Each lookup has a cache key, a [`SelectQuery`], a `fetch_*` function that
//! runs the query against a [`TabularStore`] and validates the rows, and a
//! `use_*` function subscribing to it through a [`QueryCache`].

use crate::records::{Contact, PrisonUnit, Region};
use crate::{decode_rows, Direction, Join, SelectQuery, StoreError, TabularStore};
use querylito_core::{CacheKey, QueryCache, QueryOptions, ResultHandle};
use std::sync::Arc;

pub const CONTACTS: &str = "contacts";
pub const PRISON_UNITS: &str = "prison_units";
pub const REGIONS: &str = "regions";

pub fn contacts_key() -> CacheKey {
    CacheKey::from(CONTACTS)
}

pub fn prison_units_key() -> CacheKey {
    CacheKey::from(PRISON_UNITS)
}

pub fn regions_key() -> CacheKey {
    CacheKey::from(REGIONS)
}

/// Active contacts with their region, by name.
pub fn contacts_query() -> SelectQuery {
    SelectQuery::from_table(CONTACTS)
        .join(Join::new(REGIONS, "region_id"))
        .eq("active", true)
        .order_by("name", Direction::Ascending)
}

/// Prison units with their region, by name.
pub fn prison_units_query() -> SelectQuery {
    SelectQuery::from_table(PRISON_UNITS)
        .join(Join::new(REGIONS, "region_id"))
        .order_by("name", Direction::Ascending)
}

pub fn regions_query() -> SelectQuery {
    SelectQuery::from_table(REGIONS).order_by("name", Direction::Ascending)
}

async fn fetch_records<T, S>(store: &S, query: SelectQuery) -> Result<Vec<T>, StoreError>
where
    T: serde::de::DeserializeOwned,
    S: TabularStore + ?Sized,
{
    let rows = store.select(&query).await?;
    tracing::trace!(table = %query.table, rows = rows.len(), "decoding rows");
    decode_rows(&query.table, rows)
}

pub async fn fetch_contacts<S: TabularStore + ?Sized>(store: &S) -> Result<Vec<Contact>, StoreError> {
    fetch_records(store, contacts_query()).await
}

pub async fn fetch_prison_units<S: TabularStore + ?Sized>(
    store: &S,
) -> Result<Vec<PrisonUnit>, StoreError> {
    fetch_records(store, prison_units_query()).await
}

pub async fn fetch_regions<S: TabularStore + ?Sized>(store: &S) -> Result<Vec<Region>, StoreError> {
    fetch_records(store, regions_query()).await
}

/// Subscribes to the contacts lookup with the cache's default options.
///
/// # Examples
///
/// ```
/// use querylito_core::{QueryCache, QueryStatus};
/// use querylito_store::{queries, MemoryStore};
/// use serde_json::json;
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let store = Arc::new(MemoryStore::new());
/// store.create_table("regions");
/// store.insert("contacts", json!({"id": 1, "name": "A", "active": true}));
/// store.insert("contacts", json!({"id": 2, "name": "B", "active": false}));
///
/// let cache = QueryCache::new();
/// let mut contacts = queries::use_contacts(&cache, store);
/// let state = contacts.settled().await;
///
/// assert_eq!(state.status, QueryStatus::Success);
/// assert_eq!(state.data.unwrap().len(), 1);
/// # }
/// ```
pub fn use_contacts<S>(cache: &QueryCache, store: Arc<S>) -> ResultHandle<Vec<Contact>>
where
    S: TabularStore + ?Sized + 'static,
{
    use_contacts_with(cache, store, cache.default_options())
}

pub fn use_contacts_with<S>(
    cache: &QueryCache,
    store: Arc<S>,
    options: QueryOptions,
) -> ResultHandle<Vec<Contact>>
where
    S: TabularStore + ?Sized + 'static,
{
    cache.subscribe(
        contacts_key(),
        move || {
            let store = Arc::clone(&store);
            async move { fetch_contacts(&*store).await }
        },
        options,
    )
}

pub fn use_prison_units<S>(cache: &QueryCache, store: Arc<S>) -> ResultHandle<Vec<PrisonUnit>>
where
    S: TabularStore + ?Sized + 'static,
{
    use_prison_units_with(cache, store, cache.default_options())
}

pub fn use_prison_units_with<S>(
    cache: &QueryCache,
    store: Arc<S>,
    options: QueryOptions,
) -> ResultHandle<Vec<PrisonUnit>>
where
    S: TabularStore + ?Sized + 'static,
{
    cache.subscribe(
        prison_units_key(),
        move || {
            let store = Arc::clone(&store);
            async move { fetch_prison_units(&*store).await }
        },
        options,
    )
}

pub fn use_regions<S>(cache: &QueryCache, store: Arc<S>) -> ResultHandle<Vec<Region>>
where
    S: TabularStore + ?Sized + 'static,
{
    use_regions_with(cache, store, cache.default_options())
}

pub fn use_regions_with<S>(
    cache: &QueryCache,
    store: Arc<S>,
    options: QueryOptions,
) -> ResultHandle<Vec<Region>>
where
    S: TabularStore + ?Sized + 'static,
{
    cache.subscribe(
        regions_key(),
        move || {
            let store = Arc::clone(&store);
            async move { fetch_regions(&*store).await }
        },
        options,
    )
}
