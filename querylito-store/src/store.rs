use crate::{SelectQuery, StoreError};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::sync::Arc;

/// One row as returned by the store: column name to JSON value.
pub type Row = Map<String, Value>;

/// Read-only access to an external tabular store.
///
/// Implementations execute one [`SelectQuery`] per call and return the rows in
/// the requested order. Schema, storage and auth belong to the store.
#[async_trait]
pub trait TabularStore: Send + Sync {
    async fn select(&self, query: &SelectQuery) -> Result<Vec<Row>, StoreError>;
}

#[async_trait]
impl<S: TabularStore + ?Sized> TabularStore for Arc<S> {
    async fn select(&self, query: &SelectQuery) -> Result<Vec<Row>, StoreError> {
        (**self).select(query).await
    }
}

/// Validates `rows` of `table` into typed records.
///
/// The first row that does not fit `T` fails the whole batch.
pub fn decode_rows<T: DeserializeOwned>(table: &str, rows: Vec<Row>) -> Result<Vec<T>, StoreError> {
    rows.into_iter()
        .map(|row| {
            serde_json::from_value(Value::Object(row)).map_err(|err| StoreError::InvalidRecord {
                table: table.to_string(),
                reason: err.to_string(),
            })
        })
        .collect()
}
