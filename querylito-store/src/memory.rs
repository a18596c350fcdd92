use crate::query::{Direction, Filter, Join, Order};
use crate::{Row, SelectQuery, StoreError, TabularStore};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// In-memory [`TabularStore`].
///
/// Tables are vectors of JSON rows joined on an `id` column. Useful as a test
/// double and for seeding lookup data; it supports:
///
/// - equality filters, left joins and stable ordering (nulls last)
/// - an injectable failure returned by every select until cleared
/// - an artificial latency per select
/// - a counter of executed selects
///
/// # Examples
///
/// ```
/// use querylito_store::{Direction, MemoryStore, SelectQuery, TabularStore};
/// use serde_json::json;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let store = MemoryStore::new();
/// store.insert("regions", json!({"id": 2, "name": "South"}));
/// store.insert("regions", json!({"id": 1, "name": "North"}));
///
/// let query = SelectQuery::from_table("regions").order_by("name", Direction::Ascending);
/// let rows = store.select(&query).await.unwrap();
/// assert_eq!(rows[0]["name"], "North");
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, Vec<Row>>>,
    failure: RwLock<Option<StoreError>>,
    latency: RwLock<Option<Duration>>,
    selects: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates `table` (empty) if it doesn't exist yet.
    pub fn create_table(&self, table: &str) {
        self.tables.write().entry(table.to_string()).or_default();
    }

    /// Appends a row to `table`, creating the table if needed.
    /// Non-object values are ignored.
    pub fn insert(&self, table: &str, row: Value) {
        if let Value::Object(row) = row {
            self.tables
                .write()
                .entry(table.to_string())
                .or_default()
                .push(row);
        }
    }

    /// Every subsequent select fails with `error` until [`clear_failure`](Self::clear_failure).
    pub fn fail_with(&self, error: StoreError) {
        *self.failure.write() = Some(error);
    }

    pub fn clear_failure(&self) {
        *self.failure.write() = None;
    }

    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.write() = latency;
    }

    /// Number of selects executed, failed ones included.
    pub fn select_count(&self) -> usize {
        self.selects.load(Ordering::SeqCst)
    }

    fn execute(&self, query: &SelectQuery) -> Result<Vec<Row>, StoreError> {
        if let Some(error) = self.failure.read().clone() {
            return Err(error);
        }

        let tables = self.tables.read();
        let base = tables
            .get(&query.table)
            .ok_or_else(|| StoreError::UnknownTable(query.table.clone()))?;

        let mut rows: Vec<Row> = base
            .iter()
            .filter(|row| query.filters.iter().all(|filter| matches_filter(row, filter)))
            .cloned()
            .collect();

        if let Some(join) = &query.join {
            let related = tables
                .get(&join.table)
                .ok_or_else(|| StoreError::UnknownTable(join.table.clone()))?;
            // every row of the table, not only the filtered ones
            if join.field != join.foreign_key && base.iter().any(|row| row.contains_key(&join.field)) {
                return Err(StoreError::MalformedQuery(format!(
                    "join field `{}` collides with a column of `{}`",
                    join.field, query.table
                )));
            }
            for row in rows.iter_mut() {
                let nested = join_row(row, join, related);
                row.insert(join.field.clone(), nested);
            }
        }

        if let Some(order) = &query.order {
            sort_rows(&mut rows, order);
        }

        Ok(rows)
    }
}

#[async_trait]
impl TabularStore for MemoryStore {
    async fn select(&self, query: &SelectQuery) -> Result<Vec<Row>, StoreError> {
        self.selects.fetch_add(1, Ordering::SeqCst);
        let latency = *self.latency.read();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let result = self.execute(query);
        match &result {
            Ok(rows) => tracing::debug!(table = %query.table, rows = rows.len(), "select"),
            Err(error) => tracing::debug!(table = %query.table, error = %error, "select failed"),
        }
        result
    }
}

fn matches_filter(row: &Row, filter: &Filter) -> bool {
    row.get(&filter.column) == Some(&filter.value)
}

fn join_row(row: &Row, join: &Join, related: &[Row]) -> Value {
    match row.get(&join.foreign_key) {
        Some(fk) if !fk.is_null() => related
            .iter()
            .find(|candidate| candidate.get("id") == Some(fk))
            .map(|candidate| Value::Object(candidate.clone()))
            .unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

fn sort_rows(rows: &mut [Row], order: &Order) {
    rows.sort_by(|a, b| {
        let (a, b) = (a.get(&order.column), b.get(&order.column));
        match (is_null(a), is_null(b)) {
            // nulls last in both directions
            (true, true) => CmpOrdering::Equal,
            (true, false) => CmpOrdering::Greater,
            (false, true) => CmpOrdering::Less,
            (false, false) => {
                let ordering = compare_values(a, b);
                match order.direction {
                    Direction::Ascending => ordering,
                    Direction::Descending => ordering.reverse(),
                }
            }
        }
    });
}

fn is_null(value: Option<&Value>) -> bool {
    value.map_or(true, Value::is_null)
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> CmpOrdering {
    match (a, b) {
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(CmpOrdering::Equal),
        (Some(Value::Bool(a)), Some(Value::Bool(b))) => a.cmp(b),
        (a, b) => a.map(Value::to_string).cmp(&b.map(Value::to_string)),
    }
}
