use serde_json::Value;

/// Sort direction of an [`Order`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// Left join of one related table.
///
/// The related row whose `id` equals the base row's `foreign_key` column is
/// nested under `field`; `field` is `null` when there is no match.
#[derive(Clone, Debug, PartialEq)]
pub struct Join {
    pub table: String,
    pub foreign_key: String,
    pub field: String,
}

impl Join {
    /// Joins `table` through `foreign_key`, nesting the match under the table name.
    pub fn new(table: impl Into<String>, foreign_key: impl Into<String>) -> Self {
        let table = table.into();
        Self {
            field: table.clone(),
            table,
            foreign_key: foreign_key.into(),
        }
    }

    pub fn as_field(mut self, field: impl Into<String>) -> Self {
        self.field = field.into();
        self
    }
}

/// Equality predicate on one column. Rows missing the column never match.
#[derive(Clone, Debug, PartialEq)]
pub struct Filter {
    pub column: String,
    pub value: Value,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Order {
    pub column: String,
    pub direction: Direction,
}

/// A read-only select over one table: all columns, at most one join,
/// equality filters and an optional ordering.
///
/// # Examples
///
/// ```
/// use querylito_store::{Direction, Join, SelectQuery};
///
/// let query = SelectQuery::from_table("contacts")
///     .join(Join::new("regions", "region_id"))
///     .eq("active", true)
///     .order_by("name", Direction::Ascending);
///
/// assert_eq!(query.table, "contacts");
/// assert_eq!(query.filters.len(), 1);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct SelectQuery {
    pub table: String,
    pub join: Option<Join>,
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
}

impl SelectQuery {
    pub fn from_table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            join: None,
            filters: Vec::new(),
            order: None,
        }
    }

    pub fn join(mut self, join: Join) -> Self {
        self.join = Some(join);
        self
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            column: column.into(),
            value: value.into(),
        });
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, direction: Direction) -> Self {
        self.order = Some(Order {
            column: column.into(),
            direction,
        });
        self
    }
}
