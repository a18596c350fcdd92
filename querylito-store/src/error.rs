use thiserror::Error;

/// Coarse classification of store failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Network or transport failure.
    Fetch,
    /// Malformed request, permission problem or bad data.
    Query,
}

/// Errors returned by a [`TabularStore`](crate::TabularStore) or by row validation.
///
/// An empty result is not an error: a query matching nothing returns an empty `Vec`.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("{0}")]
    Transport(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("malformed query: {0}")]
    MalformedQuery(String),

    #[error("unknown table `{0}`")]
    UnknownTable(String),

    /// A row did not match the record type declared for its table.
    #[error("invalid `{table}` record: {reason}")]
    InvalidRecord { table: String, reason: String },
}

impl StoreError {
    /// Informational only: a cached lookup retries every failure according to
    /// its [`RetryPolicy`](querylito_core::RetryPolicy), whatever the class.
    pub fn class(&self) -> ErrorClass {
        match self {
            StoreError::Transport(_) => ErrorClass::Fetch,
            StoreError::PermissionDenied(_)
            | StoreError::MalformedQuery(_)
            | StoreError::UnknownTable(_)
            | StoreError::InvalidRecord { .. } => ErrorClass::Query,
        }
    }

    pub fn is_transport(&self) -> bool {
        self.class() == ErrorClass::Fetch
    }
}
