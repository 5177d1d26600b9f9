//! Error types for warehouse operations.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WarehouseError {
    /// Connection, constraint or query failure in the relational store.
    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),

    /// Aggregation parameter outside its whitelist. Rejected before any
    /// query runs.
    #[error("Unsupported {parameter} values: {invalid:?}. Allowed values: {allowed:?}")]
    InvalidAggregation {
        parameter: &'static str,
        invalid: Vec<String>,
        allowed: Vec<String>,
    },

    /// A row read back from a dimension table does not fit its key shape.
    #[error("Corrupt row in {table}: {detail}")]
    CorruptRow { table: &'static str, detail: String },

    /// The last refresh failed part way; reads are refused until a refresh
    /// completes.
    #[error("Data unavailable: the last refresh did not complete")]
    RefreshIncomplete,
}

pub type Result<T> = std::result::Result<T, WarehouseError>;
