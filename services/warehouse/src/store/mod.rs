//! Persistence seam for the star schema.
//!
//! [`PgWarehouse`] talks to Postgres through `sqlx`; [`MemoryWarehouse`] keeps
//! the same tables in process for dry runs and tests.

mod memory;
mod postgres;

pub use memory::MemoryWarehouse;
pub use postgres::PgWarehouse;

use crate::aggregation::{AggregationPlan, ChartRow};
use crate::dimension::{DimensionTable, KeyPart, StoredKey};
use crate::error::Result;
use crate::model::FactRow;
use async_trait::async_trait;

#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Create the dimension and fact tables if they do not exist.
    async fn ensure_schema(&self) -> Result<()>;

    /// Delete every fact row.
    async fn clear_facts(&self) -> Result<()>;

    /// Delete every dimension row. Facts must be cleared first.
    async fn clear_dimensions(&self) -> Result<()>;

    /// All rows of a dimension table, ordered by id.
    async fn load_dimension(&self, table: &'static DimensionTable) -> Result<Vec<StoredKey>>;

    /// Bulk-insert natural keys, returning each generated id with the key
    /// it was assigned to.
    async fn insert_dimension(
        &self,
        table: &'static DimensionTable,
        rows: &[Vec<KeyPart>],
    ) -> Result<Vec<StoredKey>>;

    /// Bulk-insert fact rows, returning the number inserted.
    async fn insert_facts(&self, facts: &[FactRow]) -> Result<u64>;

    /// Execute an aggregation plan, one row per group.
    async fn aggregate(&self, plan: &AggregationPlan) -> Result<Vec<ChartRow>>;
}
