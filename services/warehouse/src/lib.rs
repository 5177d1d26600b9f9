//! Work order star schema: four dimensions, one fact table.
//!
//! - `dimension`: natural keys and table descriptors
//! - `resolver`: deduplicate keys and assign surrogate ids
//! - `facts`: map long records to fact rows and bulk-load them
//! - `aggregation`: validated, dynamically joined sum queries
//! - `gate`: refresh/read exclusion with committed generations
//! - `store`: the `Warehouse` trait with Postgres and in-memory backends

pub mod aggregation;
pub mod dimension;
pub mod error;
pub mod facts;
pub mod gate;
pub mod model;
pub mod resolver;
pub mod store;

pub use aggregation::{
    aggregate, AggregationFilters, AggregationPlan, AggregationQueryBuilder, AggregationRequest,
    AggregationResult, ChartRow, GroupBy, ALLOWED_GROUP_BY,
};
pub use error::{Result, WarehouseError};
pub use facts::{load_facts, materialize_facts};
pub use gate::RefreshGate;
pub use model::{FactRow, LongRecord};
pub use resolver::{resolve_all, resolve_dimension, DimensionLookup, DimensionLookups};
pub use store::{MemoryWarehouse, PgWarehouse, Warehouse};
