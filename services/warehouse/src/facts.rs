//! Fact materialization: map every long record through the dimension
//! lookups and bulk-load the resulting fact rows.

use crate::dimension::NaturalKey;
use crate::error::Result;
use crate::model::{FactRow, LongRecord};
use crate::resolver::{DimensionLookup, DimensionLookups};
use crate::store::Warehouse;
use tracing::{info, warn};

/// Count of foreign keys whose natural key was present but did not resolve.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LookupMisses {
    pub location: usize,
    pub date: usize,
    pub project_type: usize,
    pub status: usize,
}

impl LookupMisses {
    pub fn total(&self) -> usize {
        self.location + self.date + self.project_type + self.status
    }
}

fn lookup_id<K: NaturalKey>(
    lookup: &DimensionLookup<K>,
    record: &LongRecord,
    misses: &mut usize,
) -> Option<i32> {
    let key = K::extract(record)?;
    let id = lookup.resolve(&key);
    if id.is_none() {
        *misses += 1;
    }
    id
}

/// Build one fact row per record. A lookup miss leaves the foreign key null
/// and the row is still emitted.
pub fn materialize_facts(
    records: &[LongRecord],
    lookups: &DimensionLookups,
) -> (Vec<FactRow>, LookupMisses) {
    let mut misses = LookupMisses::default();
    let facts = records
        .iter()
        .map(|record| FactRow {
            location_id: lookup_id(&lookups.location, record, &mut misses.location),
            date_id: lookup_id(&lookups.date, record, &mut misses.date),
            project_type_id: lookup_id(&lookups.project_type, record, &mut misses.project_type),
            status_id: lookup_id(&lookups.status, record, &mut misses.status),
            count: record.measure,
        })
        .collect();
    (facts, misses)
}

/// Materialize and persist facts in one batch. Returns the rows inserted.
pub async fn load_facts<W: Warehouse + ?Sized>(
    warehouse: &W,
    records: &[LongRecord],
    lookups: &DimensionLookups,
) -> Result<u64> {
    let (facts, misses) = materialize_facts(records, lookups);
    if misses.total() > 0 {
        // the lookups were built from these same records, so a miss means
        // the dimension tables changed underneath the refresh
        warn!(?misses, "dimension lookup misses while materializing facts");
    }
    let incomplete = facts.iter().filter(|f| !f.is_complete()).count();
    let inserted = warehouse.insert_facts(&facts).await?;
    info!(inserted, incomplete, "facts loaded");
    Ok(inserted)
}
