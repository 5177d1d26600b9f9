//! Dimension resolution: deduplicate natural keys, persist the unseen ones,
//! and hand back a natural key -> surrogate id lookup.

use crate::dimension::{DateKey, LocationKey, NaturalKey, ProjectTypeKey, StatusKey};
use crate::error::{Result, WarehouseError};
use crate::model::LongRecord;
use crate::store::Warehouse;
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

/// Natural key -> surrogate id for one dimension.
#[derive(Debug, Clone)]
pub struct DimensionLookup<K> {
    ids: HashMap<K, i32>,
}

impl<K> Default for DimensionLookup<K> {
    fn default() -> Self {
        Self { ids: HashMap::new() }
    }
}

impl<K: NaturalKey> DimensionLookup<K> {
    pub fn resolve(&self, key: &K) -> Option<i32> {
        self.ids.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    fn merge(&mut self, key: K, id: i32) {
        self.ids.insert(key, id);
    }
}

/// Resolve one dimension over the whole record set.
///
/// Keys already stored are reused; every distinct unseen key is inserted in
/// one bulk insert. Keys with null parts are inserted as-is.
pub async fn resolve_dimension<K, W>(warehouse: &W, records: &[LongRecord]) -> Result<DimensionLookup<K>>
where
    K: NaturalKey,
    W: Warehouse + ?Sized,
{
    let table = K::TABLE;
    let mut lookup = DimensionLookup::default();

    for stored in warehouse.load_dimension(table).await? {
        let key = K::from_parts(&stored.parts).ok_or_else(|| WarehouseError::CorruptRow {
            table: table.name,
            detail: format!("row {} does not decode to a key: {:?}", stored.id, stored.parts),
        })?;
        lookup.merge(key, stored.id);
    }
    let known = lookup.len();

    let mut seen = HashSet::new();
    let mut pending: Vec<K> = Vec::new();
    for key in records.iter().filter_map(K::extract) {
        if lookup.resolve(&key).is_none() && seen.insert(key.clone()) {
            pending.push(key);
        }
    }

    let partial = pending
        .iter()
        .filter(|k| k.to_parts().iter().any(|p| p.is_null()))
        .count();
    if partial > 0 {
        warn!(table = table.name, partial, "dimension keys with null fields");
    }

    if !pending.is_empty() {
        let rows: Vec<_> = pending.iter().map(|k| k.to_parts()).collect();
        for stored in warehouse.insert_dimension(table, &rows).await? {
            let key = K::from_parts(&stored.parts).ok_or_else(|| WarehouseError::CorruptRow {
                table: table.name,
                detail: format!("returned row {} does not decode to a key", stored.id),
            })?;
            lookup.merge(key, stored.id);
        }
    }

    info!(
        table = table.name,
        known,
        inserted = pending.len(),
        total = lookup.len(),
        "dimension resolved"
    );
    Ok(lookup)
}

/// Lookups for all four dimensions of the star schema.
#[derive(Debug, Clone, Default)]
pub struct DimensionLookups {
    pub location: DimensionLookup<LocationKey>,
    pub date: DimensionLookup<DateKey>,
    pub project_type: DimensionLookup<ProjectTypeKey>,
    pub status: DimensionLookup<StatusKey>,
}

/// Resolve every dimension in turn. Each lookup is complete before the next
/// dimension starts.
pub async fn resolve_all<W: Warehouse + ?Sized>(
    warehouse: &W,
    records: &[LongRecord],
) -> Result<DimensionLookups> {
    Ok(DimensionLookups {
        location: resolve_dimension(warehouse, records).await?,
        date: resolve_dimension(warehouse, records).await?,
        project_type: resolve_dimension(warehouse, records).await?,
        status: resolve_dimension(warehouse, records).await?,
    })
}
