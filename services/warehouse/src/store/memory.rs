//! In-process warehouse with the same semantics as the Postgres one:
//! sequential surrogate ids per table, left-join aggregation, nulls sorted
//! last.

use super::Warehouse;
use crate::aggregation::{AggregationPlan, ChartRow, GroupBy, Join, OrderDir, OrderKey, Predicate};
use crate::dimension::{
    DimensionTable, KeyPart, StoredKey, DATE_TABLE, LOCATION_TABLE, PROJECT_TYPE_TABLE,
    STATUS_TABLE,
};
use crate::error::{Result, WarehouseError};
use crate::model::FactRow;
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct DimensionRows {
    next_id: i32,
    rows: Vec<StoredKey>,
}

#[derive(Debug, Default)]
struct Tables {
    dimensions: HashMap<&'static str, DimensionRows>,
    facts: Vec<FactRow>,
}

#[derive(Debug, Default)]
pub struct MemoryWarehouse {
    tables: Mutex<Tables>,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Snapshot of the stored facts.
    pub fn facts(&self) -> Vec<FactRow> {
        self.lock().facts.clone()
    }

    pub fn dimension_len(&self, table: &'static DimensionTable) -> usize {
        self.lock()
            .dimensions
            .get(table.name)
            .map_or(0, |d| d.rows.len())
    }
}

fn join_table(join: Join) -> &'static DimensionTable {
    match join {
        Join::Location => &LOCATION_TABLE,
        Join::Date => &DATE_TABLE,
        Join::ProjectType => &PROJECT_TYPE_TABLE,
        Join::Status => &STATUS_TABLE,
    }
}

fn foreign_key(fact: &FactRow, join: Join) -> Option<i32> {
    match join {
        Join::Location => fact.location_id,
        Join::Date => fact.date_id,
        Join::ProjectType => fact.project_type_id,
        Join::Status => fact.status_id,
    }
}

type JoinedRows<'a> = HashMap<Join, HashMap<i32, &'a [KeyPart]>>;

fn joined_parts<'a>(joined: &JoinedRows<'a>, fact: &FactRow, join: Join) -> Option<&'a [KeyPart]> {
    let id = foreign_key(fact, join)?;
    joined.get(&join)?.get(&id).copied()
}

fn satisfies(joined: &JoinedRows<'_>, fact: &FactRow, predicate: Predicate) -> bool {
    match predicate {
        Predicate::LocationId(v) => fact.location_id == Some(v),
        Predicate::ProjectTypeId(v) => fact.project_type_id == Some(v),
        Predicate::StatusId(v) => fact.status_id == Some(v),
        Predicate::Year(v) => joined_parts(joined, fact, Join::Date)
            .and_then(|p| p[0].as_int())
            == Some(v),
        Predicate::Month(v) => joined_parts(joined, fact, Join::Date)
            .and_then(|p| p[1].as_int())
            == Some(v),
    }
}

fn label(joined: &JoinedRows<'_>, fact: &FactRow, group: GroupBy) -> KeyPart {
    joined_parts(joined, fact, group.join())
        .and_then(|p| p.get(group.key_index()).cloned())
        .unwrap_or_else(|| KeyPart::null(group.kind()))
}

fn compare_rows(plan: &AggregationPlan, a: &ChartRow, b: &ChartRow) -> Ordering {
    let by_labels = |a: &ChartRow, b: &ChartRow| {
        a.labels
            .iter()
            .zip(&b.labels)
            .map(|((_, x), (_, y))| x.cmp_nulls_last(y))
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal)
    };
    let primary = match plan.order() {
        None => Ordering::Equal,
        Some((OrderKey::Count, dir)) => {
            let o = a.count.cmp(&b.count);
            if dir == OrderDir::Desc { o.reverse() } else { o }
        }
        Some((OrderKey::Group(g), dir)) => {
            let (x, y) = (a.label(g), b.label(g));
            match (x, y) {
                (Some(x), Some(y)) => match (x.is_null(), y.is_null(), dir) {
                    (false, false, OrderDir::Desc) => y.cmp(x),
                    _ => x.cmp_nulls_last(y),
                },
                _ => Ordering::Equal,
            }
        }
    };
    primary.then_with(|| by_labels(a, b))
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    async fn ensure_schema(&self) -> Result<()> {
        Ok(())
    }

    async fn clear_facts(&self) -> Result<()> {
        self.lock().facts.clear();
        Ok(())
    }

    async fn clear_dimensions(&self) -> Result<()> {
        // ids keep counting, like a Postgres sequence after DELETE
        for dim in self.lock().dimensions.values_mut() {
            dim.rows.clear();
        }
        Ok(())
    }

    async fn load_dimension(&self, table: &'static DimensionTable) -> Result<Vec<StoredKey>> {
        Ok(self
            .lock()
            .dimensions
            .get(table.name)
            .map(|d| d.rows.clone())
            .unwrap_or_default())
    }

    async fn insert_dimension(
        &self,
        table: &'static DimensionTable,
        rows: &[Vec<KeyPart>],
    ) -> Result<Vec<StoredKey>> {
        let width = table.columns.len();
        if let Some(bad) = rows.iter().find(|r| r.len() != width) {
            return Err(WarehouseError::CorruptRow {
                table: table.name,
                detail: format!("expected {} key columns, got {}", width, bad.len()),
            });
        }

        let mut tables = self.lock();
        let dim = tables.dimensions.entry(table.name).or_default();
        let mut stored = Vec::with_capacity(rows.len());
        for parts in rows {
            dim.next_id += 1;
            let key = StoredKey {
                id: dim.next_id,
                parts: parts.clone(),
            };
            dim.rows.push(key.clone());
            stored.push(key);
        }
        Ok(stored)
    }

    async fn insert_facts(&self, facts: &[FactRow]) -> Result<u64> {
        self.lock().facts.extend_from_slice(facts);
        Ok(facts.len() as u64)
    }

    async fn aggregate(&self, plan: &AggregationPlan) -> Result<Vec<ChartRow>> {
        let tables = self.lock();

        let mut joined: JoinedRows<'_> = HashMap::new();
        for join in plan.joins() {
            let rows = tables
                .dimensions
                .get(join_table(*join).name)
                .map(|d| {
                    d.rows
                        .iter()
                        .map(|k| (k.id, k.parts.as_slice()))
                        .collect::<HashMap<_, _>>()
                })
                .unwrap_or_default();
            joined.insert(*join, rows);
        }

        let mut sums: BTreeMap<Vec<KeyPart>, i64> = BTreeMap::new();
        for fact in &tables.facts {
            if !plan.predicates().iter().all(|p| satisfies(&joined, fact, *p)) {
                continue;
            }
            let key: Vec<KeyPart> = plan
                .groups()
                .iter()
                .map(|g| label(&joined, fact, *g))
                .collect();
            *sums.entry(key).or_insert(0) += fact.count;
        }

        if plan.groups().is_empty() {
            let count = sums.values().sum();
            return Ok(vec![ChartRow { labels: Vec::new(), count }]);
        }

        let mut rows: Vec<ChartRow> = sums
            .into_iter()
            .map(|(key, count)| ChartRow {
                labels: plan.groups().iter().copied().zip(key).collect(),
                count,
            })
            .collect();
        rows.sort_by(|a, b| compare_rows(plan, a, b));
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::AggregationQueryBuilder;

    async fn seeded() -> MemoryWarehouse {
        let w = MemoryWarehouse::new();
        let locations = w
            .insert_dimension(
                &LOCATION_TABLE,
                &[
                    vec![KeyPart::Text(Some("CityA".into())), KeyPart::Text(Some("001".into()))],
                    vec![KeyPart::Text(Some("CityB".into())), KeyPart::Text(Some("002".into()))],
                ],
            )
            .await
            .unwrap();
        let dates = w
            .insert_dimension(&DATE_TABLE, &[vec![KeyPart::Int(Some(2024)), KeyPart::Int(Some(1))]])
            .await
            .unwrap();
        let fact = |loc: usize, count: i64| FactRow {
            location_id: Some(locations[loc].id),
            date_id: Some(dates[0].id),
            project_type_id: None,
            status_id: None,
            count,
        };
        w.insert_facts(&[fact(0, 5), fact(0, 3), fact(1, 7)]).await.unwrap();
        w.insert_facts(&[FactRow {
            location_id: None,
            date_id: None,
            project_type_id: None,
            status_id: None,
            count: 2,
        }])
        .await
        .unwrap();
        w
    }

    #[tokio::test]
    async fn test_ids_are_sequential_and_survive_clear() {
        let w = MemoryWarehouse::new();
        let first = w
            .insert_dimension(&STATUS_TABLE, &[vec![KeyPart::Text(Some("Open".into()))]])
            .await
            .unwrap();
        w.clear_dimensions().await.unwrap();
        let second = w
            .insert_dimension(&STATUS_TABLE, &[vec![KeyPart::Text(Some("Open".into()))]])
            .await
            .unwrap();
        assert_eq!(first[0].id, 1);
        assert_eq!(second[0].id, 2);
        assert_eq!(w.dimension_len(&STATUS_TABLE), 1);
    }

    #[tokio::test]
    async fn test_wrong_key_width_rejected() {
        let w = MemoryWarehouse::new();
        let err = w
            .insert_dimension(&DATE_TABLE, &[vec![KeyPart::Int(Some(2024))]])
            .await
            .unwrap_err();
        assert!(matches!(err, WarehouseError::CorruptRow { table: "dim_date", .. }));
    }

    #[tokio::test]
    async fn test_null_foreign_keys_form_a_null_group() {
        let w = seeded().await;
        let plan = AggregationQueryBuilder::new().group_by(GroupBy::Location).build();
        let rows = w.aggregate(&plan).await.unwrap();
        let counts: Vec<i64> = rows.iter().map(|r| r.count).collect();
        assert_eq!(counts, vec![8, 7, 2]);
        assert!(rows[2].labels[0].1.is_null());
    }

    #[tokio::test]
    async fn test_date_predicate_excludes_unresolved_dates() {
        let w = seeded().await;
        let plan = AggregationQueryBuilder::new().filter(Predicate::Year(2024)).build();
        let rows = w.aggregate(&plan).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].count, 15);
    }

    #[tokio::test]
    async fn test_order_by_count_ascending() {
        let w = seeded().await;
        let plan = AggregationQueryBuilder::new()
            .filter(Predicate::Year(2024))
            .group_by(GroupBy::Location)
            .order_by(OrderKey::Count, OrderDir::Asc)
            .build();
        let rows = w.aggregate(&plan).await.unwrap();
        let names: Vec<_> = rows
            .iter()
            .map(|r| r.labels[0].1.as_text().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["CityB", "CityA"]);
    }

    #[tokio::test]
    async fn test_order_by_label_descending_keeps_nulls_last() {
        let w = seeded().await;
        let plan = AggregationQueryBuilder::new()
            .group_by(GroupBy::Location)
            .order_by(OrderKey::Group(GroupBy::Location), OrderDir::Desc)
            .build();
        let rows = w.aggregate(&plan).await.unwrap();
        assert_eq!(rows[0].labels[0].1.as_text(), Some("CityB"));
        assert_eq!(rows[1].labels[0].1.as_text(), Some("CityA"));
        assert!(rows[2].labels[0].1.is_null());
    }
}
