//! Dynamic sum aggregation over `fact_work_order`.
//!
//! A request is validated into an [`AggregationPlan`]: the set of dimension
//! joins it needs, its equality predicates, its group columns and its
//! ordering. The plan renders to exactly one SQL query; a dimension is joined
//! only when a predicate or a group column references it.

use crate::dimension::{ColumnKind, KeyPart};
use crate::error::{Result, WarehouseError};
use crate::store::Warehouse;
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use sqlx::{Postgres, QueryBuilder};
use std::collections::BTreeSet;

pub const ALLOWED_GROUP_BY: [&str; 5] = ["location", "project_type", "status", "year", "month"];

const COUNT_ALIAS: &str = "count";

// =============================================================================
// Plan vocabulary
// =============================================================================

/// A dimension table joined onto the fact table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Join {
    Location,
    Date,
    ProjectType,
    Status,
}

impl Join {
    fn sql(self) -> &'static str {
        match self {
            Join::Location => "LEFT JOIN dim_location l ON f.location_id = l.id",
            Join::Date => "LEFT JOIN dim_date d ON f.date_id = d.id",
            Join::ProjectType => "LEFT JOIN dim_project_type p ON f.project_type_id = p.id",
            Join::Status => "LEFT JOIN dim_status s ON f.status_id = s.id",
        }
    }
}

/// A group-by dimension from the whitelist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    Location,
    ProjectType,
    Status,
    Year,
    Month,
}

impl GroupBy {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "location" => Some(GroupBy::Location),
            "project_type" => Some(GroupBy::ProjectType),
            "status" => Some(GroupBy::Status),
            "year" => Some(GroupBy::Year),
            "month" => Some(GroupBy::Month),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GroupBy::Location => "location",
            GroupBy::ProjectType => "project_type",
            GroupBy::Status => "status",
            GroupBy::Year => "year",
            GroupBy::Month => "month",
        }
    }

    pub fn join(self) -> Join {
        match self {
            GroupBy::Location => Join::Location,
            GroupBy::ProjectType => Join::ProjectType,
            GroupBy::Status => Join::Status,
            GroupBy::Year | GroupBy::Month => Join::Date,
        }
    }

    /// Qualified human-readable label column.
    pub fn label_column(self) -> &'static str {
        match self {
            GroupBy::Location => "l.city_name",
            GroupBy::ProjectType => "p.name",
            GroupBy::Status => "s.name",
            GroupBy::Year => "d.year",
            GroupBy::Month => "d.month",
        }
    }

    /// Key under which the label appears in a chart row.
    pub fn alias(self) -> &'static str {
        match self {
            GroupBy::Location => "city_name",
            GroupBy::ProjectType => "project_type",
            GroupBy::Status => "status",
            GroupBy::Year => "year",
            GroupBy::Month => "month",
        }
    }

    pub fn kind(self) -> ColumnKind {
        match self {
            GroupBy::Location | GroupBy::ProjectType | GroupBy::Status => ColumnKind::Text,
            GroupBy::Year | GroupBy::Month => ColumnKind::Int,
        }
    }

    /// Position of the label within the joined dimension's natural key.
    pub fn key_index(self) -> usize {
        match self {
            GroupBy::Month => 1,
            _ => 0,
        }
    }
}

/// Equality constraint on the fact set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predicate {
    LocationId(i32),
    ProjectTypeId(i32),
    StatusId(i32),
    Year(i32),
    Month(i32),
}

impl Predicate {
    pub fn column(self) -> &'static str {
        match self {
            Predicate::LocationId(_) => "f.location_id",
            Predicate::ProjectTypeId(_) => "f.project_type_id",
            Predicate::StatusId(_) => "f.status_id",
            Predicate::Year(_) => "d.year",
            Predicate::Month(_) => "d.month",
        }
    }

    pub fn value(self) -> i32 {
        match self {
            Predicate::LocationId(v)
            | Predicate::ProjectTypeId(v)
            | Predicate::StatusId(v)
            | Predicate::Year(v)
            | Predicate::Month(v) => v,
        }
    }

    /// Id predicates read the fact table directly; date predicates need the
    /// date dimension.
    pub fn join(self) -> Option<Join> {
        match self {
            Predicate::Year(_) | Predicate::Month(_) => Some(Join::Date),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderDir {
    Asc,
    #[default]
    Desc,
}

impl OrderDir {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "asc" => Some(OrderDir::Asc),
            "desc" => Some(OrderDir::Desc),
            _ => None,
        }
    }

    fn sql(self) -> &'static str {
        match self {
            OrderDir::Asc => "ASC",
            OrderDir::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderKey {
    Group(GroupBy),
    Count,
}

// =============================================================================
// Request and validation
// =============================================================================

/// Equality filters; an absent field places no constraint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationFilters {
    pub location_id: Option<i32>,
    pub project_type_id: Option<i32>,
    pub status_id: Option<i32>,
    pub year: Option<i32>,
    pub month: Option<i32>,
}

impl AggregationFilters {
    /// Filters where `0` means "no constraint".
    pub fn from_zero_defaults(
        location_id: i32,
        project_type_id: i32,
        status_id: i32,
        year: i32,
        month: i32,
    ) -> Self {
        let active = |v: i32| if v == 0 { None } else { Some(v) };
        AggregationFilters {
            location_id: active(location_id),
            project_type_id: active(project_type_id),
            status_id: active(status_id),
            year: active(year),
            month: active(month),
        }
    }

    pub fn predicates(&self) -> Vec<Predicate> {
        [
            self.location_id.map(Predicate::LocationId),
            self.project_type_id.map(Predicate::ProjectTypeId),
            self.status_id.map(Predicate::StatusId),
            self.year.map(Predicate::Year),
            self.month.map(Predicate::Month),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

/// Unvalidated aggregation request as received from a client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AggregationRequest {
    #[serde(default)]
    pub filters: AggregationFilters,
    #[serde(default)]
    pub group_by: Vec<String>,
    #[serde(default)]
    pub order_by: Option<String>,
    #[serde(default)]
    pub order_dir: Option<String>,
}

impl AggregationRequest {
    /// Check every parameter against its whitelist and build the plan.
    pub fn validate(&self) -> Result<AggregationPlan> {
        let invalid: Vec<String> = self
            .group_by
            .iter()
            .filter(|g| GroupBy::parse(g).is_none())
            .cloned()
            .collect();
        if !invalid.is_empty() {
            return Err(WarehouseError::InvalidAggregation {
                parameter: "group_by",
                invalid,
                allowed: ALLOWED_GROUP_BY.iter().map(|s| s.to_string()).collect(),
            });
        }

        let mut builder = AggregationQueryBuilder::new();
        for predicate in self.filters.predicates() {
            builder = builder.filter(predicate);
        }
        for group in self.group_by.iter().filter_map(|g| GroupBy::parse(g)) {
            builder = builder.group_by(group);
        }

        let dir = match self.order_dir.as_deref() {
            None => OrderDir::default(),
            Some(raw) => OrderDir::parse(raw).ok_or_else(|| WarehouseError::InvalidAggregation {
                parameter: "order_dir",
                invalid: vec![raw.to_string()],
                allowed: vec!["asc".to_string(), "desc".to_string()],
            })?,
        };

        if let Some(raw) = self.order_by.as_deref() {
            let key = if raw == COUNT_ALIAS {
                Some(OrderKey::Count)
            } else {
                GroupBy::parse(raw)
                    .filter(|g| builder.groups.contains(g))
                    .map(OrderKey::Group)
            };
            match key {
                Some(key) => builder = builder.order_by(key, dir),
                None => {
                    let mut allowed: Vec<String> =
                        builder.groups.iter().map(|g| g.as_str().to_string()).collect();
                    allowed.push(COUNT_ALIAS.to_string());
                    return Err(WarehouseError::InvalidAggregation {
                        parameter: "order_by",
                        invalid: vec![raw.to_string()],
                        allowed,
                    });
                }
            }
        }

        Ok(builder.build())
    }
}

// =============================================================================
// Builder and plan
// =============================================================================

/// Accumulates predicates, groups and ordering; the join set is derived in
/// [`AggregationQueryBuilder::build`].
#[derive(Debug, Clone, Default)]
pub struct AggregationQueryBuilder {
    predicates: Vec<Predicate>,
    groups: Vec<GroupBy>,
    order: Option<(OrderKey, OrderDir)>,
}

impl AggregationQueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    /// Repeated groups collapse to their first occurrence.
    pub fn group_by(mut self, group: GroupBy) -> Self {
        if !self.groups.contains(&group) {
            self.groups.push(group);
        }
        self
    }

    pub fn order_by(mut self, key: OrderKey, dir: OrderDir) -> Self {
        self.order = Some((key, dir));
        self
    }

    pub fn build(self) -> AggregationPlan {
        let joins = self
            .predicates
            .iter()
            .filter_map(|p| p.join())
            .chain(self.groups.iter().map(|g| g.join()))
            .collect();
        AggregationPlan {
            joins,
            predicates: self.predicates,
            groups: self.groups,
            order: self.order,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationPlan {
    joins: BTreeSet<Join>,
    predicates: Vec<Predicate>,
    groups: Vec<GroupBy>,
    order: Option<(OrderKey, OrderDir)>,
}

impl AggregationPlan {
    pub fn joins(&self) -> &BTreeSet<Join> {
        &self.joins
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn groups(&self) -> &[GroupBy] {
        &self.groups
    }

    pub fn order(&self) -> Option<(OrderKey, OrderDir)> {
        self.order
    }

    /// Render the plan as one Postgres query.
    ///
    /// Joins are LEFT joins so that a fact with a null foreign key still
    /// lands in a (null-labelled) group, keeping grouped sums equal to the
    /// ungrouped sum.
    pub fn to_query(&self) -> QueryBuilder<'static, Postgres> {
        let mut qb = QueryBuilder::new("SELECT ");
        for group in &self.groups {
            qb.push(format!("{} AS {}, ", group.label_column(), group.alias()));
        }
        qb.push(format!(
            "COALESCE(SUM(f.count), 0)::BIGINT AS \"{}\" FROM fact_work_order f",
            COUNT_ALIAS
        ));

        for join in &self.joins {
            qb.push(" ").push(join.sql());
        }

        for (i, predicate) in self.predicates.iter().enumerate() {
            qb.push(if i == 0 { " WHERE " } else { " AND " });
            qb.push(predicate.column()).push(" = ");
            qb.push_bind(predicate.value());
        }

        if self.groups.is_empty() {
            return qb;
        }

        let labels: Vec<&str> = self.groups.iter().map(|g| g.label_column()).collect();
        qb.push(" GROUP BY ").push(labels.join(", "));

        let mut order_terms: Vec<String> = Vec::new();
        if let Some((key, dir)) = self.order {
            let target = match key {
                OrderKey::Count => format!("\"{}\"", COUNT_ALIAS),
                OrderKey::Group(g) => g.label_column().to_string(),
            };
            order_terms.push(format!("{} {} NULLS LAST", target, dir.sql()));
        }
        let ordered_group = match self.order {
            Some((OrderKey::Group(g), _)) => Some(g),
            _ => None,
        };
        for group in self.groups.iter().filter(|g| Some(**g) != ordered_group) {
            order_terms.push(format!("{} ASC NULLS LAST", group.label_column()));
        }
        qb.push(" ORDER BY ").push(order_terms.join(", "));
        qb
    }
}

// =============================================================================
// Results
// =============================================================================

/// One aggregated row: a label per group column plus the summed count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartRow {
    pub labels: Vec<(GroupBy, KeyPart)>,
    pub count: i64,
}

impl ChartRow {
    pub fn label(&self, group: GroupBy) -> Option<&KeyPart> {
        self.labels.iter().find(|(g, _)| *g == group).map(|(_, v)| v)
    }
}

impl Serialize for ChartRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.labels.len() + 1))?;
        for (group, value) in &self.labels {
            map.serialize_entry(group.alias(), value)?;
        }
        map.serialize_entry(COUNT_ALIAS, &self.count)?;
        map.end()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregationResult {
    pub total_count: i64,
    pub chart_data: Vec<ChartRow>,
}

/// Run a plan and shape the result.
///
/// Ungrouped plans collapse to a single row carrying the filtered sum.
pub async fn aggregate<W: Warehouse + ?Sized>(
    warehouse: &W,
    plan: &AggregationPlan,
) -> Result<AggregationResult> {
    let mut rows = warehouse.aggregate(plan).await?;
    if plan.groups().is_empty() {
        let count = rows.iter().map(|r| r.count).sum();
        rows = vec![ChartRow { labels: Vec::new(), count }];
    }
    let total_count = rows.iter().map(|r| r.count).sum();
    Ok(AggregationResult {
        total_count,
        chart_data: rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimension::{DATE_TABLE, LOCATION_TABLE, PROJECT_TYPE_TABLE, STATUS_TABLE};
    use crate::model::FactRow;
    use crate::store::MemoryWarehouse;

    fn request(group_by: &[&str]) -> AggregationRequest {
        AggregationRequest {
            group_by: group_by.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_bogus_group_by_rejected_with_allowed_set() {
        let err = request(&["location", "bogus_field"]).validate().unwrap_err();
        match err {
            WarehouseError::InvalidAggregation { parameter, invalid, allowed } => {
                assert_eq!(parameter, "group_by");
                assert_eq!(invalid, vec!["bogus_field".to_string()]);
                assert_eq!(allowed.len(), 5);
                assert!(allowed.contains(&"location".to_string()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_order_by_must_be_grouped_or_count() {
        let mut req = request(&["location"]);
        req.order_by = Some("year".to_string());
        let err = req.validate().unwrap_err();
        assert!(err.to_string().contains("order_by"));

        req.order_by = Some("count".to_string());
        let plan = req.validate().unwrap();
        assert_eq!(plan.order(), Some((OrderKey::Count, OrderDir::Desc)));

        req.order_by = Some("location".to_string());
        req.order_dir = Some("ASC".to_string());
        let plan = req.validate().unwrap();
        assert_eq!(plan.order(), Some((OrderKey::Group(GroupBy::Location), OrderDir::Asc)));
    }

    #[test]
    fn test_invalid_order_dir_rejected() {
        let mut req = request(&["status"]);
        req.order_by = Some("count".to_string());
        req.order_dir = Some("sideways".to_string());
        match req.validate().unwrap_err() {
            WarehouseError::InvalidAggregation { parameter, allowed, .. } => {
                assert_eq!(parameter, "order_dir");
                assert_eq!(allowed, vec!["asc".to_string(), "desc".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_ungrouped_total_joins_nothing() {
        let plan = AggregationRequest::default().validate().unwrap();
        assert!(plan.joins().is_empty());
        let sql = plan.to_query().sql().to_string();
        assert_eq!(
            sql,
            "SELECT COALESCE(SUM(f.count), 0)::BIGINT AS \"count\" FROM fact_work_order f"
        );
    }

    #[test]
    fn test_id_filters_do_not_join() {
        let req = AggregationRequest {
            filters: AggregationFilters {
                location_id: Some(3),
                status_id: Some(2),
                ..Default::default()
            },
            ..Default::default()
        };
        let plan = req.validate().unwrap();
        assert!(plan.joins().is_empty());
        let sql = plan.to_query().sql().to_string();
        assert!(sql.ends_with("WHERE f.location_id = $1 AND f.status_id = $2"));
    }

    #[test]
    fn test_date_joined_only_for_date_filter_or_group() {
        let mut req = request(&["location"]);
        let plan = req.validate().unwrap();
        assert_eq!(plan.joins().iter().copied().collect::<Vec<_>>(), vec![Join::Location]);

        req.filters.year = Some(2024);
        let plan = req.validate().unwrap();
        assert_eq!(
            plan.joins().iter().copied().collect::<Vec<_>>(),
            vec![Join::Location, Join::Date]
        );

        let plan = request(&["month", "year"]).validate().unwrap();
        assert_eq!(plan.joins().len(), 1);
        assert!(plan.joins().contains(&Join::Date));
    }

    #[test]
    fn test_grouped_query_shape() {
        let mut req = request(&["location", "status"]);
        req.filters.year = Some(2024);
        let sql = req.validate().unwrap().to_query().sql().to_string();
        assert_eq!(
            sql,
            "SELECT l.city_name AS city_name, s.name AS status, \
             COALESCE(SUM(f.count), 0)::BIGINT AS \"count\" FROM fact_work_order f \
             LEFT JOIN dim_location l ON f.location_id = l.id \
             LEFT JOIN dim_date d ON f.date_id = d.id \
             LEFT JOIN dim_status s ON f.status_id = s.id \
             WHERE d.year = $1 \
             GROUP BY l.city_name, s.name \
             ORDER BY l.city_name ASC NULLS LAST, s.name ASC NULLS LAST"
        );
    }

    #[test]
    fn test_explicit_order_precedes_label_tiebreak() {
        let mut req = request(&["location", "month"]);
        req.order_by = Some("month".to_string());
        let sql = req.validate().unwrap().to_query().sql().to_string();
        assert!(sql.ends_with("ORDER BY d.month DESC NULLS LAST, l.city_name ASC NULLS LAST"));
    }

    #[test]
    fn test_duplicate_group_by_collapses() {
        let plan = request(&["year", "year"]).validate().unwrap();
        assert_eq!(plan.groups(), &[GroupBy::Year]);
    }

    #[test]
    fn test_zero_filters_mean_unconstrained() {
        let filters = AggregationFilters::from_zero_defaults(0, 4, 0, 2024, 0);
        assert_eq!(
            filters.predicates(),
            vec![Predicate::ProjectTypeId(4), Predicate::Year(2024)]
        );
    }

    #[test]
    fn test_chart_row_serializes_flat() {
        let row = ChartRow {
            labels: vec![(GroupBy::Location, KeyPart::Text(Some("CityA".into())))],
            count: 8,
        };
        assert_eq!(
            serde_json::to_value(&row).unwrap(),
            serde_json::json!({"city_name": "CityA", "count": 8})
        );
    }

    fn text(s: &str) -> KeyPart {
        KeyPart::Text(Some(s.to_string()))
    }

    /// Facts with null, dangling and partially keyed references.
    async fn uneven_warehouse() -> MemoryWarehouse {
        let w = MemoryWarehouse::new();
        let loc = w
            .insert_dimension(
                &LOCATION_TABLE,
                &[vec![text("CityA"), text("001")], vec![text("CityB"), text("002")]],
            )
            .await
            .unwrap();
        let date = w
            .insert_dimension(
                &DATE_TABLE,
                &[
                    vec![KeyPart::Int(Some(2024)), KeyPart::Int(Some(1))],
                    vec![KeyPart::Int(Some(2024)), KeyPart::Int(None)],
                ],
            )
            .await
            .unwrap();
        let ptype = w.insert_dimension(&PROJECT_TYPE_TABLE, &[vec![text("Test1")]]).await.unwrap();
        let status = w
            .insert_dimension(&STATUS_TABLE, &[vec![text("Open")], vec![text("Closed")]])
            .await
            .unwrap();

        let fact = |l: Option<i32>, d: Option<i32>, p: Option<i32>, s: Option<i32>, count| FactRow {
            location_id: l,
            date_id: d,
            project_type_id: p,
            status_id: s,
            count,
        };
        w.insert_facts(&[
            fact(Some(loc[0].id), Some(date[0].id), Some(ptype[0].id), Some(status[0].id), 5),
            fact(Some(loc[0].id), Some(date[1].id), Some(ptype[0].id), Some(status[1].id), 3),
            fact(Some(loc[1].id), Some(date[0].id), Some(99), Some(status[0].id), 7),
            fact(None, Some(date[0].id), Some(ptype[0].id), None, 4),
            fact(Some(loc[1].id), None, None, Some(status[1].id), 6),
        ])
        .await
        .unwrap();
        w
    }

    #[tokio::test]
    async fn test_grouped_sum_equals_ungrouped_total() {
        let w = uneven_warehouse().await;
        let filters = [None, Some(Predicate::Year(2024)), Some(Predicate::LocationId(2))];
        let groupings: Vec<Vec<GroupBy>> = vec![
            vec![GroupBy::Location],
            vec![GroupBy::ProjectType],
            vec![GroupBy::Status],
            vec![GroupBy::Year],
            vec![GroupBy::Month],
            vec![GroupBy::Location, GroupBy::Status],
        ];

        for filter in filters {
            let base = filter
                .into_iter()
                .fold(AggregationQueryBuilder::new(), |b, p| b.filter(p));
            let ungrouped = aggregate(&w, &base.clone().build()).await.unwrap();
            assert_eq!(ungrouped.chart_data.len(), 1);
            assert_eq!(ungrouped.chart_data[0].count, ungrouped.total_count);

            for groups in &groupings {
                let builder = groups.iter().fold(base.clone(), |b, g| b.group_by(*g));
                let grouped = aggregate(&w, &builder.build()).await.unwrap();
                let sum: i64 = grouped.chart_data.iter().map(|r| r.count).sum();
                assert_eq!(sum, grouped.total_count, "{:?} by {:?}", filter, groups);
                assert_eq!(grouped.total_count, ungrouped.total_count, "{:?} by {:?}", filter, groups);
            }
        }

        let all = aggregate(&w, &AggregationQueryBuilder::new().build()).await.unwrap();
        assert_eq!(all.total_count, 25);
    }
}
