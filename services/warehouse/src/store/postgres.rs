//! Postgres warehouse.
//!
//! All SQL is runtime-checked (`sqlx::query`, not `sqlx::query!`) so the
//! crate builds without a database.

use super::Warehouse;
use crate::aggregation::{AggregationPlan, ChartRow};
use crate::dimension::{
    ColumnKind, DimensionTable, KeyPart, StoredKey, DATE_TABLE, LOCATION_TABLE,
    PROJECT_TYPE_TABLE, STATUS_TABLE,
};
use crate::error::{Result, WarehouseError};
use crate::model::FactRow;
use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::debug;

/// Postgres caps a statement at 65535 bind parameters.
const MAX_BINDS: usize = 65_000;

const FACT_COLUMNS: usize = 5;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS dim_location (
    id SERIAL PRIMARY KEY,
    city_name TEXT,
    department_code TEXT
);
CREATE TABLE IF NOT EXISTS dim_date (
    id SERIAL PRIMARY KEY,
    year INTEGER,
    month INTEGER
);
CREATE TABLE IF NOT EXISTS dim_project_type (
    id SERIAL PRIMARY KEY,
    name TEXT
);
CREATE TABLE IF NOT EXISTS dim_status (
    id SERIAL PRIMARY KEY,
    name TEXT UNIQUE
);
CREATE TABLE IF NOT EXISTS fact_work_order (
    id BIGSERIAL PRIMARY KEY,
    location_id INTEGER REFERENCES dim_location(id),
    date_id INTEGER REFERENCES dim_date(id),
    project_type_id INTEGER REFERENCES dim_project_type(id),
    status_id INTEGER REFERENCES dim_status(id),
    count BIGINT NOT NULL DEFAULT 0
);
"#;

const DIMENSION_TABLES: [&DimensionTable; 4] =
    [&LOCATION_TABLE, &DATE_TABLE, &PROJECT_TYPE_TABLE, &STATUS_TABLE];

#[derive(Clone)]
pub struct PgWarehouse {
    pool: PgPool,
}

impl PgWarehouse {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(db_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(db_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn decode_key(table: &'static DimensionTable, row: &PgRow) -> Result<StoredKey> {
    let id: i32 = row.try_get("id")?;
    let parts = table
        .columns
        .iter()
        .map(|col| match col.kind {
            ColumnKind::Text => row.try_get::<Option<String>, _>(col.name).map(KeyPart::Text),
            ColumnKind::Int => row.try_get::<Option<i32>, _>(col.name).map(KeyPart::Int),
        })
        .collect::<std::result::Result<Vec<_>, sqlx::Error>>()?;
    Ok(StoredKey { id, parts })
}

#[async_trait]
impl Warehouse for PgWarehouse {
    async fn ensure_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    async fn clear_facts(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM fact_work_order")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn clear_dimensions(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for table in DIMENSION_TABLES {
            sqlx::query(&format!("DELETE FROM {}", table.name))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn load_dimension(&self, table: &'static DimensionTable) -> Result<Vec<StoredKey>> {
        let sql = format!(
            "SELECT id, {} FROM {} ORDER BY id",
            table.column_list(),
            table.name
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(|row| decode_key(table, row)).collect()
    }

    async fn insert_dimension(
        &self,
        table: &'static DimensionTable,
        rows: &[Vec<KeyPart>],
    ) -> Result<Vec<StoredKey>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let width = table.columns.len();
        if let Some(bad) = rows.iter().find(|r| r.len() != width) {
            return Err(WarehouseError::CorruptRow {
                table: table.name,
                detail: format!("expected {} key columns, got {}", width, bad.len()),
            });
        }

        let columns = table.column_list();
        let mut stored = Vec::with_capacity(rows.len());
        let mut tx = self.pool.begin().await?;
        for chunk in rows.chunks(MAX_BINDS / width) {
            let mut qb: QueryBuilder<Postgres> =
                QueryBuilder::new(format!("INSERT INTO {} ({}) ", table.name, columns));
            qb.push_values(chunk, |mut b, parts| {
                for part in parts {
                    match part {
                        KeyPart::Text(v) => b.push_bind(v.clone()),
                        KeyPart::Int(v) => b.push_bind(*v),
                    };
                }
            });
            qb.push(format!(" RETURNING id, {}", columns));
            let returned = qb.build().fetch_all(&mut *tx).await?;
            for row in &returned {
                stored.push(decode_key(table, row)?);
            }
        }
        tx.commit().await?;

        debug!(table = table.name, inserted = stored.len(), "dimension rows inserted");
        Ok(stored)
    }

    async fn insert_facts(&self, facts: &[FactRow]) -> Result<u64> {
        if facts.is_empty() {
            return Ok(0);
        }
        let mut inserted = 0;
        let mut tx = self.pool.begin().await?;
        for chunk in facts.chunks(MAX_BINDS / FACT_COLUMNS) {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO fact_work_order (location_id, date_id, project_type_id, status_id, count) ",
            );
            qb.push_values(chunk, |mut b, fact| {
                b.push_bind(fact.location_id)
                    .push_bind(fact.date_id)
                    .push_bind(fact.project_type_id)
                    .push_bind(fact.status_id)
                    .push_bind(fact.count);
            });
            inserted += qb.build().execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }

    async fn aggregate(&self, plan: &AggregationPlan) -> Result<Vec<ChartRow>> {
        let mut qb = plan.to_query();
        debug!(sql = qb.sql(), "aggregation query");
        let rows = qb.build().fetch_all(&self.pool).await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut labels = Vec::with_capacity(plan.groups().len());
            for group in plan.groups() {
                let value = match group.kind() {
                    ColumnKind::Text => KeyPart::Text(row.try_get(group.alias())?),
                    ColumnKind::Int => KeyPart::Int(row.try_get(group.alias())?),
                };
                labels.push((*group, value));
            }
            out.push(ChartRow {
                labels,
                count: row.try_get("count")?,
            });
        }
        Ok(out)
    }
}
