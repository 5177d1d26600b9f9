//! The refresh run: clear, transform, resolve dimensions, load facts.
//!
//! A run holds the gate's exclusive access from the clear until it commits,
//! so aggregation reads only ever see a fully loaded store.

use crate::config::EtlConfig;
use crate::error::Result;
use crate::export::export;
use crate::header::HeaderNormalizer;
use crate::melt::{melt, MeltStats};
use crate::source::read_source;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;
use warehouse::{load_facts, resolve_all, LongRecord, RefreshGate, Warehouse};

/// Rows per dimension after a refresh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DimensionCounts {
    pub locations: usize,
    pub dates: usize,
    pub project_types: usize,
    pub statuses: usize,
}

/// What the store holds after loading a record set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    pub dimensions: DimensionCounts,
    pub facts: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshSummary {
    pub status: &'static str,
    pub message: String,
    pub records: usize,
    pub run_id: Uuid,
    pub generation: u64,
    pub dimensions: DimensionCounts,
    pub facts: u64,
    pub finished_at: DateTime<Utc>,
}

/// Read, normalize, melt and export the configured wide source.
///
/// Blocking file I/O; run it off the async executor.
pub fn transform(config: &EtlConfig) -> Result<(Vec<LongRecord>, MeltStats)> {
    let normalizer = HeaderNormalizer::new(&config.markers)?;
    let wide = read_source(&config.wide_file_path, config.header_row)?;
    let normalized = normalizer.normalize(wide)?;
    let (records, stats) = melt(&normalized);
    export(&config.export, &records)?;
    Ok((records, stats))
}

/// Resolve all four dimensions, then materialize and insert facts.
pub async fn load<W: Warehouse + ?Sized>(warehouse: &W, records: &[LongRecord]) -> Result<LoadSummary> {
    let lookups = resolve_all(warehouse, records).await?;
    let facts = load_facts(warehouse, records, &lookups).await?;
    Ok(LoadSummary {
        dimensions: DimensionCounts {
            locations: lookups.location.len(),
            dates: lookups.date.len(),
            project_types: lookups.project_type.len(),
            statuses: lookups.status.len(),
        },
        facts,
    })
}

/// Run one full refresh against the gated warehouse.
///
/// On any error the refresh is left uncommitted and reads fail until a
/// later refresh succeeds.
pub async fn run_refresh<W: Warehouse + ?Sized>(
    gate: &RefreshGate<W>,
    config: &EtlConfig,
) -> Result<RefreshSummary> {
    let run_id = Uuid::new_v4();
    let span = info_span!("refresh", %run_id);

    async move {
        let access = gate.refresh().await;
        let warehouse = access.warehouse();

        warehouse.clear_facts().await?;
        warehouse.clear_dimensions().await?;
        info!("cleared facts and dimensions");

        let task_config = config.clone();
        let (records, _) = tokio::task::spawn_blocking(move || transform(&task_config)).await??;

        let loaded = load(warehouse, &records).await?;
        let generation = access.commit();

        info!(
            generation,
            records = records.len(),
            facts = loaded.facts,
            "refresh committed"
        );

        Ok(RefreshSummary {
            status: "success",
            message: "Work orders refreshed successfully.".to_string(),
            records: records.len(),
            run_id,
            generation,
            dimensions: loaded.dimensions,
            facts: loaded.facts,
            finished_at: Utc::now(),
        })
    }
    .instrument(span)
    .await
}
