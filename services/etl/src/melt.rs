//! Wide-to-long conversion.

use crate::header::{NormalizedTable, ID_COLUMNS, PIVOT_SEPARATOR};
use crate::source::Cell;
use tracing::{info, warn};
use warehouse::LongRecord;

static EMPTY_CELL: Cell = Cell::Empty;

/// Drop a trailing `.N` suffix added when two columns flattened to one name.
fn strip_duplicate_suffix(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((head, n)) if !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()) => head,
        _ => name,
    }
}

/// Split a pivoted column name once into `(category, substate)`.
///
/// The substate is empty when the name has no separator, and loses any
/// trailing `.N` duplicate suffix.
pub fn split_pivot_column(name: &str) -> (String, String) {
    match name.split_once(PIVOT_SEPARATOR) {
        Some((category, substate)) => (
            category.to_string(),
            strip_duplicate_suffix(substate).trim().to_string(),
        ),
        None => (name.to_string(), String::new()),
    }
}

/// Data-quality counters for one conversion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MeltStats {
    pub records: usize,
    /// Blank, non-numeric or negative measures recorded as 0.
    pub zeroed_measures: usize,
    /// Year or month cells that were present but not integers.
    pub unparsed_dates: usize,
}

fn int_field(cell: &Cell, unparsed: &mut usize) -> Option<i32> {
    if cell.text().is_none() {
        return None;
    }
    let value = cell.as_int().and_then(|v| i32::try_from(v).ok());
    if value.is_none() {
        *unparsed += 1;
    }
    value
}

fn measure(cell: &Cell, zeroed: &mut usize) -> i64 {
    match cell.as_int() {
        Some(v) if v >= 0 => v,
        _ => {
            *zeroed += 1;
            0
        }
    }
}

/// Melt a normalized table: one record per (row, pivoted column), row by
/// row, so R rows and C pivoted columns give R×C records.
pub fn melt(table: &NormalizedTable) -> (Vec<LongRecord>, MeltStats) {
    let pivots: Vec<(String, String)> = table
        .pivot_columns()
        .iter()
        .map(|name| split_pivot_column(name))
        .collect();

    let mut stats = MeltStats::default();
    let mut records = Vec::with_capacity(table.rows.len() * pivots.len());

    for row in &table.rows {
        let cell = |i: usize| row.get(i).unwrap_or(&EMPTY_CELL);
        let unit_name = cell(0).text().unwrap_or_default();
        let unit_code = cell(1).text();
        let year = int_field(cell(2), &mut stats.unparsed_dates);
        let month = int_field(cell(3), &mut stats.unparsed_dates);

        for (offset, (category, substate)) in pivots.iter().enumerate() {
            records.push(LongRecord {
                unit_name: unit_name.clone(),
                unit_code: unit_code.clone(),
                year,
                month,
                category: category.clone(),
                substate: substate.clone(),
                measure: measure(cell(ID_COLUMNS + offset), &mut stats.zeroed_measures),
            });
        }
    }
    stats.records = records.len();

    info!(
        rows = table.rows.len(),
        pivot_columns = pivots.len(),
        records = stats.records,
        "melted to long format"
    );
    if stats.zeroed_measures > 0 {
        warn!(count = stats.zeroed_measures, "blank or non-numeric measures recorded as 0");
    }
    if stats.unparsed_dates > 0 {
        warn!(count = stats.unparsed_dates, "non-integer year/month cells left null");
    }

    (records, stats)
}
