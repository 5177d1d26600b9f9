//! Two-level header repair.
//!
//! Drops total columns and subtotal rows, canonicalises the test label of
//! each pivoted column and flattens `(outer, inner)` into `"outer - inner"`.

use crate::config::HeaderMarkers;
use crate::error::{EtlError, Result};
use crate::source::{Cell, WideTable};
use regex::Regex;
use tracing::{debug, info};

/// Number of leading identifying columns (unit name, unit code, year, month).
pub const ID_COLUMNS: usize = 4;

/// Joins the two header levels of a pivoted column.
pub const PIVOT_SEPARATOR: &str = " - ";

/// Single-level table ready to melt.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl NormalizedTable {
    pub fn pivot_columns(&self) -> &[String] {
        self.columns.get(ID_COLUMNS..).unwrap_or(&[])
    }
}

pub struct HeaderNormalizer {
    markers: HeaderMarkers,
    test_token: Regex,
    unnamed_level: Regex,
    duplicate_suffix: Regex,
}

impl HeaderNormalizer {
    pub fn new(markers: &HeaderMarkers) -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern)
                .map_err(|e| EtlError::Config(format!("invalid header pattern '{}': {}", pattern, e)))
        };
        Ok(Self {
            markers: markers.clone(),
            test_token: compile(format!(r"({}\s*\d+)", regex::escape(&markers.test_marker)).as_str())?,
            unnamed_level: compile(r" - Unnamed: \d+_level_\d+")?,
            duplicate_suffix: compile(r"\.\d+$")?,
        })
    }

    pub fn normalize(&self, table: WideTable) -> Result<NormalizedTable> {
        let WideTable { outer, inner, rows } = table;
        let source_columns = outer.len();
        let source_rows = rows.len();

        let mut keep: Vec<usize> = (0..outer.len())
            .filter(|&i| !self.is_aggregate(&outer[i]) && !self.is_aggregate(&inner[i]))
            .collect();
        if let Some(&last) = keep.last() {
            if self.is_grand_total(&outer[last]) || self.is_grand_total(&inner[last]) {
                keep.pop();
            }
        }

        if keep.len() <= ID_COLUMNS {
            return Err(EtlError::MalformedSource(format!(
                "{} columns left after dropping totals; need {} identifying columns and at least one pivoted column",
                keep.len(),
                ID_COLUMNS
            )));
        }

        let columns: Vec<String> = keep
            .iter()
            .map(|&i| self.column_name(&outer[i], &inner[i]))
            .collect();

        let rows: Vec<Vec<Cell>> = rows
            .into_iter()
            .filter(|row| self.is_data_row(row))
            .map(|row| {
                keep.iter()
                    .map(|&i| row.get(i).cloned().unwrap_or(Cell::Empty))
                    .collect()
            })
            .collect();

        info!(
            columns = columns.len(),
            dropped_columns = source_columns - columns.len(),
            rows = rows.len(),
            dropped_rows = source_rows - rows.len(),
            "normalized header"
        );
        debug!(?columns, "flattened columns");

        Ok(NormalizedTable { columns, rows })
    }

    fn is_aggregate(&self, label: &str) -> bool {
        self.markers.aggregate.iter().any(|m| label.contains(m.as_str()))
    }

    fn is_grand_total(&self, label: &str) -> bool {
        !self.markers.grand_total.is_empty() && label.starts_with(&self.markers.grand_total)
    }

    fn is_data_row(&self, row: &[Cell]) -> bool {
        let Some(first) = row.first().and_then(Cell::text) else {
            return false;
        };
        let summary = self
            .markers
            .summary_rows
            .iter()
            .any(|m| first.starts_with(m.as_str()));
        !summary && first != self.markers.company_sentinel
    }

    /// Canonical test token for labels mentioning the test marker.
    pub fn canonical_outer<'a>(&self, outer: &'a str) -> &'a str {
        if !outer.contains(&self.markers.test_marker) {
            return outer;
        }
        self.test_token
            .captures(outer)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
            .unwrap_or(outer)
    }

    /// Flatten one column's header levels and strip duplicate-name artifacts.
    pub fn column_name(&self, outer: &str, inner: &str) -> String {
        let outer = self.canonical_outer(outer);
        let name = flatten(outer, inner);
        let name = self.unnamed_level.replace_all(&name, "");
        self.duplicate_suffix.replace(&name, "").into_owned()
    }
}

/// `"outer - inner"`, or `outer` alone when the inner label is blank.
pub fn flatten(outer: &str, inner: &str) -> String {
    if inner.is_empty() {
        outer.to_string()
    } else {
        format!("{}{}{}", outer, PIVOT_SEPARATOR, inner)
    }
}
