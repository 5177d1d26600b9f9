//! Raw wide-table sources.
//!
//! A source is a grid with a two-row header (outer label, inner label)
//! starting at a configured row, followed by one data row per unit.
//! Workbooks (xlsx/xls/xlsb/ods) are read with calamine; CSV files with the
//! same layout are read with the csv crate.

use crate::error::{EtlError, Result};
use calamine::{open_workbook_auto, Data, Reader};
use std::path::Path;
use tracing::{debug, info};

/// A single source cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Int(i64),
    Float(f64),
}

impl Cell {
    pub fn from_data(data: &Data) -> Self {
        match data {
            Data::Empty => Cell::Empty,
            Data::String(s) if s.trim().is_empty() => Cell::Empty,
            Data::String(s) => Cell::Text(s.clone()),
            Data::Int(i) => Cell::Int(*i),
            Data::Float(f) => Cell::Float(*f),
            Data::Error(_) => Cell::Empty,
            other => Cell::Text(other.to_string()),
        }
    }

    /// CSV fields are always text; numbers are recognised on demand.
    pub fn from_field(field: &str) -> Self {
        if field.trim().is_empty() {
            Cell::Empty
        } else {
            Cell::Text(field.to_string())
        }
    }

    /// Trimmed display text, `None` for blank cells.
    pub fn text(&self) -> Option<String> {
        let s = match self {
            Cell::Empty => return None,
            Cell::Text(s) => s.trim().to_string(),
            Cell::Int(i) => i.to_string(),
            Cell::Float(f) if f.fract() == 0.0 && f.is_finite() => format!("{}", *f as i64),
            Cell::Float(f) => f.to_string(),
        };
        if s.is_empty() {
            None
        } else {
            Some(s)
        }
    }

    /// Integer value, truncating fractional numbers. Text that is not a
    /// number yields `None`.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Cell::Empty => None,
            Cell::Int(i) => Some(*i),
            Cell::Float(f) if f.is_finite() => Some(f.trunc() as i64),
            Cell::Float(_) => None,
            Cell::Text(s) => {
                let s = s.trim();
                s.parse::<i64>().ok().or_else(|| {
                    s.parse::<f64>()
                        .ok()
                        .filter(|f| f.is_finite())
                        .map(|f| f.trunc() as i64)
                })
            }
        }
    }
}

/// Wide table with its two header levels still separate.
#[derive(Debug, Clone, PartialEq)]
pub struct WideTable {
    pub outer: Vec<String>,
    pub inner: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl WideTable {
    /// Split a raw grid into header levels and data rows.
    ///
    /// A blank outer label under a merged header cell inherits the label to
    /// its left when the column has an inner label.
    pub fn from_grid(mut grid: Vec<Vec<Cell>>, header_row: usize) -> Result<Self> {
        if grid.len() < header_row + 2 {
            return Err(EtlError::MalformedSource(format!(
                "expected a two-row header at rows {}-{}, source has {} rows",
                header_row + 1,
                header_row + 2,
                grid.len()
            )));
        }

        let data = grid.split_off(header_row + 2);
        let inner_cells = grid.pop().unwrap_or_default();
        let outer_cells = grid.pop().unwrap_or_default();
        let width = outer_cells.len().max(inner_cells.len());

        let inner: Vec<String> = (0..width)
            .map(|i| inner_cells.get(i).and_then(Cell::text).unwrap_or_default())
            .collect();
        if inner.iter().all(String::is_empty) {
            return Err(EtlError::MalformedSource(
                "second header level is empty; expected (category, status) header pairs".to_string(),
            ));
        }

        let mut outer = Vec::with_capacity(width);
        let mut last = String::new();
        for i in 0..width {
            match outer_cells.get(i).and_then(Cell::text) {
                Some(label) => {
                    last = label.clone();
                    outer.push(label);
                }
                None if !inner[i].is_empty() => outer.push(last.clone()),
                None => outer.push(String::new()),
            }
        }

        let rows = data
            .into_iter()
            .map(|mut row| {
                row.resize(width, Cell::Empty);
                row
            })
            .collect();

        Ok(WideTable { outer, inner, rows })
    }

    pub fn width(&self) -> usize {
        self.outer.len()
    }
}

/// Read the first sheet of a workbook.
pub fn read_workbook(path: &Path, header_row: usize) -> Result<WideTable> {
    let workbook_err = |source| EtlError::Workbook {
        path: path.to_path_buf(),
        source,
    };
    let mut workbook = open_workbook_auto(path).map_err(workbook_err)?;

    let sheet_names = workbook.sheet_names().to_vec();
    let sheet_name = sheet_names
        .first()
        .ok_or_else(|| EtlError::MalformedSource("workbook has no sheets".to_string()))?;
    let range = workbook.worksheet_range(sheet_name).map_err(workbook_err)?;

    let (row_count, col_count) = range.get_size();
    info!(
        path = %path.display(),
        sheet = %sheet_name,
        rows = row_count,
        columns = col_count,
        "reading workbook"
    );

    // calamine ranges start at the first used cell, not A1
    let (first_row, first_col) = range.start().unwrap_or((0, 0));
    let mut grid: Vec<Vec<Cell>> = vec![Vec::new(); first_row as usize];
    for row in range.rows() {
        let mut cells = vec![Cell::Empty; first_col as usize];
        cells.extend(row.iter().map(Cell::from_data));
        grid.push(cells);
    }

    WideTable::from_grid(grid, header_row)
}

/// Decode CSV bytes: UTF-8 (BOM stripped) or, failing that, Windows-1256.
pub fn decode_csv_bytes(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.strip_prefix('\u{feff}').unwrap_or(text).to_string(),
        Err(_) => {
            debug!("source is not UTF-8, decoding as windows-1256");
            let (text, _, _) = encoding_rs::WINDOWS_1256.decode(bytes);
            text.into_owned()
        }
    }
}

/// Parse a CSV wide table.
pub fn parse_csv(content: &str, header_row: usize) -> Result<WideTable> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(content.as_bytes());

    let mut grid = Vec::new();
    for record in reader.records() {
        let record = record?;
        grid.push(record.iter().map(Cell::from_field).collect());
    }
    WideTable::from_grid(grid, header_row)
}

fn is_csv(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("csv"))
        .unwrap_or(false)
}

/// Read a wide table from a workbook or CSV file, chosen by extension.
pub fn read_source(path: &Path, header_row: usize) -> Result<WideTable> {
    if is_csv(path) {
        let bytes = std::fs::read(path).map_err(|e| EtlError::io(path, e))?;
        info!(path = %path.display(), bytes = bytes.len(), "reading csv source");
        parse_csv(&decode_csv_bytes(&bytes), header_row)
    } else {
        read_workbook(path, header_row)
    }
}
