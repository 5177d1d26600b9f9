//! Refresh configuration. Passed explicitly into the pipeline; nothing here
//! is read from ambient state after construction.

use crate::error::EtlError;
use std::path::PathBuf;

/// Label markers of the source workbook's locale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderMarkers {
    /// Columns whose outer or inner label contains one of these are totals.
    pub aggregate: Vec<String>,
    /// A trailing column whose label starts with this is a grand total.
    pub grand_total: String,
    /// Rows whose first cell starts with one of these are subtotals.
    pub summary_rows: Vec<String>,
    /// First-cell value of the whole-company row.
    pub company_sentinel: String,
    /// Word preceding the test number in pivoted outer labels.
    pub test_marker: String,
}

impl Default for HeaderMarkers {
    fn default() -> Self {
        Self {
            aggregate: vec!["جمع".to_string(), "مجموع".to_string()],
            grand_total: "مجموع".to_string(),
            summary_rows: vec!["جمع".to_string(), "مجموع".to_string()],
            company_sentinel: "کل شرکت".to_string(),
            test_marker: "تست".to_string(),
        }
    }
}

/// Where the long-format mirror is written. `None` skips that file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportPaths {
    pub csv: Option<PathBuf>,
    pub json: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EtlConfig {
    pub wide_file_path: PathBuf,
    /// Zero-based row of the outer header; the inner header follows it.
    pub header_row: usize,
    pub export: ExportPaths,
    pub markers: HeaderMarkers,
}

impl Default for EtlConfig {
    fn default() -> Self {
        Self {
            wide_file_path: PathBuf::from("data/2016.xlsx"),
            header_row: 1,
            export: ExportPaths {
                csv: Some(PathBuf::from("data/data_long.csv")),
                json: Some(PathBuf::from("data/data_long.json")),
            },
            markers: HeaderMarkers::default(),
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_list(name: &str) -> Option<Vec<String>> {
    env_var(name).map(|v| {
        v.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}

impl EtlConfig {
    /// Defaults overridden by environment variables. Call
    /// `dotenvy::dotenv()` first to pick up a `.env` file.
    pub fn from_env() -> Result<Self, EtlError> {
        let mut config = Self::default();

        if let Some(path) = env_var("WIDE_FILE_PATH") {
            config.wide_file_path = PathBuf::from(path);
        }
        if let Some(row) = env_var("HEADER_ROW") {
            config.header_row = row
                .trim()
                .parse()
                .map_err(|_| EtlError::Config(format!("HEADER_ROW must be a row index, got '{}'", row)))?;
        }
        if let Some(path) = env_var("LONG_CSV_PATH") {
            config.export.csv = Some(PathBuf::from(path));
        }
        if let Some(path) = env_var("LONG_JSON_PATH") {
            config.export.json = Some(PathBuf::from(path));
        }

        let markers = &mut config.markers;
        if let Some(list) = env_list("AGGREGATE_MARKERS") {
            markers.aggregate = list;
        }
        if let Some(v) = env_var("TOTAL_MARKER") {
            markers.grand_total = v;
        }
        if let Some(list) = env_list("SUMMARY_ROW_MARKERS") {
            markers.summary_rows = list;
        }
        if let Some(v) = env_var("COMPANY_SENTINEL") {
            markers.company_sentinel = v;
        }
        if let Some(v) = env_var("TEST_MARKER") {
            markers.test_marker = v;
        }

        Ok(config)
    }
}
