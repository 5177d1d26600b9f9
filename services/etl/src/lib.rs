//! Wide-to-long work order pipeline.
//!
//! Reads a two-level pivot sheet, repairs its header, melts it into
//! [`LongRecord`](warehouse::LongRecord)s, mirrors them to CSV/JSON and
//! loads them into the star schema behind a [`RefreshGate`](warehouse::RefreshGate).

pub mod config;
pub mod error;
pub mod export;
pub mod header;
pub mod melt;
pub mod refresh;
pub mod source;

pub use config::{EtlConfig, ExportPaths, HeaderMarkers};
pub use error::{EtlError, Result};
pub use header::{HeaderNormalizer, NormalizedTable};
pub use melt::{melt, split_pivot_column, MeltStats};
pub use refresh::{load, run_refresh, transform, DimensionCounts, LoadSummary, RefreshSummary};
pub use source::{read_source, Cell, WideTable};
