use std::path::PathBuf;
use thiserror::Error;
use warehouse::WarehouseError;

#[derive(Debug, Error)]
pub enum EtlError {
    /// Header levels missing, too few columns, or nothing left to melt.
    #[error("Malformed source: {0}")]
    MalformedSource(String),

    #[error("Failed to read workbook {path}: {source}")]
    Workbook {
        path: PathBuf,
        #[source]
        source: calamine::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON export failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Warehouse(#[from] WarehouseError),

    #[error("Transform task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl EtlError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EtlError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, EtlError>;
