//! Long-format mirror files written after each conversion.

use crate::config::ExportPaths;
use crate::error::{EtlError, Result};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;
use warehouse::LongRecord;

fn create_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => {
            fs::create_dir_all(dir).map_err(|e| EtlError::io(dir, e))
        }
        _ => Ok(()),
    }
}

pub fn write_csv(path: &Path, records: &[LongRecord]) -> Result<()> {
    create_parent(path)?;
    let mut writer = csv::Writer::from_path(path)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush().map_err(|e| EtlError::io(path, e))?;
    Ok(())
}

pub fn write_json(path: &Path, records: &[LongRecord]) -> Result<()> {
    create_parent(path)?;
    let file = File::create(path).map_err(|e| EtlError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, records)?;
    writer.flush().map_err(|e| EtlError::io(path, e))?;
    Ok(())
}

/// Write every configured mirror file.
pub fn export(paths: &ExportPaths, records: &[LongRecord]) -> Result<()> {
    if let Some(path) = &paths.csv {
        write_csv(path, records)?;
        info!(path = %path.display(), records = records.len(), "wrote long-format csv");
    }
    if let Some(path) = &paths.json {
        write_json(path, records)?;
        info!(path = %path.display(), records = records.len(), "wrote long-format json");
    }
    Ok(())
}
