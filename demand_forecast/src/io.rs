//! Output writers

use crate::error::Result;
use serde::Serialize;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

/// Write serializable rows as a headed CSV file, creating parent directories
pub fn write_csv<T: Serialize, P: AsRef<Path>>(path: P, rows: &[T]) -> Result<()> {
    let mut writer = csv_writer(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Write a value as pretty-printed JSON, creating parent directories
pub fn write_json<T: Serialize, P: AsRef<Path>>(path: P, value: &T) -> Result<()> {
    ensure_parent(path.as_ref())?;
    let file = File::create(path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), value)?;
    Ok(())
}

/// Open a CSV writer, creating parent directories
pub fn csv_writer<P: AsRef<Path>>(path: P) -> Result<csv::Writer<File>> {
    ensure_parent(path.as_ref())?;
    Ok(csv::Writer::from_path(path)?)
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
