// CSV storage for extracted and processed record sets
use crate::domain::record_set::{cell_text, RecordSet};
use anyhow::Context;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

/// Delimiter of the CSV feeds served by the upstream APIs
pub const SOURCE_DELIMITER: u8 = b',';
/// Delimiter of the files this pipeline writes
pub const STORE_DELIMITER: u8 = b';';

/// Parse CSV with a header row. Empty cells become null.
pub fn parse_csv(data: &[u8], delimiter: u8) -> anyhow::Result<RecordSet> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(data);

    let columns: Vec<String> = reader
        .headers()
        .context("Failed to read CSV header")?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').to_string())
        .collect();

    let mut records = RecordSet::new(columns);
    for (line, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("Malformed CSV record at row {}", line + 1))?;
        if record.len() != records.columns().len() {
            tracing::warn!(
                "CSV row {} has {} cells for {} columns, {}",
                line + 1,
                record.len(),
                records.columns().len(),
                if record.len() > records.columns().len() {
                    "extra cells dropped"
                } else {
                    "missing cells read as null"
                }
            );
        }
        let row = record
            .iter()
            .map(|cell| {
                if cell.is_empty() {
                    Value::Null
                } else {
                    Value::String(cell.to_string())
                }
            })
            .collect();
        records.push_row(row);
    }

    Ok(records)
}

pub fn read_csv(path: &Path) -> anyhow::Result<RecordSet> {
    let data = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let records = parse_csv(&data, STORE_DELIMITER)?;
    tracing::info!("Read {} rows from {}", records.len(), path.display());
    Ok(records)
}

/// Write `records` to `path`, creating parent directories as needed.
pub fn write_csv(path: &Path, records: &RecordSet) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }

    tracing::info!("Saving {} rows as csv file at {}...", records.len(), path.display());
    let mut writer = csv::WriterBuilder::new()
        .delimiter(STORE_DELIMITER)
        .from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    if records.columns().is_empty() {
        writer.flush()?;
        return Ok(());
    }

    writer.write_record(records.columns())?;
    for row in records.rows() {
        writer.write_record(row.iter().map(|cell| cell_text(cell).unwrap_or_default()))?;
    }
    writer.flush()?;

    Ok(())
}

/// Delete the CSV files directly under `dir`. A missing directory is already clear.
pub fn clear_csv(dir: &Path) -> anyhow::Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }
    let files = list_csv(dir)?;
    for path in &files {
        fs::remove_file(path).with_context(|| format!("Failed to remove {}", path.display()))?;
    }
    Ok(files.len())
}

/// CSV files directly under `dir`, sorted by name.
pub fn list_csv(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("Failed to list {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "csv"))
        .collect();
    files.sort();
    Ok(files)
}
