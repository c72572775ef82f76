//! Append-only delimited buffer files
//!
//! Every append opens the file, writes one row (plus the header line when the
//! file was empty) and flushes before returning, so nothing accumulates in
//! memory between messages.

use crate::error::Result;
use serde_json::{Map, Value};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

/// Field separator and quote character of a buffer file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsvFormat {
    pub delimiter: u8,
    pub quote: u8,
}

impl Default for CsvFormat {
    fn default() -> Self {
        Self {
            delimiter: b',',
            quote: b'"',
        }
    }
}

/// True when the file is missing or has no bytes
pub fn is_empty(path: &Path) -> bool {
    match std::fs::metadata(path) {
        Ok(meta) => !meta.is_file() || meta.len() == 0,
        Err(_) => true,
    }
}

/// First row of an existing buffer file, if it has a non-empty one
pub fn read_header(path: &Path, format: CsvFormat) -> Result<Option<Vec<String>>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(format.delimiter)
        .quote(format.quote)
        .from_path(path)?;

    match reader.records().next() {
        Some(record) => {
            let record = record?;
            if record.iter().all(str::is_empty) {
                Ok(None)
            } else {
                Ok(Some(record.iter().map(str::to_string).collect()))
            }
        },
        None => Ok(None),
    }
}

/// Append one row laid out by `header`; writes the header first when asked
///
/// Columns in `row` that are not in `header` are dropped; header columns absent
/// from `row` are written as empty cells.
pub fn append_row(
    path: &Path,
    header: &[String],
    row: &Map<String, Value>,
    write_header: bool,
    format: CsvFormat,
) -> Result<()> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = csv::WriterBuilder::new()
        .delimiter(format.delimiter)
        .quote(format.quote)
        .terminator(csv::Terminator::CRLF)
        .from_writer(file);

    if write_header {
        writer.write_record(header)?;
    }
    writer.write_record(header.iter().map(|column| cell(row.get(column))))?;

    let mut file = writer.into_inner().map_err(|e| e.into_error())?;
    file.flush()?;
    Ok(())
}

/// Text written for one value
pub fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(other) => other.to_string(),
    }
}
