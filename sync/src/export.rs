//! CSV spooling for bulk database loads.
//!
//! Rows destined for a database destination are streamed into a temporary
//! CSV file and handed to the adapter's merge procedure as a path. The file
//! lives in the system temp directory and is removed when the spool is
//! dropped, on the success and failure paths alike.

use std::io::Write;

use tempfile::NamedTempFile;

use crate::error::SyncResult;

/// A headered CSV file being written row by row.
pub struct CsvSpool {
    file: NamedTempFile,
    rows: u64,
}

impl CsvSpool {
    /// Creates the temp file and writes the header row.
    pub fn new(columns: &[String]) -> SyncResult<Self> {
        let mut file = NamedTempFile::new()?;

        let header: Vec<String> = columns.iter().map(|name| escape_field(name)).collect();
        writeln!(file, "{}", header.join(","))?;

        Ok(Self { file, rows: 0 })
    }

    /// Appends one row of JSON cells in column order.
    ///
    /// Strings are written raw (escaped), nulls as empty fields, and
    /// everything else (numbers, booleans, structured values) in its JSON
    /// rendering, which both destination families parse natively.
    pub fn append(&mut self, cells: &[serde_json::Value]) -> SyncResult<()> {
        let fields: Vec<String> = cells.iter().map(render_cell).collect();
        writeln!(self.file, "{}", fields.join(","))?;
        self.rows += 1;
        Ok(())
    }

    /// Flushes buffered writes so the file is complete on disk.
    pub fn finish(&mut self) -> SyncResult<()> {
        self.file.flush()?;
        Ok(())
    }

    /// Number of data rows appended (the header is not counted).
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Path of the spooled file.
    pub fn path(&self) -> &std::path::Path {
        self.file.path()
    }
}

fn render_cell(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(text) => escape_field(text),
        other => escape_field(&other.to_string()),
    }
}

/// Quotes a field when it contains a delimiter, quote, or line break;
/// embedded quotes are doubled.
fn escape_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
