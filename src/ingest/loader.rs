//! CSV loading and header validation.
//!
//! Reads plain or gzip-compressed (`.gz`) exports, checks that the key,
//! summary and description columns exist, and normalizes every cell:
//! surrounding whitespace is trimmed and empty cells become `None`.
//! Rows that cannot be parsed are kept aside as row-scoped failures.

use crate::error::{RowIngestError, ValidationError};
use crate::ingest::report::RowFailure;
use crate::ColumnConfig;
use csv::{ByteRecord, ReaderBuilder, Trim};
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// One parsed data row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvRecord {
    /// 1-based line number in the source file
    pub line: u64,
    /// One entry per header column; `None` marks an empty or missing cell
    pub cells: Vec<Option<String>>,
}

impl CsvRecord {
    pub fn cell(&self, index: usize) -> Option<&str> {
        self.cells.get(index).and_then(|c| c.as_deref())
    }
}

/// A loaded export: header plus rows, in file order.
#[derive(Debug, Clone)]
pub struct IssueCsv {
    /// Where the rows came from (file path or caller-supplied name)
    pub source: String,
    pub columns: Vec<String>,
    pub records: Vec<CsvRecord>,
    /// Rows that could not be parsed
    pub rejected: Vec<RowFailure>,
}

impl IssueCsv {
    /// Rows read from the file, including rejected ones
    pub fn row_count(&self) -> usize {
        self.records.len() + self.rejected.len()
    }
}

/// Index of `name` in `columns`: exact match first, then ASCII
/// case-insensitive (exports disagree on `Issue key` vs `Issue Key`).
pub fn find_column(columns: &[String], name: &str) -> Option<usize> {
    let name = name.trim();
    columns.iter().position(|c| c == name).or_else(|| {
        columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
    })
}

/// Loads and validates issue exports against the configured required columns.
pub struct CsvLoader<'a> {
    columns: &'a ColumnConfig,
}

impl<'a> CsvLoader<'a> {
    pub fn new(columns: &'a ColumnConfig) -> Self {
        Self { columns }
    }

    /// Open `path` (decompressing `.gz`) and load it.
    pub fn load_path(&self, path: &Path) -> Result<IssueCsv, ValidationError> {
        let source = path.display().to_string();
        let file = File::open(path).map_err(|e| ValidationError::Unreadable {
            path: source.clone(),
            message: e.to_string(),
        })?;

        let reader: Box<dyn Read> = if path.extension().is_some_and(|ext| ext == "gz") {
            Box::new(GzDecoder::new(BufReader::new(file)))
        } else {
            Box::new(BufReader::new(file))
        };

        self.load_reader(&source, reader)
    }

    /// Load rows from any reader. `source` names the input in reports.
    pub fn load_reader<R: Read>(&self, source: &str, reader: R) -> Result<IssueCsv, ValidationError> {
        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(Trim::All)
            .from_reader(reader);

        let columns: Vec<String> = rdr
            .headers()
            .map_err(|e| ValidationError::Unreadable {
                path: source.to_string(),
                message: e.to_string(),
            })?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
            .collect();

        for required in [
            &self.columns.key,
            &self.columns.summary,
            &self.columns.description,
        ] {
            if find_column(&columns, required).is_none() {
                return Err(ValidationError::MissingColumn(required.clone()));
            }
        }
        let key_index = find_column(&columns, &self.columns.key);

        let mut records = Vec::new();
        let mut rejected = Vec::new();
        let mut raw = ByteRecord::new();
        loop {
            match rdr.read_byte_record(&mut raw) {
                Ok(false) => break,
                Ok(true) => {
                    let line = raw.position().map(|p| p.line()).unwrap_or(0);
                    match normalize(&raw, columns.len()) {
                        Ok(cells) => records.push(CsvRecord { line, cells }),
                        Err(error) => {
                            let key = key_index
                                .and_then(|i| raw.get(i))
                                .and_then(|k| std::str::from_utf8(k).ok())
                                .map(|k| k.trim().to_string())
                                .filter(|k| !k.is_empty());
                            tracing::warn!(source, line, "Skipping malformed row: {}", error);
                            rejected.push(RowFailure::new(line, key, &error));
                        }
                    }
                }
                Err(e) => {
                    let line = e.position().map(|p| p.line()).unwrap_or(0);
                    // I/O errors leave the reader unusable; parse errors only affect one row
                    if matches!(e.kind(), csv::ErrorKind::Io(_)) {
                        return Err(ValidationError::Unreadable {
                            path: source.to_string(),
                            message: e.to_string(),
                        });
                    }
                    let error = RowIngestError::Malformed(e.to_string());
                    tracing::warn!(source, line, "Skipping unparseable row: {}", error);
                    rejected.push(RowFailure::new(line, None, &error));
                }
            }
        }

        tracing::info!(
            source,
            rows = records.len(),
            rejected = rejected.len(),
            columns = columns.len(),
            "Loaded CSV"
        );

        Ok(IssueCsv {
            source: source.to_string(),
            columns,
            records,
            rejected,
        })
    }
}

/// Decode and normalize one record to exactly `width` cells.
///
/// Short rows are padded with `None`; rows wider than the header are
/// rejected since their cells cannot be attributed to columns.
fn normalize(raw: &ByteRecord, width: usize) -> Result<Vec<Option<String>>, RowIngestError> {
    if raw.len() > width {
        return Err(RowIngestError::FieldCount {
            expected: width,
            found: raw.len(),
        });
    }

    let mut cells = Vec::with_capacity(width);
    for (idx, field) in raw.iter().enumerate() {
        let text = std::str::from_utf8(field).map_err(|e| {
            RowIngestError::Malformed(format!("column {} is not valid UTF-8: {}", idx + 1, e))
        })?;
        let text = text.trim();
        cells.push(if text.is_empty() {
            None
        } else {
            Some(text.to_string())
        });
    }
    cells.resize(width, None);
    Ok(cells)
}
