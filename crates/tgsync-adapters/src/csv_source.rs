//! Header-keyed CSV reading into schema rows.

use std::collections::HashMap;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tgsync_core::{ColumnSchema, RawRow};
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source file not found: {0}")]
    NotFound(PathBuf),
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("csv header could not be read: {0}")]
    Csv(#[from] csv::Error),
}

/// A row-level problem that did not stop the parse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseWarning {
    pub line: Option<u64>,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct ParsedCsv {
    pub rows: Vec<RawRow>,
    pub warnings: Vec<ParseWarning>,
    /// Schema columns absent from the header row.
    pub missing_columns: Vec<&'static str>,
    pub raw_bytes: Vec<u8>,
}

pub async fn read_rows(path: &Path, schema: ColumnSchema) -> Result<ParsedCsv, SourceError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(SourceError::NotFound(path.to_path_buf()))
        }
        Err(source) => {
            return Err(SourceError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    debug!(path = %path.display(), bytes = bytes.len(), "read csv source");
    let mut parsed = read_rows_from_reader(bytes.as_slice(), schema)?;
    parsed.raw_bytes = bytes;
    Ok(parsed)
}

/// Parses UTF-8 CSV with a header row. Columns outside the schema are ignored, short or long
/// records are kept and reported as warnings.
pub fn read_rows_from_reader<R: Read>(
    reader: R,
    schema: ColumnSchema,
) -> Result<ParsedCsv, SourceError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .quote(b'"')
        .from_reader(reader);

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
        .collect();
    let missing_columns = schema.missing_columns(headers.iter().map(String::as_str));
    if !missing_columns.is_empty() {
        warn!(
            kind = schema.kind.label(),
            missing = ?missing_columns,
            "csv header is missing schema columns"
        );
    }

    let mut rows = Vec::new();
    let mut warnings = Vec::new();
    for result in reader.records() {
        let record = match result {
            Ok(record) => record,
            Err(err) => {
                warnings.push(ParseWarning {
                    line: err.position().map(|p| p.line()),
                    message: err.to_string(),
                });
                continue;
            }
        };
        let line = record.position().map(|p| p.line());
        if record.len() != headers.len() {
            warnings.push(ParseWarning {
                line,
                message: format!(
                    "expected {} fields, found {}",
                    headers.len(),
                    record.len()
                ),
            });
        }

        let values: HashMap<String, String> = headers
            .iter()
            .zip(record.iter())
            .filter(|(header, _)| schema.contains(header))
            .map(|(header, value)| (header.clone(), value.to_string()))
            .collect();
        rows.push(RawRow::new(schema, values));
    }

    Ok(ParsedCsv {
        rows,
        warnings,
        missing_columns,
        raw_bytes: Vec::new(),
    })
}
