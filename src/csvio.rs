//! CSV reading and writing for the run-directory artifacts
//!
//! All persisted tables share one format: a fixed header row, one record per
//! row, and double-quote wrapping for any field containing a comma, a double
//! quote, a newline, or leading/trailing whitespace, with embedded quotes
//! doubled. Appenders are idempotent across re-runs: an existing file with
//! the expected header is reused, rows are only ever appended.

use crate::error::{MergeError, Result};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Encode one field, quoting only when the format requires it
#[must_use]
pub fn encode_field(field: &str) -> String {
    let needs_quoting = field.contains(',')
        || field.contains('"')
        || field.contains('\n')
        || field.contains('\r')
        || field != field.trim();
    if needs_quoting {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Encode a full row, without the trailing newline
#[must_use]
pub fn encode_row(fields: &[&str]) -> String {
    fields
        .iter()
        .map(|f| encode_field(f))
        .collect::<Vec<_>>()
        .join(",")
}

/// Parse CSV content into rows of fields
///
/// Handles quoted fields with embedded commas, doubled quotes, and newlines.
/// The final record may or may not carry a trailing newline.
///
/// # Errors
///
/// Returns [`MergeError::Csv`] on an unterminated quoted field or on stray
/// characters between a closing quote and the next separator.
pub fn parse(content: &str) -> Result<Vec<Vec<String>>> {
    let mut rows = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut chars = content.chars().peekable();
    let mut in_quotes = false;
    let mut row_started = false;

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' => {
                    if chars.peek() == Some(&'"') {
                        chars.next();
                        field.push('"');
                    } else {
                        in_quotes = false;
                    }
                }
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' => {
                if !field.is_empty() {
                    return Err(MergeError::Csv(format!(
                        "quote inside unquoted field near {field:?}"
                    )));
                }
                in_quotes = true;
                row_started = true;
            }
            ',' => {
                row.push(std::mem::take(&mut field));
                row_started = true;
            }
            '\n' => {
                if row_started || !field.is_empty() {
                    row.push(std::mem::take(&mut field));
                    rows.push(std::mem::take(&mut row));
                }
                row_started = false;
            }
            '\r' => {
                // bare CR is swallowed; CRLF terminates like LF
            }
            _ => {
                field.push(c);
                row_started = true;
            }
        }
    }
    if in_quotes {
        return Err(MergeError::Csv("unterminated quoted field".to_string()));
    }
    if row_started || !field.is_empty() {
        row.push(field);
        rows.push(row);
    }
    Ok(rows)
}

/// Read a CSV file, verify its header, and return the data rows
///
/// # Errors
///
/// Returns an error when the file cannot be read, the header does not match,
/// or any data row has the wrong column count.
pub fn read_rows(path: &Path, expected_header: &[&str]) -> Result<Vec<Vec<String>>> {
    let mut content = String::new();
    File::open(path)
        .and_then(|mut f| f.read_to_string(&mut content))
        .map_err(|e| MergeError::fs(format!("failed to read {}: {e}", path.display())))?;
    let mut rows = parse(&content)?;
    if rows.is_empty() {
        return Err(MergeError::Csv(format!("{}: missing header", path.display())));
    }
    let header = rows.remove(0);
    if header != expected_header {
        return Err(MergeError::Csv(format!(
            "{}: unexpected header {header:?}",
            path.display()
        )));
    }
    for (i, row) in rows.iter().enumerate() {
        if row.len() != expected_header.len() {
            return Err(MergeError::Csv(format!(
                "{}: row {} has {} columns, expected {}",
                path.display(),
                i + 2,
                row.len(),
                expected_header.len()
            )));
        }
    }
    Ok(rows)
}

/// Append-only CSV file with a fixed header
///
/// Opening is idempotent: a file that already starts with the expected header
/// is reused as-is; a missing file is created with the header. Each append is
/// a single flushed row.
pub struct CsvAppender {
    writer: BufWriter<File>,
    path: PathBuf,
    columns: usize,
}

impl CsvAppender {
    /// Open (or create) the file at `path` with the given header
    ///
    /// # Errors
    ///
    /// Returns an error when the file exists with a different header or on
    /// any I/O failure.
    pub fn open(path: &Path, header: &[&str]) -> Result<Self> {
        let exists = path.exists();
        if exists {
            let mut content = String::new();
            File::open(path)
                .and_then(|mut f| f.read_to_string(&mut content))
                .map_err(|e| MergeError::fs(format!("failed to read {}: {e}", path.display())))?;
            let first = parse(&content)?.into_iter().next().unwrap_or_default();
            if first != header {
                return Err(MergeError::Csv(format!(
                    "{}: existing header {first:?} does not match expected {header:?}",
                    path.display()
                )));
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| MergeError::fs(format!("failed to open {}: {e}", path.display())))?;
        let mut appender = Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            columns: header.len(),
        };
        if !exists {
            appender.write_line(&encode_row(header))?;
        }
        Ok(appender)
    }

    /// Append one row and flush it
    ///
    /// # Errors
    ///
    /// Returns an error on a column-count mismatch or on I/O failure.
    pub fn append(&mut self, fields: &[&str]) -> Result<()> {
        if fields.len() != self.columns {
            return Err(MergeError::Csv(format!(
                "{}: appending {} columns, expected {}",
                self.path.display(),
                fields.len(),
                self.columns
            )));
        }
        self.write_line(&encode_row(fields))
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        writeln!(self.writer, "{line}")
            .and_then(|()| self.writer.flush())
            .map_err(|e| MergeError::fs(format!("failed to write {}: {e}", self.path.display())))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    #[rstest]
    #[case("plain", "plain")]
    #[case("a,b", "\"a,b\"")]
    #[case("say \"hi\"", "\"say \"\"hi\"\"\"")]
    #[case("line\nbreak", "\"line\nbreak\"")]
    #[case(" padded ", "\" padded \"")]
    #[case("", "")]
    fn field_encoding(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(encode_field(input), expected);
    }

    #[test]
    fn parse_round_trips_awkward_fields() {
        let fields = ["a,b", "say \"hi\"", "multi\nline", " padded ", "plain"];
        let encoded = encode_row(&fields);
        let rows = parse(&encoded).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0], fields);
    }

    #[test]
    fn parse_rejects_unterminated_quote() {
        assert!(parse("a,\"open").is_err());
    }

    #[test]
    fn appender_reuses_existing_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.csv");
        let header = ["x", "y"];
        {
            let mut a = CsvAppender::open(&path, &header).unwrap();
            a.append(&["1", "2"]).unwrap();
        }
        {
            let mut a = CsvAppender::open(&path, &header).unwrap();
            a.append(&["3", "4"]).unwrap();
        }
        let rows = read_rows(&path, &header).unwrap();
        assert_eq!(rows, vec![vec!["1", "2"], vec!["3", "4"]]);
    }

    #[test]
    fn appender_rejects_header_mismatch() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.csv");
        CsvAppender::open(&path, &["x", "y"]).unwrap();
        assert!(CsvAppender::open(&path, &["x", "z"]).is_err());
    }
}
