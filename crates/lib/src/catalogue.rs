//! # Catalogue Parsing
//!
//! Turns a raw tabular catalogue file into normalized text records, one per
//! row. This is the first step of every knowledge-base validation and update.

use crate::errors::KbError;
use std::path::Path;
use tracing::{info, warn};

/// Cells of one row are joined with this separator to form a record.
pub const FIELD_SEPARATOR: &str = " | ";

/// Delimiters tried in order; the first that yields at least one record wins.
const DELIMITER_PRIORITY: [u8; 2] = [b',', b';'];

/// Parses a catalogue file into an ordered list of non-empty text records.
///
/// Each input row becomes one record: cells are trimmed, empty cells are
/// dropped, and the remainder is joined with [`FIELD_SEPARATOR`]. Rows with no
/// content are skipped. A leading UTF-8 byte-order mark is stripped before
/// delimiter detection.
///
/// Pure read: no side effects on failure or success.
pub fn parse_catalogue(path: &Path) -> Result<Vec<String>, KbError> {
    let raw = std::fs::read(path)?;
    let text = String::from_utf8_lossy(&raw);
    let text: &str = text.strip_prefix('\u{feff}').unwrap_or(&text);

    for delimiter in DELIMITER_PRIORITY {
        match records_with_delimiter(text, delimiter) {
            Ok(records) if !records.is_empty() => {
                info!(
                    rows = records.len(),
                    "parsed catalogue with delimiter '{}'",
                    delimiter as char
                );
                return Ok(records);
            }
            Ok(_) => continue,
            Err(e) => {
                warn!(
                    "failed to parse catalogue with delimiter '{}': {e}",
                    delimiter as char
                );
                continue;
            }
        }
    }

    Err(KbError::Format(
        "no delimiter produced any records (empty file or unsupported encoding)".to_string(),
    ))
}

fn records_with_delimiter(text: &str, delimiter: u8) -> Result<Vec<String>, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        let cells: Vec<&str> = row
            .iter()
            .map(str::trim)
            .filter(|cell| !cell.is_empty())
            .collect();
        if !cells.is_empty() {
            records.push(cells.join(FIELD_SEPARATOR));
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(content: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(content).expect("write temp file");
        file
    }

    #[test]
    fn parses_comma_separated_rows() {
        let file = write_temp(b"A,1\nB,2\nC,3\n");
        let records = parse_catalogue(file.path()).unwrap();
        assert_eq!(records, vec!["A | 1", "B | 2", "C | 3"]);
    }

    #[test]
    fn drops_empty_cells_and_blank_rows() {
        let file = write_temp(b"A,,1\n ,\nB, ,2\n");
        let records = parse_catalogue(file.path()).unwrap();
        assert_eq!(records, vec!["A | 1", "B | 2"]);
    }

    #[test]
    fn strips_byte_order_mark() {
        let file = write_temp(b"\xef\xbb\xbfA,1\n");
        let records = parse_catalogue(file.path()).unwrap();
        assert_eq!(records, vec!["A | 1"]);
    }

    #[test]
    fn empty_file_is_a_format_error() {
        let file = write_temp(b"");
        let err = parse_catalogue(file.path()).unwrap_err();
        assert!(matches!(err, KbError::Format(_)));
    }

    #[test]
    fn whitespace_only_file_is_a_format_error() {
        let file = write_temp(b"  \n \t \n");
        let err = parse_catalogue(file.path()).unwrap_err();
        assert!(matches!(err, KbError::Format(_)));
    }
}
