//! Delimited text feed reader.
//!
//! The feed is a spreadsheet exported as tab, comma or semicolon separated
//! text. Only the identifier and date columns are read; the header row is
//! passed through for the decoder to skip.

use std::path::Path;

use regsync_core::decode::{Cell, RawRow};

use crate::error::CliError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedOptions {
    /// 0-based identifier column
    pub identifier_column: usize,
    /// 0-based date column
    pub date_column: usize,
    /// Field delimiter; detected from the header when unset
    pub delimiter: Option<u8>,
}

impl Default for FeedOptions {
    fn default() -> Self {
        Self {
            identifier_column: 0,
            date_column: 1,
            delimiter: None,
        }
    }
}

/// Parse a column selector: a spreadsheet letter (`A`, `G`, `AB`) or a
/// 1-based number.
pub fn parse_column(selector: &str) -> Result<usize, CliError> {
    let selector = selector.trim();
    let invalid = || CliError::InvalidColumn(selector.to_string());

    if selector.is_empty() {
        return Err(invalid());
    }

    if selector.chars().all(|c| c.is_ascii_digit()) {
        let number = selector.parse::<usize>().map_err(|_| invalid())?;
        return number.checked_sub(1).ok_or_else(invalid);
    }

    if !selector.chars().all(|c| c.is_ascii_alphabetic()) || selector.len() > 3 {
        return Err(invalid());
    }

    let number = selector
        .to_ascii_uppercase()
        .bytes()
        .fold(0_usize, |acc, letter| {
            acc * 26 + usize::from(letter - b'A' + 1)
        });
    Ok(number - 1)
}

/// Parse a delimiter name or character.
pub fn parse_delimiter(value: &str) -> Result<u8, CliError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "tab" | "\\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "semicolon" | ";" => Ok(b';'),
        _ if value == "\t" => Ok(b'\t'),
        other => Err(CliError::InvalidDelimiter(other.to_string())),
    }
}

/// Pick the delimiter that splits the header into the most fields.
///
/// Ties prefer tab, then semicolon, then comma.
pub fn detect_delimiter(header: &str) -> u8 {
    [b'\t', b';', b',']
        .into_iter()
        .map(|delimiter| {
            let count = header.bytes().filter(|byte| *byte == delimiter).count();
            (delimiter, count)
        })
        .fold((b'\t', 0), |best, candidate| {
            if candidate.1 > best.1 {
                candidate
            } else {
                best
            }
        })
        .0
}

/// Split feed text into raw rows.
///
/// Quoted fields may contain the delimiter, line breaks and doubled `""`
/// quotes. Blank lines are ignored; short rows yield empty cells.
pub fn parse_feed(text: &str, options: &FeedOptions) -> Result<Vec<RawRow>, csv::Error> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let delimiter = options.delimiter.unwrap_or_else(|| {
        text.lines()
            .find(|line| !line.trim().is_empty())
            .map_or(b'\t', detect_delimiter)
    });

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .quoting(true)
        .double_quote(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.iter().all(str::is_empty) {
            continue;
        }
        let identifier = record
            .get(options.identifier_column)
            .map_or(Cell::Empty, Cell::from_text);
        let date = record.get(options.date_column).map_or(Cell::Empty, date_cell);
        rows.push(RawRow::new(identifier, date));
    }
    Ok(rows)
}

/// Numeric date cells are spreadsheet serial dates.
fn date_cell(value: &str) -> Cell {
    match value.parse::<f64>() {
        Ok(serial) if serial.is_finite() => Cell::Number(serial),
        _ => Cell::from_text(value),
    }
}

/// Read and split a feed file.
pub fn read_feed(path: &Path, options: &FeedOptions) -> Result<Vec<RawRow>, CliError> {
    let raw = std::fs::read(path).map_err(|error| CliError::Feed {
        path: path.display().to_string(),
        reason: error.to_string(),
    })?;
    let text = String::from_utf8_lossy(&raw);
    let rows = parse_feed(&text, options).map_err(|error| CliError::Feed {
        path: path.display().to_string(),
        reason: error.to_string(),
    })?;
    tracing::debug!("Read {} rows from {}", rows.len(), path.display());
    Ok(rows)
}
