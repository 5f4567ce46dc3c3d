//! Row decoder: raw spreadsheet rows to a deduplicated batch

mod dates;

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, FixedOffset, NaiveDateTime};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::{IncomingBatch, IncomingEntry};

pub use dates::{from_serial, parse_date_text, Region};

static IMEI: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{15}$").expect("Invalid regex"));

/// One spreadsheet cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
    DateTime(NaiveDateTime),
}

impl Cell {
    /// Classify a raw text value the way a spreadsheet export would.
    pub fn from_text(value: &str) -> Self {
        let value = value.trim();
        if value.is_empty() {
            Self::Empty
        } else {
            Self::Text(value.to_string())
        }
    }

    fn identifier(&self) -> Option<String> {
        let text = match self {
            Self::Empty => return None,
            Self::Text(text) => text.trim().to_string(),
            Self::Number(number) => format_number(*number),
            Self::DateTime(value) => value.to_string(),
        };
        (!text.is_empty()).then_some(text)
    }

    const fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    fn date(&self, region: Region) -> Option<DateTime<FixedOffset>> {
        match self {
            Self::Empty => None,
            Self::Text(text) => parse_date_text(text, region),
            Self::Number(serial) => from_serial(*serial, region),
            Self::DateTime(naive) => region.localize(*naive),
        }
    }
}

/// Integral floats render without a fractional part.
fn format_number(number: f64) -> String {
    if number.is_finite() && number.fract() == 0.0 && number.abs() < 1e17 {
        format!("{number:.0}")
    } else {
        number.to_string()
    }
}

/// The two cells of interest from one feed row.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub identifier: Cell,
    pub date: Cell,
}

impl RawRow {
    pub const fn new(identifier: Cell, date: Cell) -> Self {
        Self { identifier, date }
    }
}

/// Which identifiers a feed may contain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierRule {
    /// Any non-empty identifier
    #[default]
    Any,
    /// A 15-digit IMEI, or a 5..=50 character serial with at least one
    /// alphanumeric character
    ImeiOrSerial,
}

impl IdentifierRule {
    pub fn accepts(self, identifier: &str) -> bool {
        match self {
            Self::Any => true,
            Self::ImeiOrSerial => {
                if IMEI.is_match(identifier) {
                    return true;
                }
                let length = identifier.chars().count();
                (5..=50).contains(&length) && identifier.chars().any(char::is_alphanumeric)
            }
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::ImeiOrSerial => "imei_or_serial",
        }
    }
}

impl fmt::Display for IdentifierRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IdentifierRule {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "any" => Ok(Self::Any),
            "imei_or_serial" => Ok(Self::ImeiOrSerial),
            other => Err(format!("unknown identifier rule '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeOptions {
    pub region: Region,
    pub rule: IdentifierRule,
}

/// Counters from one decode pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodeReport {
    /// Data rows seen, header excluded
    pub rows: usize,
    pub skipped: usize,
    pub duplicates: usize,
    /// Non-empty date cells no format matched
    pub unparsed_dates: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub batch: IncomingBatch,
    pub report: DecodeReport,
}

/// Decode raw rows into an incoming batch.
///
/// The first row is a header and is always skipped. Rows with an empty (or,
/// under [`IdentifierRule::ImeiOrSerial`], malformed) identifier are dropped
/// and counted. Unparsable dates keep the row with no date. Duplicate
/// identifiers collapse to the last occurrence.
pub fn decode_rows(rows: impl IntoIterator<Item = RawRow>, options: DecodeOptions) -> Decoded {
    let mut report = DecodeReport::default();
    let mut entries = Vec::new();

    // Spreadsheet row numbers are 1-based and the header is row 1
    for (index, row) in rows.into_iter().enumerate().skip(1) {
        let line = index + 1;
        report.rows += 1;

        let Some(identifier) = row.identifier.identifier() else {
            tracing::debug!("Row {line}: empty identifier, skipped");
            report.skipped += 1;
            continue;
        };
        if !options.rule.accepts(&identifier) {
            tracing::warn!("Row {line}: identifier '{identifier}' rejected by {}", options.rule);
            report.skipped += 1;
            continue;
        }

        let client_timestamp = row.date.date(options.region);
        if client_timestamp.is_none() && !row.date.is_empty() {
            tracing::warn!("Row {line}: could not parse date {:?} for {identifier}", row.date);
            report.unparsed_dates += 1;
        }

        entries.push(IncomingEntry::new(identifier, client_timestamp));
    }

    let batch = IncomingBatch::from_entries(entries).with_skipped(report.skipped);
    report.duplicates = batch.duplicates();

    tracing::info!(
        "Decoded {} rows: {} distinct, {} skipped, {} duplicates, {} unparsed dates",
        report.rows,
        batch.len(),
        report.skipped,
        report.duplicates,
        report.unparsed_dates
    );

    Decoded { batch, report }
}
