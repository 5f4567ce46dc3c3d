//! Date parsing for feed cells

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

/// Date-time text formats, tried in order after RFC 3339.
const DATETIME_FORMATS: &[&str] = &[
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %I:%M %p",
    "%d/%m/%Y %I:%M:%S %p",
    "%d/%m/%Y %I:%M %p",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
];

/// Literal `Z` suffix, read as UTC rather than the region offset.
const UTC_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Date-only formats, read at midnight.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%d/%m/%Y"];

/// Largest serial a spreadsheet accepts (9999-12-31).
const MAX_SERIAL: f64 = 2_958_465.0;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Country whose UTC offset is applied to naive feed dates.
///
/// Offsets are fixed standard offsets; daylight-saving rules are not applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Region {
    #[default]
    Cr,
    Pa,
    Co,
    Mx,
    Gt,
    Hn,
    Sv,
    Ni,
    Ec,
    Pe,
    Cl,
    Ar,
    Br,
    Us,
    Es,
}

impl Region {
    pub const ALL: [Self; 15] = [
        Self::Cr,
        Self::Pa,
        Self::Co,
        Self::Mx,
        Self::Gt,
        Self::Hn,
        Self::Sv,
        Self::Ni,
        Self::Ec,
        Self::Pe,
        Self::Cl,
        Self::Ar,
        Self::Br,
        Self::Us,
        Self::Es,
    ];

    pub const fn code(self) -> &'static str {
        match self {
            Self::Cr => "CR",
            Self::Pa => "PA",
            Self::Co => "CO",
            Self::Mx => "MX",
            Self::Gt => "GT",
            Self::Hn => "HN",
            Self::Sv => "SV",
            Self::Ni => "NI",
            Self::Ec => "EC",
            Self::Pe => "PE",
            Self::Cl => "CL",
            Self::Ar => "AR",
            Self::Br => "BR",
            Self::Us => "US",
            Self::Es => "ES",
        }
    }

    /// Offset east of UTC, in hours
    pub const fn utc_offset_hours(self) -> i32 {
        match self {
            Self::Cr | Self::Mx | Self::Gt | Self::Hn | Self::Sv | Self::Ni => -6,
            Self::Pa | Self::Co | Self::Ec | Self::Pe | Self::Us => -5,
            Self::Cl => -4,
            Self::Ar | Self::Br => -3,
            Self::Es => 1,
        }
    }

    pub fn offset(self) -> Option<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_hours() * 3600)
    }

    /// Resolve a country code, falling back to the default region.
    pub fn from_code_or_default(code: &str) -> Self {
        code.parse().unwrap_or_else(|_| {
            tracing::warn!(
                "Unknown region '{code}', using {}",
                Self::default().code()
            );
            Self::default()
        })
    }

    /// Attach this region's offset to a naive date-time.
    pub fn localize(self, naive: NaiveDateTime) -> Option<DateTime<FixedOffset>> {
        naive.and_local_timezone(self.offset()?).single()
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Region {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let code = value.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|region| region.code() == code)
            .ok_or_else(|| format!("unknown region '{value}'"))
    }
}

/// Parse a text date against the accepted formats; first match wins.
pub fn parse_date_text(text: &str, region: Region) -> Option<DateTime<FixedOffset>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed);
    }

    for format in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return region.localize(naive);
        }
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(text, UTC_FORMAT) {
        return Some(naive.and_utc().fixed_offset());
    }

    DATE_FORMATS.iter().find_map(|format| {
        NaiveDate::parse_from_str(text, format)
            .ok()
            .and_then(|date| region.localize(date.and_time(NaiveTime::MIN)))
    })
}

/// Convert a spreadsheet serial date (days since 1899-12-30).
pub fn from_serial(serial: f64, region: Region) -> Option<DateTime<FixedOffset>> {
    if !serial.is_finite() || !(0.0..=MAX_SERIAL).contains(&serial) {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_time(NaiveTime::MIN);
    #[allow(clippy::cast_possible_truncation)]
    let seconds = (serial * SECONDS_PER_DAY).round() as i64;
    let naive = epoch.checked_add_signed(Duration::seconds(seconds))?;
    region.localize(naive)
}
