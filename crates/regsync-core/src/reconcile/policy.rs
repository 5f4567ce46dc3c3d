//! Change detection for identifiers already in the registry

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::models::DeviceState;

/// How a stored client date is compared with an incoming one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateComparison {
    /// Calendar dates must match; time of day is ignored. The incoming
    /// instant is read in the stored value's offset, so the same instant
    /// written in another offset is not a change.
    #[default]
    Day,
    /// Instants must match exactly.
    Exact,
}

impl DateComparison {
    pub fn differs(self, stored: &DateTime<FixedOffset>, incoming: &DateTime<FixedOffset>) -> bool {
        match self {
            Self::Day => {
                stored.date_naive() != incoming.with_timezone(stored.offset()).date_naive()
            }
            Self::Exact => stored != incoming,
        }
    }
}

/// Whether an existing identifier needs a write.
///
/// True when the record is inactive, when exactly one side has a date, or
/// when both dates differ under `comparison`. Two missing dates on an active
/// record count as unchanged.
pub fn needs_refresh(
    stored: &DeviceState,
    incoming: Option<&DateTime<FixedOffset>>,
    comparison: DateComparison,
) -> bool {
    if !stored.active {
        return true;
    }

    match (stored.client_timestamp.as_ref(), incoming) {
        (Some(stored), Some(incoming)) => comparison.differs(stored, incoming),
        (None, None) => false,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32, hour: u32) -> DateTime<FixedOffset> {
        FixedOffset::west_opt(6 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 1, day, hour, 0, 0)
            .unwrap()
    }

    fn state(client_timestamp: Option<DateTime<FixedOffset>>, active: bool) -> DeviceState {
        DeviceState {
            client_timestamp,
            active,
        }
    }

    #[test]
    fn same_day_different_time_is_unchanged_at_day_granularity() {
        let stored = state(Some(at(1, 8)), true);
        assert!(!needs_refresh(&stored, Some(&at(1, 17)), DateComparison::Day));
    }

    #[test]
    fn same_day_different_time_is_a_change_with_exact_comparison() {
        let stored = state(Some(at(1, 8)), true);
        assert!(needs_refresh(&stored, Some(&at(1, 17)), DateComparison::Exact));
    }

    #[test]
    fn exact_comparison_treats_equal_instants_in_other_offsets_as_equal() {
        let stored = at(1, 8);
        let incoming = stored.with_timezone(&FixedOffset::east_opt(0).unwrap());
        assert!(!DateComparison::Exact.differs(&stored, &incoming));
    }

    #[test]
    fn same_instant_in_another_offset_is_unchanged_at_day_granularity() {
        // 23:00 at -06:00 is 05:00 the next day in UTC
        let stored = state(Some(at(1, 23)), true);
        let incoming = at(1, 23).with_timezone(&FixedOffset::east_opt(0).unwrap());
        assert_eq!(incoming.date_naive().to_string(), "2024-01-02");
        assert!(!needs_refresh(&stored, Some(&incoming), DateComparison::Day));
        assert!(!needs_refresh(&stored, Some(&incoming), DateComparison::Exact));
    }

    #[test]
    fn different_day_is_a_change() {
        let stored = state(Some(at(1, 8)), true);
        assert!(needs_refresh(&stored, Some(&at(2, 8)), DateComparison::Day));
    }

    #[test]
    fn inactive_record_is_refreshed_even_with_same_date() {
        let stored = state(Some(at(1, 8)), false);
        assert!(needs_refresh(&stored, Some(&at(1, 8)), DateComparison::Day));
    }

    #[test]
    fn null_stored_date_triggers_write() {
        let stored = state(None, true);
        assert!(needs_refresh(&stored, Some(&at(1, 8)), DateComparison::Day));
    }

    #[test]
    fn incoming_without_date_replaces_stored_date() {
        let stored = state(Some(at(1, 8)), true);
        assert!(needs_refresh(&stored, None, DateComparison::Day));
    }

    #[test]
    fn both_dates_missing_on_active_record_is_unchanged() {
        let stored = state(None, true);
        assert!(!needs_refresh(&stored, None, DateComparison::Day));
    }
}
