//! Due-value parsing and time-zone aware normalization.
//!
//! # Responsibility
//! - Classify raw remote due strings into instant, local date-time, or
//!   date-only values.
//! - Resolve those values into absolute instants for storage.
//!
//! # Invariants
//! - Values carrying an offset are stored as that exact instant.
//! - Date-only values resolve to local midnight in the owning user's zone,
//!   through the explicit [`ZonedDate`] pair. The host zone is never used.
//! - Local midnight that falls in a DST gap moves forward to the first valid
//!   local time of that day.

use crate::model::task::TaskDue;
use chrono::{DateTime, FixedOffset, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::error::Error;
use std::fmt::{Display, Formatter};

const LOCAL_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

/// Remote due value as classified at the adapter boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteDue {
    /// Timestamp with explicit offset (`2024-03-10T09:00:00-08:00`, `...Z`).
    Instant(DateTime<FixedOffset>),
    /// Wall-clock time without offset; `zone` is the source's zone hint.
    LocalDateTime {
        datetime: NaiveDateTime,
        zone: Option<String>,
    },
    /// Calendar date with no time component.
    Date(NaiveDate),
    /// Anything that could not be parsed; kept for diagnostics.
    Unparsed(String),
}

impl RemoteDue {
    /// Classifies a raw due string. `zone_hint` applies to wall-clock values.
    pub fn parse(raw: &str, zone_hint: Option<&str>) -> Self {
        let value = raw.trim();
        if let Ok(instant) = DateTime::parse_from_rfc3339(value) {
            return Self::Instant(instant);
        }
        if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
            return Self::Date(date);
        }
        for format in LOCAL_DATETIME_FORMATS {
            if let Ok(datetime) = NaiveDateTime::parse_from_str(value, format) {
                return Self::LocalDateTime {
                    datetime,
                    zone: zone_hint
                        .map(str::trim)
                        .filter(|zone| !zone.is_empty())
                        .map(str::to_string),
                };
            }
        }
        Self::Unparsed(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTimeZone(pub String);

impl Display for InvalidTimeZone {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown IANA time zone `{}`", self.0)
    }
}

impl Error for InvalidTimeZone {}

/// Parses an IANA zone name such as `America/Los_Angeles`.
pub fn parse_time_zone(name: &str) -> Result<Tz, InvalidTimeZone> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| InvalidTimeZone(name.trim().to_string()))
}

/// A calendar date bound to the zone it must be read in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZonedDate {
    pub date: NaiveDate,
    pub zone: Tz,
}

impl ZonedDate {
    pub fn new(date: NaiveDate, zone: Tz) -> Self {
        Self { date, zone }
    }

    /// First instant of this date in its zone.
    pub fn start_of_day(&self) -> DateTime<Utc> {
        resolve_local(self.zone, self.date.and_time(NaiveTime::MIN))
    }
}

/// Resolves a remote due value into a stored due.
///
/// Returns `None` for [`RemoteDue::Unparsed`].
pub fn normalize_due(due: &RemoteDue, user_zone: Tz) -> Option<TaskDue> {
    match due {
        RemoteDue::Instant(instant) => Some(TaskDue {
            at_ms: instant.with_timezone(&Utc).timestamp_millis(),
            time_zone: user_zone.name().to_string(),
            all_day: false,
        }),
        RemoteDue::LocalDateTime { datetime, zone } => {
            let zone = zone
                .as_deref()
                .and_then(|name| parse_time_zone(name).ok())
                .unwrap_or(user_zone);
            Some(TaskDue {
                at_ms: resolve_local(zone, *datetime).timestamp_millis(),
                time_zone: zone.name().to_string(),
                all_day: false,
            })
        }
        RemoteDue::Date(date) => {
            let zoned = ZonedDate::new(*date, user_zone);
            Some(TaskDue {
                at_ms: zoned.start_of_day().timestamp_millis(),
                time_zone: user_zone.name().to_string(),
                all_day: true,
            })
        }
        RemoteDue::Unparsed(_) => None,
    }
}

fn resolve_local(zone: Tz, local: NaiveDateTime) -> DateTime<Utc> {
    let mut candidate = local;
    // DST gaps are at most a few hours; walk forward in 15 minute steps.
    for _ in 0..(4 * 24) {
        match zone.from_local_datetime(&candidate) {
            LocalResult::Single(resolved) => return resolved.with_timezone(&Utc),
            LocalResult::Ambiguous(earliest, _) => return earliest.with_timezone(&Utc),
            LocalResult::None => candidate += chrono::Duration::minutes(15),
        }
    }
    Utc.from_utc_datetime(&local)
}

#[cfg(test)]
mod tests {
    use super::{normalize_due, parse_time_zone, RemoteDue, ZonedDate};
    use chrono::{NaiveDate, TimeZone, Utc};
    use chrono_tz::Tz;

    fn zone(name: &str) -> Tz {
        parse_time_zone(name).unwrap()
    }

    #[test]
    fn classifies_remote_values() {
        assert!(matches!(
            RemoteDue::parse("2024-03-10T09:00:00-08:00", None),
            RemoteDue::Instant(_)
        ));
        assert!(matches!(
            RemoteDue::parse("2024-03-10", None),
            RemoteDue::Date(_)
        ));
        assert!(matches!(
            RemoteDue::parse("2024-03-10T09:00", Some("Europe/Paris")),
            RemoteDue::LocalDateTime { zone: Some(_), .. }
        ));
        assert_eq!(
            RemoteDue::parse("next tuesday", None),
            RemoteDue::Unparsed("next tuesday".to_string())
        );
    }

    #[test]
    fn date_only_resolves_to_local_midnight_in_user_zone() {
        let due = normalize_due(
            &RemoteDue::parse("2024-06-15", None),
            zone("America/Los_Angeles"),
        )
        .unwrap();

        // 2024-06-15 00:00 PDT (UTC-7) is 07:00 UTC, not UTC midnight.
        let expected = Utc.with_ymd_and_hms(2024, 6, 15, 7, 0, 0).unwrap();
        assert_eq!(due.at_ms, expected.timestamp_millis());
        assert!(due.all_day);
        assert_eq!(due.time_zone, "America/Los_Angeles");
    }

    #[test]
    fn explicit_offset_is_stored_as_that_instant() {
        let due = normalize_due(
            &RemoteDue::parse("2024-01-05T18:30:00+01:00", None),
            zone("America/New_York"),
        )
        .unwrap();
        let expected = Utc.with_ymd_and_hms(2024, 1, 5, 17, 30, 0).unwrap();
        assert_eq!(due.at_ms, expected.timestamp_millis());
        assert!(!due.all_day);
    }

    #[test]
    fn local_datetime_prefers_source_zone_hint() {
        let due = normalize_due(
            &RemoteDue::parse("2024-01-05T09:00:00", Some("Asia/Tokyo")),
            zone("UTC"),
        )
        .unwrap();
        let expected = Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap();
        assert_eq!(due.at_ms, expected.timestamp_millis());
        assert_eq!(due.time_zone, "Asia/Tokyo");
    }

    #[test]
    fn midnight_in_dst_gap_moves_forward() {
        // Santiago skipped 2022-09-11 00:00 -> 01:00.
        let date = NaiveDate::from_ymd_opt(2022, 9, 11).unwrap();
        let start = ZonedDate::new(date, zone("America/Santiago")).start_of_day();
        let expected = Utc.with_ymd_and_hms(2022, 9, 11, 4, 0, 0).unwrap();
        assert_eq!(start, expected);
    }

    #[test]
    fn unparsed_values_normalize_to_none() {
        assert!(normalize_due(&RemoteDue::Unparsed("soon".to_string()), zone("UTC")).is_none());
    }

    #[test]
    fn rejects_unknown_zone_names() {
        assert!(parse_time_zone("Mars/Olympus_Mons").is_err());
    }
}
