//! Run identifiers and version timestamps.
//!
//! A `version_ts` names one published version. Format:
//! `YYYY-MM-DDTHH-MM-SS` (UTC, `:` replaced with `-` so it is key-safe),
//! which makes lexicographic ordering equal temporal ordering across the
//! whole event store.

use chrono::{DateTime, NaiveDateTime, Utc};
use uuid::Uuid;

/// Formats a timestamp as a `version_ts` string.
#[must_use]
pub fn generate_version_ts(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H-%M-%S").to_string()
}

/// Generates a unique run id.
#[must_use]
pub fn generate_run_id() -> String {
    Uuid::new_v4().to_string()
}

/// Parses a `version_ts` string back into a UTC timestamp.
///
/// Returns `None` for strings not in the canonical format.
#[must_use]
pub fn parse_version_ts(version_ts: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(version_ts, "%Y-%m-%dT%H-%M-%S")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn version_ts_format_is_key_safe() {
        let at = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 5).unwrap();
        let ts = generate_version_ts(at);
        assert_eq!(ts, "2024-01-15T10-30-05");
        assert!(!ts.contains(':'));
    }

    #[test]
    fn version_ts_roundtrips() {
        let at = Utc.with_ymd_and_hms(2024, 12, 31, 23, 59, 59).unwrap();
        let ts = generate_version_ts(at);
        assert_eq!(parse_version_ts(&ts), Some(at));
    }

    #[test]
    fn version_ts_sorts_temporally() {
        let older = generate_version_ts(Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap());
        let newer = generate_version_ts(Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 1).unwrap());
        assert!(older < newer);
    }

    #[test]
    fn malformed_version_ts_is_rejected() {
        assert!(parse_version_ts("2024-01-15T10:30:05").is_none());
        assert!(parse_version_ts("not-a-version").is_none());
    }

    #[test]
    fn run_ids_are_unique() {
        assert_ne!(generate_run_id(), generate_run_id());
    }
}
