//! Timestamp column format.
//!
//! Timestamps are stored as fixed-width RFC 3339 text (microsecond
//! precision, `Z` suffix) so that SQL string comparison orders rows
//! chronologically.

use chrono::{DateTime, SecondsFormat, Utc};

/// Render an instant for storage.
pub(crate) fn format_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp. Returns `None` on malformed text so row-level
/// corruption can degrade instead of aborting a scan.
pub(crate) fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_width_text_sorts_chronologically() {
        use chrono::TimeZone;
        let early = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let late = early + chrono::Duration::milliseconds(1);
        assert!(format_ts(early) < format_ts(late));
        assert_eq!(parse_ts(&format_ts(early)), Some(early));
    }

    #[test]
    fn test_malformed_text_degrades() {
        assert!(parse_ts("not a timestamp").is_none());
    }
}
