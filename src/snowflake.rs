//! Snowflake id helpers.

use std::time::{SystemTime, UNIX_EPOCH};

/// Unix millis of the platform's first second; snowflake timestamps are relative to it.
pub const EPOCH_MILLIS: u64 = 1_420_070_400_000;

/// Messages older than this are no longer eligible for bulk delete and live in a
/// separate delete bucket.
pub const BULK_DELETE_MAX_AGE_MILLIS: u64 = 14 * 24 * 60 * 60 * 1_000;

/// Unix millis at which `id` was minted.
pub fn timestamp_millis(id: u64) -> u64 {
    (id >> 22) + EPOCH_MILLIS
}

/// Smallest snowflake that could have been minted at `unix_millis`.
pub fn from_timestamp_millis(unix_millis: u64) -> u64 {
    unix_millis.saturating_sub(EPOCH_MILLIS) << 22
}

/// Whether `id` is older than the bulk-delete window relative to `now_unix_millis`.
pub fn is_older_than_bulk_window(id: u64, now_unix_millis: u64) -> bool {
    now_unix_millis.saturating_sub(timestamp_millis(id)) > BULK_DELETE_MAX_AGE_MILLIS
}

/// Wall clock in unix millis, 0 if the system clock is before 1970.
pub fn unix_now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

pub(crate) fn is_snowflake(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_round_trips_through_lower_bound() {
        let at = EPOCH_MILLIS + 123_456_789;
        assert_eq!(timestamp_millis(from_timestamp_millis(at)), at);
    }

    #[test]
    fn known_snowflake_decodes() {
        // 175928847299117063 was minted at 2016-04-30T11:18:25.796Z.
        assert_eq!(timestamp_millis(175_928_847_299_117_063), 1_462_015_105_796);
    }

    #[test]
    fn bulk_window_boundary() {
        let now = EPOCH_MILLIS + 100 * 24 * 60 * 60 * 1_000;
        let fresh = from_timestamp_millis(now - BULK_DELETE_MAX_AGE_MILLIS);
        let stale = from_timestamp_millis(now - BULK_DELETE_MAX_AGE_MILLIS - 1);
        assert!(!is_older_than_bulk_window(fresh, now));
        assert!(is_older_than_bulk_window(stale, now));
    }

    #[test]
    fn snowflake_segments_are_all_digits() {
        assert!(is_snowflake("81384788765712384"));
        assert!(!is_snowflake("@me"));
        assert!(!is_snowflake(""));
        assert!(!is_snowflake("12ab"));
    }
}
