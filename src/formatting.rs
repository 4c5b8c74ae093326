//! Human-readable magnitudes for byte counts and durations.
//!
//! Both formatters are pure and feed the reporter and the flat-file history
//! rows, so their output is part of the on-disk format.

const BYTE_UNITS: [&str; 9] = ["B", "KB", "MB", "GB", "TB", "PB", "EB", "ZB", "YB"];

/// Fixed-size (non-calendar) duration units, largest first.
const DURATION_UNITS: [(u64, &str, &str); 7] = [
    (29_030_400, "year", "years"),
    (2_419_200, "month", "months"),
    (604_800, "week", "weeks"),
    (86_400, "day", "days"),
    (3_600, "hour", "hours"),
    (60, "minute", "minutes"),
    (1, "second", "seconds"),
];

/// Formats a byte count as `"<value> <unit>"`.
///
/// The value is divided by 1024 only while it is strictly greater than 1024,
/// so `1024` stays `"1024 B"`. Values that were never divided print as plain
/// integers; scaled values are rounded to two decimals and always keep at
/// least one fractional digit (`"1.0 KB"`, `"184.89 GB"`).
pub fn format_bytes(bytes: u64) -> String {
    if bytes <= 1024 {
        return format!("{} {}", bytes, BYTE_UNITS[0]);
    }

    let mut amount = bytes as f64;
    let mut unit = 0;
    while amount > 1024.0 && unit < BYTE_UNITS.len() - 1 {
        amount /= 1024.0;
        unit += 1;
    }

    let rounded = (amount * 100.0).round() / 100.0;
    let mut value = rounded.to_string();
    if !value.contains('.') {
        value.push_str(".0");
    }
    format!("{} {}", value, BYTE_UNITS[unit])
}

/// Breaks `seconds` down into `(count, label)` pairs, largest unit first.
///
/// Units with a zero count are left out, so `0` yields an empty breakdown.
pub fn format_duration(seconds: u64) -> Vec<(u64, &'static str)> {
    let mut remaining = seconds;
    let mut parts = Vec::new();

    for (unit_seconds, singular, plural) in DURATION_UNITS {
        let count = remaining / unit_seconds;
        if count > 0 {
            parts.push((count, if count == 1 { singular } else { plural }));
            remaining -= count * unit_seconds;
        }
    }

    parts
}

/// Renders a duration breakdown as `"1 hour, 2 minutes"`.
pub fn join_duration(seconds: u64) -> String {
    format_duration(seconds)
        .iter()
        .map(|(count, label)| format!("{} {}", count, label))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes_small_values_stay_integral() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1), "1 B");
        assert_eq!(format_bytes(1000), "1000 B");
    }

    #[test]
    fn test_format_bytes_does_not_advance_at_exactly_1024() {
        assert_eq!(format_bytes(1024), "1024 B");
        assert_eq!(format_bytes(1025), "1.0 KB");
        assert_eq!(format_bytes(1024 * 1024), "1024.0 KB");
        assert_eq!(format_bytes(1024 * 1024 + 1), "1.0 MB");
    }

    #[test]
    fn test_format_bytes_rounds_to_two_decimals() {
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(33_554_432), "32.0 MB");
        // 184.89 GiB
        assert_eq!(format_bytes(198_525_046_538), "184.89 GB");
    }

    #[test]
    fn test_format_bytes_large_values() {
        assert_eq!(format_bytes(3 * 1024u64.pow(4) + 1), "3.0 TB");
        assert!(format_bytes(u64::MAX).ends_with(" EB"));
    }

    #[test]
    fn test_format_duration_zero_is_empty() {
        assert!(format_duration(0).is_empty());
    }

    #[test]
    fn test_format_duration_breakdown() {
        assert_eq!(format_duration(61), vec![(1, "minute"), (1, "second")]);
        assert_eq!(format_duration(3600), vec![(1, "hour")]);
        assert_eq!(format_duration(7322), vec![(2, "hours"), (2, "minutes"), (2, "seconds")]);
        assert_eq!(
            format_duration(29_030_400 + 2 * 604_800 + 86_400),
            vec![(1, "year"), (2, "weeks"), (1, "day")]
        );
    }

    #[test]
    fn test_join_duration() {
        assert_eq!(join_duration(0), "");
        assert_eq!(join_duration(3661), "1 hour, 1 minute, 1 second");
    }
}
