//! Human-readable rendering of durations.

/// Render a number of seconds at the two most significant units.
///
/// `90061` is `"1 D, 1 H"`, `3720` is `"1 H 2 M"`, `75` is `"1 M 15 S"`.
pub fn format_seconds(seconds: u64) -> String {
    let days = seconds / (24 * 3600);
    let rest = seconds % (24 * 3600);
    let hours = rest / 3600;
    let rest = rest % 3600;
    let minutes = rest / 60;
    let secs = rest % 60;

    if days > 0 {
        format!("{} D, {} H", days, hours)
    } else if hours > 0 {
        format!("{} H {} M", hours, minutes)
    } else if minutes > 0 {
        format!("{} M {} S", minutes, secs)
    } else {
        format!("{} S", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_seconds_only() {
        assert_eq!(format_seconds(0), "0 S");
        assert_eq!(format_seconds(59), "59 S");
    }

    #[test]
    fn test_format_minutes() {
        assert_eq!(format_seconds(75), "1 M 15 S");
    }

    #[test]
    fn test_format_hours_drops_seconds() {
        assert_eq!(format_seconds(3720), "1 H 2 M");
        assert_eq!(format_seconds(3601), "1 H 0 M");
    }

    #[test]
    fn test_format_days_drops_minutes() {
        assert_eq!(format_seconds(90061), "1 D, 1 H");
    }
}
