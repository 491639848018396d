//! Duration formatting for reports and console output

use std::time::Duration;

/// Format a duration for humans.
///
/// Sub-second durations render in milliseconds, durations under a minute
/// keep one decimal place, and anything longer drops sub-second precision
/// and renders as hours/minutes/seconds components.
pub fn format_duration(duration: Duration) -> String {
    if duration.is_zero() {
        return "0s".to_string();
    }

    let secs = duration.as_secs();

    if secs == 0 {
        return format!("{}ms", duration.subsec_millis());
    }

    if secs < 60 {
        let tenths = duration.subsec_millis() / 100;
        return if tenths == 0 {
            format!("{}s", secs)
        } else {
            format!("{}.{}s", secs, tenths)
        };
    }

    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    let mut parts = Vec::with_capacity(3);
    if hours > 0 {
        parts.push(format!("{}h", hours));
    }
    if minutes > 0 {
        parts.push(format!("{}m", minutes));
    }
    if seconds > 0 {
        parts.push(format!("{}s", seconds));
    }
    parts.join(" ")
}
