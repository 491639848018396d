//! Cache lifetime parsing ("7 days", "24 hours", "30m")

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

use crate::error::ConfigError;

fn lifetime_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(\d+)\s*(seconds?|secs?|s|minutes?|mins?|m|hours?|hrs?|h|days?|d|weeks?|w)\s*$")
            .expect("lifetime pattern is valid")
    })
}

/// Parse a human readable lifetime into a [`Duration`].
///
/// Accepts an integer followed by a unit: seconds, minutes, hours, days or
/// weeks, in long, plural or short form.
pub fn parse_lifetime(value: &str) -> Result<Duration, ConfigError> {
    let lowered = value.to_lowercase();
    let caps = lifetime_regex()
        .captures(&lowered)
        .ok_or_else(|| ConfigError::InvalidLifetime(value.to_string()))?;

    let amount: u64 = caps[1]
        .parse()
        .map_err(|_| ConfigError::InvalidLifetime(value.to_string()))?;

    let unit_secs = match &caps[2] {
        u if u.starts_with('s') => 1,
        u if u.starts_with('m') => 60,
        u if u.starts_with('h') => 60 * 60,
        u if u.starts_with('d') => 24 * 60 * 60,
        _ => 7 * 24 * 60 * 60,
    };

    amount
        .checked_mul(unit_secs)
        .map(Duration::from_secs)
        .ok_or_else(|| ConfigError::InvalidLifetime(value.to_string()))
}
