//! Human-friendly duration strings
//!
//! Accepts inputs such as `"1 week"`, `"5 minutes 3 seconds"`, `"1 day, 2 hours"`
//! and the compact `"1w2d3h5m4s"`. Supported units are weeks, days, hours,
//! minutes and seconds, each with a few spellings.

use crate::error::{CommonError, Result};
use chrono::TimeDelta;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

const SECONDS_PER_MINUTE: i64 = 60;
const SECONDS_PER_HOUR: i64 = 60 * SECONDS_PER_MINUTE;
const SECONDS_PER_DAY: i64 = 24 * SECONDS_PER_HOUR;
const SECONDS_PER_WEEK: i64 = 7 * SECONDS_PER_DAY;

// Longest spellings first so captures hold the whole word.
const UNIT_PATTERN: &str =
    "weeks|week|wk|w|days|day|d|hours|hour|hr|h|minutes|minute|mins|min|m|seconds|second|secs|sec|s";

#[allow(clippy::expect_used)]
static PART_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(\d+)\s*({UNIT_PATTERN})")).expect("duration part pattern is valid")
});

#[allow(clippy::expect_used)]
static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"\A(?:\s*\d+\s*(?:{UNIT_PATTERN})\s*,?\s*)+\z"))
        .expect("duration pattern is valid")
});

fn unit_seconds(unit: &str) -> Option<i64> {
    match unit {
        "w" | "wk" | "week" | "weeks" => Some(SECONDS_PER_WEEK),
        "d" | "day" | "days" => Some(SECONDS_PER_DAY),
        "h" | "hr" | "hour" | "hours" => Some(SECONDS_PER_HOUR),
        "m" | "min" | "mins" | "minute" | "minutes" => Some(SECONDS_PER_MINUTE),
        "s" | "sec" | "secs" | "second" | "seconds" => Some(1),
        _ => None,
    }
}

/// Parse a human-friendly duration string
///
/// Repeated units are summed, so `"1 day 1 day"` is two days.
pub fn parse_duration(s: &str) -> Result<TimeDelta> {
    if !DURATION_RE.is_match(s) {
        return Err(CommonError::InvalidDuration(s.to_string()));
    }

    let mut total: i64 = 0;
    for caps in PART_RE.captures_iter(s) {
        let qty: i64 = caps[1]
            .parse()
            .map_err(|_| CommonError::InvalidDuration(s.to_string()))?;
        let per_unit =
            unit_seconds(&caps[2]).ok_or_else(|| CommonError::InvalidDuration(s.to_string()))?;
        total = qty
            .checked_mul(per_unit)
            .and_then(|secs| total.checked_add(secs))
            .ok_or_else(|| CommonError::InvalidDuration(s.to_string()))?;
    }

    TimeDelta::try_seconds(total).ok_or_else(|| CommonError::InvalidDuration(s.to_string()))
}

/// Render a duration using its largest whole unit, e.g. `"7 days"` or `"3 hours"`
pub fn humanize(delta: TimeDelta) -> String {
    let secs = delta.num_seconds().abs();
    let (qty, unit) = if secs >= SECONDS_PER_DAY {
        (secs / SECONDS_PER_DAY, "day")
    } else if secs >= SECONDS_PER_HOUR {
        (secs / SECONDS_PER_HOUR, "hour")
    } else if secs >= SECONDS_PER_MINUTE {
        (secs / SECONDS_PER_MINUTE, "minute")
    } else {
        (secs, "second")
    };

    if qty == 1 {
        format!("{} {}", qty, unit)
    } else {
        format!("{} {}s", qty, unit)
    }
}

/// A duration read from configuration in human-friendly form
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct HumanDuration(TimeDelta);

impl HumanDuration {
    pub fn new(delta: TimeDelta) -> Self {
        Self(delta)
    }

    pub fn as_delta(&self) -> TimeDelta {
        self.0
    }

    /// Convert to a std duration for timers; negative durations clamp to zero
    pub fn to_std(&self) -> std::time::Duration {
        self.0.to_std().unwrap_or_default()
    }
}

impl From<TimeDelta> for HumanDuration {
    fn from(delta: TimeDelta) -> Self {
        Self(delta)
    }
}

impl FromStr for HumanDuration {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self> {
        parse_duration(s).map(Self)
    }
}

impl fmt::Display for HumanDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut secs = self.0.num_seconds();
        if secs == 0 {
            return write!(f, "0s");
        }

        let mut out = String::new();
        for (per_unit, suffix) in [
            (SECONDS_PER_WEEK, "w"),
            (SECONDS_PER_DAY, "d"),
            (SECONDS_PER_HOUR, "h"),
            (SECONDS_PER_MINUTE, "m"),
            (1, "s"),
        ] {
            if secs >= per_unit {
                out.push_str(&format!("{}{}", secs / per_unit, suffix));
                secs %= per_unit;
            }
        }
        write!(f, "{}", out)
    }
}

impl Serialize for HumanDuration {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for HumanDuration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_rejects_empty_and_blank() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration(" \t ").is_err());
    }

    #[test]
    fn test_rejects_unknown_syntax() {
        assert!(parse_duration("3 minutes + 5 seconds").is_err());
        assert!(parse_duration("a day").is_err());
        assert!(parse_duration("5 fortnights").is_err());
    }

    #[test]
    fn test_multiple_parts() {
        assert_eq!(
            parse_duration("3 minutes 5 seconds").unwrap(),
            TimeDelta::minutes(3) + TimeDelta::seconds(5)
        );
        assert_eq!(
            parse_duration("3 minutes, 5 seconds").unwrap(),
            TimeDelta::minutes(3) + TimeDelta::seconds(5)
        );
    }

    #[test]
    fn test_all_units_long_and_short() {
        let expected = TimeDelta::weeks(1)
            + TimeDelta::days(2)
            + TimeDelta::hours(3)
            + TimeDelta::minutes(4)
            + TimeDelta::seconds(5);
        assert_eq!(
            parse_duration("1 week 2 days 3 hours 4 minutes 5 seconds").unwrap(),
            expected
        );
        assert_eq!(parse_duration("1w2d3h4m5s").unwrap(), expected);
    }

    #[test]
    fn test_single_day() {
        assert_eq!(parse_duration("1 day").unwrap(), TimeDelta::days(1));
        assert_eq!(parse_duration("24h").unwrap(), TimeDelta::days(1));
    }

    #[test]
    fn test_humanize() {
        assert_eq!(humanize(TimeDelta::days(7)), "7 days");
        assert_eq!(humanize(TimeDelta::days(1)), "1 day");
        assert_eq!(humanize(TimeDelta::hours(3) + TimeDelta::minutes(20)), "3 hours");
        assert_eq!(humanize(TimeDelta::seconds(42)), "42 seconds");
    }

    #[test]
    fn test_human_duration_display() {
        let d: HumanDuration = "1 day, 2 hours".parse().unwrap();
        assert_eq!(d.to_string(), "1d2h");
        assert_eq!(d.to_std(), std::time::Duration::from_secs(26 * 3600));
    }

    proptest! {
        #[test]
        fn prop_display_round_trips(secs in 0i64..(10 * SECONDS_PER_WEEK)) {
            let d = HumanDuration::new(TimeDelta::seconds(secs));
            let parsed: HumanDuration = d.to_string().parse().unwrap();
            prop_assert_eq!(parsed, d);
        }
    }
}
