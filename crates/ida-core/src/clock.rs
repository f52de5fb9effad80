use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::{Error, Result};

/// Source of "now" for default timestamps.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock pinned to one instant, for tests and replay tooling.
pub struct FixedClock(pub DateTime<Utc>);

impl FixedClock {
    pub fn at(timestamp: &str) -> Result<Self> {
        parse_timestamp(timestamp).map(FixedClock)
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Timestamps are stored as `YYYY-MM-DDTHH:MM:SSZ` so that text ordering in the
/// database matches chronological ordering.
pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::InvalidArgument(format!("invalid timestamp '{}': {}", value, e)))
}

/// Re-renders any RFC 3339 timestamp in the stored format.
pub fn normalize_timestamp(value: &str) -> Result<String> {
    parse_timestamp(value).map(format_timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_timestamp_converts_offsets_to_utc() {
        let normalized = normalize_timestamp("2023-05-01T12:00:00+03:00").unwrap();
        assert_eq!(normalized, "2023-05-01T09:00:00Z");
    }

    #[test]
    fn test_normalize_timestamp_drops_subseconds() {
        let normalized = normalize_timestamp("2023-05-01T12:00:00.987Z").unwrap();
        assert_eq!(normalized, "2023-05-01T12:00:00Z");
    }

    #[test]
    fn test_parse_timestamp_rejects_garbage() {
        assert!(matches!(
            parse_timestamp("yesterday"),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_fixed_clock() {
        let clock = FixedClock::at("2024-01-02T03:04:05Z").unwrap();
        assert_eq!(format_timestamp(clock.now()), "2024-01-02T03:04:05Z");
    }
}
