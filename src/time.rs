//! Wall-clock access and ISO-8601 scheduled times.
//!
//! The scheduler never reads the system clock directly. It goes through a
//! [`TimeSource`] so that a failing clock aborts the operation in progress
//! instead of silently scheduling against time zero.

use std::fmt;

use chrono::{DateTime, Utc};
use mockall::automock;
use thiserror::Error;

/// Format used when an alert time is produced from a unix timestamp.
const ISO_8601_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%z";

/// Errors raised while reading the clock or parsing a time string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeError {
    /// The clock could not provide the current unix time.
    #[error("could not get the current unix time")]
    Clock,
    /// The string is not a supported ISO-8601 date-time.
    #[error("invalid ISO-8601 time {0:?}")]
    InvalidIso8601(String),
}

/// Accessor for the current unix time, in seconds.
#[automock]
pub trait TimeSource: Send + Sync {
    /// Returns the current unix time.
    fn current_unix_time(&self) -> Result<i64, TimeError>;
}

/// [`TimeSource`] backed by the system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn current_unix_time(&self) -> Result<i64, TimeError> {
        let now = Utc::now().timestamp();
        // A clock before 1970 is a clock that was never set.
        if now < 0 {
            return Err(TimeError::Clock);
        }
        Ok(now)
    }
}

/// The moment an alert becomes ready.
///
/// Keeps the ISO-8601 string it was created from, so it can be persisted and
/// reported upstream verbatim, together with the resolved UTC instant.
///
/// Both RFC 3339 (`2026-10-15T07:30:00Z`, `2026-10-15T07:30:00+02:00`) and the
/// compact offset form (`2026-10-15T07:30:00+0000`) are accepted.
///
/// # Examples
///
/// ```
/// use alert_scheduler::time::ScheduledTime;
///
/// let time = ScheduledTime::parse("1970-01-01T00:01:00+0000").unwrap();
/// assert_eq!(time.unix(), 60);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledTime {
    iso_8601: String,
    utc: DateTime<Utc>,
}

impl ScheduledTime {
    /// Parses an ISO-8601 date-time with an explicit offset.
    pub fn parse(iso_8601: &str) -> Result<Self, TimeError> {
        let parsed = DateTime::parse_from_rfc3339(iso_8601)
            .or_else(|_| DateTime::parse_from_str(iso_8601, ISO_8601_FORMAT))
            .map_err(|_| TimeError::InvalidIso8601(iso_8601.to_owned()))?;

        Ok(ScheduledTime {
            iso_8601: iso_8601.to_owned(),
            utc: parsed.with_timezone(&Utc),
        })
    }

    /// Builds a scheduled time from unix seconds, rendered in UTC.
    pub fn from_unix(unix: i64) -> Result<Self, TimeError> {
        let utc = DateTime::<Utc>::from_timestamp(unix, 0)
            .ok_or_else(|| TimeError::InvalidIso8601(unix.to_string()))?;

        Ok(ScheduledTime {
            iso_8601: utc.format(ISO_8601_FORMAT).to_string(),
            utc,
        })
    }

    /// The string this time was created from.
    pub fn as_iso_8601(&self) -> &str {
        &self.iso_8601
    }

    /// Unix seconds.
    pub fn unix(&self) -> i64 {
        self.utc.timestamp()
    }

    /// The resolved UTC instant.
    pub fn utc(&self) -> DateTime<Utc> {
        self.utc
    }
}

impl fmt::Display for ScheduledTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.iso_8601)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_compact_offset() {
        let time = ScheduledTime::parse("2017-08-09T01:23:45+0000").unwrap();
        assert_eq!(time.unix(), 1_502_241_825);
        assert_eq!(time.as_iso_8601(), "2017-08-09T01:23:45+0000");
    }

    #[test]
    fn test_parse_rfc3339() {
        let zulu = ScheduledTime::parse("2017-08-09T01:23:45Z").unwrap();
        let offset = ScheduledTime::parse("2017-08-09T03:23:45+02:00").unwrap();
        assert_eq!(zulu.unix(), offset.unix());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(
            ScheduledTime::parse("tomorrow morning"),
            Err(TimeError::InvalidIso8601("tomorrow morning".to_string()))
        );
        // An offset is required to resolve the instant
        assert!(ScheduledTime::parse("2017-08-09T01:23:45").is_err());
    }

    #[test]
    fn test_from_unix_round_trips_through_string() {
        let time = ScheduledTime::from_unix(1_800_000_000).unwrap();
        let reparsed = ScheduledTime::parse(time.as_iso_8601()).unwrap();
        assert_eq!(reparsed.unix(), 1_800_000_000);
    }

    #[test]
    fn test_system_time_source_is_after_epoch() {
        assert!(SystemTimeSource.current_unix_time().unwrap() > 0);
    }
}
