//! Scalar wrapper types (spec §4.2 custom scalars).
//!
//! Grounded in the teacher's `types.rs` newtype-wrapper scalars, reworked
//! around `chrono` rather than hand-rolled date parsing.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// An RFC3339 instant, with a handful of relative shortcuts a caller can
/// type directly instead of formatting a timestamp (spec §4.2). Serializes
/// to its RFC3339 string form, not an epoch integer, so it round-trips
/// through a GraphQL `String` scalar unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp(DateTime<Utc>);

impl Serialize for Timestamp {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_rfc3339())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Timestamp::parse(&raw).map_err(serde::de::Error::custom)
    }
}

impl Timestamp {
    pub fn now() -> Self {
        Timestamp(Utc::now())
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Timestamp(dt)
    }

    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339()
    }

    /// Parses an RFC3339 string, or one of the relative shortcuts `"now"`,
    /// `"today"`, `"yesterday"` (each resolved at call time, midnight UTC
    /// for the day-granular forms).
    pub fn parse(input: &str) -> Result<Self, ScalarParseError> {
        match input {
            "now" => Ok(Timestamp::now()),
            "today" => Ok(Timestamp(Utc::now().date_naive().and_hms_opt(0, 0, 0).unwrap().and_utc())),
            "yesterday" => Ok(Timestamp(
                (Utc::now().date_naive() - chrono::Duration::days(1))
                    .and_hms_opt(0, 0, 0)
                    .unwrap()
                    .and_utc(),
            )),
            other => DateTime::parse_from_rfc3339(other)
                .map(|dt| Timestamp(dt.with_timezone(&Utc)))
                .map_err(|_| ScalarParseError::InvalidTimestamp(other.to_string())),
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_rfc3339())
    }
}

impl FromStr for Timestamp {
    type Err = ScalarParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Timestamp::parse(s)
    }
}

/// A date known only to year, year+month, or full day precision — common
/// for release/production dates a source only partially records (spec §4.2,
/// testable property 5: round-trips losslessly through its string form).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuzzyDate {
    Year(i32),
    YearMonth(i32, u32),
    Full(NaiveDate),
}

impl FuzzyDate {
    pub fn parse(input: &str) -> Result<Self, ScalarParseError> {
        let parts: Vec<&str> = input.split('-').collect();
        match parts.as_slice() {
            [y] => y
                .parse::<i32>()
                .map(FuzzyDate::Year)
                .map_err(|_| ScalarParseError::InvalidFuzzyDate(input.to_string())),
            [y, m] => {
                let year = y.parse::<i32>().map_err(|_| ScalarParseError::InvalidFuzzyDate(input.to_string()))?;
                let month = m.parse::<u32>().map_err(|_| ScalarParseError::InvalidFuzzyDate(input.to_string()))?;
                if !(1..=12).contains(&month) {
                    return Err(ScalarParseError::InvalidFuzzyDate(input.to_string()));
                }
                Ok(FuzzyDate::YearMonth(year, month))
            }
            [y, m, d] => {
                let year = y.parse::<i32>().map_err(|_| ScalarParseError::InvalidFuzzyDate(input.to_string()))?;
                let month = m.parse::<u32>().map_err(|_| ScalarParseError::InvalidFuzzyDate(input.to_string()))?;
                let day = d.parse::<u32>().map_err(|_| ScalarParseError::InvalidFuzzyDate(input.to_string()))?;
                NaiveDate::from_ymd_opt(year, month, day)
                    .map(FuzzyDate::Full)
                    .ok_or_else(|| ScalarParseError::InvalidFuzzyDate(input.to_string()))
            }
            _ => Err(ScalarParseError::InvalidFuzzyDate(input.to_string())),
        }
    }

    pub fn to_string_lossless(&self) -> String {
        match self {
            FuzzyDate::Year(y) => format!("{y:04}"),
            FuzzyDate::YearMonth(y, m) => format!("{y:04}-{m:02}"),
            FuzzyDate::Full(d) => d.format("%Y-%m-%d").to_string(),
        }
    }
}

impl fmt::Display for FuzzyDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_string_lossless())
    }
}

impl Serialize for FuzzyDate {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string_lossless())
    }
}

impl<'de> Deserialize<'de> for FuzzyDate {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        FuzzyDate::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScalarParseError {
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
    #[error("invalid fuzzy date: {0}")]
    InvalidFuzzyDate(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fuzzy_date_round_trips_at_every_precision() {
        for raw in ["2019", "2019-05", "2019-05-14"] {
            let parsed = FuzzyDate::parse(raw).expect("parses");
            assert_eq!(parsed.to_string_lossless(), raw);
        }
    }

    #[test]
    fn fuzzy_date_rejects_bad_month() {
        assert!(FuzzyDate::parse("2019-13").is_err());
    }

    #[test]
    fn timestamp_parses_relative_shortcuts() {
        assert!(Timestamp::parse("now").is_ok());
        assert!(Timestamp::parse("today").is_ok());
        assert!(Timestamp::parse("yesterday").is_ok());
    }

    #[test]
    fn timestamp_parses_rfc3339() {
        let parsed = Timestamp::parse("2024-01-15T10:30:00Z").expect("parses");
        assert_eq!(parsed.to_rfc3339(), "2024-01-15T10:30:00+00:00");
    }
}
