//! Date and timestamp wire formats.
//!
//! The API is not consistent about timestamps: depending on the code path it
//! emits RFC 3339 (`2024-01-29T10:30:00Z`), naive ISO datetimes without an
//! offset (`2024-01-29T10:30:00.123456`), or bare dates (`2024-01-29`).
//! Everything is accepted on the way in and read as UTC; RFC 3339 goes out.

use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime};

/// Parse a `YYYY-MM-DD` calendar date.
///
/// # Errors
///
/// Returns the underlying parse error when `raw` is not a valid date.
pub fn parse_date(raw: &str) -> Result<Date, time::error::Parse> {
    Date::parse(raw.trim(), format_description!("[year]-[month]-[day]"))
}

/// Format a calendar date as `YYYY-MM-DD`.
#[must_use]
pub fn format_date(date: Date) -> String {
    date.format(format_description!("[year]-[month]-[day]"))
        .unwrap_or_else(|_| date.to_string())
}

/// Parse any of the timestamp shapes the API emits.
///
/// # Errors
///
/// Returns the RFC 3339 parse error when no accepted shape matches.
pub fn parse_timestamp(raw: &str) -> Result<OffsetDateTime, time::error::Parse> {
    let normalized = raw.trim().replacen(' ', "T", 1);
    match OffsetDateTime::parse(&normalized, &Rfc3339) {
        Ok(ts) => Ok(ts),
        Err(err) => {
            if let Ok(ts) = OffsetDateTime::parse(&format!("{normalized}Z"), &Rfc3339) {
                return Ok(ts);
            }
            if let Ok(date) = parse_date(&normalized) {
                return Ok(date.midnight().assume_utc());
            }
            Err(err)
        }
    }
}

#[must_use]
pub fn format_timestamp(ts: OffsetDateTime) -> String {
    ts.format(&Rfc3339).unwrap_or_else(|_| ts.to_string())
}

/// Today's date in UTC.
#[must_use]
pub fn today() -> Date {
    OffsetDateTime::now_utc().date()
}

/// Serde adapter for `YYYY-MM-DD` dates.
pub mod date {
    use serde::{Deserialize, Deserializer, Serializer};
    use time::Date;

    pub fn serialize<S: Serializer>(value: &Date, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_date(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Date, D::Error> {
        let raw = String::deserialize(deserializer)?;
        // Some payloads carry a full timestamp in the date slot.
        super::parse_date(&raw)
            .or_else(|_| super::parse_timestamp(&raw).map(time::OffsetDateTime::date))
            .map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for lenient timestamps.
pub mod timestamp {
    use serde::{Deserialize, Deserializer, Serializer};
    use time::OffsetDateTime;

    pub fn serialize<S: Serializer>(value: &OffsetDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_timestamp(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<OffsetDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_timestamp(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[path = "timefmt_test.rs"]
mod tests;
