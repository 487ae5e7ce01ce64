#![forbid(unsafe_code)]

//! Column encodings shared by the SQLite queries.

use crate::error::Error;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

pub(super) fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(super) fn timestamp(table: &'static str, millis: i64) -> Result<DateTime<Utc>, Error> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| Error::corrupt(table, format!("timestamp {millis} out of range")))
}

pub(super) fn opt_timestamp(
    table: &'static str,
    millis: Option<i64>,
) -> Result<Option<DateTime<Utc>>, Error> {
    millis.map(|m| timestamp(table, m)).transpose()
}

/// Unit enums and string newtypes are stored as their serde string form.
pub(super) fn text<T: Serialize>(value: &T) -> Result<String, Error> {
    match serde_json::to_value(value)? {
        Value::String(s) => Ok(s),
        other => Ok(other.to_string()),
    }
}

pub(super) fn opt_text<T: Serialize>(value: Option<&T>) -> Result<Option<String>, Error> {
    value.map(text).transpose()
}

pub(super) fn from_text<T: DeserializeOwned>(raw: String) -> Result<T, Error> {
    Ok(serde_json::from_value(Value::String(raw))?)
}

pub(super) fn opt_from_text<T: DeserializeOwned>(raw: Option<String>) -> Result<Option<T>, Error> {
    raw.map(from_text).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::Parity;
    use throughput::{LinkSpeed, UsbVersion};

    #[test]
    fn enums_round_trip_through_text() {
        assert_eq!(text(&Parity::Even).unwrap(), "E");
        assert_eq!(from_text::<Parity>("E".into()).unwrap(), Parity::Even);
        assert_eq!(text(&LinkSpeed::SuperPlus).unwrap(), "super_plus");

        let version = UsbVersion::parse("3.10").unwrap();
        assert_eq!(from_text::<UsbVersion>(text(&version).unwrap()).unwrap(), version);
    }

    #[test]
    fn timestamps_keep_millisecond_precision() {
        let at = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();
        assert_eq!(timestamp("t", millis(at)).unwrap(), at);
        assert!(timestamp("t", i64::MAX).is_err());
    }
}
