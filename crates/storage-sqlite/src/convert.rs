//! Column conversions shared by the repositories. Timestamps are stored as
//! RFC 3339 text, amounts as decimal text, enums as their serde names.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::str::FromStr;

use tillsync_core::errors::{DatabaseError, Error, Result};

pub(crate) fn enum_to_db<T: serde::Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?.trim_matches('"').to_string())
}

pub(crate) fn enum_from_db<T: serde::de::DeserializeOwned>(value: &str) -> Result<T> {
    Ok(serde_json::from_str(&format!("\"{}\"", value))?)
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            Error::Database(DatabaseError::Internal(format!(
                "Invalid stored timestamp '{}': {}",
                value, e
            )))
        })
}

pub(crate) fn parse_optional_timestamp(value: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    value.map(parse_timestamp).transpose()
}

pub(crate) fn parse_decimal(value: &str) -> Result<Decimal> {
    Decimal::from_str(value).map_err(|e| {
        Error::Database(DatabaseError::Internal(format!(
            "Invalid stored amount '{}': {}",
            value, e
        )))
    })
}

pub(crate) fn parse_optional_decimal(value: Option<&str>) -> Result<Option<Decimal>> {
    value.map(parse_decimal).transpose()
}
