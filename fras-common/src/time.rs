//! Timestamp and calendar-date utilities

use crate::{Error, Result};
use chrono::{DateTime, Local, NaiveDate, Utc};

/// Calendar-date format used for attendance partition keys
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Today's date in the host's local calendar
pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Render a date as an attendance partition key (`YYYY-MM-DD`)
pub fn date_key(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Parse an attendance partition key
pub fn parse_date_key(key: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(key, DATE_FORMAT)
        .map_err(|e| Error::InvalidInput(format!("Invalid date '{}': {}", key, e)))
}
