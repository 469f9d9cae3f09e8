//! Trading-date parsing and formatting.
//!
//! Providers speak `YYYYMMDD`; humans and the store use ISO `YYYY-MM-DD`.
//! Both are accepted everywhere a date is read.

use chrono::NaiveDate;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid date '{0}' (expected YYYYMMDD or YYYY-MM-DD)")]
pub struct DateParseError(pub String);

/// Parse `YYYYMMDD` or `YYYY-MM-DD`.
pub fn parse_date(s: &str) -> Result<NaiveDate, DateParseError> {
    let s = s.trim();
    let format = if s.len() == 8 { "%Y%m%d" } else { "%Y-%m-%d" };
    NaiveDate::parse_from_str(s, format).map_err(|_| DateParseError(s.to_string()))
}

/// `2024-01-02` -> `20240102`
pub fn compact(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}
