//! LimitResult — the derived per-symbol, per-day classification row.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Whether the day closed at the upper price limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitStatus {
    NotUp,
    Up,
    /// No verdict: suspended day or no reference close. Carries the chain.
    Undefined,
}

impl LimitStatus {
    /// Persisted form: `Some(1)`, `Some(0)`, or `None` (SQL `NULL`).
    pub fn as_flag(&self) -> Option<u8> {
        match self {
            LimitStatus::Up => Some(1),
            LimitStatus::NotUp => Some(0),
            LimitStatus::Undefined => None,
        }
    }

    pub fn from_flag(flag: Option<i64>) -> Self {
        match flag {
            Some(0) => LimitStatus::NotUp,
            Some(_) => LimitStatus::Up,
            None => LimitStatus::Undefined,
        }
    }

    pub fn is_up(&self) -> bool {
        matches!(self, LimitStatus::Up)
    }
}

/// Board pattern of the day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoardPattern {
    /// One-word board: opened, traded and closed pinned at the limit.
    Yizi,
    Normal,
    /// Broken board: touched the limit intraday, closed below it.
    Fried,
}

impl BoardPattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            BoardPattern::Yizi => "yizi",
            BoardPattern::Normal => "normal",
            BoardPattern::Fried => "fried",
        }
    }
}

impl fmt::Display for BoardPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown board pattern '{0}' (expected yizi, normal or fried)")]
pub struct UnknownPattern(pub String);

impl FromStr for BoardPattern {
    type Err = UnknownPattern;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "yizi" => Ok(BoardPattern::Yizi),
            "normal" => Ok(BoardPattern::Normal),
            "fried" => Ok(BoardPattern::Fried),
            other => Err(UnknownPattern(other.to_string())),
        }
    }
}

/// One row of `limit_analysis_result`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LimitResult {
    pub date: NaiveDate,
    pub code: String,
    pub limit_status: LimitStatus,
    pub chain_height: u32,
    pub is_fried: bool,
    pub board_type: BoardPattern,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_flag_mapping() {
        for status in [LimitStatus::Up, LimitStatus::NotUp, LimitStatus::Undefined] {
            let flag = status.as_flag().map(i64::from);
            assert_eq!(LimitStatus::from_flag(flag), status);
        }
    }

    #[test]
    fn pattern_names_match_storage() {
        assert_eq!(BoardPattern::Yizi.to_string(), "yizi");
        assert_eq!("fried".parse::<BoardPattern>().unwrap(), BoardPattern::Fried);
        assert!("sealed".parse::<BoardPattern>().is_err());
    }

    #[test]
    fn pattern_serializes_lowercase() {
        let json = serde_json::to_string(&BoardPattern::Normal).unwrap();
        assert_eq!(json, "\"normal\"");
    }
}
