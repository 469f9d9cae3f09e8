//! DailyBar — one trading day of market data for one symbol.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Daily OHLC bar for a single A-share symbol.
///
/// Prices are unadjusted CNY. `pre_close` is the exchange's reference close
/// for the day (already adjusted for ex-rights by the exchange), so it is the
/// base for the day's price limit. It is absent on a symbol's first listed day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyBar {
    pub date: NaiveDate,
    pub code: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub pre_close: Option<f64>,
    /// Shares traded.
    pub volume: f64,
    /// Turnover in CNY.
    pub amount: f64,
}

/// A bar that violates OHLC sanity. Reported per row, never coerced.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BarError {
    #[error("{field} is not a finite number")]
    NonFinite { field: &'static str },

    #[error("{field} must be positive, got {value}")]
    NonPositivePrice { field: &'static str, value: f64 },

    #[error("high {high} is below low {low}")]
    HighBelowLow { high: f64, low: f64 },

    #[error("{field} {value} lies outside the day's range [{low}, {high}]")]
    OutsideRange {
        field: &'static str,
        value: f64,
        low: f64,
        high: f64,
    },

    #[error("negative {field}: {value}")]
    Negative { field: &'static str, value: f64 },
}

impl DailyBar {
    /// Check OHLC sanity: finite positive prices, `low <= open, close <= high`,
    /// non-negative volume and amount.
    pub fn validate(&self) -> Result<(), BarError> {
        let prices = [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
        ];
        for (field, value) in prices {
            if !value.is_finite() {
                return Err(BarError::NonFinite { field });
            }
            if value <= 0.0 {
                return Err(BarError::NonPositivePrice { field, value });
            }
        }
        if let Some(pre_close) = self.pre_close {
            if !pre_close.is_finite() {
                return Err(BarError::NonFinite { field: "pre_close" });
            }
            if pre_close <= 0.0 {
                return Err(BarError::NonPositivePrice {
                    field: "pre_close",
                    value: pre_close,
                });
            }
        }
        if self.high < self.low {
            return Err(BarError::HighBelowLow {
                high: self.high,
                low: self.low,
            });
        }
        for (field, value) in [("open", self.open), ("close", self.close)] {
            if value < self.low || value > self.high {
                return Err(BarError::OutsideRange {
                    field,
                    value,
                    low: self.low,
                    high: self.high,
                });
            }
        }
        for (field, value) in [("volume", self.volume), ("amount", self.amount)] {
            if !value.is_finite() {
                return Err(BarError::NonFinite { field });
            }
            if value < 0.0 {
                return Err(BarError::Negative { field, value });
            }
        }
        Ok(())
    }

    /// Heuristic suspension check: nothing traded and every price sits on the
    /// reference close.
    pub fn looks_suspended(&self) -> bool {
        let Some(pre_close) = self.pre_close else {
            return false;
        };
        self.volume == 0.0
            && self.open == pre_close
            && self.high == pre_close
            && self.low == pre_close
            && self.close == pre_close
    }

    /// Percentage change from the reference close, if one exists.
    pub fn change_pct(&self) -> Option<f64> {
        self.pre_close
            .filter(|p| *p > 0.0)
            .map(|p| (self.close - p) / p * 100.0)
    }
}
