//! Limit-up classifier.
//!
//! For one `(DailyBar, SymbolMeta)` pair decides:
//! - `limit_status`: closed at the rounded limit price (`Up`), not (`NotUp`),
//!   or no verdict (`Undefined`: suspended day, or no reference close)
//! - `is_fried`: touched the limit intraday but closed below it
//! - `board_type`: `yizi`, `normal` or `fried`
//!
//! All "at the limit" comparisons use `price >= L - tolerance`, where `L` is the
//! limit price rounded half up to the tick grid.

use serde::{Deserialize, Serialize};

use crate::domain::{BarError, BoardPattern, DailyBar, LimitStatus, PriceTick, SymbolMeta};

/// Classifier tuning. Serialized into the `[limits]` config section.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClassifyConfig {
    /// Absolute CNY slack for "at the limit price" comparisons.
    pub tolerance: f64,
    /// Decimal places of the exchange tick grid.
    pub tick_decimals: u32,
}

impl Default for ClassifyConfig {
    fn default() -> Self {
        Self {
            tolerance: 0.005,
            tick_decimals: 2,
        }
    }
}

/// Verdict for one bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub limit_status: LimitStatus,
    pub is_fried: bool,
    pub board_type: BoardPattern,
    /// Rounded limit price, when a reference close was available.
    pub limit_price: Option<f64>,
}

impl Classification {
    fn undefined() -> Self {
        Self {
            limit_status: LimitStatus::Undefined,
            is_fried: false,
            board_type: BoardPattern::Normal,
            limit_price: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Classifier {
    config: ClassifyConfig,
    tick: PriceTick,
}

impl Classifier {
    pub fn new(config: ClassifyConfig) -> Self {
        Self {
            config,
            tick: PriceTick::new(config.tick_decimals),
        }
    }

    pub fn config(&self) -> &ClassifyConfig {
        &self.config
    }

    /// Theoretical upper limit price: `round(pre_close * (1 + ratio))`.
    pub fn limit_price(&self, pre_close: f64, limit_ratio: f64) -> f64 {
        self.tick.round_half_up(pre_close * (1.0 + limit_ratio))
    }

    /// Classify a bar, detecting suspension from the bar itself.
    pub fn classify(
        &self,
        bar: &DailyBar,
        meta: &SymbolMeta,
    ) -> Result<Classification, BarError> {
        self.classify_day(bar, meta, bar.looks_suspended())
    }

    /// Classify a bar with an explicit suspension flag from the calendar.
    ///
    /// Malformed bars are rejected before the suspension flag is consulted.
    pub fn classify_day(
        &self,
        bar: &DailyBar,
        meta: &SymbolMeta,
        suspended: bool,
    ) -> Result<Classification, BarError> {
        bar.validate()?;

        if suspended {
            return Ok(Classification::undefined());
        }
        let Some(pre_close) = bar.pre_close else {
            return Ok(Classification::undefined());
        };

        let limit = self.limit_price(pre_close, meta.limit_ratio);
        let at_limit = |price: f64| price >= limit - self.config.tolerance;

        let touched_limit = at_limit(bar.high);
        let classification = if at_limit(bar.close) {
            let board_type = if at_limit(bar.open) && at_limit(bar.low) {
                BoardPattern::Yizi
            } else {
                BoardPattern::Normal
            };
            Classification {
                limit_status: LimitStatus::Up,
                is_fried: false,
                board_type,
                limit_price: Some(limit),
            }
        } else if touched_limit {
            Classification {
                limit_status: LimitStatus::NotUp,
                is_fried: true,
                board_type: BoardPattern::Fried,
                limit_price: Some(limit),
            }
        } else {
            Classification {
                limit_status: LimitStatus::NotUp,
                is_fried: false,
                board_type: BoardPattern::Normal,
                limit_price: Some(limit),
            }
        };
        Ok(classification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Board, LimitRatios};
    use chrono::NaiveDate;

    fn meta(code: &str, name: &str) -> SymbolMeta {
        SymbolMeta::derive(code, name, &LimitRatios::default())
    }

    fn bar(pre: f64, o: f64, h: f64, l: f64, c: f64) -> DailyBar {
        DailyBar {
            date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            code: "600000".into(),
            open: o,
            high: h,
            low: l,
            close: c,
            pre_close: Some(pre),
            volume: 1_000_000.0,
            amount: 10_000_000.0,
        }
    }

    #[test]
    fn one_word_board() {
        let c = Classifier::default();
        let v = c
            .classify(&bar(10.0, 11.0, 11.0, 11.0, 11.0), &meta("600000", "浦发银行"))
            .unwrap();
        assert_eq!(v.limit_status, LimitStatus::Up);
        assert_eq!(v.board_type, BoardPattern::Yizi);
        assert!(!v.is_fried);
        assert_eq!(v.limit_price, Some(11.0));
    }

    #[test]
    fn opened_at_limit_but_dipped_is_normal() {
        let c = Classifier::default();
        let v = c
            .classify(&bar(10.0, 11.0, 11.0, 10.7, 11.0), &meta("600000", "浦发银行"))
            .unwrap();
        assert_eq!(v.limit_status, LimitStatus::Up);
        assert_eq!(v.board_type, BoardPattern::Normal);
    }

    #[test]
    fn touched_and_fell_back_is_fried() {
        let c = Classifier::default();
        let v = c
            .classify(&bar(11.0, 11.5, 12.1, 10.8, 11.9), &meta("600000", "浦发银行"))
            .unwrap();
        assert_eq!(v.limit_status, LimitStatus::NotUp);
        assert!(v.is_fried);
        assert_eq!(v.board_type, BoardPattern::Fried);
    }

    #[test]
    fn ordinary_day_is_normal_not_up() {
        let c = Classifier::default();
        let v = c
            .classify(&bar(10.0, 10.1, 10.6, 9.9, 10.4), &meta("600000", "浦发银行"))
            .unwrap();
        assert_eq!(v.limit_status, LimitStatus::NotUp);
        assert!(!v.is_fried);
        assert_eq!(v.board_type, BoardPattern::Normal);
    }

    #[test]
    fn st_symbol_uses_five_percent_band() {
        let c = Classifier::default();
        let st = meta("600001", "*ST邯钢");
        assert_eq!(st.board_type, Board::Main);
        let v = c.classify(&bar(4.00, 4.10, 4.20, 4.05, 4.20), &st).unwrap();
        assert_eq!(v.limit_price, Some(4.2));
        assert_eq!(v.limit_status, LimitStatus::Up);
    }

    #[test]
    fn gem_symbol_needs_twenty_percent() {
        let c = Classifier::default();
        let gem = meta("300001", "特锐德");
        let v = c.classify(&bar(10.0, 10.5, 11.0, 10.4, 11.0), &gem).unwrap();
        assert_eq!(v.limit_price, Some(12.0));
        assert_eq!(v.limit_status, LimitStatus::NotUp);
        assert_eq!(v.board_type, BoardPattern::Normal);
    }

    #[test]
    fn missing_pre_close_is_undefined() {
        let c = Classifier::default();
        let mut b = bar(10.0, 10.0, 14.4, 10.0, 14.4);
        b.pre_close = None;
        let v = c.classify(&b, &meta("600000", "浦发银行")).unwrap();
        assert_eq!(v.limit_status, LimitStatus::Undefined);
        assert_eq!(v.limit_price, None);
    }

    #[test]
    fn suspended_day_is_undefined() {
        let c = Classifier::default();
        let mut b = bar(10.0, 10.0, 10.0, 10.0, 10.0);
        b.volume = 0.0;
        b.amount = 0.0;
        let v = c.classify(&b, &meta("600000", "浦发银行")).unwrap();
        assert_eq!(v.limit_status, LimitStatus::Undefined);
    }

    #[test]
    fn calendar_flag_overrides_trading_bar() {
        let c = Classifier::default();
        let v = c
            .classify_day(&bar(10.0, 11.0, 11.0, 11.0, 11.0), &meta("600000", "浦发银行"), true)
            .unwrap();
        assert_eq!(v.limit_status, LimitStatus::Undefined);
    }

    #[test]
    fn malformed_bar_is_an_error_even_when_suspended() {
        let c = Classifier::default();
        let b = bar(10.0, 10.0, 9.0, 9.5, 9.5);
        assert!(c.classify_day(&b, &meta("600000", "浦发银行"), true).is_err());
    }

    #[test]
    fn tolerance_absorbs_float_noise_only() {
        let c = Classifier::default();
        let m = meta("600000", "浦发银行");
        let near = c.classify(&bar(10.0, 10.5, 10.996, 10.4, 10.996), &m).unwrap();
        assert_eq!(near.limit_status, LimitStatus::Up);
        let tick_below = c.classify(&bar(10.0, 10.5, 10.99, 10.4, 10.99), &m).unwrap();
        assert_eq!(tick_below.limit_status, LimitStatus::NotUp);
    }
}
