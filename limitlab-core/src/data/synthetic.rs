//! Seeded synthetic market.
//!
//! A random walk per symbol with injected limit-up streaks, broken boards and
//! suspension days. Used for offline runs (`--synthetic`) and the benchmark.
//!
//! Each symbol's RNG is seeded from `blake3(seed, code)`, so a symbol's
//! history does not depend on which other symbols are requested, or in which
//! order. Histories are generated from a fixed origin date and then windowed,
//! so any date range sees the same bars.

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::provider::{DataError, DataProvider, ListedStock};
use crate::domain::{is_st_name, Board, DailyBar, LimitRatios, PriceTick};

/// First generated trading day.
pub fn origin() -> NaiveDate {
    NaiveDate::from_ymd_opt(2023, 1, 2).unwrap_or(NaiveDate::MIN)
}

#[derive(Debug, Clone, Copy)]
pub struct SyntheticConfig {
    pub seed: u64,
    pub symbols: usize,
    /// Probability of starting a limit-up streak on a normal day.
    pub streak_prob: f64,
    pub max_streak: u32,
    pub broken_prob: f64,
    pub suspend_prob: f64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            symbols: 50,
            streak_prob: 0.03,
            max_streak: 6,
            broken_prob: 0.03,
            suspend_prob: 0.02,
        }
    }
}

pub struct SyntheticProvider {
    config: SyntheticConfig,
    ratios: LimitRatios,
    tick: PriceTick,
    stocks: Vec<ListedStock>,
}

fn synthetic_stock(i: usize) -> ListedStock {
    let serial = i / 5;
    let code = match i % 5 {
        0 => format!("600{serial:03}"),
        1 => format!("000{serial:03}"),
        2 => format!("300{serial:03}"),
        3 => format!("688{serial:03}"),
        _ => format!("830{serial:03}"),
    };
    let name = if i % 7 == 3 {
        format!("ST样本{i}")
    } else {
        format!("样本{i}")
    };
    ListedStock { code, name }
}

fn trading_days(start: NaiveDate, end: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    start
        .iter_days()
        .take_while(move |d| *d <= end)
        .filter(|d| !matches!(d.weekday(), Weekday::Sat | Weekday::Sun))
}

impl SyntheticProvider {
    pub fn new(config: SyntheticConfig) -> Self {
        let stocks = (0..config.symbols).map(synthetic_stock).collect();
        Self {
            config,
            ratios: LimitRatios::default(),
            tick: PriceTick::default(),
            stocks,
        }
    }

    fn rng_for(&self, code: &str) -> StdRng {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.config.seed.to_le_bytes());
        hasher.update(code.as_bytes());
        let hash = hasher.finalize();
        let mut seed = [0u8; 8];
        seed.copy_from_slice(&hash.as_bytes()[..8]);
        StdRng::seed_from_u64(u64::from_le_bytes(seed))
    }

    fn round(&self, price: f64) -> f64 {
        self.tick.round_half_up(price)
    }

    /// Full history of one symbol from `origin()` through `end`.
    pub fn generate(&self, stock: &ListedStock, end: NaiveDate) -> Vec<DailyBar> {
        let ratio = self
            .ratios
            .ratio_for(Board::from_code(&stock.code), is_st_name(&stock.name));
        let mut rng = self.rng_for(&stock.code);
        let mut prev_close: Option<f64> = None;
        let mut streak_left = 0u32;
        let mut bars = Vec::new();

        for date in trading_days(origin(), end) {
            let Some(pre) = prev_close else {
                let close = self.round(rng.gen_range(4.0..40.0));
                let volume = rng.gen_range(1e5..1e7f64).round();
                bars.push(DailyBar {
                    date,
                    code: stock.code.clone(),
                    open: close,
                    high: close,
                    low: close,
                    close,
                    pre_close: None,
                    volume,
                    amount: volume * close,
                });
                prev_close = Some(close);
                continue;
            };

            let limit = self.round(pre * (1.0 + ratio));
            let floor = self.round(pre * (1.0 - ratio)).max(0.01);
            let volume = rng.gen_range(1e5..1e7f64).round();

            if streak_left == 0 && rng.gen_bool(self.config.suspend_prob) {
                bars.push(DailyBar {
                    date,
                    code: stock.code.clone(),
                    open: pre,
                    high: pre,
                    low: pre,
                    close: pre,
                    pre_close: Some(pre),
                    volume: 0.0,
                    amount: 0.0,
                });
                continue;
            }

            if streak_left == 0 && rng.gen_bool(self.config.streak_prob) {
                streak_left = rng.gen_range(1..=self.config.max_streak.max(1));
            }

            let (open, high, low, close) = if streak_left > 0 {
                streak_left -= 1;
                if rng.gen_bool(0.3) {
                    (limit, limit, limit, limit)
                } else {
                    let open = self.round(pre * (1.0 + rng.gen_range(0.0..ratio / 2.0))).min(limit);
                    let low = self.round(open.min(pre) * (1.0 - rng.gen_range(0.0..0.02))).max(floor);
                    (open, limit, low.min(open), limit)
                }
            } else if rng.gen_bool(self.config.broken_prob) {
                let close = self.round(limit * (1.0 - rng.gen_range(0.01..0.06))).max(floor);
                let open = self.round(pre * (1.0 + rng.gen_range(-0.02..0.03))).clamp(floor, limit);
                let low = self.round(open.min(close) * (1.0 - rng.gen_range(0.0..0.02))).max(floor);
                (open, limit, low.min(open).min(close), close)
            } else {
                let cap = (limit - 0.01).max(floor);
                // Pull the walk back towards the initial price band.
                let (lo, hi) = if pre < 2.0 {
                    (0.0, ratio * 0.6)
                } else if pre > 200.0 {
                    (-ratio * 0.6, 0.0)
                } else {
                    (-ratio * 0.6, ratio * 0.6)
                };
                let close = self.round(pre * (1.0 + rng.gen_range(lo..hi))).clamp(floor, cap);
                let open = self.round(pre * (1.0 + rng.gen_range(-0.02..0.02))).clamp(floor, cap);
                let high = self.round(open.max(close) * (1.0 + rng.gen_range(0.0..0.01))).min(cap);
                let low = self.round(open.min(close) * (1.0 - rng.gen_range(0.0..0.01))).max(floor);
                (open, high.max(open).max(close), low.min(open).min(close), close)
            };

            bars.push(DailyBar {
                date,
                code: stock.code.clone(),
                open,
                high,
                low,
                close,
                pre_close: Some(pre),
                volume,
                amount: (volume * close).round(),
            });
            prev_close = Some(close);
        }
        bars
    }

    fn stock(&self, code: &str) -> Option<&ListedStock> {
        self.stocks.iter().find(|s| s.code == code)
    }
}

impl DataProvider for SyntheticProvider {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn stock_list(&self) -> Result<Vec<ListedStock>, DataError> {
        Ok(self.stocks.clone())
    }

    fn daily(
        &self,
        code: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyBar>, DataError> {
        let Some(stock) = self.stock(code) else {
            return Ok(Vec::new());
        };
        let mut bars = self.generate(stock, end);
        bars.retain(|b| b.date >= start);
        Ok(bars)
    }

    fn daily_on(&self, date: NaiveDate) -> Result<Vec<DailyBar>, DataError> {
        Ok(self
            .stocks
            .iter()
            .filter_map(|s| self.generate(s, date).pop().filter(|b| b.date == date))
            .collect())
    }

    fn is_available(&self) -> bool {
        true
    }
}

/// Days between two dates, inclusive of both, counting weekdays only.
pub fn weekday_count(start: NaiveDate, end: NaiveDate) -> usize {
    trading_days(start, end).count()
}

impl SyntheticProvider {
    /// Last generated weekday on or before `date`.
    pub fn last_trading_day(date: NaiveDate) -> NaiveDate {
        let mut d = date;
        while matches!(d.weekday(), Weekday::Sat | Weekday::Sun) {
            d -= Duration::days(1);
        }
        d
    }
}
