//! Read-only queries over stored results, joined with names and prices.

use chrono::{Duration, NaiveDate};
use limitlab_core::domain::{BoardPattern, LimitStatus};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::store::{conversion_error, Result};

/// One result row with the symbol's name and the day's prices.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LimitRow {
    pub date: NaiveDate,
    pub code: String,
    pub name: String,
    pub limit_status: LimitStatus,
    pub chain_height: u32,
    pub is_fried: bool,
    pub board_type: BoardPattern,
    pub close: Option<f64>,
    pub pre_close: Option<f64>,
}

impl LimitRow {
    pub fn change_pct(&self) -> Option<f64> {
        match (self.close, self.pre_close) {
            (Some(close), Some(pre)) if pre > 0.0 => Some((close - pre) / pre * 100.0),
            _ => None,
        }
    }
}

/// Market-wide counts for one date.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DailySummary {
    pub date: Option<NaiveDate>,
    pub symbols: usize,
    pub limit_up: usize,
    pub yizi: usize,
    pub fried: usize,
    pub suspended: usize,
    pub max_chain: u32,
    /// Limit-up symbols per chain height.
    pub chain_distribution: BTreeMap<u32, usize>,
}

/// A symbol matched by name search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NameMatch {
    pub code: String,
    pub name: String,
    pub board_type: String,
    pub is_st: bool,
}

const ROW_SELECT: &str = "SELECT r.date, r.code, COALESCE(m.name, ''), r.limit_status,
        r.chain_height, r.is_fried, r.board_type, d.close, d.pre_close
     FROM limit_analysis_result r
     LEFT JOIN stock_meta m ON m.code = r.code
     LEFT JOIN daily_market_data d ON d.code = r.code AND d.date = r.date";

fn limit_row(row: &Row<'_>) -> rusqlite::Result<LimitRow> {
    let status: Option<i64> = row.get(3)?;
    let board: String = row.get(6)?;
    Ok(LimitRow {
        date: row.get(0)?,
        code: row.get(1)?,
        name: row.get(2)?,
        limit_status: LimitStatus::from_flag(status),
        chain_height: row.get(4)?,
        is_fried: row.get(5)?,
        board_type: board.parse().map_err(|e| conversion_error(6, e))?,
        close: row.get(7)?,
        pre_close: row.get(8)?,
    })
}

pub struct QueryApi<'a> {
    conn: &'a Connection,
}

impl<'a> QueryApi<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn rows(&self, filter: &str, params: impl rusqlite::Params) -> Result<Vec<LimitRow>> {
        let mut stmt = self.conn.prepare(&format!("{ROW_SELECT} {filter}"))?;
        let rows = stmt
            .query_map(params, limit_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Latest date with stored results.
    pub fn latest_date(&self) -> Result<Option<NaiveDate>> {
        let date = self.conn.query_row(
            "SELECT MAX(date) FROM limit_analysis_result",
            [],
            |row| row.get(0),
        )?;
        Ok(date)
    }

    fn date_or_latest(&self, date: Option<NaiveDate>) -> Result<Option<NaiveDate>> {
        match date {
            Some(date) => Ok(Some(date)),
            None => self.latest_date(),
        }
    }

    /// Symbols at or above `min_height` on `date` (latest when `None`),
    /// tallest first.
    pub fn high_chain(&self, date: Option<NaiveDate>, min_height: u32) -> Result<Vec<LimitRow>> {
        let Some(date) = self.date_or_latest(date)? else {
            return Ok(Vec::new());
        };
        self.rows(
            "WHERE r.date = ?1 AND r.chain_height >= ?2 AND r.limit_status = 1
             ORDER BY r.chain_height DESC, r.code",
            params![date, min_height],
        )
    }

    pub fn chain_history(
        &self,
        code: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<LimitRow>> {
        self.rows(
            "WHERE r.code = ?1
               AND (?2 IS NULL OR r.date >= ?2)
               AND (?3 IS NULL OR r.date <= ?3)
             ORDER BY r.date",
            params![code, start, end],
        )
    }

    /// Tallest chain a symbol ever reached, with the first date it got there.
    pub fn max_chain(&self, code: &str) -> Result<Option<(u32, NaiveDate)>> {
        let best = self
            .conn
            .query_row(
                "SELECT chain_height, date FROM limit_analysis_result
                 WHERE code = ?1 AND chain_height > 0
                 ORDER BY chain_height DESC, date ASC LIMIT 1",
                [code],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(best)
    }

    pub fn daily_summary(&self, date: Option<NaiveDate>) -> Result<DailySummary> {
        let Some(date) = self.date_or_latest(date)? else {
            return Ok(DailySummary::default());
        };
        let rows = self.rows("WHERE r.date = ?1", [date])?;

        let mut summary = DailySummary {
            date: Some(date),
            symbols: rows.len(),
            ..DailySummary::default()
        };
        for row in &rows {
            match row.limit_status {
                LimitStatus::Up => {
                    summary.limit_up += 1;
                    *summary.chain_distribution.entry(row.chain_height).or_default() += 1;
                    summary.max_chain = summary.max_chain.max(row.chain_height);
                    if row.board_type == BoardPattern::Yizi {
                        summary.yizi += 1;
                    }
                }
                LimitStatus::NotUp if row.is_fried => summary.fried += 1,
                LimitStatus::NotUp => {}
                LimitStatus::Undefined => summary.suspended += 1,
            }
        }
        Ok(summary)
    }

    /// Limit-up closes on `date`, optionally with the day's broken boards.
    pub fn limit_stocks(&self, date: Option<NaiveDate>, include_fried: bool) -> Result<Vec<LimitRow>> {
        let Some(date) = self.date_or_latest(date)? else {
            return Ok(Vec::new());
        };
        self.rows(
            "WHERE r.date = ?1 AND (r.limit_status = 1 OR (?2 AND r.is_fried = 1))
             ORDER BY r.limit_status DESC, r.chain_height DESC, r.code",
            params![date, include_fried],
        )
    }

    pub fn fried_stocks(&self, date: Option<NaiveDate>) -> Result<Vec<LimitRow>> {
        let Some(date) = self.date_or_latest(date)? else {
            return Ok(Vec::new());
        };
        self.rows(
            "WHERE r.date = ?1 AND r.is_fried = 1 ORDER BY r.code",
            [date],
        )
    }

    /// Limit-up closes within `days` calendar days of the latest date.
    pub fn recent_limits(&self, days: u32, min_height: u32) -> Result<Vec<LimitRow>> {
        let Some(latest) = self.latest_date()? else {
            return Ok(Vec::new());
        };
        let since = latest - Duration::days(i64::from(days));
        self.rows(
            "WHERE r.date > ?1 AND r.limit_status = 1 AND r.chain_height >= ?2
             ORDER BY r.date DESC, r.chain_height DESC, r.code",
            params![since, min_height],
        )
    }

    /// Rows with a chain of two or more, or a broken board, newest first.
    pub fn notable_rows(&self, limit: usize) -> Result<Vec<LimitRow>> {
        self.rows(
            "WHERE r.chain_height >= 2 OR r.is_fried = 1
             ORDER BY r.date DESC, r.chain_height DESC, r.code
             LIMIT ?1",
            [limit],
        )
    }

    pub fn search_by_name(&self, keyword: &str) -> Result<Vec<NameMatch>> {
        let mut stmt = self.conn.prepare(
            "SELECT code, name, board_type, is_st FROM stock_meta
             WHERE name LIKE '%' || ?1 || '%' OR code LIKE ?1 || '%'
             ORDER BY code",
        )?;
        let matches = stmt
            .query_map([keyword.trim()], |row| {
                Ok(NameMatch {
                    code: row.get(0)?,
                    name: row.get(1)?,
                    board_type: row.get(2)?,
                    is_st: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::{ComputeEngine, ComputeMode};
    use crate::store::Store;
    use limitlab_core::domain::{DailyBar, LimitRatios, SymbolMeta};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 7, d).unwrap()
    }

    fn bar(code: &str, d: u32, pre: f64, o: f64, h: f64, l: f64, c: f64) -> DailyBar {
        DailyBar {
            date: day(d),
            code: code.into(),
            open: o,
            high: h,
            low: l,
            close: c,
            pre_close: Some(pre),
            volume: 1_000.0,
            amount: 1_000.0 * c,
        }
    }

    /// 000001: yizi, normal up, fried. 600000: up, up, up.
    fn store() -> Store {
        let mut store = Store::open_in_memory().unwrap();
        let ratios = LimitRatios::default();
        store
            .upsert_meta(&[
                SymbolMeta::derive("000001", "平安银行", &ratios),
                SymbolMeta::derive("600000", "浦发银行", &ratios),
            ])
            .unwrap();
        store
            .upsert_bars(&[
                bar("000001", 1, 10.0, 11.0, 11.0, 11.0, 11.0),
                bar("000001", 2, 11.0, 11.5, 12.1, 11.2, 12.1),
                bar("000001", 3, 12.1, 12.5, 13.31, 12.2, 12.8),
                bar("600000", 1, 5.0, 5.2, 5.5, 5.1, 5.5),
                bar("600000", 2, 5.5, 5.6, 6.05, 5.6, 6.05),
                bar("600000", 3, 6.05, 6.2, 6.66, 6.1, 6.66),
            ])
            .unwrap();
        ComputeEngine::default()
            .run(&mut store, &ComputeMode::Full)
            .unwrap();
        store
    }

    #[test]
    fn high_chain_defaults_to_latest_date() {
        let store = store();
        let api = QueryApi::new(store.connection());
        assert_eq!(api.latest_date().unwrap(), Some(day(3)));

        let rows = api.high_chain(None, 2).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].code, "600000");
        assert_eq!(rows[0].chain_height, 3);
        assert_eq!(rows[0].name, "浦发银行");
        assert!((rows[0].change_pct().unwrap() - 10.08).abs() < 0.01);
    }

    #[test]
    fn summary_counts_patterns() {
        let store = store();
        let api = QueryApi::new(store.connection());

        let first = api.daily_summary(Some(day(1))).unwrap();
        assert_eq!(first.limit_up, 2);
        assert_eq!(first.yizi, 1);
        assert_eq!(first.chain_distribution.get(&1), Some(&2));

        let last = api.daily_summary(None).unwrap();
        assert_eq!(last.symbols, 2);
        assert_eq!(last.limit_up, 1);
        assert_eq!(last.fried, 1);
        assert_eq!(last.max_chain, 3);
    }

    #[test]
    fn limit_and_fried_lists() {
        let store = store();
        let api = QueryApi::new(store.connection());

        assert_eq!(api.limit_stocks(Some(day(3)), false).unwrap().len(), 1);
        let with_fried = api.limit_stocks(Some(day(3)), true).unwrap();
        assert_eq!(with_fried.len(), 2);
        assert_eq!(with_fried[0].code, "600000");

        let fried = api.fried_stocks(None).unwrap();
        assert_eq!(fried.len(), 1);
        assert_eq!(fried[0].board_type, BoardPattern::Fried);
    }

    #[test]
    fn history_max_and_recent() {
        let store = store();
        let api = QueryApi::new(store.connection());

        let history = api.chain_history("000001", Some(day(2)), None).unwrap();
        let heights: Vec<u32> = history.iter().map(|r| r.chain_height).collect();
        assert_eq!(heights, vec![2, 0]);

        assert_eq!(api.max_chain("000001").unwrap(), Some((2, day(2))));
        assert_eq!(api.max_chain("300750").unwrap(), None);

        // Within one calendar day of the latest date: only day 3.
        let recent = api.recent_limits(1, 1).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].date, day(3));
        assert_eq!(api.recent_limits(5, 2).unwrap().len(), 3);
    }

    #[test]
    fn search_matches_name_or_code_prefix() {
        let store = store();
        let api = QueryApi::new(store.connection());
        assert_eq!(api.search_by_name("浦发").unwrap()[0].code, "600000");
        assert_eq!(api.search_by_name("0000").unwrap().len(), 1);
        assert!(api.search_by_name("茅台").unwrap().is_empty());
    }
}
