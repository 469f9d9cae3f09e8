//! `daily_market_data`: one row per `(date, code)`.
//!
//! An upsert that changes a day at or before the symbol's latest stored
//! result makes every later result stale, so the symbol is put on the
//! recompute queue from that day.

use chrono::NaiveDate;
use limitlab_core::domain::DailyBar;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use std::collections::BTreeMap;
use std::collections::HashMap;

use super::{queue, Result};

/// Counts from one `upsert_bars` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub written: usize,
    /// Earliest changed date per symbol whose stored results went stale.
    pub corrections: BTreeMap<String, NaiveDate>,
}

const BAR_COLUMNS: &str = "date, code, open, high, low, close, pre_close, volume, amount";

fn bar_from_row(row: &Row<'_>) -> rusqlite::Result<DailyBar> {
    Ok(DailyBar {
        date: row.get(0)?,
        code: row.get(1)?,
        open: row.get(2)?,
        high: row.get(3)?,
        low: row.get(4)?,
        close: row.get(5)?,
        pre_close: row.get(6)?,
        volume: row.get(7)?,
        amount: row.get(8)?,
    })
}

fn latest_result_date(tx: &Transaction<'_>, code: &str) -> Result<Option<NaiveDate>> {
    let date: Option<NaiveDate> = tx.query_row(
        "SELECT MAX(date) FROM limit_analysis_result WHERE code = ?1",
        [code],
        |row| row.get(0),
    )?;
    Ok(date)
}

fn existing_bar(tx: &Transaction<'_>, code: &str, date: NaiveDate) -> Result<Option<DailyBar>> {
    let bar = tx
        .query_row(
            &format!("SELECT {BAR_COLUMNS} FROM daily_market_data WHERE code = ?1 AND date = ?2"),
            params![code, date],
            bar_from_row,
        )
        .optional()?;
    Ok(bar)
}

pub fn upsert_bars(conn: &mut Connection, bars: &[DailyBar]) -> Result<UpsertOutcome> {
    let tx = conn.transaction()?;
    let mut outcome = UpsertOutcome::default();
    let mut latest: HashMap<String, Option<NaiveDate>> = HashMap::new();

    {
        let mut stmt = tx.prepare(&format!(
            "INSERT INTO daily_market_data ({BAR_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(date, code) DO UPDATE SET
                open = excluded.open,
                high = excluded.high,
                low = excluded.low,
                close = excluded.close,
                pre_close = excluded.pre_close,
                volume = excluded.volume,
                amount = excluded.amount"
        ))?;

        for bar in bars {
            let latest_result = match latest.get(&bar.code) {
                Some(date) => *date,
                None => {
                    let date = latest_result_date(&tx, &bar.code)?;
                    latest.insert(bar.code.clone(), date);
                    date
                }
            };
            if latest_result.is_some_and(|last| bar.date <= last) {
                let unchanged = existing_bar(&tx, &bar.code, bar.date)?.as_ref() == Some(bar);
                if !unchanged {
                    outcome
                        .corrections
                        .entry(bar.code.clone())
                        .and_modify(|d| *d = (*d).min(bar.date))
                        .or_insert(bar.date);
                }
            }

            stmt.execute(params![
                bar.date,
                bar.code,
                bar.open,
                bar.high,
                bar.low,
                bar.close,
                bar.pre_close,
                bar.volume,
                bar.amount,
            ])?;
            outcome.written += 1;
        }
    }

    for (code, from) in &outcome.corrections {
        queue::enqueue(&tx, code, *from)?;
    }
    tx.commit()?;

    if !outcome.corrections.is_empty() {
        tracing::info!(
            symbols = outcome.corrections.len(),
            "history rewritten, recompute queued"
        );
    }
    tracing::debug!("stored {} bars", outcome.written);
    Ok(outcome)
}

pub fn load_bars(
    conn: &Connection,
    code: &str,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Result<Vec<DailyBar>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {BAR_COLUMNS} FROM daily_market_data
         WHERE code = ?1
           AND (?2 IS NULL OR date >= ?2)
           AND (?3 IS NULL OR date <= ?3)
         ORDER BY date"
    ))?;
    let bars = stmt
        .query_map(params![code, from, to], bar_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(bars)
}

pub fn bars_on(conn: &Connection, date: NaiveDate) -> Result<Vec<DailyBar>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {BAR_COLUMNS} FROM daily_market_data WHERE date = ?1 ORDER BY code"
    ))?;
    let bars = stmt
        .query_map([date], bar_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(bars)
}

pub fn codes_with_bars(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT DISTINCT code FROM daily_market_data ORDER BY code")?;
    let codes = stmt
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(codes)
}

pub fn latest_bar_date(conn: &Connection) -> Result<Option<NaiveDate>> {
    let date = conn.query_row("SELECT MAX(date) FROM daily_market_data", [], |row| row.get(0))?;
    Ok(date)
}

pub fn count_bars(conn: &Connection) -> Result<i64> {
    let count = conn.query_row("SELECT COUNT(*) FROM daily_market_data", [], |row| row.get(0))?;
    Ok(count)
}
