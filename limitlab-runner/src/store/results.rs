//! `limit_analysis_result`: one derived row per `(date, code)`.
//!
//! `limit_status` is stored as 1 / 0 / NULL.

use chrono::NaiveDate;
use limitlab_core::domain::{BoardPattern, LimitResult, LimitStatus};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use std::collections::HashMap;

use super::{conversion_error, queue, Result};

/// New results for one symbol, replacing everything it has from `from` on
/// (or its whole history when `from` is `None`). A queued recompute covered
/// by the replacement is settled with it.
#[derive(Debug, Clone, Copy)]
pub struct ResultReplacement<'a> {
    pub code: &'a str,
    pub from: Option<NaiveDate>,
    pub results: &'a [LimitResult],
}

const RESULT_COLUMNS: &str = "date, code, limit_status, chain_height, is_fried, board_type";

const UPSERT_RESULT: &str = "INSERT INTO limit_analysis_result
        (date, code, limit_status, chain_height, is_fried, board_type)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
     ON CONFLICT(date, code) DO UPDATE SET
        limit_status = excluded.limit_status,
        chain_height = excluded.chain_height,
        is_fried = excluded.is_fried,
        board_type = excluded.board_type";

fn result_from_row(row: &Row<'_>) -> rusqlite::Result<LimitResult> {
    let status: Option<i64> = row.get(2)?;
    let board: String = row.get(5)?;
    Ok(LimitResult {
        date: row.get(0)?,
        code: row.get(1)?,
        limit_status: LimitStatus::from_flag(status),
        chain_height: row.get(3)?,
        is_fried: row.get(4)?,
        board_type: board
            .parse::<BoardPattern>()
            .map_err(|e| conversion_error(5, e))?,
    })
}

fn write_results(tx: &Transaction<'_>, results: &[LimitResult]) -> Result<usize> {
    let mut stmt = tx.prepare_cached(UPSERT_RESULT)?;
    for r in results {
        stmt.execute(params![
            r.date,
            r.code,
            r.limit_status.as_flag(),
            r.chain_height,
            r.is_fried,
            r.board_type.as_str(),
        ])?;
    }
    Ok(results.len())
}

pub fn upsert_results(conn: &mut Connection, results: &[LimitResult]) -> Result<usize> {
    let tx = conn.transaction()?;
    let written = write_results(&tx, results)?;
    tx.commit()?;
    tracing::debug!("stored {written} results");
    Ok(written)
}

pub fn replace_results(conn: &mut Connection, batch: &[ResultReplacement<'_>]) -> Result<usize> {
    let tx = conn.transaction()?;
    let mut written = 0;
    for item in batch {
        match item.from {
            Some(from) => tx.execute(
                "DELETE FROM limit_analysis_result WHERE code = ?1 AND date >= ?2",
                params![item.code, from],
            )?,
            None => tx.execute(
                "DELETE FROM limit_analysis_result WHERE code = ?1",
                [item.code],
            )?,
        };
        written += write_results(&tx, item.results)?;
        queue::settle(&tx, item.code, item.from)?;
    }
    tx.commit()?;
    tracing::debug!(symbols = batch.len(), written, "replaced results");
    Ok(written)
}

pub fn load_results(conn: &Connection, code: Option<&str>) -> Result<Vec<LimitResult>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {RESULT_COLUMNS} FROM limit_analysis_result
         WHERE (?1 IS NULL OR code = ?1)
         ORDER BY code, date"
    ))?;
    let results = stmt
        .query_map([code], result_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(results)
}

pub fn results_on(conn: &Connection, date: NaiveDate) -> Result<Vec<LimitResult>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {RESULT_COLUMNS} FROM limit_analysis_result WHERE date = ?1 ORDER BY code"
    ))?;
    let results = stmt
        .query_map([date], result_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(results)
}

pub fn last_result_before(
    conn: &Connection,
    code: &str,
    date: NaiveDate,
) -> Result<Option<LimitResult>> {
    let result = conn
        .query_row(
            &format!(
                "SELECT {RESULT_COLUMNS} FROM limit_analysis_result
                 WHERE code = ?1 AND date < ?2
                 ORDER BY date DESC LIMIT 1"
            ),
            params![code, date],
            result_from_row,
        )
        .optional()?;
    Ok(result)
}

pub fn latest_results(conn: &Connection) -> Result<HashMap<String, (NaiveDate, u32)>> {
    // SQLite takes the bare chain_height from the row holding MAX(date).
    let mut stmt = conn.prepare(
        "SELECT code, MAX(date), chain_height FROM limit_analysis_result GROUP BY code",
    )?;
    let latest = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, (row.get(1)?, row.get(2)?)))
        })?
        .collect::<std::result::Result<HashMap<_, _>, _>>()?;
    Ok(latest)
}

pub fn latest_result_date(conn: &Connection) -> Result<Option<NaiveDate>> {
    let date = conn.query_row("SELECT MAX(date) FROM limit_analysis_result", [], |row| {
        row.get(0)
    })?;
    Ok(date)
}

pub fn count_results(conn: &Connection) -> Result<i64> {
    let count = conn.query_row("SELECT COUNT(*) FROM limit_analysis_result", [], |row| {
        row.get(0)
    })?;
    Ok(count)
}
