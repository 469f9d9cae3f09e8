//! `stock_meta`: one row per code, upserted whenever the listing is refreshed.

use limitlab_core::domain::{Board, SymbolMeta};
use rusqlite::{params, Connection, Row};
use std::collections::HashMap;

use super::{conversion_error, Result};

pub fn upsert_meta(conn: &mut Connection, metas: &[SymbolMeta]) -> Result<usize> {
    let tx = conn.transaction()?;
    let mut stmt = tx.prepare(
        "INSERT INTO stock_meta (code, name, board_type, limit_ratio, is_st, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, datetime('now'))
         ON CONFLICT(code) DO UPDATE SET
            name = excluded.name,
            board_type = excluded.board_type,
            limit_ratio = excluded.limit_ratio,
            is_st = excluded.is_st,
            updated_at = excluded.updated_at",
    )?;

    for meta in metas {
        stmt.execute(params![
            meta.code,
            meta.name,
            meta.board_type.as_str(),
            meta.limit_ratio,
            meta.is_st,
        ])?;
    }

    drop(stmt);
    tx.commit()?;

    tracing::info!("stored {} symbols", metas.len());
    Ok(metas.len())
}

fn meta_from_row(row: &Row<'_>) -> rusqlite::Result<SymbolMeta> {
    let board: String = row.get(2)?;
    Ok(SymbolMeta {
        code: row.get(0)?,
        name: row.get(1)?,
        board_type: board.parse::<Board>().map_err(|e| conversion_error(2, e))?,
        limit_ratio: row.get(3)?,
        is_st: row.get(4)?,
    })
}

pub fn load_meta(conn: &Connection) -> Result<HashMap<String, SymbolMeta>> {
    let mut stmt =
        conn.prepare("SELECT code, name, board_type, limit_ratio, is_st FROM stock_meta")?;
    let metas = stmt
        .query_map([], meta_from_row)?
        .map(|m| m.map(|m| (m.code.clone(), m)))
        .collect::<std::result::Result<HashMap<_, _>, _>>()?;

    tracing::debug!("loaded {} symbols", metas.len());
    Ok(metas)
}

pub fn count_meta(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM stock_meta", [], |row| row.get(0))?;
    Ok(count)
}
