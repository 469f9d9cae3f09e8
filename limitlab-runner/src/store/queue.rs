//! `recompute_queue`: symbols whose stored results went stale, with the
//! earliest date that needs recomputing.

use chrono::NaiveDate;
use rusqlite::{params, Connection};

use super::Result;

/// Enqueue `code`; an existing entry keeps the earlier of the two dates.
pub fn enqueue(conn: &Connection, code: &str, from: NaiveDate) -> Result<()> {
    conn.execute(
        "INSERT INTO recompute_queue (code, from_date) VALUES (?1, ?2)
         ON CONFLICT(code) DO UPDATE SET
            from_date = MIN(from_date, excluded.from_date),
            enqueued_at = datetime('now')",
        params![code, from],
    )?;
    Ok(())
}

pub fn pending(conn: &Connection) -> Result<Vec<(String, NaiveDate)>> {
    let mut stmt = conn.prepare("SELECT code, from_date FROM recompute_queue ORDER BY code")?;
    let entries = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(entries)
}

/// Remove `code`'s entry if a recompute starting at `from` covers it.
pub fn settle(conn: &Connection, code: &str, from: Option<NaiveDate>) -> Result<()> {
    conn.execute(
        "DELETE FROM recompute_queue WHERE code = ?1 AND (?2 IS NULL OR from_date >= ?2)",
        params![code, from],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::Store;
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
    }

    #[test]
    fn enqueue_keeps_earliest_date() {
        let mut store = Store::open_in_memory().unwrap();
        store.enqueue_recompute("000001", day(10)).unwrap();
        store.enqueue_recompute("000001", day(4)).unwrap();
        store.enqueue_recompute("000001", day(12)).unwrap();
        store.enqueue_recompute("600000", day(7)).unwrap();

        assert_eq!(
            store.pending_recomputes().unwrap(),
            vec![("000001".to_string(), day(4)), ("600000".to_string(), day(7))]
        );
    }

    #[test]
    fn settle_only_removes_covered_entries() {
        let mut store = Store::open_in_memory().unwrap();
        store.enqueue_recompute("000001", day(4)).unwrap();
        store.enqueue_recompute("600000", day(7)).unwrap();

        // A recompute from the 5th does not cover a correction on the 4th.
        settle(store.connection(), "000001", Some(day(5))).unwrap();
        settle(store.connection(), "600000", Some(day(7))).unwrap();
        assert_eq!(
            store.pending_recomputes().unwrap(),
            vec![("000001".to_string(), day(4))]
        );

        settle(store.connection(), "000001", None).unwrap();
        assert!(store.pending_recomputes().unwrap().is_empty());
    }
}
