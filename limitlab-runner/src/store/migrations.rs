//! Schema migrations, applied in order and recorded in `migrations`.

use rusqlite::Connection;

use super::Result;

pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    run_migration(conn, "001_stock_meta", CREATE_STOCK_META)?;
    run_migration(conn, "002_daily_market_data", CREATE_DAILY_MARKET_DATA)?;
    run_migration(conn, "003_limit_analysis_result", CREATE_LIMIT_ANALYSIS_RESULT)?;
    run_migration(conn, "004_fetch_progress", CREATE_FETCH_PROGRESS)?;
    run_migration(conn, "005_recompute_queue", CREATE_RECOMPUTE_QUEUE)?;
    run_migration(conn, "006_fetch_task_codes", CREATE_FETCH_TASK_CODES)?;

    tracing::debug!("database migrations completed");
    Ok(())
}

fn run_migration(conn: &Connection, name: &str, sql: &str) -> Result<()> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM migrations WHERE name = ?1)",
        [name],
        |row| row.get(0),
    )?;

    if !exists {
        tracing::info!("running migration: {name}");
        conn.execute_batch(sql)?;
        conn.execute("INSERT INTO migrations (name) VALUES (?1)", [name])?;
    }
    Ok(())
}

/// Drop every table, including the ledger, so the next migration run starts clean.
pub fn drop_all(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "DROP TABLE IF EXISTS fetch_task_codes;
         DROP TABLE IF EXISTS recompute_queue;
         DROP TABLE IF EXISTS fetch_progress;
         DROP TABLE IF EXISTS limit_analysis_result;
         DROP TABLE IF EXISTS daily_market_data;
         DROP TABLE IF EXISTS stock_meta;
         DROP TABLE IF EXISTS migrations;",
    )?;
    Ok(())
}

const CREATE_STOCK_META: &str = r#"
CREATE TABLE stock_meta (
    code TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    board_type TEXT NOT NULL,
    limit_ratio REAL NOT NULL,
    is_st INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

const CREATE_DAILY_MARKET_DATA: &str = r#"
CREATE TABLE daily_market_data (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    date TEXT NOT NULL,
    code TEXT NOT NULL,
    open REAL NOT NULL,
    high REAL NOT NULL,
    low REAL NOT NULL,
    close REAL NOT NULL,
    pre_close REAL,
    volume REAL NOT NULL DEFAULT 0,
    amount REAL NOT NULL DEFAULT 0,
    UNIQUE(date, code)
);
CREATE INDEX idx_daily_date_code ON daily_market_data(date, code);
CREATE INDEX idx_daily_code_date ON daily_market_data(code, date);
"#;

// limit_status: 1 up, 0 not up, NULL undefined (suspended / no reference close)
const CREATE_LIMIT_ANALYSIS_RESULT: &str = r#"
CREATE TABLE limit_analysis_result (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    date TEXT NOT NULL,
    code TEXT NOT NULL,
    limit_status INTEGER,
    chain_height INTEGER NOT NULL DEFAULT 0,
    is_fried INTEGER NOT NULL DEFAULT 0,
    board_type TEXT NOT NULL,
    UNIQUE(date, code)
);
CREATE INDEX idx_limit_date_height ON limit_analysis_result(date, chain_height);
CREATE INDEX idx_limit_code_date ON limit_analysis_result(code, date);
"#;

const CREATE_FETCH_PROGRESS: &str = r#"
CREATE TABLE fetch_progress (
    task_id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    start_date TEXT NOT NULL,
    end_date TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    codes_done INTEGER NOT NULL DEFAULT 0,
    codes_total INTEGER NOT NULL DEFAULT 0,
    last_code TEXT,
    error TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

const CREATE_RECOMPUTE_QUEUE: &str = r#"
CREATE TABLE recompute_queue (
    code TEXT PRIMARY KEY,
    from_date TEXT NOT NULL,
    enqueued_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

const CREATE_FETCH_TASK_CODES: &str = r#"
CREATE TABLE fetch_task_codes (
    task_id TEXT NOT NULL,
    seq INTEGER NOT NULL,
    code TEXT NOT NULL,
    PRIMARY KEY (task_id, seq)
);
"#;
