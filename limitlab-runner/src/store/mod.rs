//! SQLite store for symbol metadata, daily bars, limit results, fetch tasks
//! and the recompute queue.
//!
//! Writes go through transactions with prepared statements. The store is
//! owned by the calling thread; compute workers never touch it.

mod bars;
mod meta;
mod migrations;
mod queue;
mod results;
mod tasks;

pub use bars::UpsertOutcome;
pub use results::ResultReplacement;
pub use tasks::{FetchTask, TaskKind, TaskStatus};

use chrono::NaiveDate;
use limitlab_core::domain::{DailyBar, LimitResult, SymbolMeta};
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("cannot create database directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("task not found: {0}")]
    TaskNotFound(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Map a parse failure inside a row closure to a rusqlite conversion error.
pub(crate) fn conversion_error<E>(column: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(err))
}

pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (creating if needed) the database at `path` and run migrations.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.busy_timeout(Duration::from_secs(30))?;
        migrations::run_migrations(&conn)?;
        Ok(Self { conn })
    }

    /// Read-only access for the query, verify and export layers.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Drop every table and recreate the schema.
    pub fn reset(&mut self) -> Result<()> {
        migrations::drop_all(&self.conn)?;
        migrations::run_migrations(&self.conn)?;
        tracing::warn!("database reset");
        Ok(())
    }

    /// Delete bars and results dated before `date`.
    pub fn prune_before(&mut self, date: NaiveDate) -> Result<(usize, usize)> {
        let tx = self.conn.transaction()?;
        let bars = tx.execute("DELETE FROM daily_market_data WHERE date < ?1", [date])?;
        let results = tx.execute("DELETE FROM limit_analysis_result WHERE date < ?1", [date])?;
        tx.commit()?;
        tracing::info!(%date, bars, results, "pruned old rows");
        Ok((bars, results))
    }

    // ========== Symbol metadata ==========

    pub fn upsert_meta(&mut self, metas: &[SymbolMeta]) -> Result<usize> {
        meta::upsert_meta(&mut self.conn, metas)
    }

    pub fn load_meta(&self) -> Result<HashMap<String, SymbolMeta>> {
        meta::load_meta(&self.conn)
    }

    pub fn meta_count(&self) -> Result<i64> {
        meta::count_meta(&self.conn)
    }

    // ========== Daily bars ==========

    /// Upsert bars; rewritten or back-filled history enqueues a recompute.
    pub fn upsert_bars(&mut self, bars: &[DailyBar]) -> Result<UpsertOutcome> {
        bars::upsert_bars(&mut self.conn, bars)
    }

    pub fn load_bars(
        &self,
        code: &str,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<DailyBar>> {
        bars::load_bars(&self.conn, code, from, to)
    }

    pub fn bars_on(&self, date: NaiveDate) -> Result<Vec<DailyBar>> {
        bars::bars_on(&self.conn, date)
    }

    pub fn codes_with_bars(&self) -> Result<Vec<String>> {
        bars::codes_with_bars(&self.conn)
    }

    pub fn latest_bar_date(&self) -> Result<Option<NaiveDate>> {
        bars::latest_bar_date(&self.conn)
    }

    pub fn bar_count(&self) -> Result<i64> {
        bars::count_bars(&self.conn)
    }

    // ========== Limit results ==========

    pub fn upsert_results(&mut self, results: &[LimitResult]) -> Result<usize> {
        results::upsert_results(&mut self.conn, results)
    }

    /// Replace each symbol's results from a date onward, in one transaction.
    pub fn replace_results(&mut self, batch: &[ResultReplacement<'_>]) -> Result<usize> {
        results::replace_results(&mut self.conn, batch)
    }

    pub fn load_results(&self, code: Option<&str>) -> Result<Vec<LimitResult>> {
        results::load_results(&self.conn, code)
    }

    pub fn results_on(&self, date: NaiveDate) -> Result<Vec<LimitResult>> {
        results::results_on(&self.conn, date)
    }

    /// Latest stored result strictly before `date`.
    pub fn last_result_before(&self, code: &str, date: NaiveDate) -> Result<Option<LimitResult>> {
        results::last_result_before(&self.conn, code, date)
    }

    /// Per code: date and chain height of the latest stored result.
    pub fn latest_results(&self) -> Result<HashMap<String, (NaiveDate, u32)>> {
        results::latest_results(&self.conn)
    }

    pub fn latest_result_date(&self) -> Result<Option<NaiveDate>> {
        results::latest_result_date(&self.conn)
    }

    pub fn result_count(&self) -> Result<i64> {
        results::count_results(&self.conn)
    }

    // ========== Recompute queue ==========

    pub fn enqueue_recompute(&mut self, code: &str, from: NaiveDate) -> Result<()> {
        queue::enqueue(&self.conn, code, from)
    }

    pub fn pending_recomputes(&self) -> Result<Vec<(String, NaiveDate)>> {
        queue::pending(&self.conn)
    }

    // ========== Fetch tasks ==========

    pub fn create_task(&mut self, task: &FetchTask, codes: &[String]) -> Result<()> {
        tasks::create_task(&mut self.conn, task, codes)
    }

    pub fn task_codes(&self, task_id: &str) -> Result<Vec<String>> {
        tasks::task_codes(&self.conn, task_id)
    }

    pub fn get_task(&self, task_id: &str) -> Result<FetchTask> {
        tasks::get_task(&self.conn, task_id)?.ok_or_else(|| StoreError::TaskNotFound(task_id.to_string()))
    }

    pub fn list_tasks(&self) -> Result<Vec<FetchTask>> {
        tasks::list_tasks(&self.conn)
    }

    pub fn set_task_status(&mut self, task_id: &str, status: TaskStatus, error: Option<&str>) -> Result<()> {
        tasks::set_status(&self.conn, task_id, status, error)
    }

    pub fn set_task_progress(&mut self, task_id: &str, codes_done: usize, codes_total: usize, last_code: Option<&str>) -> Result<()> {
        tasks::set_progress(&self.conn, task_id, codes_done, codes_total, last_code)
    }
}
