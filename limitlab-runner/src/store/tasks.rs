//! `fetch_progress`: one row per fetch task, checkpointed after each batch so
//! an interrupted backfill can resume where it stopped.

use chrono::{NaiveDate, NaiveDateTime, Utc};
use limitlab_core::dates::compact;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::{conversion_error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Backfill,
    Mvp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    /// Stopped by the provider's quota; resumable.
    RateLimited,
    /// Stopped by an error or circuit breaker; resumable.
    Interrupted,
    Completed,
    /// Stopped by a store or listing error; resumable from its checkpoint.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown task {what} '{value}'")]
pub struct UnknownTaskField {
    what: &'static str,
    value: String,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Backfill => "backfill",
            TaskKind::Mvp => "mvp",
        }
    }
}

impl FromStr for TaskKind {
    type Err = UnknownTaskField;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "backfill" => Ok(TaskKind::Backfill),
            "mvp" => Ok(TaskKind::Mvp),
            other => Err(UnknownTaskField {
                what: "kind",
                value: other.to_string(),
            }),
        }
    }
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::RateLimited => "rate_limited",
            TaskStatus::Interrupted => "interrupted",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    /// Whether `fetch resume` may pick the task up again. Only a completed
    /// task is final; a failed one restarts from its last checkpoint.
    pub fn is_resumable(&self) -> bool {
        !matches!(self, TaskStatus::Completed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = UnknownTaskField;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "rate_limited" => Ok(TaskStatus::RateLimited),
            "interrupted" => Ok(TaskStatus::Interrupted),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(UnknownTaskField {
                what: "status",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchTask {
    pub task_id: String,
    pub kind: TaskKind,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub status: TaskStatus,
    /// Symbols fetched so far, in listing order.
    pub codes_done: usize,
    pub codes_total: usize,
    pub last_code: Option<String>,
    pub error: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl FetchTask {
    /// A pending task with an id of the form `{kind}_{start}_{end}_{8 hex}`.
    pub fn new(kind: TaskKind, start_date: NaiveDate, end_date: NaiveDate, codes_total: usize) -> Self {
        let now = Utc::now().naive_utc();
        let salt = blake3::hash(format!("{kind:?}{start_date}{end_date}{now:?}").as_bytes());
        let task_id = format!(
            "{}_{}_{}_{}",
            kind.as_str(),
            compact(start_date),
            compact(end_date),
            &salt.to_hex()[..8]
        );
        Self {
            task_id,
            kind,
            start_date,
            end_date,
            status: TaskStatus::Pending,
            codes_done: 0,
            codes_total,
            last_code: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn progress_pct(&self) -> f64 {
        if self.codes_total == 0 {
            return 0.0;
        }
        self.codes_done as f64 / self.codes_total as f64 * 100.0
    }
}

const TASK_COLUMNS: &str = "task_id, kind, start_date, end_date, status, codes_done, codes_total, \
                            last_code, error, created_at, updated_at";

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<FetchTask> {
    let kind: String = row.get(1)?;
    let status: String = row.get(4)?;
    Ok(FetchTask {
        task_id: row.get(0)?,
        kind: kind.parse().map_err(|e| conversion_error(1, e))?,
        start_date: row.get(2)?,
        end_date: row.get(3)?,
        status: status.parse().map_err(|e| conversion_error(4, e))?,
        codes_done: row.get(5)?,
        codes_total: row.get(6)?,
        last_code: row.get(7)?,
        error: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

/// Insert the task row together with the symbol list it will walk, so a
/// resume follows the same order whatever the listing looks like later.
pub fn create_task(conn: &mut Connection, task: &FetchTask, codes: &[String]) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute(
        &format!(
            "INSERT INTO fetch_progress ({TASK_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
        ),
        params![
            task.task_id,
            task.kind.as_str(),
            task.start_date,
            task.end_date,
            task.status.as_str(),
            task.codes_done,
            task.codes_total,
            task.last_code,
            task.error,
            task.created_at,
            task.updated_at,
        ],
    )?;
    {
        let mut stmt = tx.prepare("INSERT INTO fetch_task_codes (task_id, seq, code) VALUES (?1, ?2, ?3)")?;
        for (seq, code) in codes.iter().enumerate() {
            stmt.execute(params![task.task_id, seq, code])?;
        }
    }
    tx.commit()?;
    tracing::info!(task_id = %task.task_id, codes = codes.len(), "created fetch task");
    Ok(())
}

/// The symbol list recorded when the task was created, in fetch order.
pub fn task_codes(conn: &Connection, task_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT code FROM fetch_task_codes WHERE task_id = ?1 ORDER BY seq")?;
    let codes = stmt
        .query_map([task_id], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(codes)
}

pub fn get_task(conn: &Connection, task_id: &str) -> Result<Option<FetchTask>> {
    let task = conn
        .query_row(
            &format!("SELECT {TASK_COLUMNS} FROM fetch_progress WHERE task_id = ?1"),
            [task_id],
            task_from_row,
        )
        .optional()?;
    Ok(task)
}

pub fn list_tasks(conn: &Connection) -> Result<Vec<FetchTask>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {TASK_COLUMNS} FROM fetch_progress ORDER BY created_at DESC, task_id"
    ))?;
    let tasks = stmt
        .query_map([], task_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(tasks)
}

pub fn set_status(
    conn: &Connection,
    task_id: &str,
    status: TaskStatus,
    error: Option<&str>,
) -> Result<()> {
    conn.execute(
        "UPDATE fetch_progress
         SET status = ?2, error = ?3, updated_at = ?4
         WHERE task_id = ?1",
        params![task_id, status.as_str(), error, Utc::now().naive_utc()],
    )?;
    Ok(())
}

pub fn set_progress(
    conn: &Connection,
    task_id: &str,
    codes_done: usize,
    codes_total: usize,
    last_code: Option<&str>,
) -> Result<()> {
    conn.execute(
        "UPDATE fetch_progress
         SET codes_done = ?2, codes_total = ?3, last_code = ?4, updated_at = ?5
         WHERE task_id = ?1",
        params![task_id, codes_done, codes_total, last_code, Utc::now().naive_utc()],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::{Store, StoreError};
    use super::*;

    fn day(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, d).unwrap()
    }

    #[test]
    fn task_id_names_kind_and_range() {
        let task = FetchTask::new(TaskKind::Backfill, day(1, 1), day(3, 31), 10);
        assert!(task.task_id.starts_with("backfill_20240101_20240331_"));
        assert_eq!(task.task_id.len(), "backfill_20240101_20240331_".len() + 8);
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[test]
    fn checkpoint_and_status_round_trip() {
        let mut store = Store::open_in_memory().unwrap();
        let task = FetchTask::new(TaskKind::Backfill, day(1, 1), day(3, 31), 300);
        let codes: Vec<String> = ["600000", "000001", "300750"].map(String::from).to_vec();
        store.create_task(&task, &codes).unwrap();
        assert_eq!(store.task_codes(&task.task_id).unwrap(), codes);

        store.set_task_progress(&task.task_id, 100, 300, Some("000100")).unwrap();
        store
            .set_task_status(&task.task_id, TaskStatus::RateLimited, Some("quota"))
            .unwrap();

        let loaded = store.get_task(&task.task_id).unwrap();
        assert_eq!(loaded.codes_done, 100);
        assert_eq!(loaded.last_code.as_deref(), Some("000100"));
        assert_eq!(loaded.status, TaskStatus::RateLimited);
        assert!(loaded.status.is_resumable());
        assert_eq!(loaded.error.as_deref(), Some("quota"));
        assert_eq!(store.list_tasks().unwrap().len(), 1);
    }

    #[test]
    fn missing_task_is_an_error() {
        let store = Store::open_in_memory().unwrap();
        assert!(matches!(
            store.get_task("backfill_nope"),
            Err(StoreError::TaskNotFound(_))
        ));
    }

    #[test]
    fn status_strings_parse_back() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Running,
            TaskStatus::RateLimited,
            TaskStatus::Interrupted,
            TaskStatus::Completed,
            TaskStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert!(!TaskStatus::Completed.is_resumable());
        assert!(TaskStatus::Failed.is_resumable());
    }
}
