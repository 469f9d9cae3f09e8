//! LimitLab Runner — storage, compute orchestration, fetch pipelines and reports.
//!
//! This crate builds on `limitlab-core` to provide:
//! - `limitlab.toml` configuration
//! - The SQLite store (bars, metadata, results, fetch tasks, recompute queue)
//! - Full, incremental and recompute-from compute runs over the rayon pool
//! - Backfill, resume, daily and mvp fetch pipelines
//! - Query API, verification, data quality, CSV/JSON export and increments

pub mod compute;
pub mod config;
pub mod export;
pub mod increments;
pub mod pipeline;
pub mod query;
pub mod store;
pub mod verify;

pub use compute::{ComputeEngine, ComputeMode, ComputeReport, RunError};
pub use config::{ConfigError, LimitLabConfig};
pub use pipeline::{BackfillReport, DailyReport, Pipeline};
pub use query::{DailySummary, LimitRow, QueryApi};
pub use store::{FetchTask, Store, StoreError, TaskKind, TaskStatus};
pub use verify::{data_quality, verify, QualityReport, VerifyReport};
