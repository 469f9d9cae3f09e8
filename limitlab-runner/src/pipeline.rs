//! Fetch pipelines: listing refresh, resumable backfill, daily update.
//!
//! Every pipeline ends by running an incremental compute, so bars that
//! rewrote analysed history are picked up through the recompute queue.

use chrono::{Duration, NaiveDate};
use limitlab_core::data::{fetch_symbols, DataError, DataProvider, FetchProgress, TracingProgress};
use limitlab_core::domain::{DailyBar, SymbolMeta};

use crate::compute::{ComputeEngine, ComputeMode, ComputeReport, RunError};
use crate::config::LimitLabConfig;
use crate::store::{FetchTask, Store, TaskKind, TaskStatus};

/// Outcome of a backfill (or mvp) task.
#[derive(Debug)]
pub struct BackfillReport {
    pub task: FetchTask,
    pub bars: usize,
    /// Symbols the provider returned an error for; the task still completes.
    pub failed_codes: Vec<String>,
    /// `None` when the task stopped before the last batch.
    pub compute: Option<ComputeReport>,
}

#[derive(Debug)]
pub struct DailyReport {
    pub date: NaiveDate,
    pub bars: usize,
    pub corrections: usize,
    pub compute: ComputeReport,
}

pub struct Pipeline<'a> {
    store: &'a mut Store,
    provider: &'a dyn DataProvider,
    config: &'a LimitLabConfig,
    engine: &'a ComputeEngine,
    progress: Box<dyn FetchProgress>,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        store: &'a mut Store,
        provider: &'a dyn DataProvider,
        config: &'a LimitLabConfig,
        engine: &'a ComputeEngine,
    ) -> Self {
        Self {
            store,
            provider,
            config,
            engine,
            progress: Box::new(TracingProgress::default()),
        }
    }

    pub fn with_progress(mut self, progress: Box<dyn FetchProgress>) -> Self {
        self.progress = progress;
        self
    }

    /// Fetch the listing, upsert metadata and return the codes in sorted order.
    pub fn refresh_listing(&mut self) -> Result<Vec<String>, RunError> {
        let listing = self.provider.stock_list()?;
        let ratios = &self.config.limits.ratios;
        let metas: Vec<SymbolMeta> = listing
            .iter()
            .map(|s| SymbolMeta::derive(&s.code, &s.name, ratios))
            .collect();
        self.store.upsert_meta(&metas)?;

        let mut codes: Vec<String> = metas.into_iter().map(|m| m.code).collect();
        codes.sort();
        codes.dedup();
        tracing::info!(provider = self.provider.name(), symbols = codes.len(), "listing refreshed");
        Ok(codes)
    }

    /// Fetch `[start, end]` for every listed symbol (or the first `limit`).
    pub fn backfill(
        &mut self,
        start: NaiveDate,
        end: NaiveDate,
        limit: Option<usize>,
    ) -> Result<BackfillReport, RunError> {
        self.start_task(TaskKind::Backfill, start, end, limit)
    }

    /// Backfill the most recent `recent_days` calendar days up to `end`.
    pub fn mvp(
        &mut self,
        end: NaiveDate,
        recent_days: u32,
        limit: Option<usize>,
    ) -> Result<BackfillReport, RunError> {
        let start = end - Duration::days(i64::from(recent_days));
        self.start_task(TaskKind::Mvp, start, end, limit)
    }

    /// Continue an unfinished task from its last checkpoint.
    pub fn resume(&mut self, task_id: &str) -> Result<BackfillReport, RunError> {
        let task = self.store.get_task(task_id)?;
        if !task.status.is_resumable() {
            return Err(RunError::NotResumable {
                task_id: task.task_id,
                status: task.status.to_string(),
            });
        }
        let mut codes = self.store.task_codes(task_id)?;
        if codes.is_empty() && task.codes_total > 0 {
            // Tasks created before symbol lists were recorded.
            tracing::warn!(task_id, "no recorded symbol list, falling back to the current listing");
            codes = self.store.load_meta()?.into_keys().collect();
            codes.sort();
            codes.truncate(task.codes_total);
        }
        tracing::info!(task_id, done = task.codes_done, total = task.codes_total, "resuming task");
        self.run_task(task, codes)
    }

    /// Store a provider's listing plus a set of bars it already holds, then
    /// compute incrementally.
    pub fn import(&mut self, bars: &[DailyBar]) -> Result<DailyReport, RunError> {
        self.refresh_listing()?;
        let outcome = self.store.upsert_bars(bars)?;
        let compute = self.engine.run(self.store, &ComputeMode::Incremental)?;
        let date = bars.iter().map(|b| b.date).max().unwrap_or_default();
        tracing::info!(provider = self.provider.name(), bars = bars.len(), "import finished");
        Ok(DailyReport {
            date,
            bars: outcome.written,
            corrections: outcome.corrections.len(),
            compute,
        })
    }

    /// Fetch one trading date for the whole market, then compute incrementally.
    pub fn daily(&mut self, date: NaiveDate) -> Result<DailyReport, RunError> {
        self.refresh_listing()?;
        let bars = self.provider.daily_on(date)?;
        if bars.is_empty() {
            tracing::info!(%date, "no bars for date, nothing traded");
        }
        let outcome = self.store.upsert_bars(&bars)?;
        let compute = self.engine.run(self.store, &ComputeMode::Incremental)?;
        tracing::info!(%date, bars = bars.len(), "daily update finished");
        Ok(DailyReport {
            date,
            bars: bars.len(),
            corrections: outcome.corrections.len(),
            compute,
        })
    }

    fn start_task(
        &mut self,
        kind: TaskKind,
        start: NaiveDate,
        end: NaiveDate,
        limit: Option<usize>,
    ) -> Result<BackfillReport, RunError> {
        let mut codes = self.refresh_listing()?;
        if let Some(limit) = limit {
            codes.truncate(limit);
        }
        let task = FetchTask::new(kind, start, end, codes.len());
        self.store.create_task(&task, &codes)?;
        tracing::info!(task_id = %task.task_id, %start, %end, symbols = codes.len(), "task started");
        self.run_task(task, codes)
    }

    fn run_task(&mut self, task: FetchTask, codes: Vec<String>) -> Result<BackfillReport, RunError> {
        let task_id = task.task_id.clone();
        match self.fetch_batches(task, &codes) {
            Ok(report) => Ok(report),
            Err(e) => {
                self.store
                    .set_task_status(&task_id, TaskStatus::Failed, Some(&e.to_string()))?;
                tracing::error!(task_id = %task_id, error = %e, "task failed");
                Err(e)
            }
        }
    }

    fn fetch_batches(
        &mut self,
        mut task: FetchTask,
        codes: &[String],
    ) -> Result<BackfillReport, RunError> {
        self.store.set_task_status(&task.task_id, TaskStatus::Running, None)?;
        let total = codes.len();
        let batch_size = self.config.fetch.batch_size.max(1);
        let mut bars = 0;
        let mut failed_codes = Vec::new();

        let remaining = codes.get(task.codes_done..).unwrap_or_default();
        for batch in remaining.chunks(batch_size) {
            let summary = fetch_symbols(
                self.provider,
                batch,
                task.start_date,
                task.end_date,
                self.progress.as_ref(),
            );
            self.store.upsert_bars(&summary.bars)?;
            bars += summary.bars.len();

            if let Some(halt) = summary.halted_by {
                // The batch is retried as a whole on resume.
                let status = match halt {
                    DataError::RateLimited { .. } => TaskStatus::RateLimited,
                    _ => TaskStatus::Interrupted,
                };
                self.store
                    .set_task_status(&task.task_id, status, Some(&halt.to_string()))?;
                tracing::warn!(
                    task_id = %task.task_id,
                    done = task.codes_done,
                    total,
                    reason = %halt,
                    "task stopped, resume later"
                );
                task.status = status;
                task.error = Some(halt.to_string());
                return Ok(BackfillReport {
                    task,
                    bars,
                    failed_codes,
                    compute: None,
                });
            }

            for (code, error) in summary.errors {
                tracing::warn!(code = %code, %error, "fetch failed");
                failed_codes.push(code);
            }
            task.codes_done += batch.len();
            task.last_code = batch.last().cloned();
            self.store.set_task_progress(
                &task.task_id,
                task.codes_done,
                total,
                task.last_code.as_deref(),
            )?;
            tracing::info!(
                task_id = %task.task_id,
                done = task.codes_done,
                total,
                pct = task.progress_pct().round(),
                "batch saved"
            );
        }

        let compute = self.engine.run(self.store, &ComputeMode::Incremental)?;

        let error = (!failed_codes.is_empty()).then(|| format!("{} symbols failed", failed_codes.len()));
        self.store
            .set_task_status(&task.task_id, TaskStatus::Completed, error.as_deref())?;
        task.status = TaskStatus::Completed;
        task.error = error;
        tracing::info!(task_id = %task.task_id, bars, failed = failed_codes.len(), "task completed");

        Ok(BackfillReport {
            task,
            bars,
            failed_codes,
            compute: Some(compute),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use limitlab_core::data::{ListedStock, SilentProgress, SyntheticConfig, SyntheticProvider};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn day(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, m, d).unwrap()
    }

    fn config(batch_size: usize) -> LimitLabConfig {
        let mut config = LimitLabConfig::default();
        config.fetch.batch_size = batch_size;
        config
    }

    fn synthetic(symbols: usize) -> SyntheticProvider {
        SyntheticProvider::new(SyntheticConfig {
            symbols,
            ..SyntheticConfig::default()
        })
    }

    /// Synthetic data that reports a rate limit after `budget` daily calls.
    struct Quota {
        inner: SyntheticProvider,
        budget: usize,
        calls: AtomicUsize,
    }

    impl DataProvider for Quota {
        fn name(&self) -> &str {
            "quota"
        }

        fn stock_list(&self) -> Result<Vec<ListedStock>, DataError> {
            self.inner.stock_list()
        }

        fn daily(&self, code: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<DailyBar>, DataError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) >= self.budget {
                return Err(DataError::RateLimited { retry_after_secs: 60 });
            }
            self.inner.daily(code, start, end)
        }

        fn daily_on(&self, date: NaiveDate) -> Result<Vec<DailyBar>, DataError> {
            self.inner.daily_on(date)
        }

        fn is_available(&self) -> bool {
            true
        }
    }

    #[test]
    fn backfill_completes_and_computes() {
        let mut store = Store::open_in_memory().unwrap();
        let provider = synthetic(6);
        let config = config(4);
        let engine = ComputeEngine::default();

        let report = Pipeline::new(&mut store, &provider, &config, &engine)
            .with_progress(Box::new(SilentProgress))
            .backfill(day(1, 2), day(3, 31), None)
            .unwrap();

        assert_eq!(report.task.status, TaskStatus::Completed);
        assert_eq!(report.task.codes_done, 6);
        assert!(report.failed_codes.is_empty());
        assert!(report.bars > 0);
        let compute = report.compute.unwrap();
        assert_eq!(compute.symbols, 6);
        assert_eq!(store.result_count().unwrap() as usize, compute.rows_written);

        let stored = store.get_task(&report.task.task_id).unwrap();
        assert_eq!(stored.status, TaskStatus::Completed);
        assert_eq!(stored.codes_done, 6);
    }

    #[test]
    fn rate_limited_task_resumes_from_checkpoint() {
        let mut store = Store::open_in_memory().unwrap();
        let config = config(2);
        let engine = ComputeEngine::default();
        let limited = Quota {
            inner: synthetic(6),
            budget: 3,
            calls: AtomicUsize::new(0),
        };

        let first = Pipeline::new(&mut store, &limited, &config, &engine)
            .with_progress(Box::new(SilentProgress))
            .backfill(day(1, 2), day(2, 28), None)
            .unwrap();
        assert_eq!(first.task.status, TaskStatus::RateLimited);
        assert!(first.compute.is_none());

        let checkpoint = store.get_task(&first.task.task_id).unwrap();
        assert_eq!(checkpoint.status, TaskStatus::RateLimited);
        assert_eq!(checkpoint.codes_done, 2);

        let provider = synthetic(6);
        let resumed = Pipeline::new(&mut store, &provider, &config, &engine)
            .with_progress(Box::new(SilentProgress))
            .resume(&first.task.task_id)
            .unwrap();
        assert_eq!(resumed.task.status, TaskStatus::Completed);
        assert_eq!(resumed.task.codes_done, 6);
        assert_eq!(store.codes_with_bars().unwrap().len(), 6);

        let again = Pipeline::new(&mut store, &provider, &config, &engine)
            .resume(&first.task.task_id);
        assert!(matches!(again, Err(RunError::NotResumable { .. })));
    }

    #[test]
    fn resume_follows_the_recorded_symbol_list() {
        let mut store = Store::open_in_memory().unwrap();
        let config = config(2);
        let engine = ComputeEngine::default();
        let limited = Quota {
            inner: synthetic(6),
            budget: 2,
            calls: AtomicUsize::new(0),
        };

        let first = Pipeline::new(&mut store, &limited, &config, &engine)
            .with_progress(Box::new(SilentProgress))
            .backfill(day(1, 2), day(2, 28), None)
            .unwrap();
        assert_eq!(first.task.status, TaskStatus::RateLimited);
        assert_eq!(first.task.codes_done, 2);
        let listed = store.task_codes(&first.task.task_id).unwrap();
        assert_eq!(listed.len(), 6);
        assert!(listed.contains(&"830000".to_string()));

        // A symbol listed between runs sorts ahead of every recorded code.
        store
            .upsert_meta(&[SymbolMeta::derive("000001", "新上市", &config.limits.ratios)])
            .unwrap();

        let provider = synthetic(6);
        let resumed = Pipeline::new(&mut store, &provider, &config, &engine)
            .with_progress(Box::new(SilentProgress))
            .resume(&first.task.task_id)
            .unwrap();
        assert_eq!(resumed.task.status, TaskStatus::Completed);
        assert_eq!(resumed.task.codes_done, 6);

        let mut fetched = store.codes_with_bars().unwrap();
        fetched.sort();
        assert_eq!(fetched, listed);
    }

    #[test]
    fn failed_task_resumes_after_the_store_recovers() {
        let mut store = Store::open_in_memory().unwrap();
        let provider = synthetic(4);
        let config = config(2);
        let engine = ComputeEngine::default();
        store
            .connection()
            .execute_batch(
                "CREATE TRIGGER reject_bars BEFORE INSERT ON daily_market_data
                 BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
            )
            .unwrap();

        let failed = Pipeline::new(&mut store, &provider, &config, &engine)
            .with_progress(Box::new(SilentProgress))
            .backfill(day(1, 2), day(1, 31), None);
        assert!(failed.is_err());
        let task = store.list_tasks().unwrap().remove(0);
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.codes_done, 0);

        store.connection().execute_batch("DROP TRIGGER reject_bars;").unwrap();
        let resumed = Pipeline::new(&mut store, &provider, &config, &engine)
            .with_progress(Box::new(SilentProgress))
            .resume(&task.task_id)
            .unwrap();
        assert_eq!(resumed.task.status, TaskStatus::Completed);
        assert_eq!(store.codes_with_bars().unwrap().len(), 4);
    }

    #[test]
    fn daily_extends_backfill() {
        let mut store = Store::open_in_memory().unwrap();
        let provider = synthetic(5);
        let config = config(10);
        let engine = ComputeEngine::default();

        Pipeline::new(&mut store, &provider, &config, &engine)
            .with_progress(Box::new(SilentProgress))
            .backfill(day(1, 2), day(1, 31), None)
            .unwrap();
        let before = store.result_count().unwrap();

        let report = Pipeline::new(&mut store, &provider, &config, &engine)
            .daily(day(2, 1))
            .unwrap();
        assert_eq!(report.bars, 5);
        assert_eq!(report.compute.rows_written, 5);
        assert_eq!(store.result_count().unwrap(), before + 5);
        assert_eq!(store.latest_result_date().unwrap(), Some(day(2, 1)));
    }

    #[test]
    fn mvp_caps_symbols() {
        let mut store = Store::open_in_memory().unwrap();
        let provider = synthetic(8);
        let config = config(100);
        let engine = ComputeEngine::default();

        let report = Pipeline::new(&mut store, &provider, &config, &engine)
            .with_progress(Box::new(SilentProgress))
            .mvp(day(4, 28), 30, Some(3))
            .unwrap();
        assert_eq!(report.task.kind, TaskKind::Mvp);
        assert_eq!(report.task.codes_total, 3);
        assert_eq!(store.codes_with_bars().unwrap().len(), 3);
        assert_eq!(report.task.start_date, day(3, 29));
    }
}
