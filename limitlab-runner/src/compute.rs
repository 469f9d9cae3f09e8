//! Compute engine: turns stored bars into stored limit results.
//!
//! Three modes:
//! - `Full`: every symbol's whole history from an empty chain
//! - `Incremental`: recompute every queued correction, then extend every
//!   symbol past its latest stored result, seeding the chain from that row
//! - `From`: recompute the given symbols forward from a date
//!
//! Jobs are loaded on the calling thread, analysed across the rayon pool and
//! written back on the calling thread in a single transaction. A queued
//! correction is removed in that same transaction, only for symbols whose
//! rows were written, so a failed symbol or a failed run leaves it queued.

use chrono::NaiveDate;
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

use limitlab_core::calendar::CalendarError;
use limitlab_core::data::DataError;
use limitlab_core::domain::{DailyBar, SymbolMeta};
use limitlab_core::{
    analyze_symbol, ChainState, Classifier, RowIssue, SuspensionList, SuspensionSource,
    SymbolAnalysis, SymbolError, ZeroVolumeHeuristic,
};

use crate::config::{ConfigError, LimitLabConfig};
use crate::store::{ResultReplacement, Store, StoreError};

/// Errors from compute runs and pipelines.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("data error: {0}")]
    Data(#[from] DataError),

    #[error("calendar error: {0}")]
    Calendar(#[from] CalendarError),

    #[error("task {task_id} is {status} and cannot be resumed")]
    NotResumable { task_id: String, status: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComputeMode {
    Full,
    Incremental,
    From { date: NaiveDate, codes: Vec<String> },
}

/// What a compute run did.
#[derive(Debug, Clone, Default)]
pub struct ComputeReport {
    pub symbols: usize,
    pub rows_written: usize,
    pub failures: Vec<SymbolError>,
    pub issues: Vec<RowIssue>,
    /// Queue entries an incremental run picked up. Entries stay queued
    /// until their symbol's results are written.
    pub corrections: Vec<(String, NaiveDate)>,
}

impl ComputeReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.issues.is_empty()
    }
}

/// One symbol's unit of work.
struct Job {
    code: String,
    meta: Option<SymbolMeta>,
    bars: Vec<DailyBar>,
    seed: ChainState,
    /// Stored rows from this date on are replaced; `None` replaces all.
    from: Option<NaiveDate>,
}

pub struct ComputeEngine {
    classifier: Classifier,
    calendar: Box<dyn SuspensionSource>,
    parallel: bool,
}

impl Default for ComputeEngine {
    fn default() -> Self {
        Self {
            classifier: Classifier::default(),
            calendar: Box::new(ZeroVolumeHeuristic),
            parallel: true,
        }
    }
}

impl ComputeEngine {
    pub fn new(classifier: Classifier) -> Self {
        Self {
            classifier,
            ..Self::default()
        }
    }

    /// Classifier, parallelism and suspension source from the config.
    pub fn from_config(config: &LimitLabConfig) -> Result<Self, RunError> {
        let mut engine = Self::new(Classifier::new(config.limits.classify_config()))
            .with_parallelism(config.compute.parallel);
        if let Some(path) = &config.compute.suspension_list {
            let list = SuspensionList::from_csv(path)?;
            tracing::info!(days = list.len(), path = %path.display(), "loaded suspension list");
            engine = engine.with_calendar(Box::new(list));
        }
        Ok(engine)
    }

    pub fn with_parallelism(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_calendar(mut self, calendar: Box<dyn SuspensionSource>) -> Self {
        self.calendar = calendar;
        self
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn run(&self, store: &mut Store, mode: &ComputeMode) -> Result<ComputeReport, RunError> {
        let metas = store.load_meta()?;
        let mut report = ComputeReport::default();

        let jobs = match mode {
            ComputeMode::Full => {
                tracing::info!("full recompute");
                store
                    .codes_with_bars()?
                    .into_iter()
                    .map(|code| full_job(store, &metas, code))
                    .collect::<Result<Vec<_>, _>>()?
            }
            ComputeMode::From { date, codes } => {
                tracing::info!(from = %date, symbols = codes.len(), "recompute from date");
                codes
                    .iter()
                    .map(|code| job_from(store, &metas, code.clone(), *date))
                    .collect::<Result<Vec<_>, _>>()?
            }
            ComputeMode::Incremental => {
                let queued = store.pending_recomputes()?;
                let mut jobs = Vec::with_capacity(queued.len());
                for (code, date) in &queued {
                    tracing::warn!(code = %code, from = %date, "recomputing after bar correction");
                    jobs.push(job_from(store, &metas, code.clone(), *date)?);
                }
                let corrected: HashSet<&str> = queued.iter().map(|(c, _)| c.as_str()).collect();
                let latest = store.latest_results()?;
                for code in store.codes_with_bars()? {
                    if corrected.contains(code.as_str()) {
                        continue;
                    }
                    let job = match latest.get(&code) {
                        Some(&(date, height)) => extend_job(store, &metas, code, date, height)?,
                        None => Some(full_job(store, &metas, code)?),
                    };
                    jobs.extend(job);
                }
                tracing::info!(symbols = jobs.len(), corrections = queued.len(), "incremental compute");
                report.corrections = queued;
                jobs
            }
        };

        let outcomes = self.analyze(&jobs);
        self.write(store, &jobs, outcomes, &mut report)?;

        tracing::info!(
            symbols = report.symbols,
            rows = report.rows_written,
            failures = report.failures.len(),
            issues = report.issues.len(),
            "compute finished"
        );
        Ok(report)
    }

    /// Analyse `codes` from scratch without touching stored results.
    pub fn recompute(
        &self,
        store: &Store,
        codes: &[String],
    ) -> Result<Vec<Result<SymbolAnalysis, SymbolError>>, StoreError> {
        let metas = store.load_meta()?;
        let jobs = codes
            .iter()
            .map(|code| full_job(store, &metas, code.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self.analyze(&jobs))
    }

    fn analyze(&self, jobs: &[Job]) -> Vec<Result<SymbolAnalysis, SymbolError>> {
        let run = |job: &Job| {
            analyze_symbol(
                &self.classifier,
                &job.code,
                job.meta.as_ref(),
                &job.bars,
                job.seed,
                self.calendar.as_ref(),
            )
        };
        if self.parallel {
            jobs.par_iter().map(run).collect()
        } else {
            jobs.iter().map(run).collect()
        }
    }

    fn write(
        &self,
        store: &mut Store,
        jobs: &[Job],
        outcomes: Vec<Result<SymbolAnalysis, SymbolError>>,
        report: &mut ComputeReport,
    ) -> Result<(), RunError> {
        let mut analyses = Vec::with_capacity(outcomes.len());
        for (job, outcome) in jobs.iter().zip(outcomes) {
            match outcome {
                Ok(analysis) => {
                    for issue in &analysis.issues {
                        tracing::warn!(code = %issue.code, date = %issue.date, error = %issue.error, "malformed bar skipped");
                    }
                    analyses.push((job, analysis));
                }
                Err(error) => {
                    tracing::warn!(code = %job.code, %error, "symbol skipped");
                    report.failures.push(error);
                }
            }
        }

        let batch: Vec<ResultReplacement<'_>> = analyses
            .iter()
            .map(|(job, analysis)| ResultReplacement {
                code: &job.code,
                from: job.from,
                results: &analysis.results,
            })
            .collect();
        report.rows_written += store.replace_results(&batch)?;
        report.symbols += analyses.len();
        report
            .issues
            .extend(analyses.into_iter().flat_map(|(_, a)| a.issues));
        Ok(())
    }
}

fn full_job(
    store: &Store,
    metas: &HashMap<String, SymbolMeta>,
    code: String,
) -> Result<Job, StoreError> {
    Ok(Job {
        bars: store.load_bars(&code, None, None)?,
        meta: metas.get(&code).cloned(),
        code,
        seed: ChainState::default(),
        from: None,
    })
}

/// Recompute forward from `date`, seeded by the last stored result before it.
/// Bars between that result and `date` are included so no day is skipped.
fn job_from(
    store: &Store,
    metas: &HashMap<String, SymbolMeta>,
    code: String,
    date: NaiveDate,
) -> Result<Job, StoreError> {
    let Some(prev) = store.last_result_before(&code, date)? else {
        return full_job(store, metas, code);
    };
    let from = prev.date.succ_opt();
    Ok(Job {
        bars: store.load_bars(&code, from, None)?,
        meta: metas.get(&code).cloned(),
        code,
        seed: ChainState::seeded(prev.chain_height),
        from,
    })
}

/// Bars after the latest stored result; `None` when there is nothing new.
fn extend_job(
    store: &Store,
    metas: &HashMap<String, SymbolMeta>,
    code: String,
    latest: NaiveDate,
    height: u32,
) -> Result<Option<Job>, StoreError> {
    let Some(from) = latest.succ_opt() else {
        return Ok(None);
    };
    let bars = store.load_bars(&code, Some(from), None)?;
    if bars.is_empty() {
        return Ok(None);
    }
    Ok(Some(Job {
        meta: metas.get(&code).cloned(),
        code,
        bars,
        seed: ChainState::seeded(height),
        from: Some(from),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use limitlab_core::domain::{BoardPattern, LimitRatios, LimitStatus};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn bar(d: u32, pre: f64, close: f64) -> DailyBar {
        DailyBar {
            date: day(d),
            code: "000001".into(),
            open: close,
            high: close,
            low: close.min(pre),
            close,
            pre_close: Some(pre),
            volume: 1_000.0,
            amount: 1_000.0 * close,
        }
    }

    /// 4 (up) 5 (up) 6 (flat) 7 (up)
    fn seeded_store() -> Store {
        let mut store = Store::open_in_memory().unwrap();
        store
            .upsert_meta(&[SymbolMeta::derive("000001", "平安银行", &LimitRatios::default())])
            .unwrap();
        store
            .upsert_bars(&[
                bar(4, 10.0, 11.0),
                bar(5, 11.0, 12.1),
                bar(6, 12.1, 12.1),
                bar(7, 12.1, 13.31),
            ])
            .unwrap();
        store
    }

    fn heights(store: &Store) -> Vec<u32> {
        store
            .load_results(Some("000001"))
            .unwrap()
            .iter()
            .map(|r| r.chain_height)
            .collect()
    }

    #[test]
    fn full_compute_writes_every_day() {
        let mut store = seeded_store();
        let report = ComputeEngine::default()
            .run(&mut store, &ComputeMode::Full)
            .unwrap();
        assert_eq!(report.symbols, 1);
        assert_eq!(report.rows_written, 4);
        assert!(report.is_clean());
        assert_eq!(heights(&store), vec![1, 2, 0, 1]);
    }

    #[test]
    fn incremental_extends_from_stored_chain() {
        let mut store = seeded_store();
        let engine = ComputeEngine::default().with_parallelism(false);
        engine.run(&mut store, &ComputeMode::Full).unwrap();

        store
            .upsert_bars(&[bar(8, 13.31, 14.64), bar(11, 14.64, 16.1)])
            .unwrap();
        let report = engine.run(&mut store, &ComputeMode::Incremental).unwrap();
        assert_eq!(report.rows_written, 2);
        assert!(report.corrections.is_empty());
        assert_eq!(heights(&store), vec![1, 2, 0, 1, 2, 3]);

        let again = engine.run(&mut store, &ComputeMode::Incremental).unwrap();
        assert_eq!(again.symbols, 0);
    }

    #[test]
    fn incremental_applies_queued_corrections() {
        let mut store = seeded_store();
        let engine = ComputeEngine::default();
        engine.run(&mut store, &ComputeMode::Full).unwrap();

        // Day 6 revised to a limit-up close: the chain runs unbroken.
        let outcome = store.upsert_bars(&[bar(6, 12.1, 13.31)]).unwrap();
        assert_eq!(outcome.corrections.get("000001"), Some(&day(6)));

        let report = engine.run(&mut store, &ComputeMode::Incremental).unwrap();
        assert_eq!(report.corrections, vec![("000001".to_string(), day(6))]);
        assert_eq!(heights(&store), vec![1, 2, 3, 4]);
        assert!(store.pending_recomputes().unwrap().is_empty());
    }

    #[test]
    fn recompute_from_date_matches_full() {
        let mut store = seeded_store();
        let engine = ComputeEngine::default();
        engine.run(&mut store, &ComputeMode::Full).unwrap();
        let full = store.load_results(None).unwrap();

        engine
            .run(
                &mut store,
                &ComputeMode::From {
                    date: day(6),
                    codes: vec!["000001".into()],
                },
            )
            .unwrap();
        assert_eq!(store.load_results(None).unwrap(), full);
    }

    #[test]
    fn missing_meta_fails_only_that_symbol() {
        let mut store = seeded_store();
        let mut orphan = bar(4, 10.0, 10.5);
        orphan.code = "600999".into();
        store.upsert_bars(&[orphan]).unwrap();

        let report = ComputeEngine::default()
            .run(&mut store, &ComputeMode::Full)
            .unwrap();
        assert_eq!(report.symbols, 1);
        assert_eq!(
            report.failures,
            vec![SymbolError::MissingMeta {
                code: "600999".into()
            }]
        );
        assert_eq!(heights(&store).len(), 4);
    }

    #[test]
    fn failed_correction_stays_queued() {
        let mut store = Store::open_in_memory().unwrap();
        let mut b = bar(4, 10.0, 10.5);
        b.code = "600999".into();
        store.upsert_bars(&[b]).unwrap();
        store.enqueue_recompute("600999", day(4)).unwrap();

        let report = ComputeEngine::default()
            .run(&mut store, &ComputeMode::Incremental)
            .unwrap();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(
            store.pending_recomputes().unwrap(),
            vec![("600999".to_string(), day(4))]
        );
    }

    #[test]
    fn failed_write_keeps_corrections_queued() {
        let mut store = seeded_store();
        let engine = ComputeEngine::default();
        engine.run(&mut store, &ComputeMode::Full).unwrap();
        store.upsert_bars(&[bar(6, 12.1, 13.31)]).unwrap();

        store
            .connection()
            .execute_batch(
                "CREATE TRIGGER reject_results BEFORE INSERT ON limit_analysis_result
                 BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
            )
            .unwrap();
        assert!(engine.run(&mut store, &ComputeMode::Incremental).is_err());
        assert_eq!(
            store.pending_recomputes().unwrap(),
            vec![("000001".to_string(), day(6))]
        );
        assert_eq!(heights(&store), vec![1, 2, 0, 1]);

        store
            .connection()
            .execute_batch("DROP TRIGGER reject_results;")
            .unwrap();
        let report = engine.run(&mut store, &ComputeMode::Incremental).unwrap();
        assert_eq!(report.corrections.len(), 1);
        assert_eq!(heights(&store), vec![1, 2, 3, 4]);
        assert!(store.pending_recomputes().unwrap().is_empty());
    }

    #[test]
    fn full_compute_settles_only_written_symbols() {
        let mut store = seeded_store();
        let mut orphan = bar(4, 10.0, 10.5);
        orphan.code = "600999".into();
        store.upsert_bars(&[orphan]).unwrap();
        store.enqueue_recompute("000001", day(5)).unwrap();
        store.enqueue_recompute("600999", day(4)).unwrap();

        let report = ComputeEngine::default()
            .run(&mut store, &ComputeMode::Full)
            .unwrap();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(
            store.pending_recomputes().unwrap(),
            vec![("600999".to_string(), day(4))]
        );
    }

    #[test]
    fn malformed_row_is_reported_and_chain_carries() {
        let mut store = seeded_store();
        let mut broken = bar(6, 12.1, 12.1);
        broken.high = 11.0;
        broken.low = 12.5;
        store.upsert_bars(&[broken]).unwrap();

        let report = ComputeEngine::default()
            .run(&mut store, &ComputeMode::Full)
            .unwrap();
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].date, day(6));

        let results = store.load_results(Some("000001")).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[2].chain_height, 3);
        assert_eq!(results[2].limit_status, LimitStatus::Up);
        assert_ne!(results[0].board_type, BoardPattern::Fried);
    }
}
