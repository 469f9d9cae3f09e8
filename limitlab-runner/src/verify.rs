//! Verification and data-quality checks.
//!
//! `verify` recomputes every requested symbol from scratch and diffs the
//! result against what is stored. Any difference means a correction was not
//! propagated, and each one is logged at `error`.

use chrono::NaiveDate;
use limitlab_core::domain::LimitResult;
use limitlab_core::{ResultFingerprint, SymbolError};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::compute::{ComputeEngine, RunError};
use crate::store::{Result as StoreResult, Store};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MismatchKind {
    /// Recomputed but not stored.
    Missing { expected: LimitResult },
    /// Stored but not produced by a recompute.
    Extra { stored: LimitResult },
    Different {
        stored: LimitResult,
        expected: LimitResult,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Mismatch {
    pub code: String,
    pub date: NaiveDate,
    #[serde(flatten)]
    pub kind: MismatchKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolVerification {
    pub code: String,
    pub stored: ResultFingerprint,
    pub expected: ResultFingerprint,
    pub mismatches: Vec<Mismatch>,
}

impl SymbolVerification {
    pub fn is_consistent(&self) -> bool {
        self.mismatches.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct VerifyReport {
    pub symbols: Vec<SymbolVerification>,
    pub failures: Vec<SymbolError>,
}

impl VerifyReport {
    pub fn mismatch_count(&self) -> usize {
        self.symbols.iter().map(|s| s.mismatches.len()).sum()
    }

    /// No mismatched rows and no symbol that could not be recomputed.
    pub fn is_clean(&self) -> bool {
        self.mismatch_count() == 0 && self.failures.is_empty()
    }
}

/// Compare stored rows against a fresh computation, date by date.
pub fn diff_results(code: &str, stored: &[LimitResult], expected: &[LimitResult]) -> Vec<Mismatch> {
    let stored_by_date: BTreeMap<NaiveDate, &LimitResult> =
        stored.iter().map(|r| (r.date, r)).collect();
    let expected_by_date: BTreeMap<NaiveDate, &LimitResult> =
        expected.iter().map(|r| (r.date, r)).collect();

    let mut mismatches = Vec::new();
    for (date, want) in &expected_by_date {
        match stored_by_date.get(date) {
            None => mismatches.push(Mismatch {
                code: code.to_string(),
                date: *date,
                kind: MismatchKind::Missing {
                    expected: (*want).clone(),
                },
            }),
            Some(have) if have != want => mismatches.push(Mismatch {
                code: code.to_string(),
                date: *date,
                kind: MismatchKind::Different {
                    stored: (*have).clone(),
                    expected: (*want).clone(),
                },
            }),
            Some(_) => {}
        }
    }
    for (date, have) in &stored_by_date {
        if !expected_by_date.contains_key(date) {
            mismatches.push(Mismatch {
                code: code.to_string(),
                date: *date,
                kind: MismatchKind::Extra {
                    stored: (*have).clone(),
                },
            });
        }
    }
    mismatches.sort_by_key(|m| m.date);
    mismatches
}

/// Recompute `codes` (every symbol with bars when `None`) and diff.
pub fn verify(
    store: &Store,
    engine: &ComputeEngine,
    codes: Option<&[String]>,
) -> Result<VerifyReport, RunError> {
    let codes = match codes {
        Some(codes) => codes.to_vec(),
        None => store.codes_with_bars()?,
    };
    tracing::info!(symbols = codes.len(), "verifying stored results");

    let mut report = VerifyReport::default();
    for outcome in engine.recompute(store, &codes)? {
        let analysis = match outcome {
            Ok(analysis) => analysis,
            Err(error) => {
                tracing::warn!(%error, "symbol not verifiable");
                report.failures.push(error);
                continue;
            }
        };
        let stored = store.load_results(Some(&analysis.code))?;
        let mismatches = diff_results(&analysis.code, &stored, &analysis.results);
        for m in &mismatches {
            tracing::error!(code = %m.code, date = %m.date, mismatch = ?m.kind, "stale result");
        }
        report.symbols.push(SymbolVerification {
            stored: ResultFingerprint::of(&stored),
            expected: ResultFingerprint::of(&analysis.results),
            code: analysis.code,
            mismatches,
        });
    }

    tracing::info!(
        symbols = report.symbols.len(),
        mismatches = report.mismatch_count(),
        "verification finished"
    );
    Ok(report)
}

/// Move beyond this fraction of the reference close is flagged.
pub const ABNORMAL_MOVE: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AbnormalMove {
    pub code: String,
    pub date: NaiveDate,
    pub change_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopChain {
    pub code: String,
    pub name: String,
    pub max_chain: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QualityReport {
    pub symbols: i64,
    pub bars: i64,
    pub results: i64,
    pub latest_bar_date: Option<NaiveDate>,
    pub latest_result_date: Option<NaiveDate>,
    pub missing_pre_close: i64,
    pub zero_volume: i64,
    /// Codes with bars but no metadata row.
    pub missing_meta: Vec<String>,
    pub abnormal_moves: Vec<AbnormalMove>,
    /// Limit-up rows per chain height.
    pub chain_distribution: BTreeMap<u32, i64>,
    pub top_chains: Vec<TopChain>,
    pub pending_recomputes: usize,
}

pub fn data_quality(store: &Store) -> StoreResult<QualityReport> {
    let conn = store.connection();
    let count = |sql: &str| -> StoreResult<i64> { Ok(conn.query_row(sql, [], |row| row.get(0))?) };

    let metas = store.load_meta()?;
    let missing_meta: Vec<String> = store
        .codes_with_bars()?
        .into_iter()
        .filter(|code| !metas.contains_key(code))
        .collect();

    let mut stmt = conn.prepare(
        "SELECT code, date, (close - pre_close) / pre_close * 100.0 FROM daily_market_data
         WHERE pre_close > 0 AND ABS(close - pre_close) / pre_close > ?1
         ORDER BY date DESC, code LIMIT 50",
    )?;
    let abnormal_moves = stmt
        .query_map([ABNORMAL_MOVE], |row| {
            Ok(AbnormalMove {
                code: row.get(0)?,
                date: row.get(1)?,
                change_pct: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut stmt = conn.prepare(
        "SELECT chain_height, COUNT(*) FROM limit_analysis_result
         WHERE limit_status = 1 GROUP BY chain_height ORDER BY chain_height",
    )?;
    let chain_distribution = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<std::result::Result<BTreeMap<u32, i64>, _>>()?;

    let mut stmt = conn.prepare(
        "SELECT r.code, COALESCE(m.name, ''), MAX(r.chain_height) AS top
         FROM limit_analysis_result r LEFT JOIN stock_meta m ON m.code = r.code
         GROUP BY r.code HAVING top > 0
         ORDER BY top DESC, r.code LIMIT 10",
    )?;
    let top_chains = stmt
        .query_map([], |row| {
            Ok(TopChain {
                code: row.get(0)?,
                name: row.get(1)?,
                max_chain: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let report = QualityReport {
        symbols: store.meta_count()?,
        bars: store.bar_count()?,
        results: store.result_count()?,
        latest_bar_date: store.latest_bar_date()?,
        latest_result_date: store.latest_result_date()?,
        missing_pre_close: count("SELECT COUNT(*) FROM daily_market_data WHERE pre_close IS NULL")?,
        zero_volume: count("SELECT COUNT(*) FROM daily_market_data WHERE volume = 0")?,
        missing_meta,
        abnormal_moves,
        chain_distribution,
        top_chains,
        pending_recomputes: store.pending_recomputes()?.len(),
    };
    for m in &report.abnormal_moves {
        tracing::warn!(code = %m.code, date = %m.date, change_pct = m.change_pct, "abnormal move");
    }
    Ok(report)
}

/// Fingerprints of every stored symbol, for comparing two databases.
pub fn stored_fingerprints(store: &Store) -> StoreResult<HashMap<String, ResultFingerprint>> {
    let mut by_code: HashMap<String, Vec<LimitResult>> = HashMap::new();
    for r in store.load_results(None)? {
        by_code.entry(r.code.clone()).or_default().push(r);
    }
    Ok(by_code
        .into_iter()
        .map(|(code, rows)| (code, ResultFingerprint::of(&rows)))
        .collect())
}
