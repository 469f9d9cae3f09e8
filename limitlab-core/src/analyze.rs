//! Per-symbol analysis: classify each day, then fold the chain.
//!
//! Symbols are independent, so callers fan out over symbols and run
//! `analyze_symbol` on each. Within a symbol the fold is strictly sequential.

use chrono::NaiveDate;
use thiserror::Error;
use tracing::debug;

use crate::calendar::SuspensionSource;
use crate::chain::ChainState;
use crate::classify::Classifier;
use crate::domain::{BarError, DailyBar, LimitResult, LimitStatus, SymbolMeta};

/// A symbol whose history cannot be analysed at all.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SymbolError {
    #[error("{code}: no metadata")]
    MissingMeta { code: String },

    #[error("{code}: limit ratio {ratio} outside (0, 1)")]
    InvalidRatio { code: String, ratio: f64 },

    #[error("{code}: bars out of order ({prev} followed by {next})")]
    OutOfOrder {
        code: String,
        prev: NaiveDate,
        next: NaiveDate,
    },

    #[error("{code}: bar for {found} mixed into history")]
    ForeignBar { code: String, found: String },
}

/// A single malformed day. The row is skipped and the chain carries over it.
#[derive(Debug, Clone, PartialEq)]
pub struct RowIssue {
    pub code: String,
    pub date: NaiveDate,
    pub error: BarError,
}

/// Output of analysing one symbol's bars.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolAnalysis {
    pub code: String,
    /// One result per well-formed bar, in date order.
    pub results: Vec<LimitResult>,
    pub issues: Vec<RowIssue>,
    /// Accumulator state after the last bar, for seeding the next run.
    pub final_state: ChainState,
}

impl SymbolAnalysis {
    pub fn limit_up_days(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.limit_status == LimitStatus::Up)
            .count()
    }

    pub fn max_chain(&self) -> u32 {
        self.results.iter().map(|r| r.chain_height).max().unwrap_or(0)
    }
}

/// Check ordering and ownership of a bar sequence.
pub fn check_sequence(code: &str, bars: &[DailyBar]) -> Result<(), SymbolError> {
    if let Some(foreign) = bars.iter().find(|b| b.code != code) {
        return Err(SymbolError::ForeignBar {
            code: code.to_string(),
            found: foreign.code.clone(),
        });
    }
    for pair in bars.windows(2) {
        if pair[1].date <= pair[0].date {
            return Err(SymbolError::OutOfOrder {
                code: code.to_string(),
                prev: pair[0].date,
                next: pair[1].date,
            });
        }
    }
    Ok(())
}

/// Analyse one symbol's strictly ascending bars, continuing from `seed`.
///
/// `meta` is `None` when the symbol has no metadata row; that fails the whole
/// symbol because the limit ratio is unknown.
pub fn analyze_symbol(
    classifier: &Classifier,
    code: &str,
    meta: Option<&SymbolMeta>,
    bars: &[DailyBar],
    seed: ChainState,
    calendar: &dyn SuspensionSource,
) -> Result<SymbolAnalysis, SymbolError> {
    let meta = meta.ok_or_else(|| SymbolError::MissingMeta {
        code: code.to_string(),
    })?;
    if !(meta.limit_ratio > 0.0 && meta.limit_ratio < 1.0) {
        return Err(SymbolError::InvalidRatio {
            code: code.to_string(),
            ratio: meta.limit_ratio,
        });
    }
    check_sequence(code, bars)?;

    let mut state = seed;
    let mut results = Vec::with_capacity(bars.len());
    let mut issues = Vec::new();

    for bar in bars {
        let suspended = calendar.is_suspended(bar);
        match classifier.classify_day(bar, meta, suspended) {
            Ok(verdict) => {
                state = state.step(verdict.limit_status);
                results.push(LimitResult {
                    date: bar.date,
                    code: code.to_string(),
                    limit_status: verdict.limit_status,
                    chain_height: state.height,
                    is_fried: verdict.is_fried,
                    board_type: verdict.board_type,
                });
            }
            Err(error) => {
                debug!(code, date = %bar.date, %error, "skipping malformed bar");
                issues.push(RowIssue {
                    code: code.to_string(),
                    date: bar.date,
                    error,
                });
            }
        }
    }

    Ok(SymbolAnalysis {
        code: code.to_string(),
        results,
        issues,
        final_state: state,
    })
}
