//! Suspension signal per `(date, code)`.
//!
//! Days on which a symbol did not trade produce no verdict and carry the chain
//! forward. Providers that omit suspended days entirely need nothing here:
//! a missing row is simply not a step of the fold.

use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

use crate::dates::{parse_date, DateParseError};
use crate::domain::DailyBar;

/// Source of the trading-calendar/suspension flag.
pub trait SuspensionSource: Send + Sync {
    fn is_suspended(&self, bar: &DailyBar) -> bool;
}

/// Flags zero-volume bars pinned at the reference close.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZeroVolumeHeuristic;

impl SuspensionSource for ZeroVolumeHeuristic {
    fn is_suspended(&self, bar: &DailyBar) -> bool {
        bar.looks_suspended()
    }
}

#[derive(Debug, Error)]
pub enum CalendarError {
    #[error("suspension list: {0}")]
    Csv(#[from] csv::Error),

    #[error("suspension list row {row}: {source}")]
    Date {
        row: usize,
        #[source]
        source: DateParseError,
    },
}

/// Explicit suspension days, with the heuristic as a fallback.
#[derive(Debug, Clone, Default)]
pub struct SuspensionList {
    days: HashSet<(String, NaiveDate)>,
}

#[derive(Debug, Deserialize)]
struct SuspensionRow {
    code: String,
    date: String,
}

impl SuspensionList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, code: impl Into<String>, date: NaiveDate) {
        self.days.insert((code.into(), date));
    }

    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    /// Load a `code,date` CSV with a header row.
    pub fn from_csv(path: &Path) -> Result<Self, CalendarError> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut list = Self::new();
        for (i, row) in reader.deserialize::<SuspensionRow>().enumerate() {
            let row = row?;
            let date = parse_date(&row.date)
                .map_err(|source| CalendarError::Date { row: i + 2, source })?;
            list.insert(row.code.trim(), date);
        }
        Ok(list)
    }
}

impl SuspensionSource for SuspensionList {
    fn is_suspended(&self, bar: &DailyBar) -> bool {
        self.days.contains(&(bar.code.clone(), bar.date)) || bar.looks_suspended()
    }
}
