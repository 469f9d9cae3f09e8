//! Daily increment files: `{dir}/{YYYYMMDD}.json` with one day's bars,
//! results and the metadata of every symbol that traded, for shipping a
//! day's update to another database.
//!
//! Merging upserts the metadata, then the bars. Results are derived, so the
//! receiving side recomputes them; bars that rewrite analysed history land
//! on the recompute queue like any other upsert.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, NaiveDateTime, Utc};
use limitlab_core::dates::{compact, parse_date};
use limitlab_core::domain::{DailyBar, LimitResult, SymbolMeta};
use serde::{Deserialize, Serialize};

use crate::export::write_file;
use crate::store::Store;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncrementStats {
    pub market_rows: usize,
    pub limit_rows: usize,
    pub limit_up_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncrementFile {
    pub date: NaiveDate,
    pub created_at: NaiveDateTime,
    /// Files written before metadata was shipped carry none.
    #[serde(default)]
    pub stock_meta: Vec<SymbolMeta>,
    pub market_data: Vec<DailyBar>,
    pub limit_results: Vec<LimitResult>,
    pub stats: IncrementStats,
}

impl IncrementFile {
    /// Snapshot one date from the store.
    pub fn build(store: &Store, date: NaiveDate) -> Result<Self> {
        let market_data = store.bars_on(date).context("failed to load bars")?;
        let limit_results = store.results_on(date).context("failed to load results")?;
        let metas = store.load_meta().context("failed to load symbol metadata")?;
        let mut stock_meta: Vec<SymbolMeta> = market_data
            .iter()
            .filter_map(|bar| metas.get(&bar.code).cloned())
            .collect();
        stock_meta.sort_by(|a, b| a.code.cmp(&b.code));
        stock_meta.dedup_by(|a, b| a.code == b.code);
        let stats = IncrementStats {
            market_rows: market_data.len(),
            limit_rows: limit_results.len(),
            limit_up_count: limit_results
                .iter()
                .filter(|r| r.limit_status.is_up())
                .count(),
        };
        Ok(Self {
            date,
            created_at: Utc::now().naive_utc(),
            stock_meta,
            market_data,
            limit_results,
            stats,
        })
    }

    pub fn file_name(date: NaiveDate) -> String {
        format!("{}.json", compact(date))
    }

    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(Self::file_name(self.date));
        let json = serde_json::to_string_pretty(self).context("failed to serialize increment")?;
        write_file(&path, &json)?;
        tracing::info!(
            date = %self.date,
            bars = self.stats.market_rows,
            results = self.stats.limit_rows,
            path = %path.display(),
            "increment saved"
        );
        Ok(path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let file: Self = serde_json::from_str(&text)
            .with_context(|| format!("invalid increment file {}", path.display()))?;
        if let Some(bar) = file.market_data.iter().find(|b| b.date != file.date) {
            bail!(
                "increment {} for {} holds a bar dated {}",
                path.display(),
                file.date,
                bar.date
            );
        }
        Ok(file)
    }
}

/// Increment files in `dir`, oldest first. Other files are ignored.
pub fn list(dir: &Path) -> Result<Vec<(NaiveDate, PathBuf)>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if stem.len() != 8 {
            continue;
        }
        if let Ok(date) = parse_date(stem) {
            files.push((date, path));
        }
    }
    files.sort();
    Ok(files)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeReport {
    pub files: usize,
    pub bars: usize,
    /// Symbols whose analysed history was rewritten and queued.
    pub corrections: usize,
}

/// Upsert the metadata and bars of every file into the store, oldest first.
pub fn merge(store: &mut Store, paths: &[PathBuf]) -> Result<MergeReport> {
    let mut loaded = paths
        .iter()
        .map(|p| IncrementFile::load(p))
        .collect::<Result<Vec<_>>>()?;
    loaded.sort_by_key(|f| f.date);

    let mut report = MergeReport::default();
    for file in &loaded {
        store
            .upsert_meta(&file.stock_meta)
            .with_context(|| format!("failed to merge metadata of increment {}", file.date))?;
        let outcome = store
            .upsert_bars(&file.market_data)
            .with_context(|| format!("failed to merge increment {}", file.date))?;
        report.files += 1;
        report.bars += outcome.written;
        report.corrections += outcome.corrections.len();
    }
    tracing::info!(
        files = report.files,
        bars = report.bars,
        corrections = report.corrections,
        "increments merged"
    );
    Ok(report)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IncrementSummary {
    pub files: usize,
    pub first: Option<NaiveDate>,
    pub last: Option<NaiveDate>,
    pub market_rows: usize,
    pub limit_rows: usize,
    pub limit_up_count: usize,
}

pub fn summary(dir: &Path) -> Result<IncrementSummary> {
    let files = list(dir)?;
    let mut summary = IncrementSummary {
        files: files.len(),
        first: files.first().map(|(d, _)| *d),
        last: files.last().map(|(d, _)| *d),
        ..IncrementSummary::default()
    };
    for (_, path) in &files {
        let file = IncrementFile::load(path)?;
        summary.market_rows += file.stats.market_rows;
        summary.limit_rows += file.stats.limit_rows;
        summary.limit_up_count += file.stats.limit_up_count;
    }
    Ok(summary)
}

/// Delete increment files dated before `date`.
pub fn cleanup_before(dir: &Path, date: NaiveDate) -> Result<usize> {
    let mut removed = 0;
    for (file_date, path) in list(dir)? {
        if file_date < date {
            std::fs::remove_file(&path)
                .with_context(|| format!("failed to remove {}", path.display()))?;
            removed += 1;
        }
    }
    if removed > 0 {
        tracing::info!(removed, before = %date, "old increments removed");
    }
    Ok(removed)
}
