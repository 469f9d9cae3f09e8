//! CSV and JSON export of stored results.
//!
//! - **Sample CSV**: notable rows (chain of two or more, or a broken board)
//!   with name and prices, newest first
//! - **Rows CSV**: any query result as a flat table
//! - **Summary JSON**: a day's market-wide counts

use std::path::Path;

use anyhow::{Context, Result};

use crate::query::{DailySummary, LimitRow, QueryApi};
use crate::store::Store;

/// Row cap of the sample export.
pub const SAMPLE_LIMIT: usize = 500;

const HEADER: [&str; 11] = [
    "date",
    "code",
    "name",
    "limit_status",
    "chain_height",
    "is_fried",
    "board_type",
    "close",
    "pre_close",
    "change_pct",
    "limit_up",
];

fn opt(value: Option<f64>, decimals: usize) -> String {
    value.map(|v| format!("{v:.decimals$}")).unwrap_or_default()
}

/// Render rows as CSV. `limit_status` is `1`, `0` or empty for undefined.
pub fn rows_csv(rows: &[LimitRow]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(HEADER)?;

    for r in rows {
        wtr.write_record([
            r.date.to_string(),
            r.code.clone(),
            r.name.clone(),
            r.limit_status
                .as_flag()
                .map(|f| f.to_string())
                .unwrap_or_default(),
            r.chain_height.to_string(),
            u8::from(r.is_fried).to_string(),
            r.board_type.to_string(),
            opt(r.close, 2),
            opt(r.pre_close, 2),
            opt(r.change_pct(), 2),
            r.limit_status.is_up().to_string(),
        ])?;
    }

    let bytes = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(bytes).context("CSV output is not valid UTF-8")
}

/// Write the sample CSV to `path`, returning the number of rows.
pub fn export_sample_csv(store: &Store, path: &Path) -> Result<usize> {
    let rows = QueryApi::new(store.connection())
        .notable_rows(SAMPLE_LIMIT)
        .context("failed to query sample rows")?;
    write_file(path, &rows_csv(&rows)?)?;
    tracing::info!(rows = rows.len(), path = %path.display(), "sample exported");
    Ok(rows.len())
}

pub fn summary_json(summary: &DailySummary) -> Result<String> {
    serde_json::to_string_pretty(summary).context("failed to serialize daily summary")
}

pub(crate) fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::{ComputeEngine, ComputeMode};
    use chrono::NaiveDate;
    use limitlab_core::domain::{DailyBar, LimitRatios, SymbolMeta};

    fn bar(d: u32, pre: f64, o: f64, h: f64, l: f64, c: f64) -> DailyBar {
        DailyBar {
            date: NaiveDate::from_ymd_opt(2024, 9, d).unwrap(),
            code: "600000".into(),
            open: o,
            high: h,
            low: l,
            close: c,
            pre_close: Some(pre),
            volume: 1_000.0,
            amount: 1_000.0 * c,
        }
    }

    fn store() -> Store {
        let mut store = Store::open_in_memory().unwrap();
        store
            .upsert_meta(&[SymbolMeta::derive("600000", "浦发银行", &LimitRatios::default())])
            .unwrap();
        store
            .upsert_bars(&[
                bar(2, 10.0, 10.5, 11.0, 10.4, 11.0),
                bar(3, 11.0, 12.1, 12.1, 12.1, 12.1),
                bar(4, 12.1, 12.5, 13.31, 12.2, 12.6),
                bar(5, 12.6, 12.5, 12.8, 12.4, 12.7),
            ])
            .unwrap();
        ComputeEngine::default()
            .run(&mut store, &ComputeMode::Full)
            .unwrap();
        store
    }

    #[test]
    fn sample_keeps_chains_and_broken_boards() {
        let store = store();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("sample.csv");

        let written = export_sample_csv(&store, &path).unwrap();
        assert_eq!(written, 2);

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], HEADER.join(","));
        // Newest first: the broken board on the 4th, then the 2-chain on the 3rd.
        assert!(lines[1].starts_with("2024-09-04,600000,浦发银行,0,0,1,fried,12.60,12.10,4.13"));
        assert!(lines[2].starts_with("2024-09-03,600000,浦发银行,1,2,0,yizi,12.10,11.00,10.00"));
    }

    #[test]
    fn summary_serializes() {
        let store = store();
        let summary = QueryApi::new(store.connection()).daily_summary(None).unwrap();
        let json = summary_json(&summary).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["date"], "2024-09-05");
        assert_eq!(value["limit_up"], 0);
    }
}
