//! CSV import provider.
//!
//! Reads a directory holding two files:
//! - `stock_meta.csv`: `code,name`
//! - `daily.csv`: `date,code,open,high,low,close,pre_close,volume,amount`
//!
//! Dates may be `YYYYMMDD` or `YYYY-MM-DD`; codes may carry an exchange
//! suffix; an empty `pre_close` means the first listed day. Volume and amount
//! are taken as shares and CNY.

use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::provider::{DataError, DataProvider, ListedStock};
use crate::dates::parse_date;
use crate::domain::{strip_exchange_suffix, DailyBar};

pub const META_FILE: &str = "stock_meta.csv";
pub const DAILY_FILE: &str = "daily.csv";

#[derive(Debug, Deserialize)]
struct MetaRow {
    code: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct DailyRow {
    date: String,
    code: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    pre_close: Option<f64>,
    volume: f64,
    amount: f64,
}

/// In-memory view of a CSV export, loaded once at construction.
pub struct CsvProvider {
    dir: PathBuf,
    stocks: Vec<ListedStock>,
    bars: BTreeMap<String, Vec<DailyBar>>,
}

fn import_err(path: &Path, e: impl std::fmt::Display) -> DataError {
    DataError::Import(format!("{}: {e}", path.display()))
}

impl CsvProvider {
    pub fn open(dir: &Path) -> Result<Self, DataError> {
        let meta_path = dir.join(META_FILE);
        let mut reader = csv::Reader::from_path(&meta_path).map_err(|e| import_err(&meta_path, e))?;
        let mut stocks = Vec::new();
        for row in reader.deserialize::<MetaRow>() {
            let row = row.map_err(|e| import_err(&meta_path, e))?;
            stocks.push(ListedStock {
                code: strip_exchange_suffix(&row.code).to_string(),
                name: row.name.trim().to_string(),
            });
        }
        stocks.sort_by(|a, b| a.code.cmp(&b.code));
        stocks.dedup_by(|a, b| a.code == b.code);

        let daily_path = dir.join(DAILY_FILE);
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(&daily_path)
            .map_err(|e| import_err(&daily_path, e))?;
        let mut bars: BTreeMap<String, Vec<DailyBar>> = BTreeMap::new();
        for (i, row) in reader.deserialize::<DailyRow>().enumerate() {
            let row = row.map_err(|e| import_err(&daily_path, e))?;
            let date = parse_date(&row.date)
                .map_err(|e| import_err(&daily_path, format!("line {}: {e}", i + 2)))?;
            let code = strip_exchange_suffix(&row.code).to_string();
            bars.entry(code.clone()).or_default().push(DailyBar {
                date,
                code,
                open: row.open,
                high: row.high,
                low: row.low,
                close: row.close,
                pre_close: row.pre_close,
                volume: row.volume,
                amount: row.amount,
            });
        }
        for series in bars.values_mut() {
            series.sort_by_key(|b| b.date);
        }

        tracing::info!(
            dir = %dir.display(),
            symbols = stocks.len(),
            bar_symbols = bars.len(),
            "loaded CSV import"
        );
        Ok(Self {
            dir: dir.to_path_buf(),
            stocks,
            bars,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Every imported bar, grouped by code.
    pub fn all_bars(&self) -> impl Iterator<Item = &DailyBar> {
        self.bars.values().flatten()
    }
}

impl DataProvider for CsvProvider {
    fn name(&self) -> &str {
        "csv_import"
    }

    fn stock_list(&self) -> Result<Vec<ListedStock>, DataError> {
        Ok(self.stocks.clone())
    }

    fn daily(
        &self,
        code: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyBar>, DataError> {
        Ok(self
            .bars
            .get(strip_exchange_suffix(code))
            .map(|series| {
                series
                    .iter()
                    .filter(|b| b.date >= start && b.date <= end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn daily_on(&self, date: NaiveDate) -> Result<Vec<DailyBar>, DataError> {
        Ok(self
            .all_bars()
            .filter(|b| b.date == date)
            .cloned()
            .collect())
    }

    fn is_available(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_fixture(dir: &Path) {
        fs::write(
            dir.join(META_FILE),
            "code,name\n600000.SH,浦发银行\n000001,平安银行\n",
        )
        .unwrap();
        fs::write(
            dir.join(DAILY_FILE),
            "date,code,open,high,low,close,pre_close,volume,amount\n\
             20240103,000001,11.0,11.0,11.0,11.0,10.0,1000,11000\n\
             2024-01-02,000001,10.0,10.2,9.8,10.0,,500,5000\n\
             20240102,600000.SH,7.0,7.1,6.9,7.0,7.0,800,5600\n",
        )
        .unwrap();
    }

    #[test]
    fn loads_listing_and_bars() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path());
        let provider = CsvProvider::open(dir.path()).unwrap();

        let stocks = provider.stock_list().unwrap();
        assert_eq!(stocks.len(), 2);
        assert_eq!(stocks[0].code, "000001");

        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        let bars = provider.daily("000001", start, end).unwrap();
        assert_eq!(bars.len(), 2);
        assert!(bars[0].date < bars[1].date);
        assert_eq!(bars[0].pre_close, None);
        assert_eq!(bars[1].pre_close, Some(10.0));
    }

    #[test]
    fn daily_on_collects_all_symbols() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path());
        let provider = CsvProvider::open(dir.path()).unwrap();
        let day = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let bars = provider.daily_on(day).unwrap();
        assert_eq!(bars.len(), 2);
    }

    #[test]
    fn missing_directory_is_import_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = CsvProvider::open(&dir.path().join("nope")).err().unwrap();
        assert!(matches!(err, DataError::Import(_)));
    }
}
