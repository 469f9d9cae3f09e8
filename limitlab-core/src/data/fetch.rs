//! Multi-symbol fetch loop with progress reporting.

use chrono::NaiveDate;

use super::provider::{DataError, DataProvider, FetchProgress};
use crate::domain::DailyBar;

/// Outcome of fetching a batch of symbols.
#[derive(Debug, Default)]
pub struct FetchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub bars: Vec<DailyBar>,
    pub errors: Vec<(String, DataError)>,
    /// Set when the provider refused further calls; the remaining codes were
    /// not attempted and are listed in `errors`.
    pub halted_by: Option<DataError>,
}

impl FetchSummary {
    pub fn failed(&self) -> usize {
        self.errors.len()
    }

    pub fn all_succeeded(&self) -> bool {
        self.errors.is_empty() && self.halted_by.is_none()
    }
}

/// Fetch `codes` one at a time over `[start, end]`.
///
/// Per-symbol failures are collected and the loop continues. A rate limit
/// or a tripped circuit breaker stops the loop, since every later call would
/// fail the same way.
pub fn fetch_symbols(
    provider: &dyn DataProvider,
    codes: &[String],
    start: NaiveDate,
    end: NaiveDate,
    progress: &dyn FetchProgress,
) -> FetchSummary {
    let total = codes.len();
    let mut summary = FetchSummary {
        total,
        ..Default::default()
    };

    for (i, code) in codes.iter().enumerate() {
        progress.on_start(code, i, total);
        let result = provider.daily(code, start, end);
        let report = result.as_ref().map(Vec::len).map_err(clone_for_report);
        progress.on_complete(code, i, total, &report);

        match result {
            Ok(bars) => {
                summary.succeeded += 1;
                summary.bars.extend(bars);
            }
            Err(e @ (DataError::RateLimited { .. } | DataError::CircuitBreakerTripped)) => {
                for rest in &codes[i..] {
                    summary
                        .errors
                        .push((rest.clone(), DataError::Other("not attempted".into())));
                }
                summary.halted_by = Some(e);
                break;
            }
            Err(e) => summary.errors.push((code.clone(), e)),
        }

        if !provider.is_available() {
            for rest in &codes[(i + 1)..] {
                summary.errors.push((rest.clone(), DataError::CircuitBreakerTripped));
            }
            summary.halted_by = Some(DataError::CircuitBreakerTripped);
            break;
        }
    }

    progress.on_batch_complete(summary.succeeded, summary.failed(), total);
    summary
}

// DataError holds non-Clone sources in general; progress only needs the message.
fn clone_for_report(e: &DataError) -> DataError {
    match e {
        DataError::RateLimited { retry_after_secs } => DataError::RateLimited {
            retry_after_secs: *retry_after_secs,
        },
        DataError::CircuitBreakerTripped => DataError::CircuitBreakerTripped,
        other => DataError::Other(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::provider::{ListedStock, SilentProgress};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails `000002`, rate-limits from the fourth call on.
    struct Flaky {
        calls: AtomicUsize,
    }

    impl DataProvider for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        fn stock_list(&self) -> Result<Vec<ListedStock>, DataError> {
            Ok(Vec::new())
        }

        fn daily(&self, code: &str, start: NaiveDate, _end: NaiveDate) -> Result<Vec<DailyBar>, DataError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n >= 3 {
                return Err(DataError::RateLimited { retry_after_secs: 60 });
            }
            if code == "000002" {
                return Err(DataError::Api {
                    code: 2002,
                    msg: "no permission".into(),
                });
            }
            Ok(vec![DailyBar {
                date: start,
                code: code.into(),
                open: 10.0,
                high: 10.0,
                low: 10.0,
                close: 10.0,
                pre_close: None,
                volume: 1.0,
                amount: 10.0,
            }])
        }

        fn daily_on(&self, _date: NaiveDate) -> Result<Vec<DailyBar>, DataError> {
            Ok(Vec::new())
        }

        fn is_available(&self) -> bool {
            true
        }
    }

    #[test]
    fn collects_failures_and_halts_on_rate_limit() {
        let provider = Flaky {
            calls: AtomicUsize::new(0),
        };
        let codes: Vec<String> = ["000001", "000002", "000003", "000004", "000005"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let day = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let summary = fetch_symbols(&provider, &codes, day, day, &SilentProgress);

        assert_eq!(summary.total, 5);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.bars.len(), 2);
        assert!(matches!(summary.halted_by, Some(DataError::RateLimited { .. })));
        // 000002 failed, 000004 and 000005 never completed.
        assert_eq!(summary.failed(), 3);
        assert!(!summary.all_succeeded());
    }
}
