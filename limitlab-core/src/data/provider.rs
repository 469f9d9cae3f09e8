//! Data provider trait and structured error types.
//!
//! The DataProvider trait abstracts over market data sources (Tushare, CSV
//! import, synthetic) so the pipelines can swap implementations and tests can
//! run offline.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::DailyBar;

/// One row of the exchange listing: code and display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListedStock {
    pub code: String,
    pub name: String,
}

/// Structured error types for data operations.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("provider error {code}: {msg}")]
    Api { code: i64, msg: String },

    #[error("hard stop: data provider has blocked requests (circuit breaker tripped)")]
    CircuitBreakerTripped,

    #[error("import error: {0}")]
    Import(String),

    #[error("data error: {0}")]
    Other(String),
}

impl DataError {
    /// Whether a later attempt might succeed without operator action.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DataError::NetworkUnreachable(_)
                | DataError::RateLimited { .. }
                | DataError::CircuitBreakerTripped
        )
    }
}

/// Trait for market data providers.
///
/// Bars are returned in shares and CNY regardless of the provider's native
/// units, sorted by `(code, date)`.
pub trait DataProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Currently listed A-share symbols.
    fn stock_list(&self) -> Result<Vec<ListedStock>, DataError>;

    /// Daily bars for one symbol over an inclusive date range.
    fn daily(
        &self,
        code: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyBar>, DataError>;

    /// Every symbol's bar for one trading date.
    fn daily_on(&self, date: NaiveDate) -> Result<Vec<DailyBar>, DataError>;

    /// Check if the provider is currently available (not rate-limited, not blocked).
    fn is_available(&self) -> bool;
}

/// Progress callback for multi-symbol fetches.
pub trait FetchProgress: Send + Sync {
    fn on_start(&self, code: &str, index: usize, total: usize);

    fn on_complete(&self, code: &str, index: usize, total: usize, result: &Result<usize, DataError>);

    fn on_batch_complete(&self, succeeded: usize, failed: usize, total: usize);
}

/// Reports fetch progress through `tracing`.
pub struct TracingProgress {
    /// Log every n-th symbol at info; the rest go to debug.
    pub every: usize,
}

impl Default for TracingProgress {
    fn default() -> Self {
        Self { every: 100 }
    }
}

impl FetchProgress for TracingProgress {
    fn on_start(&self, code: &str, index: usize, total: usize) {
        tracing::debug!(code, "[{}/{}] fetching", index + 1, total);
    }

    fn on_complete(&self, code: &str, index: usize, total: usize, result: &Result<usize, DataError>) {
        match result {
            Ok(rows) => {
                if self.every > 0 && (index + 1) % self.every == 0 {
                    tracing::info!("[{}/{}] fetched {code} ({rows} rows)", index + 1, total);
                } else {
                    tracing::debug!(code, rows, "fetched");
                }
            }
            Err(e) => tracing::warn!(code, error = %e, "fetch failed"),
        }
    }

    fn on_batch_complete(&self, succeeded: usize, failed: usize, total: usize) {
        tracing::info!("fetch complete: {succeeded}/{total} succeeded, {failed} failed");
    }
}

/// Progress sink that discards everything.
pub struct SilentProgress;

impl FetchProgress for SilentProgress {
    fn on_start(&self, _code: &str, _index: usize, _total: usize) {}

    fn on_complete(&self, _code: &str, _index: usize, _total: usize, _result: &Result<usize, DataError>) {}

    fn on_batch_complete(&self, _succeeded: usize, _failed: usize, _total: usize) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors() {
        assert!(DataError::RateLimited { retry_after_secs: 60 }.is_transient());
        assert!(DataError::CircuitBreakerTripped.is_transient());
        assert!(!DataError::AuthenticationRequired("no token".into()).is_transient());
        assert!(!DataError::Api {
            code: 2002,
            msg: "no permission".into()
        }
        .is_transient());
    }
}
