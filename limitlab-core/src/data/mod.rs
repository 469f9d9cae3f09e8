//! Market data sources and fetch plumbing.

pub mod circuit_breaker;
pub mod csv_import;
pub mod fetch;
pub mod provider;
pub mod rate_limit;
pub mod synthetic;
pub mod tushare;

pub use circuit_breaker::CircuitBreaker;
pub use csv_import::CsvProvider;
pub use fetch::{fetch_symbols, FetchSummary};
pub use provider::{
    DataError, DataProvider, FetchProgress, ListedStock, SilentProgress, TracingProgress,
};
pub use rate_limit::{RateLimitPolicy, RateLimiter};
pub use synthetic::{SyntheticConfig, SyntheticProvider};
pub use tushare::{TushareConfig, TushareProvider};
