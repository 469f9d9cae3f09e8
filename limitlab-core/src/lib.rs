//! LimitLab Core — domain types, limit-up classifier, chain accumulator and
//! market data providers.
//!
//! This crate holds everything that does not touch the database:
//! - Domain types (daily bars, symbol metadata, limit results)
//! - The per-bar classifier and the chain height fold
//! - Per-symbol analysis combining both
//! - Suspension sources and result fingerprints
//! - Data providers (Tushare, CSV import, synthetic)

pub mod analyze;
pub mod calendar;
pub mod chain;
pub mod classify;
pub mod data;
pub mod dates;
pub mod domain;
pub mod fingerprint;

pub use analyze::{analyze_symbol, RowIssue, SymbolAnalysis, SymbolError};
pub use calendar::{SuspensionList, SuspensionSource, ZeroVolumeHeuristic};
pub use chain::{accumulate, accumulate_from, ChainState};
pub use classify::{Classification, Classifier, ClassifyConfig};
pub use fingerprint::ResultFingerprint;
