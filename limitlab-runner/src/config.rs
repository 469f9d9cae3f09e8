//! `limitlab.toml` configuration.
//!
//! Every field has a default, so an empty or missing file is a valid config.
//! Unknown keys are rejected.

use chrono::NaiveDate;
use limitlab_core::data::{RateLimitPolicy, TushareConfig};
use limitlab_core::domain::LimitRatios;
use limitlab_core::ClassifyConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable that overrides `[fetch] tushare_token`.
pub const TOKEN_ENV: &str = "LIMITLAB_TUSHARE_TOKEN";

pub const DEFAULT_CONFIG_PATH: &str = "limitlab.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitLabConfig {
    pub database: DatabaseConfig,
    pub limits: LimitsConfig,
    pub fetch: FetchConfig,
    pub compute: ComputeConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    /// Rows dated before this are deleted by `init-db`.
    pub prune_before: Option<NaiveDate>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/stock_limit.db"),
            prune_before: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    /// Absolute CNY slack for "at the limit price".
    pub tolerance: f64,
    pub tick_decimals: u32,
    pub ratios: LimitRatios,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        let classify = ClassifyConfig::default();
        Self {
            tolerance: classify.tolerance,
            tick_decimals: classify.tick_decimals,
            ratios: LimitRatios::default(),
        }
    }
}

impl LimitsConfig {
    pub fn classify_config(&self) -> ClassifyConfig {
        ClassifyConfig {
            tolerance: self.tolerance,
            tick_decimals: self.tick_decimals,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetchConfig {
    pub tushare_url: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub tushare_token: String,
    pub calls_per_minute: usize,
    pub rate_limit: RateLimitPolicy,
    /// Symbols per backfill batch; progress is checkpointed after each batch.
    pub batch_size: usize,
    /// Default start of `fetch backfill`.
    pub history_start: NaiveDate,
    /// Calendar days covered by `fetch mvp`.
    pub recent_days: u32,
    pub max_attempts: u32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        let tushare = TushareConfig::default();
        Self {
            tushare_url: tushare.url,
            tushare_token: String::new(),
            calls_per_minute: tushare.calls_per_minute,
            rate_limit: RateLimitPolicy::Stop,
            batch_size: 100,
            history_start: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or(NaiveDate::MIN),
            recent_days: 90,
            max_attempts: tushare.max_attempts,
        }
    }
}

impl FetchConfig {
    pub fn tushare(&self) -> TushareConfig {
        TushareConfig {
            url: self.tushare_url.clone(),
            token: self.tushare_token.clone(),
            calls_per_minute: self.calls_per_minute,
            rate_limit_policy: self.rate_limit,
            max_attempts: self.max_attempts,
            ..TushareConfig::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ComputeConfig {
    /// Fan symbols out across the rayon pool.
    pub parallel: bool,
    /// CSV of `code,date` suspension days. Without it suspensions are
    /// detected from the bars themselves.
    pub suspension_list: Option<PathBuf>,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            suspension_list: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    pub increments_dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            increments_dir: PathBuf::from("data/increments"),
        }
    }
}

impl LimitLabConfig {
    pub fn from_toml(text: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`. A missing file yields the defaults; the token
    /// environment variable is applied either way.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            Self::from_toml(&text, path)?
        } else {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Self::default()
        };
        if let Ok(token) = std::env::var(TOKEN_ENV) {
            if !token.trim().is_empty() {
                config.fetch.tushare_token = token.trim().to_string();
            }
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let l = &self.limits;
        if !(l.tolerance >= 0.0 && l.tolerance < 0.01) {
            return Err(ConfigError::Invalid(format!(
                "limits.tolerance must be in [0, 0.01), got {}",
                l.tolerance
            )));
        }
        if l.tick_decimals > 4 {
            return Err(ConfigError::Invalid(format!(
                "limits.tick_decimals must be at most 4, got {}",
                l.tick_decimals
            )));
        }
        let r = &l.ratios;
        for (name, ratio) in [("main", r.main), ("gem", r.gem), ("star", r.star), ("bj", r.bj), ("st", r.st)] {
            if !(ratio > 0.0 && ratio < 1.0) {
                return Err(ConfigError::Invalid(format!(
                    "limits.ratios.{name} must be in (0, 1), got {ratio}"
                )));
            }
        }
        if self.fetch.batch_size == 0 {
            return Err(ConfigError::Invalid("fetch.batch_size must be positive".into()));
        }
        if self.fetch.calls_per_minute == 0 {
            return Err(ConfigError::Invalid("fetch.calls_per_minute must be positive".into()));
        }
        Ok(())
    }
}
