//! Tushare Pro data provider.
//!
//! Every Tushare interface is a POST of `{api_name, token, params, fields}`
//! answered by `{code, msg, data: {fields, items}}`, with `items` as
//! positional rows. Quota exhaustion arrives as a non-zero `code`, not an
//! HTTP status, so retry/backoff and the circuit breaker key off both.
//!
//! `daily` reports volume in lots of 100 shares and amount in thousands of
//! CNY; bars are normalised to shares and CNY here.

use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::circuit_breaker::CircuitBreaker;
use super::provider::{DataError, DataProvider, ListedStock};
use super::rate_limit::{RateLimitPolicy, RateLimiter};
use crate::dates::{compact, parse_date};
use crate::domain::{strip_exchange_suffix, to_exchange_code, DailyBar};

const DAILY_FIELDS: &str = "ts_code,trade_date,open,high,low,close,pre_close,vol,amount";
const LISTING_FIELDS: &str = "ts_code,name";

/// Quota exceeded for this interface.
const CODE_RATE_LIMITED: i64 = 40203;
/// Token missing, invalid or expired.
const CODE_BAD_TOKEN: [i64; 2] = [40001, 40101];

#[derive(Debug, Clone)]
pub struct TushareConfig {
    pub url: String,
    pub token: String,
    pub calls_per_minute: usize,
    pub rate_limit_policy: RateLimitPolicy,
    /// Attempts per request, including the first.
    pub max_attempts: u32,
    pub timeout_secs: u64,
}

impl Default for TushareConfig {
    fn default() -> Self {
        Self {
            url: "http://api.tushare.pro".into(),
            token: String::new(),
            calls_per_minute: 195,
            rate_limit_policy: RateLimitPolicy::Stop,
            max_attempts: 2,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TushareResponse {
    code: i64,
    msg: Option<String>,
    data: Option<TushareData>,
}

#[derive(Debug, Deserialize)]
struct TushareData {
    fields: Vec<String>,
    items: Vec<Vec<Value>>,
}

/// Positional rows addressed by field name.
struct Table {
    index: HashMap<String, usize>,
    items: Vec<Vec<Value>>,
}

impl Table {
    fn new(data: TushareData) -> Self {
        let index = data
            .fields
            .into_iter()
            .enumerate()
            .map(|(i, f)| (f, i))
            .collect();
        Self {
            index,
            items: data.items,
        }
    }

    fn column(&self, name: &str) -> Result<usize, DataError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| DataError::ResponseFormatChanged(format!("missing field '{name}'")))
    }
}

fn cell_str(row: &[Value], col: usize) -> Option<&str> {
    row.get(col).and_then(Value::as_str)
}

fn cell_f64(row: &[Value], col: usize) -> Option<f64> {
    row.get(col).and_then(Value::as_f64)
}

fn parse_listing(data: TushareData) -> Result<Vec<ListedStock>, DataError> {
    let table = Table::new(data);
    let code_col = table.column("ts_code")?;
    let name_col = table.column("name")?;
    let mut stocks: Vec<ListedStock> = table
        .items
        .iter()
        .filter_map(|row| {
            let code = cell_str(row, code_col)?;
            Some(ListedStock {
                code: strip_exchange_suffix(code).to_string(),
                name: cell_str(row, name_col).unwrap_or_default().trim().to_string(),
            })
        })
        .collect();
    stocks.sort_by(|a, b| a.code.cmp(&b.code));
    Ok(stocks)
}

fn parse_daily(data: TushareData) -> Result<Vec<DailyBar>, DataError> {
    let table = Table::new(data);
    let code = table.column("ts_code")?;
    let date = table.column("trade_date")?;
    let open = table.column("open")?;
    let high = table.column("high")?;
    let low = table.column("low")?;
    let close = table.column("close")?;
    let pre_close = table.column("pre_close")?;
    let vol = table.column("vol")?;
    let amount = table.column("amount")?;

    let mut bars = Vec::with_capacity(table.items.len());
    for row in &table.items {
        let Some(ts_code) = cell_str(row, code) else {
            continue;
        };
        let raw_date = cell_str(row, date).unwrap_or_default();
        let day = parse_date(raw_date)
            .map_err(|e| DataError::ResponseFormatChanged(format!("{ts_code}: {e}")))?;
        let prices = (
            cell_f64(row, open),
            cell_f64(row, high),
            cell_f64(row, low),
            cell_f64(row, close),
        );
        let (Some(o), Some(h), Some(l), Some(c)) = prices else {
            tracing::debug!(ts_code, date = raw_date, "row without prices skipped");
            continue;
        };
        bars.push(DailyBar {
            date: day,
            code: strip_exchange_suffix(ts_code).to_string(),
            open: o,
            high: h,
            low: l,
            close: c,
            pre_close: cell_f64(row, pre_close),
            volume: cell_f64(row, vol).unwrap_or(0.0) * 100.0,
            amount: cell_f64(row, amount).unwrap_or(0.0) * 1000.0,
        });
    }
    bars.sort_by(|a, b| (&a.code, a.date).cmp(&(&b.code, b.date)));
    Ok(bars)
}

pub struct TushareProvider {
    client: reqwest::blocking::Client,
    config: TushareConfig,
    limiter: RateLimiter,
    circuit_breaker: Arc<CircuitBreaker>,
    base_delay: Duration,
}

impl TushareProvider {
    pub fn new(config: TushareConfig, circuit_breaker: Arc<CircuitBreaker>) -> Result<Self, DataError> {
        if config.token.trim().is_empty() {
            return Err(DataError::AuthenticationRequired(
                "no Tushare token configured".into(),
            ));
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| DataError::Other(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            limiter: RateLimiter::per_minute(config.calls_per_minute, config.rate_limit_policy),
            config,
            circuit_breaker,
            base_delay: Duration::from_millis(500),
        })
    }

    /// One API call with budget, retry and circuit breaker logic.
    fn call(&self, api_name: &str, params: Value, fields: &str) -> Result<TushareData, DataError> {
        let body = json!({
            "api_name": api_name,
            "token": self.config.token,
            "params": params,
            "fields": fields,
        });
        let mut last_error = None;

        for attempt in 0..self.config.max_attempts.max(1) {
            if attempt > 0 {
                std::thread::sleep(self.base_delay * 2u32.pow(attempt - 1));
            }
            if !self.circuit_breaker.is_allowed() {
                return Err(DataError::CircuitBreakerTripped);
            }
            if let Err(wait) = self.limiter.acquire() {
                return Err(DataError::RateLimited {
                    retry_after_secs: wait.as_secs().max(1),
                });
            }

            let resp = match self.client.post(&self.config.url).json(&body).send() {
                Ok(resp) => resp,
                Err(e) if e.is_connect() || e.is_timeout() => {
                    self.circuit_breaker.record_failure();
                    last_error = Some(DataError::NetworkUnreachable(e.to_string()));
                    continue;
                }
                Err(e) => return Err(DataError::NetworkUnreachable(e.to_string())),
            };

            let status = resp.status();
            if status == reqwest::StatusCode::FORBIDDEN {
                self.circuit_breaker.trip();
                return Err(DataError::CircuitBreakerTripped);
            }
            if !status.is_success() {
                self.circuit_breaker.record_failure();
                last_error = Some(DataError::Other(format!("HTTP {status} from {api_name}")));
                continue;
            }

            let parsed: TushareResponse = resp.json().map_err(|e| {
                DataError::ResponseFormatChanged(format!("{api_name} response: {e}"))
            })?;
            match parsed.code {
                0 => {
                    self.circuit_breaker.record_success();
                    return parsed.data.ok_or_else(|| {
                        DataError::ResponseFormatChanged(format!("{api_name}: no data"))
                    });
                }
                CODE_RATE_LIMITED => {
                    self.circuit_breaker.record_failure();
                    return Err(DataError::RateLimited {
                        retry_after_secs: 60,
                    });
                }
                code if CODE_BAD_TOKEN.contains(&code) => {
                    self.circuit_breaker.trip();
                    return Err(DataError::AuthenticationRequired(
                        parsed.msg.unwrap_or_else(|| "token rejected".into()),
                    ));
                }
                code => {
                    return Err(DataError::Api {
                        code,
                        msg: parsed.msg.unwrap_or_default(),
                    })
                }
            }
        }

        Err(last_error.unwrap_or_else(|| DataError::Other("max retries exceeded".into())))
    }
}

impl DataProvider for TushareProvider {
    fn name(&self) -> &str {
        "tushare"
    }

    fn stock_list(&self) -> Result<Vec<ListedStock>, DataError> {
        let data = self.call(
            "stock_basic",
            json!({"exchange": "", "list_status": "L"}),
            LISTING_FIELDS,
        )?;
        parse_listing(data)
    }

    fn daily(
        &self,
        code: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyBar>, DataError> {
        let data = self.call(
            "daily",
            json!({
                "ts_code": to_exchange_code(code),
                "start_date": compact(start),
                "end_date": compact(end),
            }),
            DAILY_FIELDS,
        )?;
        parse_daily(data)
    }

    fn daily_on(&self, date: NaiveDate) -> Result<Vec<DailyBar>, DataError> {
        let data = self.call("daily", json!({"trade_date": compact(date)}), DAILY_FIELDS)?;
        parse_daily(data)
    }

    fn is_available(&self) -> bool {
        self.circuit_breaker.is_allowed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(json: &str) -> TushareData {
        let resp: TushareResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.code, 0);
        resp.data.unwrap()
    }

    #[test]
    fn daily_rows_are_normalised_and_sorted() {
        let d = data(
            r#"{"code":0,"msg":"","data":{
                "fields":["ts_code","trade_date","open","high","low","close","pre_close","vol","amount"],
                "items":[
                    ["000001.SZ","20240103",11.0,11.0,11.0,11.0,10.0,1234.5,5678.0],
                    ["000001.SZ","20240102",10.0,10.1,9.9,10.0,null,10.0,20.0]
                ]}}"#,
        );
        let bars = parse_daily(d).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].date, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(bars[0].pre_close, None);
        assert_eq!(bars[1].code, "000001");
        assert_eq!(bars[1].volume, 123_450.0);
        assert_eq!(bars[1].amount, 5_678_000.0);
    }

    #[test]
    fn field_order_does_not_matter() {
        let d = data(
            r#"{"code":0,"msg":null,"data":{
                "fields":["trade_date","ts_code","close","open","high","low","pre_close","amount","vol"],
                "items":[["20240105","600000.SH",7.2,7.0,7.3,6.9,7.1,100.0,10.0]]}}"#,
        );
        let bars = parse_daily(d).unwrap();
        assert_eq!(bars[0].close, 7.2);
        assert_eq!(bars[0].open, 7.0);
        assert_eq!(bars[0].volume, 1000.0);
    }

    #[test]
    fn missing_column_is_format_change() {
        let d = data(r#"{"code":0,"data":{"fields":["ts_code"],"items":[]}}"#);
        assert!(matches!(
            parse_daily(d),
            Err(DataError::ResponseFormatChanged(_))
        ));
    }

    #[test]
    fn listing_strips_suffix() {
        let d = data(
            r#"{"code":0,"data":{"fields":["ts_code","name"],
                "items":[["600000.SH","浦发银行"],["000001.SZ","平安银行"]]}}"#,
        );
        let stocks = parse_listing(d).unwrap();
        assert_eq!(stocks[0].code, "000001");
        assert_eq!(stocks[1].name, "浦发银行");
    }

    #[test]
    fn missing_token_is_rejected() {
        let err = TushareProvider::new(
            TushareConfig::default(),
            Arc::new(CircuitBreaker::default_provider()),
        )
        .err()
        .unwrap();
        assert!(matches!(err, DataError::AuthenticationRequired(_)));
    }
}
