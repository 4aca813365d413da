//! Binance USDⓈ-M futures klines source.
//!
//! Fetches one-minute candles from `GET /fapi/v1/klines`, paging 1500 klines at a
//! time. Handles rate limiting, retries with exponential backoff, response parsing,
//! and the circuit breaker.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime};
use serde::de::IgnoredAny;
use serde::Deserialize;
use tracing::{debug, warn};

use super::circuit_breaker::CircuitBreaker;
use super::provider::{CandleSource, DataError, DataSource, FetchResult};
use crate::domain::Candle;

pub const BINANCE_FUTURES_BASE_URL: &str = "https://fapi.binance.com";

/// Exchange-side page limit for `/fapi/v1/klines`.
pub const MAX_KLINES_PER_REQUEST: usize = 1500;

/// One kline row: `[open_time, open, high, low, close, volume, close_time,
/// quote_volume, trades, taker_buy_base, taker_buy_quote, ignore]`.
#[derive(Debug, Deserialize)]
struct Kline(
    i64,
    String,
    String,
    String,
    String,
    String,
    IgnoredAny,
    IgnoredAny,
    IgnoredAny,
    IgnoredAny,
    IgnoredAny,
    IgnoredAny,
);

/// Error body, e.g. `{"code":-1121,"msg":"Invalid symbol."}`.
#[derive(Debug, Deserialize)]
struct ApiError {
    code: i64,
    msg: String,
}

const INVALID_SYMBOL: i64 = -1121;

/// Binance futures candle source.
pub struct BinanceProvider {
    client: reqwest::blocking::Client,
    circuit_breaker: Arc<CircuitBreaker>,
    base_url: String,
    max_retries: u32,
    base_delay: Duration,
    /// Pause between consecutive pages of one fetch.
    page_pacing: Duration,
}

impl BinanceProvider {
    pub fn new(circuit_breaker: Arc<CircuitBreaker>) -> Result<Self, DataError> {
        Self::with_base_url(circuit_breaker, BINANCE_FUTURES_BASE_URL)
    }

    pub fn with_base_url(
        circuit_breaker: Arc<CircuitBreaker>,
        base_url: &str,
    ) -> Result<Self, DataError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("signalab/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DataError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            circuit_breaker,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            page_pacing: Duration::from_millis(100),
        })
    }

    fn klines_url(&self) -> String {
        format!("{}/fapi/v1/klines", self.base_url)
    }

    /// Parse kline rows into candles. Rows with unparseable prices are dropped.
    fn parse_klines(symbol: &str, rows: Vec<Kline>) -> Result<Vec<Candle>, DataError> {
        let mut candles = Vec::with_capacity(rows.len());
        for Kline(open_ms, open, high, low, close, volume, ..) in rows {
            let timestamp = DateTime::from_timestamp_millis(open_ms)
                .map(|dt| dt.naive_utc())
                .ok_or_else(|| {
                    DataError::ResponseFormatChanged(format!("invalid open time: {open_ms}"))
                })?;
            let parsed = (
                open.parse::<f64>(),
                high.parse::<f64>(),
                low.parse::<f64>(),
                close.parse::<f64>(),
                volume.parse::<f64>(),
            );
            match parsed {
                (Ok(open), Ok(high), Ok(low), Ok(close), Ok(volume)) => candles.push(Candle {
                    timestamp,
                    open,
                    high,
                    low,
                    close,
                    volume,
                }),
                _ => warn!(symbol, %timestamp, "dropping kline with unparseable prices"),
            }
        }
        Ok(candles)
    }

    /// One page request with retry and circuit breaker logic.
    fn fetch_page(
        &self,
        symbol: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Kline>, DataError> {
        if !self.circuit_breaker.is_allowed() {
            return Err(DataError::CircuitBreakerTripped);
        }

        let limit = MAX_KLINES_PER_REQUEST.to_string();
        let start = start_ms.to_string();
        let end = end_ms.to_string();
        let query = [
            ("symbol", symbol),
            ("interval", "1m"),
            ("startTime", start.as_str()),
            ("endTime", end.as_str()),
            ("limit", limit.as_str()),
        ];
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.base_delay * 2u32.pow(attempt - 1);
                std::thread::sleep(delay);
            }

            if !self.circuit_breaker.is_allowed() {
                return Err(DataError::CircuitBreakerTripped);
            }

            match self.client.get(self.klines_url()).query(&query).send() {
                Ok(resp) => {
                    let status = resp.status();

                    if status == reqwest::StatusCode::FORBIDDEN || status.as_u16() == 418 {
                        self.circuit_breaker.trip();
                        return Err(DataError::CircuitBreakerTripped);
                    }

                    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                        self.circuit_breaker.record_failure();
                        let retry_after = resp
                            .headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse::<u64>().ok())
                            .unwrap_or(60);
                        warn!(symbol, attempt, retry_after, "rate limited by exchange");
                        last_error = Some(DataError::RateLimited {
                            retry_after_secs: retry_after,
                        });
                        continue;
                    }

                    if status.is_client_error() {
                        let body: Option<ApiError> = resp.json().ok();
                        return Err(match body {
                            Some(err) if err.code == INVALID_SYMBOL => DataError::SymbolNotFound {
                                symbol: symbol.to_string(),
                            },
                            Some(err) => DataError::Other(format!(
                                "HTTP {status} for {symbol}: {} ({})",
                                err.msg, err.code
                            )),
                            None => DataError::Other(format!("HTTP {status} for {symbol}")),
                        });
                    }

                    if !status.is_success() {
                        self.circuit_breaker.record_failure();
                        last_error = Some(DataError::Other(format!("HTTP {status} for {symbol}")));
                        continue;
                    }

                    let rows: Vec<Kline> = resp.json().map_err(|e| {
                        DataError::ResponseFormatChanged(format!(
                            "failed to parse klines for {symbol}: {e}"
                        ))
                    })?;
                    self.circuit_breaker.record_success();
                    return Ok(rows);
                }
                Err(e) => {
                    if e.is_connect() || e.is_timeout() {
                        last_error = Some(DataError::NetworkUnreachable(e.to_string()));
                        continue;
                    }
                    return Err(DataError::NetworkUnreachable(e.to_string()));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| DataError::Other("max retries exceeded".into())))
    }
}

impl CandleSource for BinanceProvider {
    fn name(&self) -> &str {
        "binance_futures"
    }

    fn fetch(
        &self,
        symbol: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<FetchResult, DataError> {
        let end_ms = end.and_utc().timestamp_millis();
        let mut cursor = start.and_utc().timestamp_millis();
        let mut candles = Vec::new();
        let mut pages = 0usize;

        while cursor < end_ms {
            if pages > 0 {
                std::thread::sleep(self.page_pacing);
            }
            // endTime is inclusive on the exchange side.
            let rows = self.fetch_page(symbol, cursor, end_ms - 1)?;
            pages += 1;
            let Some(last_open) = rows.last().map(|k| k.0) else {
                break;
            };
            let full_page = rows.len() >= MAX_KLINES_PER_REQUEST;
            candles.extend(Self::parse_klines(symbol, rows)?);
            if !full_page {
                break;
            }
            cursor = last_open + 1;
        }

        debug!(symbol, pages, candles = candles.len(), "fetched klines");
        Ok(FetchResult {
            symbol: symbol.to_string(),
            candles,
            source: DataSource::BinanceFutures,
        })
    }

    fn is_available(&self) -> bool {
        self.circuit_breaker.is_allowed()
    }
}
