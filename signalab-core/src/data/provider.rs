//! Price series provider traits and structured error types.
//!
//! `PriceSeriesProvider` is what the simulator's callers consume: a validated
//! minute series for a symbol and range. `CandleSource` is the remote side
//! (exchange REST APIs) that a caching provider pulls missing days from.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{Candle, CandleSeries, SeriesError};

/// Structured error types for data operations.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("hard stop: data provider has blocked requests (circuit breaker tripped)")]
    CircuitBreakerTripped,

    #[error("insufficient data for {symbol} between {start} and {end}")]
    InsufficientData {
        symbol: String,
        start: NaiveDateTime,
        end: NaiveDateTime,
    },

    #[error("invalid candle series: {0}")]
    InvalidSeries(#[from] SeriesError),

    #[error("cache error: {0}")]
    CacheError(String),

    #[error("parquet I/O error: {0}")]
    ParquetError(String),

    #[error("data error: {0}")]
    Other(String),
}

impl DataError {
    /// True when retrying later (or from another source) could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NetworkUnreachable(_) | Self::RateLimited { .. } | Self::CircuitBreakerTripped
        )
    }
}

/// Candles fetched from a remote source for one symbol and range.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub symbol: String,
    pub candles: Vec<Candle>,
    pub source: DataSource,
}

/// Where the data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataSource {
    BinanceFutures,
    Cache,
    Memory,
}

/// Provides validated minute candle series.
///
/// `end` is exclusive: the returned series holds candles opening in `[start, end)`.
/// Implementations return [`DataError::InsufficientData`] when nothing is available.
pub trait PriceSeriesProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    fn get_candles(
        &self,
        symbol: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<CandleSeries, DataError>;
}

/// Remote candle source (exchange API). The cache layer sits above this trait.
pub trait CandleSource: Send + Sync {
    fn name(&self) -> &str;

    /// Fetch one-minute candles opening in `[start, end)`, unsorted or sorted.
    fn fetch(
        &self,
        symbol: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<FetchResult, DataError>;

    /// Check if the source is currently available (not rate-limited, not blocked).
    fn is_available(&self) -> bool;
}

impl<P: PriceSeriesProvider + ?Sized> PriceSeriesProvider for std::sync::Arc<P> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn get_candles(
        &self,
        symbol: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<CandleSeries, DataError> {
        (**self).get_candles(symbol, start, end)
    }
}

/// Turn a raw candle batch into a validated series over `[start, end)`.
pub fn series_in_range(
    symbol: &str,
    candles: Vec<Candle>,
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> Result<CandleSeries, DataError> {
    let in_range: Vec<Candle> = candles
        .into_iter()
        .filter(|c| c.timestamp >= start && c.timestamp < end && !c.is_void())
        .collect();
    if in_range.is_empty() {
        return Err(DataError::InsufficientData {
            symbol: symbol.to_string(),
            start,
            end,
        });
    }
    Ok(CandleSeries::from_unsorted(in_range)?)
}
