//! Candle: one minute of market data, and the validated series built from them.

use chrono::{Duration, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One-minute OHLCV candle for a single symbol.
///
/// `timestamp` is the candle open time in UTC, aligned to the minute.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Returns true if any OHLC field is NaN.
    pub fn is_void(&self) -> bool {
        self.open.is_nan() || self.high.is_nan() || self.low.is_nan() || self.close.is_nan()
    }

    /// Basic OHLC sanity check: positive prices, high/low envelope the open and close.
    pub fn is_sane(&self) -> bool {
        if self.is_void() {
            return false;
        }
        self.high >= self.low
            && self.high >= self.open
            && self.high >= self.close
            && self.low <= self.open
            && self.low <= self.close
            && self.low > 0.0
    }

    /// Close above open.
    pub fn is_bullish(&self) -> bool {
        self.close >= self.open
    }

    /// Time at which this candle is complete (open time + 1 minute).
    pub fn end_time(&self) -> NaiveDateTime {
        self.timestamp + Duration::minutes(1)
    }
}

/// Violations of the candle sequence invariants.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SeriesError {
    #[error("candle at {timestamp} is not minute-aligned")]
    NotMinuteAligned { timestamp: NaiveDateTime },

    #[error("candle at {timestamp} has invalid prices (o={open} h={high} l={low} c={close})")]
    InvalidPrices {
        timestamp: NaiveDateTime,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
    },

    #[error("duplicate candle timestamp {timestamp}")]
    Duplicate { timestamp: NaiveDateTime },

    #[error("candle at {timestamp} is out of order (previous {previous})")]
    OutOfOrder {
        timestamp: NaiveDateTime,
        previous: NaiveDateTime,
    },
}

/// A gap between two consecutive candles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gap {
    /// Open time of the last candle before the gap.
    pub after: NaiveDateTime,
    /// Number of missing minutes.
    pub missing_minutes: i64,
}

/// Ordered, validated sequence of minute candles.
///
/// Invariants: strictly increasing timestamps, every candle minute-aligned and sane.
/// Missing minutes are allowed and reported by [`CandleSeries::gaps`]; they are never
/// filled in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandleSeries {
    candles: Vec<Candle>,
}

impl CandleSeries {
    /// Validate and wrap a candle vector that is already in chronological order.
    pub fn new(candles: Vec<Candle>) -> Result<Self, SeriesError> {
        let mut previous: Option<NaiveDateTime> = None;
        for c in &candles {
            if c.timestamp.second() != 0 || c.timestamp.nanosecond() != 0 {
                return Err(SeriesError::NotMinuteAligned {
                    timestamp: c.timestamp,
                });
            }
            if !c.is_sane() {
                return Err(SeriesError::InvalidPrices {
                    timestamp: c.timestamp,
                    open: c.open,
                    high: c.high,
                    low: c.low,
                    close: c.close,
                });
            }
            if let Some(prev) = previous {
                if c.timestamp == prev {
                    return Err(SeriesError::Duplicate {
                        timestamp: c.timestamp,
                    });
                }
                if c.timestamp < prev {
                    return Err(SeriesError::OutOfOrder {
                        timestamp: c.timestamp,
                        previous: prev,
                    });
                }
            }
            previous = Some(c.timestamp);
        }
        Ok(Self { candles })
    }

    /// Sort by timestamp, drop exact duplicates (first occurrence wins), then validate.
    ///
    /// Used for provider output, where paging can overlap by a candle.
    pub fn from_unsorted(mut candles: Vec<Candle>) -> Result<Self, SeriesError> {
        candles.sort_by_key(|c| c.timestamp);
        candles.dedup_by_key(|c| c.timestamp);
        Self::new(candles)
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn first(&self) -> Option<&Candle> {
        self.candles.first()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    /// Index of the first candle opening at or after `t`.
    pub fn index_at_or_after(&self, t: NaiveDateTime) -> usize {
        self.candles.partition_point(|c| c.timestamp < t)
    }

    /// Candles with `start <= timestamp < end`.
    pub fn range(&self, start: NaiveDateTime, end: NaiveDateTime) -> &[Candle] {
        let lo = self.index_at_or_after(start);
        let hi = self.index_at_or_after(end);
        &self.candles[lo..hi.max(lo)]
    }

    /// Copy of the candles with `start <= timestamp < end`.
    pub fn slice(&self, start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self {
            candles: self.range(start, end).to_vec(),
        }
    }

    /// Whether the series has data from at or before `start` through `end`.
    ///
    /// A candle covers the minute following its open time, so the last candle
    /// only needs to open one minute before `end`.
    pub fn covers(&self, start: NaiveDateTime, end: NaiveDateTime) -> bool {
        match (self.first(), self.last()) {
            (Some(first), Some(last)) => first.timestamp <= start && last.end_time() >= end,
            _ => false,
        }
    }

    /// Every run of missing minutes between consecutive candles.
    pub fn gaps(&self) -> Vec<Gap> {
        self.candles
            .windows(2)
            .filter_map(|w| {
                let missing = (w[1].timestamp - w[0].timestamp).num_minutes() - 1;
                (missing > 0).then_some(Gap {
                    after: w[0].timestamp,
                    missing_minutes: missing,
                })
            })
            .collect()
    }
}
