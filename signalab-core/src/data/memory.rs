//! In-memory candle store, usable as a price provider or as a remote source in tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use chrono::NaiveDateTime;

use super::provider::{
    series_in_range, CandleSource, DataError, DataSource, FetchResult, PriceSeriesProvider,
};
use crate::domain::{Candle, CandleSeries};

#[derive(Debug, Default)]
pub struct MemoryProvider {
    candles: RwLock<HashMap<String, Vec<Candle>>>,
    fetches: AtomicUsize,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add candles for `symbol`, keeping them sorted by open time.
    pub fn insert(&self, symbol: &str, candles: impl IntoIterator<Item = Candle>) {
        let mut map = self.candles.write().unwrap();
        let entry = map.entry(symbol.to_string()).or_default();
        entry.extend(candles);
        entry.sort_by_key(|c| c.timestamp);
        entry.dedup_by_key(|c| c.timestamp);
    }

    pub fn with_symbol(self, symbol: &str, candles: impl IntoIterator<Item = Candle>) -> Self {
        self.insert(symbol, candles);
        self
    }

    /// Number of range requests served so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }

    fn range(&self, symbol: &str, start: NaiveDateTime, end: NaiveDateTime) -> Option<Vec<Candle>> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        let map = self.candles.read().unwrap();
        let candles = map.get(symbol)?;
        let from = candles.partition_point(|c| c.timestamp < start);
        let to = candles.partition_point(|c| c.timestamp < end);
        Some(candles[from..to].to_vec())
    }
}

impl PriceSeriesProvider for MemoryProvider {
    fn name(&self) -> &str {
        "memory"
    }

    fn get_candles(
        &self,
        symbol: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<CandleSeries, DataError> {
        let candles = self.range(symbol, start, end).unwrap_or_default();
        series_in_range(symbol, candles, start, end)
    }
}

impl CandleSource for MemoryProvider {
    fn name(&self) -> &str {
        "memory"
    }

    fn fetch(
        &self,
        symbol: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<FetchResult, DataError> {
        let candles = self
            .range(symbol, start, end)
            .ok_or_else(|| DataError::SymbolNotFound {
                symbol: symbol.to_string(),
            })?;
        Ok(FetchResult {
            symbol: symbol.to_string(),
            candles,
            source: DataSource::Memory,
        })
    }

    fn is_available(&self) -> bool {
        true
    }
}
