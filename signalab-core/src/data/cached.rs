//! Cache-first price provider.
//!
//! Serves whole UTC days from the [`CandleCache`], pulls missing days from an optional
//! remote [`CandleSource`], writes back the days that are complete, then slices the
//! result to the requested range. Without a source it runs offline.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::cache::{is_complete_day, CandleCache, WriteOutcome};
use super::provider::{series_in_range, CandleSource, DataError, PriceSeriesProvider};
use crate::domain::{Candle, CandleSeries};

/// Where the days of one request came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayTally {
    pub from_cache: usize,
    pub fetched: usize,
    pub written: usize,
    /// Days neither cached nor fetchable (offline, or the source returned nothing).
    pub missing: usize,
}

impl DayTally {
    pub fn merge(&mut self, other: DayTally) {
        self.from_cache += other.from_cache;
        self.fetched += other.fetched;
        self.written += other.written;
        self.missing += other.missing;
    }
}

pub struct CachedPriceProvider {
    cache: CandleCache,
    source: Option<Arc<dyn CandleSource>>,
    /// Fixed "now" for tests; wall clock otherwise.
    now: Option<NaiveDateTime>,
}

impl CachedPriceProvider {
    pub fn new(cache: CandleCache, source: Arc<dyn CandleSource>) -> Self {
        Self {
            cache,
            source: Some(source),
            now: None,
        }
    }

    /// Serve from the cache only.
    pub fn offline(cache: CandleCache) -> Self {
        Self {
            cache,
            source: None,
            now: None,
        }
    }

    pub fn with_now(mut self, now: NaiveDateTime) -> Self {
        self.now = Some(now);
        self
    }

    pub fn cache(&self) -> &CandleCache {
        &self.cache
    }

    fn now(&self) -> NaiveDateTime {
        self.now.unwrap_or_else(|| Utc::now().naive_utc())
    }

    /// Make sure every day touched by `[start, end)` is cached, fetching as needed.
    pub fn prefetch(
        &self,
        symbol: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<DayTally, DataError> {
        self.collect(symbol, start, end).map(|(_, tally)| tally)
    }

    fn collect(
        &self,
        symbol: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<(Vec<Candle>, DayTally), DataError> {
        let mut tally = DayTally::default();
        let mut candles = Vec::new();
        let mut missing = Vec::new();

        for day in days_touched(start, end) {
            match self.cache.load_day(symbol, day)? {
                Some(cached) => {
                    tally.from_cache += 1;
                    candles.extend(cached);
                }
                None => missing.push(day),
            }
        }

        match &self.source {
            Some(source) if !missing.is_empty() => {
                for run in contiguous_runs(&missing) {
                    let fetched = self.fetch_run(source.as_ref(), symbol, &run, &mut tally)?;
                    candles.extend(fetched);
                }
            }
            _ => tally.missing += missing.len(),
        }

        debug!(
            symbol,
            from_cache = tally.from_cache,
            fetched = tally.fetched,
            missing = tally.missing,
            "collected candles"
        );
        Ok((candles, tally))
    }

    /// Fetch consecutive missing days in one request and write back complete ones.
    fn fetch_run(
        &self,
        source: &dyn CandleSource,
        symbol: &str,
        run: &[NaiveDate],
        tally: &mut DayTally,
    ) -> Result<Vec<Candle>, DataError> {
        let (Some(first), Some(last)) = (run.first(), run.last()) else {
            return Ok(Vec::new());
        };
        let now = self.now();
        let horizon = now
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(now);
        let fetch_start = day_start(*first);
        let fetch_end = day_start(*last + Duration::days(1)).min(horizon);
        if fetch_start >= fetch_end {
            tally.missing += run.len();
            return Ok(Vec::new());
        }

        let result = source.fetch(symbol, fetch_start, fetch_end)?;

        let mut by_day: BTreeMap<NaiveDate, Vec<Candle>> = BTreeMap::new();
        for candle in result.candles {
            by_day.entry(candle.timestamp.date()).or_default().push(candle);
        }

        let mut fetched = Vec::new();
        for day in run {
            let Some(day_candles) = by_day.remove(day) else {
                tally.missing += 1;
                continue;
            };
            tally.fetched += 1;
            if is_complete_day(*day, now) {
                match self.cache.write_day(symbol, *day, &day_candles) {
                    Ok(WriteOutcome::Written) => tally.written += 1,
                    Ok(_) => {}
                    Err(e) => warn!(symbol, %day, error = %e, "failed to cache day"),
                }
            }
            fetched.extend(day_candles);
        }
        Ok(fetched)
    }
}

impl PriceSeriesProvider for CachedPriceProvider {
    fn name(&self) -> &str {
        match &self.source {
            Some(source) => source.name(),
            None => "cache",
        }
    }

    fn get_candles(
        &self,
        symbol: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<CandleSeries, DataError> {
        let (candles, _) = self.collect(symbol, start, end)?;
        series_in_range(symbol, candles, start, end)
    }
}

fn day_start(day: NaiveDate) -> NaiveDateTime {
    day.and_time(chrono::NaiveTime::MIN)
}

/// UTC days overlapping `[start, end)`.
fn days_touched(start: NaiveDateTime, end: NaiveDateTime) -> Vec<NaiveDate> {
    if end <= start {
        return Vec::new();
    }
    let last = (end - Duration::milliseconds(1)).date();
    start
        .date()
        .iter_days()
        .take_while(|d| *d <= last)
        .collect()
}

fn contiguous_runs(days: &[NaiveDate]) -> Vec<Vec<NaiveDate>> {
    let mut runs: Vec<Vec<NaiveDate>> = Vec::new();
    for &day in days {
        match runs.last_mut() {
            Some(run) if run.last().map(|d| *d + Duration::days(1)) == Some(day) => run.push(day),
            _ => runs.push(vec![day]),
        }
    }
    runs
}
