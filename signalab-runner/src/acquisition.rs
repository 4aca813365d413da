//! Data-acquisition phase.
//!
//! Resolves every signal's candle range through a [`PriceSeriesProvider`]
//! before simulation starts, so the grid itself never touches the network or
//! the disk. A signal whose data cannot be obtained is skipped and tallied,
//! never fatal.

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use signalab_core::data::{CachedPriceProvider, DataError, DayTally, PriceSeriesProvider};
use signalab_core::domain::{CandleSeries, Side, Signal};
use tracing::{debug, info, warn};

use crate::config::SweepConfig;

/// How much data around each signal is fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquisitionWindow {
    /// Before the signal time.
    pub lookback: Duration,
    /// After the signal time: longest window plus buffer.
    pub horizon: Duration,
}

impl AcquisitionWindow {
    pub fn from_config(config: &SweepConfig) -> Self {
        Self {
            lookback: Duration::minutes(config.lookback_minutes),
            horizon: Duration::hours(i64::from(config.max_window()))
                + Duration::minutes(config.buffer_minutes),
        }
    }

    /// `[signal_time - lookback, signal_time + horizon)`.
    pub fn range_for(&self, signal: &Signal) -> (NaiveDateTime, NaiveDateTime) {
        (
            signal.signal_time - self.lookback,
            signal.signal_time + self.horizon,
        )
    }
}

/// A signal paired with the candles covering its range.
#[derive(Debug, Clone)]
pub struct PricedSignal {
    pub signal: Signal,
    pub series: CandleSeries,
}

/// A signal dropped during acquisition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedSignal {
    pub symbol: String,
    pub side: Side,
    pub entry: f64,
    pub signal_time: NaiveDateTime,
    pub reason: String,
}

/// Signals excluded from simulation, by cause.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipTally {
    /// Price data could not be obtained.
    pub data_unavailable: usize,
    /// Rejected by the normalizer.
    pub malformed: usize,
}

impl SkipTally {
    pub fn total(&self) -> usize {
        self.data_unavailable + self.malformed
    }
}

/// Output of the acquisition phase.
#[derive(Debug, Clone, Default)]
pub struct Acquired {
    pub priced: Vec<PricedSignal>,
    pub skipped: Vec<SkippedSignal>,
}

impl Acquired {
    pub fn tally(&self, malformed: usize) -> SkipTally {
        SkipTally {
            data_unavailable: self.skipped.len(),
            malformed,
        }
    }
}

/// Fetch the candle range of every signal, in signal order.
pub fn acquire<P>(signals: &[Signal], provider: &P, window: AcquisitionWindow) -> Acquired
where
    P: PriceSeriesProvider + ?Sized,
{
    let mut acquired = Acquired::default();
    for signal in signals {
        let (start, end) = window.range_for(signal);
        match provider.get_candles(&signal.symbol, start, end) {
            Ok(series) => {
                debug!(symbol = %signal.symbol, candles = series.len(), "acquired");
                acquired.priced.push(PricedSignal {
                    signal: signal.clone(),
                    series,
                });
            }
            Err(e) => acquired.skipped.push(skip(signal, &e)),
        }
    }
    info!(
        provider = provider.name(),
        priced = acquired.priced.len(),
        skipped = acquired.skipped.len(),
        "acquisition complete"
    );
    acquired
}

/// Result of a download-only pass.
#[derive(Debug, Clone, Default)]
pub struct DownloadReport {
    pub days: DayTally,
    pub failed: Vec<SkippedSignal>,
}

/// Fill the cache for every signal's range without building series.
pub fn download(
    signals: &[Signal],
    provider: &CachedPriceProvider,
    window: AcquisitionWindow,
) -> DownloadReport {
    let mut report = DownloadReport::default();
    for signal in signals {
        let (start, end) = window.range_for(signal);
        match provider.prefetch(&signal.symbol, start, end) {
            Ok(tally) => report.days.merge(tally),
            Err(e) => report.failed.push(skip(signal, &e)),
        }
    }
    info!(
        fetched = report.days.fetched,
        from_cache = report.days.from_cache,
        written = report.days.written,
        failed = report.failed.len(),
        "download complete"
    );
    report
}

fn skip(signal: &Signal, e: &DataError) -> SkippedSignal {
    warn!(
        symbol = %signal.symbol,
        signal_time = %signal.signal_time,
        reason = %e,
        "price data unavailable, skipping signal"
    );
    SkippedSignal {
        symbol: signal.symbol.clone(),
        side: signal.side,
        entry: signal.entry,
        signal_time: signal.signal_time,
        reason: e.to_string(),
    }
}
