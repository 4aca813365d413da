//! Signal file loading.
//!
//! Reads the tabular signal export (`symbol,date,time,side,entry,stop_loss,
//! tp1..tp4`), normalizes every row and keeps the survivors in chronological
//! order. A bad row never aborts the load: it is logged with its identifying
//! fields and counted as malformed. Only an unreadable file or a missing
//! required column is fatal.

use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use signalab_core::domain::{RawSignal, Side, Signal, SignalDefaults};
use thiserror::Error;
use tracing::{info, warn};

const REQUIRED_COLUMNS: [&str; 5] = ["symbol", "date", "time", "side", "entry"];

/// Errors from the signal loading layer.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to open signal file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("failed to read signal header: {0}")]
    Header(#[source] csv::Error),

    #[error("signal file is missing required column '{0}'")]
    MissingColumn(&'static str),
}

/// A row that did not make it into the signal set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedSignal {
    /// Line number in the source file (header is line 1).
    pub row: u64,
    pub symbol: String,
    pub date: String,
    pub time: String,
    pub reason: String,
}

/// Normalized signals in chronological order, plus the rows that were rejected.
#[derive(Debug, Clone, Default)]
pub struct SignalSet {
    signals: Vec<Signal>,
    rejected: Vec<RejectedSignal>,
}

/// Headline counts for a signal set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalSummary {
    pub total: usize,
    pub long: usize,
    pub short: usize,
    /// Signals carrying tp1..tp4 and a stop-loss.
    pub with_ladder: usize,
    /// Signals carrying at least one level of their own.
    pub with_levels: usize,
    pub malformed: usize,
    pub first_signal: Option<NaiveDateTime>,
    pub last_signal: Option<NaiveDateTime>,
}

impl SignalSet {
    /// Normalize raw rows. `row` numbers start at 2 to match a file with a header.
    pub fn from_raw<I>(rows: I, defaults: &SignalDefaults) -> Self
    where
        I: IntoIterator<Item = RawSignal>,
    {
        let mut set = Self::default();
        for (i, raw) in rows.into_iter().enumerate() {
            set.push_raw(i as u64 + 2, &raw, defaults);
        }
        set.finish()
    }

    /// Build directly from normalized signals.
    pub fn from_signals(signals: Vec<Signal>) -> Self {
        Self {
            signals,
            rejected: Vec::new(),
        }
        .finish()
    }

    fn push_raw(&mut self, row: u64, raw: &RawSignal, defaults: &SignalDefaults) {
        match raw.normalize(defaults) {
            Ok(signal) => self.signals.push(signal),
            Err(e) => self.reject(RejectedSignal {
                row,
                symbol: raw.symbol.clone(),
                date: raw.date.clone(),
                time: raw.time.clone(),
                reason: e.to_string(),
            }),
        }
    }

    fn reject(&mut self, rejected: RejectedSignal) {
        warn!(
            row = rejected.row,
            symbol = %rejected.symbol,
            date = %rejected.date,
            time = %rejected.time,
            reason = %rejected.reason,
            "skipping malformed signal"
        );
        self.rejected.push(rejected);
    }

    fn finish(mut self) -> Self {
        // Stable: same-minute signals keep file order.
        self.signals.sort_by_key(|s| s.signal_time);
        self
    }

    pub fn signals(&self) -> &[Signal] {
        &self.signals
    }

    pub fn rejected(&self) -> &[RejectedSignal] {
        &self.rejected
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    pub fn summary(&self) -> SignalSummary {
        let count = |side: Side| self.signals.iter().filter(|s| s.side == side).count();
        SignalSummary {
            total: self.signals.len(),
            long: count(Side::Long),
            short: count(Side::Short),
            with_ladder: self.signals.iter().filter(|s| s.has_ladder()).count(),
            with_levels: self.signals.iter().filter(|s| s.has_levels()).count(),
            malformed: self.rejected.len(),
            first_signal: self.signals.first().map(|s| s.signal_time),
            last_signal: self.signals.last().map(|s| s.signal_time),
        }
    }
}

/// Load and normalize a signal CSV file.
pub fn load_signals(path: &Path, defaults: &SignalDefaults) -> Result<SignalSet, LoadError> {
    let reader = csv_builder().from_path(path).map_err(|source| LoadError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let set = read_from(reader, defaults)?;
    info!(
        path = %path.display(),
        signals = set.len(),
        malformed = set.rejected.len(),
        "loaded signals"
    );
    Ok(set)
}

/// Load and normalize signals from any CSV reader.
pub fn read_signals<R: Read>(reader: R, defaults: &SignalDefaults) -> Result<SignalSet, LoadError> {
    read_from(csv_builder().from_reader(reader), defaults)
}

fn csv_builder() -> csv::ReaderBuilder {
    let mut builder = csv::ReaderBuilder::new();
    builder.trim(csv::Trim::All).flexible(true);
    builder
}

fn read_from<R: Read>(
    mut reader: csv::Reader<R>,
    defaults: &SignalDefaults,
) -> Result<SignalSet, LoadError> {
    let headers = reader.headers().map_err(LoadError::Header)?.clone();
    for column in REQUIRED_COLUMNS {
        if !headers.iter().any(|h| h.eq_ignore_ascii_case(column)) {
            return Err(LoadError::MissingColumn(column));
        }
    }
    let headers = csv::StringRecord::from(
        headers
            .iter()
            .map(|h| h.to_ascii_lowercase())
            .collect::<Vec<_>>(),
    );

    let mut set = SignalSet::default();
    for (i, record) in reader.records().enumerate() {
        let fallback_row = i as u64 + 2;
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                let row = e.position().map_or(fallback_row, |p| p.line());
                set.reject(RejectedSignal {
                    row,
                    symbol: String::new(),
                    date: String::new(),
                    time: String::new(),
                    reason: e.to_string(),
                });
                continue;
            }
        };
        let row = record.position().map_or(fallback_row, |p| p.line());
        match record.deserialize::<RawSignal>(Some(&headers)) {
            Ok(raw) => set.push_raw(row, &raw, defaults),
            Err(e) => set.reject(RejectedSignal {
                row,
                symbol: field(&headers, &record, "symbol"),
                date: field(&headers, &record, "date"),
                time: field(&headers, &record, "time"),
                reason: e.to_string(),
            }),
        }
    }
    Ok(set.finish())
}

fn field(headers: &csv::StringRecord, record: &csv::StringRecord, name: &str) -> String {
    headers
        .iter()
        .position(|h| h == name)
        .and_then(|i| record.get(i))
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use signalab_core::domain::StopLoss;

    const SAMPLE: &str = "\
symbol,date,time,side,entry,stop_loss,tp1,tp2,tp3,tp4
ETHUSDT,2025-03-02,14:05,short,2000,2100,1980,1960,1940,1900
btcusdt,2025-03-01,09:30,LONG,60000,,,,,
XRPUSDT,2025-03-01,10:00,sideways,0.5,,,,,
SOLUSDT,2025-03-01,11:00,buy,150,3%,,,,
ADAUSDT,not-a-date,11:00,long,0.4,,,,,
";

    #[test]
    fn loads_and_sorts_chronologically() {
        let set = read_signals(SAMPLE.as_bytes(), &SignalDefaults::default()).unwrap();
        assert_eq!(set.len(), 3);
        let symbols: Vec<_> = set.signals().iter().map(|s| s.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["BTCUSDT", "SOLUSDT", "ETHUSDT"]);
    }

    #[test]
    fn applies_defaults_and_parses_levels() {
        let set = read_signals(SAMPLE.as_bytes(), &SignalDefaults::default()).unwrap();
        let btc = &set.signals()[0];
        assert_eq!(btc.tp_percent, 2.0);
        assert_eq!(btc.sl_percent, 5.0);
        assert!(!btc.has_levels());

        let sol = &set.signals()[1];
        assert_eq!(sol.side, Side::Long);
        assert_eq!(sol.stop_loss, Some(StopLoss::Percent(3.0)));

        let eth = &set.signals()[2];
        assert!(eth.has_ladder());
        assert_eq!(eth.take_profits, vec![1980.0, 1960.0, 1940.0, 1900.0]);
    }

    #[test]
    fn malformed_rows_are_reported_with_line_numbers() {
        let set = read_signals(SAMPLE.as_bytes(), &SignalDefaults::default()).unwrap();
        let rejected = set.rejected();
        assert_eq!(rejected.len(), 2);
        assert_eq!(rejected[0].row, 4);
        assert_eq!(rejected[0].symbol, "XRPUSDT");
        assert!(rejected[0].reason.contains("sideways"));
        assert_eq!(rejected[1].row, 6);
        assert_eq!(rejected[1].date, "not-a-date");
    }

    #[test]
    fn summary_counts() {
        let set = read_signals(SAMPLE.as_bytes(), &SignalDefaults::default()).unwrap();
        let summary = set.summary();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.long, 2);
        assert_eq!(summary.short, 1);
        assert_eq!(summary.with_ladder, 1);
        assert_eq!(summary.with_levels, 2);
        assert_eq!(summary.malformed, 2);
        assert!(summary.first_signal < summary.last_signal);
    }

    #[test]
    fn optional_columns_may_be_absent() {
        let csv = "Symbol,Date,Time,Side,Entry\nBTCUSDT,2025-03-01,09:30,short,60000\n";
        let set = read_signals(csv.as_bytes(), &SignalDefaults::default()).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.signals()[0].side, Side::Short);
    }

    #[test]
    fn missing_required_column_is_fatal() {
        let csv = "symbol,date,time,entry\nBTCUSDT,2025-03-01,09:30,60000\n";
        assert!(matches!(
            read_signals(csv.as_bytes(), &SignalDefaults::default()),
            Err(LoadError::MissingColumn("side"))
        ));
    }

    #[test]
    fn missing_file_is_an_open_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_signals(&dir.path().join("nope.csv"), &SignalDefaults::default());
        assert!(matches!(err, Err(LoadError::Open { .. })));
    }
}
