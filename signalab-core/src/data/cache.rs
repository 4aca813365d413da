//! Parquet candle cache with Hive-style partitioning, one file per symbol and UTC day.
//!
//! Layout: `{cache_dir}/symbol={SYMBOL}/{YYYY-MM-DD}.parquet`
//!
//! Features:
//! - Atomic writes (write to .tmp, rename into place)
//! - Per-day lock file created with `create_new`, so two writers of the same day
//!   never interleave; a writer that cannot get the lock skips the write
//! - Integrity validation on load (schema check, row count > 0, rows inside the day)
//! - Quarantine for corrupt files ({filename}.quarantined)
//! - Only complete past days are written

use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::provider::DataError;
use crate::domain::Candle;

const COLUMNS: [&str; 6] = ["open_time", "open", "high", "low", "close", "volume"];

/// How long a writer waits for a held day lock before skipping.
const LOCK_WAIT: Duration = Duration::from_millis(2_000);
const LOCK_POLL: Duration = Duration::from_millis(50);
/// Lock files older than this are left over from a crashed writer.
const STALE_LOCK_AGE: Duration = Duration::from_secs(10 * 60);

/// Result of [`CandleCache::write_day`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// Another writer produced the file while we waited for the lock.
    AlreadyCached,
    /// Lock still held after waiting; nothing written.
    LockHeld,
}

/// Cache status for a single symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStatus {
    pub symbol: String,
    pub days: usize,
    pub first_day: Option<NaiveDate>,
    pub last_day: Option<NaiveDate>,
    pub bytes: u64,
    pub quarantined: usize,
}

/// True when `day` has fully elapsed at `now` (both UTC).
pub fn is_complete_day(day: NaiveDate, now: NaiveDateTime) -> bool {
    day < now.date()
}

/// Removes the lock file when dropped.
struct DayLock {
    path: PathBuf,
}

impl Drop for DayLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// The on-disk candle cache.
#[derive(Debug, Clone)]
pub struct CandleCache {
    cache_dir: PathBuf,
}

impl CandleCache {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    /// Root directory of the cache.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Directory for a specific symbol: `{cache_dir}/symbol={SYMBOL}/`
    fn symbol_dir(&self, symbol: &str) -> PathBuf {
        self.cache_dir.join(format!("symbol={symbol}"))
    }

    /// `{cache_dir}/symbol={SYMBOL}/{YYYY-MM-DD}.parquet`
    pub fn day_path(&self, symbol: &str, day: NaiveDate) -> PathBuf {
        self.symbol_dir(symbol)
            .join(format!("{}.parquet", day.format("%Y-%m-%d")))
    }

    fn lock_path(&self, symbol: &str, day: NaiveDate) -> PathBuf {
        self.day_path(symbol, day).with_extension("parquet.lock")
    }

    pub fn has_day(&self, symbol: &str, day: NaiveDate) -> bool {
        self.day_path(symbol, day).is_file()
    }

    /// Write one day of candles. Candles outside `day` are ignored.
    pub fn write_day(
        &self,
        symbol: &str,
        day: NaiveDate,
        candles: &[Candle],
    ) -> Result<WriteOutcome, DataError> {
        let rows: Vec<&Candle> = candles
            .iter()
            .filter(|c| c.timestamp.date() == day && !c.is_void())
            .collect();
        if rows.is_empty() {
            return Err(DataError::CacheError(format!(
                "no candles to cache for {symbol} on {day}"
            )));
        }

        let sym_dir = self.symbol_dir(symbol);
        fs::create_dir_all(&sym_dir)
            .map_err(|e| DataError::CacheError(format!("failed to create dir: {e}")))?;

        let Some(_lock) = self.acquire_lock(symbol, day)? else {
            if self.has_day(symbol, day) {
                return Ok(WriteOutcome::AlreadyCached);
            }
            warn!(symbol, %day, "cache day lock still held, skipping write");
            return Ok(WriteOutcome::LockHeld);
        };

        let path = self.day_path(symbol, day);
        let tmp_path = path.with_extension("parquet.tmp");
        let mut df = candles_to_dataframe(&rows)?;
        write_parquet(&mut df, &tmp_path)?;

        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            DataError::CacheError(format!("atomic rename failed: {e}"))
        })?;

        debug!(symbol, %day, candles = rows.len(), "cached day");
        Ok(WriteOutcome::Written)
    }

    /// Create the day's lock file, waiting up to [`LOCK_WAIT`] for a current holder.
    fn acquire_lock(&self, symbol: &str, day: NaiveDate) -> Result<Option<DayLock>, DataError> {
        let path = self.lock_path(symbol, day);
        let mut waited = Duration::ZERO;
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => return Ok(Some(DayLock { path })),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if lock_is_stale(&path) {
                        warn!(symbol, %day, "removing stale cache lock");
                        let _ = fs::remove_file(&path);
                        continue;
                    }
                    if waited >= LOCK_WAIT || self.has_day(symbol, day) {
                        return Ok(None);
                    }
                    std::thread::sleep(LOCK_POLL);
                    waited += LOCK_POLL;
                }
                Err(e) => return Err(DataError::CacheError(format!("lock file: {e}"))),
            }
        }
    }

    /// Load one cached day. Missing days return `Ok(None)`; corrupt files are
    /// quarantined and also return `Ok(None)` so the caller refetches.
    pub fn load_day(&self, symbol: &str, day: NaiveDate) -> Result<Option<Vec<Candle>>, DataError> {
        let path = self.day_path(symbol, day);
        if !path.is_file() {
            return Ok(None);
        }

        match load_and_validate_parquet(&path, day) {
            Ok(candles) => Ok(Some(candles)),
            Err(e) => {
                let quarantine = path.with_extension("parquet.quarantined");
                warn!(
                    symbol,
                    %day,
                    path = %path.display(),
                    error = %e,
                    "quarantining corrupt cache file"
                );
                fs::rename(&path, &quarantine)
                    .map_err(|e| DataError::CacheError(format!("quarantine failed: {e}")))?;
                Ok(None)
            }
        }
    }

    /// Days cached for `symbol`, ascending.
    pub fn cached_days(&self, symbol: &str) -> Vec<NaiveDate> {
        let Ok(entries) = fs::read_dir(self.symbol_dir(symbol)) else {
            return Vec::new();
        };
        let mut days: Vec<NaiveDate> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let name = e.file_name();
                let stem = name.to_str()?.strip_suffix(".parquet")?;
                NaiveDate::parse_from_str(stem, "%Y-%m-%d").ok()
            })
            .collect();
        days.sort();
        days
    }

    /// Symbols with a partition directory, sorted.
    pub fn symbols(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(&self.cache_dir) else {
            return Vec::new();
        };
        let mut symbols: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .filter_map(|e| {
                e.file_name()
                    .to_str()?
                    .strip_prefix("symbol=")
                    .map(str::to_string)
            })
            .collect();
        symbols.sort();
        symbols
    }

    /// Per-symbol status of everything in the cache.
    pub fn status(&self) -> Vec<CacheStatus> {
        self.symbols()
            .into_iter()
            .map(|symbol| {
                let days = self.cached_days(&symbol);
                let mut bytes = 0;
                let mut quarantined = 0;
                if let Ok(entries) = fs::read_dir(self.symbol_dir(&symbol)) {
                    for entry in entries.filter_map(|e| e.ok()) {
                        let path = entry.path();
                        match path.extension().and_then(|e| e.to_str()) {
                            Some("parquet") => {
                                bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
                            }
                            Some("quarantined") => quarantined += 1,
                            _ => {}
                        }
                    }
                }
                CacheStatus {
                    first_day: days.first().copied(),
                    last_day: days.last().copied(),
                    days: days.len(),
                    symbol,
                    bytes,
                    quarantined,
                }
            })
            .collect()
    }
}

fn lock_is_stale(path: &Path) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age > STALE_LOCK_AGE)
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

fn candles_to_dataframe(candles: &[&Candle]) -> Result<DataFrame, DataError> {
    let open_times: Vec<i64> = candles
        .iter()
        .map(|c| c.timestamp.and_utc().timestamp_millis())
        .collect();
    let opens: Vec<f64> = candles.iter().map(|c| c.open).collect();
    let highs: Vec<f64> = candles.iter().map(|c| c.high).collect();
    let lows: Vec<f64> = candles.iter().map(|c| c.low).collect();
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let volumes: Vec<f64> = candles.iter().map(|c| c.volume).collect();

    DataFrame::new(vec![
        Column::new("open_time".into(), open_times),
        Column::new("open".into(), opens),
        Column::new("high".into(), highs),
        Column::new("low".into(), lows),
        Column::new("close".into(), closes),
        Column::new("volume".into(), volumes),
    ])
    .map_err(|e| DataError::ParquetError(format!("dataframe creation: {e}")))
}

fn write_parquet(df: &mut DataFrame, path: &Path) -> Result<(), DataError> {
    let file =
        fs::File::create(path).map_err(|e| DataError::ParquetError(format!("create file: {e}")))?;
    ParquetWriter::new(file)
        .finish(df)
        .map_err(|e| DataError::ParquetError(format!("write parquet: {e}")))?;
    Ok(())
}

/// Load a day file and validate its integrity.
fn load_and_validate_parquet(path: &Path, day: NaiveDate) -> Result<Vec<Candle>, DataError> {
    let file = fs::File::open(path).map_err(|e| DataError::ParquetError(format!("open: {e}")))?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|e| DataError::ParquetError(format!("read: {e}")))?;

    if df.height() == 0 {
        return Err(DataError::CacheError("empty parquet file".into()));
    }
    for col_name in COLUMNS {
        if df.column(col_name).is_err() {
            return Err(DataError::CacheError(format!("missing column '{col_name}'")));
        }
    }

    let candles = dataframe_to_candles(&df)?;
    if let Some(stray) = candles.iter().find(|c| c.timestamp.date() != day) {
        return Err(DataError::CacheError(format!(
            "candle at {} does not belong to {day}",
            stray.timestamp
        )));
    }
    Ok(candles)
}

fn dataframe_to_candles(df: &DataFrame) -> Result<Vec<Candle>, DataError> {
    let f64_col = |name: &str| -> Result<Vec<Option<f64>>, DataError> {
        Ok(df
            .column(name)
            .map_err(|e| DataError::ParquetError(format!("column read: {e}")))?
            .f64()
            .map_err(|e| DataError::ParquetError(format!("{name} column type: {e}")))?
            .into_iter()
            .collect())
    };

    let open_times = df
        .column("open_time")
        .map_err(|e| DataError::ParquetError(format!("column read: {e}")))?
        .i64()
        .map_err(|e| DataError::ParquetError(format!("open_time column type: {e}")))?;
    let opens = f64_col("open")?;
    let highs = f64_col("high")?;
    let lows = f64_col("low")?;
    let closes = f64_col("close")?;
    let volumes = f64_col("volume")?;

    let mut candles = Vec::with_capacity(df.height());
    for (i, open_ms) in open_times.into_iter().enumerate() {
        let open_ms =
            open_ms.ok_or_else(|| DataError::ParquetError(format!("null open_time at row {i}")))?;
        let timestamp = DateTime::from_timestamp_millis(open_ms)
            .map(|dt| dt.naive_utc())
            .ok_or_else(|| DataError::ParquetError(format!("invalid open_time at row {i}")))?;

        candles.push(Candle {
            timestamp,
            open: opens[i].unwrap_or(f64::NAN),
            high: highs[i].unwrap_or(f64::NAN),
            low: lows[i].unwrap_or(f64::NAN),
            close: closes[i].unwrap_or(f64::NAN),
            volume: volumes[i].unwrap_or(0.0),
        });
    }

    Ok(candles)
}
