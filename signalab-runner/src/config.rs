//! Serializable sweep configuration.
//!
//! Loaded from TOML. Every field has a default, so an empty file is a valid
//! config and reproduces the stock sweep: TP/SL 0.10..5.00 step 0.10, a 12h
//! window, 50 USDT per trade at 1x leverage.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use signalab_core::domain::{PositionSpec, SignalDefaults};
use signalab_core::engine::{IntrabarPolicy, Simulator};
use thiserror::Error;

use crate::scoring::Normalization;

/// Unique identifier for a sweep run (content-addressable hash).
pub type RunId = String;

/// Invalid or unreadable configuration. Always fatal, raised before any simulation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {axis} range: {reason}")]
    InvalidRange { axis: &'static str, reason: String },

    #[error("no time windows configured")]
    NoWindows,

    #[error("time windows must be at least one hour")]
    ZeroWindow,

    #[error("invalid position: {0}")]
    InvalidPosition(String),

    #[error("invalid default levels: {0}")]
    InvalidDefaults(String),

    #[error("invalid ranking settings: {0}")]
    InvalidRanking(String),

    #[error("invalid grid settings: {0}")]
    InvalidGrid(String),

    #[error("invalid replay settings: {0}")]
    InvalidReplay(String),

    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A percent axis: `start..=end` in increments of `step`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PercentRange {
    pub start: f64,
    pub end: f64,
    pub step: f64,
}

impl Default for PercentRange {
    fn default() -> Self {
        Self {
            start: 0.10,
            end: 5.0,
            step: 0.10,
        }
    }
}

impl PercentRange {
    pub fn new(start: f64, end: f64, step: f64) -> Self {
        Self { start, end, step }
    }

    /// A single-value axis.
    pub fn single(value: f64) -> Self {
        Self {
            start: value,
            end: value,
            step: 1.0,
        }
    }

    fn validate(&self, axis: &'static str) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidRange { axis, reason };
        if !(self.start.is_finite() && self.end.is_finite() && self.step.is_finite()) {
            return Err(invalid("bounds and step must be finite".into()));
        }
        if self.step <= 0.0 {
            return Err(invalid(format!("step must be positive, got {}", self.step)));
        }
        if self.start <= 0.0 {
            return Err(invalid(format!("start must be positive, got {}", self.start)));
        }
        if self.end < self.start {
            return Err(invalid(format!(
                "end {} is below start {}",
                self.end, self.start
            )));
        }
        Ok(())
    }
}

/// How the grid is split across workers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Partitioning {
    /// One task per (tp, sl, window) combination.
    #[default]
    Combination,
    /// One task per batch of signals, each with its own aggregate map.
    SignalBatch,
}

/// Execution settings for the grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub partitioning: Partitioning,
    pub batch_size: usize,
    pub parallel: bool,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            partitioning: Partitioning::Combination,
            batch_size: 64,
            parallel: true,
        }
    }
}

/// Ranking filters and the size of the recommendation table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    /// Only combinations with more trades than this are recommended; the rest are
    /// reported as below support.
    pub min_support: u64,
    pub top_n: usize,
    pub normalization: Normalization,
    /// Optional floor on win rate (percent).
    pub min_win_rate: Option<f64>,
    pub require_positive_expectancy: bool,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            min_support: 10,
            top_n: 20,
            normalization: Normalization::MinMax,
            min_win_rate: None,
            require_positive_expectancy: false,
        }
    }
}

/// Replay ("simple backtest") settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    pub starting_balance: f64,
    /// `None` means no limit on simultaneously open positions.
    pub max_concurrent_positions: Option<usize>,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            starting_balance: 1000.0,
            max_concurrent_positions: None,
        }
    }
}

/// Full configuration of a sweep, replay or ranking run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub tp_range: PercentRange,
    pub sl_range: PercentRange,

    /// Resolution windows in hours.
    pub windows: Vec<u32>,

    /// Levels applied to signals that carry none.
    pub defaults: SignalDefaults,

    pub position: PositionSpec,
    pub intrabar_policy: IntrabarPolicy,
    pub ranking: RankingConfig,
    pub replay: ReplayConfig,
    pub grid: GridConfig,

    /// Candles fetched before each signal.
    pub lookback_minutes: i64,

    /// Candles fetched past the longest window. Also the entry timeout, so any fill
    /// still has its full window inside the fetched range.
    pub buffer_minutes: i64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            tp_range: PercentRange::default(),
            sl_range: PercentRange::default(),
            windows: vec![12],
            defaults: SignalDefaults::default(),
            position: PositionSpec::default(),
            intrabar_policy: IntrabarPolicy::default(),
            ranking: RankingConfig::default(),
            replay: ReplayConfig::default(),
            grid: GridConfig::default(),
            lookback_minutes: 60,
            buffer_minutes: 60,
        }
    }
}

impl SweepConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Reject anything that would make the sweep meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tp_range.validate("tp")?;
        self.sl_range.validate("sl")?;
        if self.sl_range.end >= 100.0 {
            return Err(ConfigError::InvalidRange {
                axis: "sl",
                reason: format!("stop-loss of {}% would cross zero", self.sl_range.end),
            });
        }
        if self.tp_range.end >= 100.0 {
            return Err(ConfigError::InvalidRange {
                axis: "tp",
                reason: format!("short take-profit of {}% would cross zero", self.tp_range.end),
            });
        }

        if self.windows.is_empty() {
            return Err(ConfigError::NoWindows);
        }
        if self.windows.contains(&0) {
            return Err(ConfigError::ZeroWindow);
        }

        let p = &self.position;
        if !(p.size_usdt.is_finite() && p.size_usdt > 0.0) {
            return Err(ConfigError::InvalidPosition(format!(
                "size_usdt must be positive, got {}",
                p.size_usdt
            )));
        }
        if !(p.leverage.is_finite() && p.leverage > 0.0) {
            return Err(ConfigError::InvalidPosition(format!(
                "leverage must be positive, got {}",
                p.leverage
            )));
        }

        let d = &self.defaults;
        let in_bounds = |pct: f64| pct > 0.0 && pct < 100.0;
        if !(in_bounds(d.tp_percent) && in_bounds(d.sl_percent)) {
            return Err(ConfigError::InvalidDefaults(format!(
                "tp={} sl={}",
                d.tp_percent, d.sl_percent
            )));
        }

        if self.ranking.top_n == 0 {
            return Err(ConfigError::InvalidRanking("top_n must be at least 1".into()));
        }
        if let Some(rate) = self.ranking.min_win_rate {
            if !(0.0..=100.0).contains(&rate) {
                return Err(ConfigError::InvalidRanking(format!(
                    "min_win_rate must be a percentage, got {rate}"
                )));
            }
        }

        if self.grid.batch_size == 0 {
            return Err(ConfigError::InvalidGrid("batch_size must be at least 1".into()));
        }

        if !(self.replay.starting_balance.is_finite() && self.replay.starting_balance >= 0.0) {
            return Err(ConfigError::InvalidReplay(format!(
                "starting_balance must be non-negative, got {}",
                self.replay.starting_balance
            )));
        }
        if self.replay.max_concurrent_positions == Some(0) {
            return Err(ConfigError::InvalidReplay(
                "max_concurrent_positions must be at least 1".into(),
            ));
        }

        if self.lookback_minutes < 0 || self.buffer_minutes < 0 {
            return Err(ConfigError::InvalidGrid(
                "lookback and buffer must be non-negative".into(),
            ));
        }

        Ok(())
    }

    /// Longest configured window, in hours.
    pub fn max_window(&self) -> u32 {
        self.windows.iter().copied().max().unwrap_or(0)
    }

    /// The simulator this config describes.
    pub fn simulator(&self) -> Simulator {
        Simulator::new(self.position, self.intrabar_policy)
            .with_entry_timeout(u32::try_from(self.buffer_minutes).unwrap_or(u32::MAX))
    }

    /// Deterministic hash ID for this configuration.
    ///
    /// Two runs with identical configs get the same RunId.
    pub fn run_id(&self) -> Result<RunId, ConfigError> {
        let json = serde_json::to_string(self)?;
        Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_stock_sweep() {
        let config = SweepConfig::default();
        assert_eq!(config.tp_range, PercentRange::new(0.10, 5.0, 0.10));
        assert_eq!(config.windows, vec![12]);
        assert_eq!(config.position.size_usdt, 50.0);
        assert_eq!(config.position.leverage, 1.0);
        assert_eq!(config.ranking.min_support, 10);
        assert_eq!(config.ranking.top_n, 20);
        assert_eq!(config.intrabar_policy, IntrabarPolicy::StopFirst);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_entry_timeout_follows_buffer() {
        let config = SweepConfig {
            buffer_minutes: 90,
            ..SweepConfig::default()
        };
        assert_eq!(config.simulator().entry_timeout_minutes, 90);
        assert_eq!(SweepConfig::default().simulator().entry_timeout_minutes, 60);
    }

    #[test]
    fn test_empty_toml_is_default() {
        let config = SweepConfig::from_toml_str("").unwrap();
        assert_eq!(config, SweepConfig::default());
    }

    #[test]
    fn test_partial_toml() {
        let config = SweepConfig::from_toml_str(
            r#"
            windows = [4, 8, 12]
            intrabar_policy = "candle_direction"

            [tp_range]
            start = 0.5
            end = 3.0
            step = 0.5

            [ranking]
            min_support = 25
            normalization = "percentile_rank"

            [grid]
            partitioning = "signal_batch"
            batch_size = 16
            "#,
        )
        .unwrap();
        assert_eq!(config.windows, vec![4, 8, 12]);
        assert_eq!(config.intrabar_policy, IntrabarPolicy::CandleDirection);
        assert_eq!(config.tp_range.step, 0.5);
        assert_eq!(config.sl_range, PercentRange::default());
        assert_eq!(config.ranking.min_support, 25);
        assert_eq!(config.ranking.top_n, 20);
        assert_eq!(config.ranking.normalization, Normalization::PercentileRank);
        assert_eq!(config.grid.partitioning, Partitioning::SignalBatch);
        assert_eq!(config.grid.batch_size, 16);
    }

    #[test]
    fn test_rejects_bad_ranges() {
        let mut config = SweepConfig::default();
        config.tp_range.step = 0.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidRange { axis: "tp", .. })
        ));

        let mut config = SweepConfig::default();
        config.sl_range = PercentRange::new(2.0, 1.0, 0.1);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidRange { axis: "sl", .. })
        ));

        let mut config = SweepConfig::default();
        config.tp_range.start = 0.0;
        assert!(config.validate().is_err());

        let mut config = SweepConfig::default();
        config.tp_range = PercentRange::new(50.0, 100.0, 10.0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidRange { axis: "tp", .. })
        ));
    }

    #[test]
    fn test_rejects_bad_windows_and_position() {
        let mut config = SweepConfig::default();
        config.windows.clear();
        assert!(matches!(config.validate(), Err(ConfigError::NoWindows)));

        config.windows = vec![4, 0];
        assert!(matches!(config.validate(), Err(ConfigError::ZeroWindow)));

        let mut config = SweepConfig::default();
        config.position.leverage = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidPosition(_))));
    }

    #[test]
    fn test_parse_errors_surface() {
        assert!(matches!(
            SweepConfig::from_toml_str("windows = \"twelve\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_run_id_deterministic() {
        let a = SweepConfig::default();
        let b = SweepConfig::default();
        assert_eq!(a.run_id().unwrap(), b.run_id().unwrap());
        assert_eq!(a.run_id().unwrap().len(), 64);
    }

    #[test]
    fn test_run_id_changes_with_params() {
        let a = SweepConfig::default();
        let mut b = SweepConfig::default();
        b.windows = vec![4];
        assert_ne!(a.run_id().unwrap(), b.run_id().unwrap());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sweep.toml");
        std::fs::write(&path, "windows = [8]\n").unwrap();
        assert_eq!(SweepConfig::load(&path).unwrap().windows, vec![8]);

        let missing = dir.path().join("missing.toml");
        assert!(matches!(SweepConfig::load(&missing), Err(ConfigError::Io { .. })));
    }
}
