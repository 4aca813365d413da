//! Parameter-space expansion.
//!
//! Turns the configured TP/SL ranges and window list into an enumerable,
//! ordered set of (tp, sl, window) combinations. Percentages are keyed as
//! integers (hundredths of a basis point) so that `0.1 + 0.2` and `0.3` land
//! on the same combination.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use signalab_core::domain::SimulationParams;

use crate::config::{ConfigError, PercentRange, SweepConfig};

/// Scale applied to percentages before keying: 1.25% → 12_500.
pub const PERCENT_SCALE: f64 = 10_000.0;

/// Tolerance, in steps, for including the range end.
const END_TOLERANCE: f64 = 1e-6;

fn to_key(pct: f64) -> i64 {
    (pct * PERCENT_SCALE).round() as i64
}

fn from_key(key: i64) -> f64 {
    key as f64 / PERCENT_SCALE
}

impl PercentRange {
    /// Ordered, deduplicated candidate percentages, `end` included when it is
    /// reachable within floating tolerance.
    pub fn expand(&self) -> Vec<f64> {
        if self.step.is_nan() || self.step <= 0.0 || self.end < self.start {
            return Vec::new();
        }
        let steps = ((self.end - self.start) / self.step + END_TOLERANCE).floor() as i64;
        let mut seen = BTreeSet::new();
        (0..=steps)
            .map(|i| to_key(self.start + i as f64 * self.step))
            .filter(|key| seen.insert(*key))
            .map(from_key)
            .collect()
    }
}

/// Identity of one grid cell. Orders by window, then TP, then SL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ComboKey {
    pub hours_window: u32,
    tp_key: i64,
    sl_key: i64,
}

impl ComboKey {
    pub fn new(tp_percent: f64, sl_percent: f64, hours_window: u32) -> Self {
        Self {
            hours_window,
            tp_key: to_key(tp_percent),
            sl_key: to_key(sl_percent),
        }
    }

    pub fn tp_percent(&self) -> f64 {
        from_key(self.tp_key)
    }

    pub fn sl_percent(&self) -> f64 {
        from_key(self.sl_key)
    }

    pub fn params(&self) -> SimulationParams {
        SimulationParams::new(self.tp_percent(), self.sl_percent(), self.hours_window)
    }
}

impl fmt::Display for ComboKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tp={:.2}% sl={:.2}% {}h",
            self.tp_percent(),
            self.sl_percent(),
            self.hours_window
        )
    }
}

/// The full cross-product of TP values × SL values × windows.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpace {
    tp_values: Vec<f64>,
    sl_values: Vec<f64>,
    windows: Vec<u32>,
}

impl ParamSpace {
    /// Build from explicit axes. Windows are sorted and deduplicated.
    pub fn new(tp_values: Vec<f64>, sl_values: Vec<f64>, windows: Vec<u32>) -> Self {
        let windows: BTreeSet<u32> = windows.into_iter().collect();
        Self {
            tp_values,
            sl_values,
            windows: windows.into_iter().collect(),
        }
    }

    /// Validate the config, then expand its ranges.
    pub fn from_config(config: &SweepConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::new(
            config.tp_range.expand(),
            config.sl_range.expand(),
            config.windows.clone(),
        ))
    }

    pub fn tp_values(&self) -> &[f64] {
        &self.tp_values
    }

    pub fn sl_values(&self) -> &[f64] {
        &self.sl_values
    }

    pub fn windows(&self) -> &[u32] {
        &self.windows
    }

    /// Number of combinations.
    pub fn len(&self) -> usize {
        self.tp_values.len() * self.sl_values.len() * self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All combinations, in key order.
    pub fn keys(&self) -> Vec<ComboKey> {
        let mut keys = Vec::with_capacity(self.len());
        for &window in &self.windows {
            for &tp in &self.tp_values {
                for &sl in &self.sl_values {
                    keys.push(ComboKey::new(tp, sl, window));
                }
            }
        }
        keys
    }
}
