//! Simulation parameters and position sizing.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use super::signal::{level_from_percent, Side};

/// One point of the parameter grid: TP/SL distance and holding window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimulationParams {
    /// Take-profit distance, percent of entry.
    pub tp_percent: f64,
    /// Stop-loss distance, percent of entry.
    pub sl_percent: f64,
    /// Maximum holding time after the entry fill.
    pub hours_window: u32,
}

impl SimulationParams {
    pub fn new(tp_percent: f64, sl_percent: f64, hours_window: u32) -> Self {
        Self {
            tp_percent,
            sl_percent,
            hours_window,
        }
    }

    /// Positive, finite distances and a non-zero window.
    pub fn is_valid(&self) -> bool {
        self.tp_percent.is_finite()
            && self.tp_percent > 0.0
            && self.sl_percent.is_finite()
            && self.sl_percent > 0.0
            && self.hours_window > 0
    }

    /// [`is_valid`](Self::is_valid), and the level below entry stays above zero:
    /// the stop for LONG, the take-profit for SHORT.
    pub fn is_valid_for(&self, side: Side) -> bool {
        let below_entry = match side {
            Side::Long => self.sl_percent,
            Side::Short => self.tp_percent,
        };
        self.is_valid() && below_entry < 100.0
    }

    pub fn window(&self) -> Duration {
        Duration::hours(i64::from(self.hours_window))
    }

    /// Absolute (take-profit, stop-loss) prices for a position opened at `entry`.
    pub fn levels(&self, side: Side, entry: f64) -> (f64, f64) {
        (
            level_from_percent(side, entry, self.tp_percent),
            level_from_percent(side, entry, -self.sl_percent),
        )
    }
}

/// Fixed notional and leverage applied uniformly to every simulated trade.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionSpec {
    pub size_usdt: f64,
    pub leverage: f64,
}

impl Default for PositionSpec {
    fn default() -> Self {
        Self {
            size_usdt: 50.0,
            leverage: 1.0,
        }
    }
}

impl PositionSpec {
    /// PnL in USDT of closing `fraction` of the position at `exit`.
    pub fn pnl(&self, side: Side, entry: f64, exit: f64, fraction: f64) -> f64 {
        self.size_usdt * self.leverage * side.sign() * (exit - entry) / entry * fraction
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_levels() {
        let p = SimulationParams::new(2.0, 5.0, 4);
        let (tp, sl) = p.levels(Side::Long, 100.0);
        assert!((tp - 102.0).abs() < 1e-9);
        assert!((sl - 95.0).abs() < 1e-9);
    }

    #[test]
    fn short_levels() {
        let p = SimulationParams::new(2.0, 5.0, 4);
        let (tp, sl) = p.levels(Side::Short, 100.0);
        assert!((tp - 98.0).abs() < 1e-9);
        assert!((sl - 105.0).abs() < 1e-9);
    }

    #[test]
    fn invalid_params() {
        assert!(!SimulationParams::new(0.0, 5.0, 4).is_valid());
        assert!(!SimulationParams::new(2.0, 5.0, 0).is_valid());
        assert!(SimulationParams::new(0.1, 0.1, 12).is_valid());
    }

    #[test]
    fn wide_stop_is_valid_only_above_entry() {
        let p = SimulationParams::new(2.0, 150.0, 4);
        assert!(!p.is_valid_for(Side::Long));
        assert!(p.is_valid_for(Side::Short));

        let p = SimulationParams::new(100.0, 5.0, 4);
        assert!(p.is_valid_for(Side::Long));
        assert!(!p.is_valid_for(Side::Short));
    }

    #[test]
    fn pnl_is_sign_flipped_for_short() {
        let spec = PositionSpec {
            size_usdt: 50.0,
            leverage: 2.0,
        };
        assert!((spec.pnl(Side::Long, 100.0, 102.0, 1.0) - 2.0).abs() < 1e-9);
        assert!((spec.pnl(Side::Short, 100.0, 102.0, 1.0) + 2.0).abs() < 1e-9);
        assert!((spec.pnl(Side::Long, 100.0, 102.0, 0.5) - 1.0).abs() < 1e-9);
    }
}
