//! Intrabar policy: resolve candles whose range touches both take-profit and stop-loss.
//!
//! Only OHLC is known, so the order in which the two levels were touched inside a
//! single candle is a modeling assumption. The default assumes the stop resolved first.

use serde::{Deserialize, Serialize};

use crate::domain::{Candle, Side};

/// Which level is assumed to resolve first when one candle touches both.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntrabarPolicy {
    /// Stop-loss always wins the tie. Never overstates performance.
    #[default]
    StopFirst,
    /// Path follows candle direction: a bullish candle is assumed to trade
    /// O → L → H → C (low first), a bearish candle O → H → L → C (high first).
    CandleDirection,
    /// Path visits whichever extreme is closer to the open first.
    NearestExtreme,
}

/// Result of checking one candle against both exit levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandleHit {
    None,
    TakeProfit,
    StopLoss,
}

impl IntrabarPolicy {
    /// Decide which exit (if any) a candle triggers for a position on `side`.
    pub fn resolve(&self, candle: &Candle, side: Side, tp: f64, sl: f64) -> CandleHit {
        let (tp_hit, sl_hit) = match side {
            Side::Long => (candle.high >= tp, candle.low <= sl),
            Side::Short => (candle.low <= tp, candle.high >= sl),
        };

        match (tp_hit, sl_hit) {
            (false, false) => CandleHit::None,
            (true, false) => CandleHit::TakeProfit,
            (false, true) => CandleHit::StopLoss,
            (true, true) => self.break_tie(candle, side),
        }
    }

    fn break_tie(&self, candle: &Candle, side: Side) -> CandleHit {
        let high_first = match self {
            Self::StopFirst => return CandleHit::StopLoss,
            Self::CandleDirection => !candle.is_bullish(),
            Self::NearestExtreme => {
                (candle.open - candle.high).abs() <= (candle.open - candle.low).abs()
            }
        };

        // Long: the high is the take-profit side. Short: the high is the stop side.
        match (side, high_first) {
            (Side::Long, true) | (Side::Short, false) => CandleHit::TakeProfit,
            (Side::Long, false) | (Side::Short, true) => CandleHit::StopLoss,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::StopFirst => "stop_first",
            Self::CandleDirection => "candle_direction",
            Self::NearestExtreme => "nearest_extreme",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn candle(open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            timestamp: NaiveDate::from_ymd_opt(2025, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            open,
            high,
            low,
            close,
            volume: 0.0,
        }
    }

    #[test]
    fn stop_first_wins_ties_both_sides() {
        let c = candle(100.0, 103.0, 94.0, 102.5);
        assert_eq!(
            IntrabarPolicy::StopFirst.resolve(&c, Side::Long, 102.0, 95.0),
            CandleHit::StopLoss
        );
        assert_eq!(
            IntrabarPolicy::StopFirst.resolve(&c, Side::Short, 98.0, 102.0),
            CandleHit::StopLoss
        );
    }

    #[test]
    fn single_touch_is_unambiguous() {
        let c = candle(100.0, 102.5, 99.0, 102.0);
        assert_eq!(
            IntrabarPolicy::StopFirst.resolve(&c, Side::Long, 102.0, 95.0),
            CandleHit::TakeProfit
        );
        assert_eq!(
            IntrabarPolicy::StopFirst.resolve(&c, Side::Long, 103.0, 95.0),
            CandleHit::None
        );
    }

    #[test]
    fn candle_direction_bullish_hits_low_first() {
        let bullish = candle(100.0, 103.0, 94.0, 102.5);
        assert_eq!(
            IntrabarPolicy::CandleDirection.resolve(&bullish, Side::Long, 102.0, 95.0),
            CandleHit::StopLoss
        );
        assert_eq!(
            IntrabarPolicy::CandleDirection.resolve(&bullish, Side::Short, 95.0, 102.0),
            CandleHit::TakeProfit
        );
    }

    #[test]
    fn candle_direction_bearish_hits_high_first() {
        let bearish = candle(100.0, 103.0, 94.0, 95.0);
        assert_eq!(
            IntrabarPolicy::CandleDirection.resolve(&bearish, Side::Long, 102.0, 95.0),
            CandleHit::TakeProfit
        );
    }

    #[test]
    fn nearest_extreme_uses_distance_from_open() {
        // Open near the high: high first.
        let c = candle(102.5, 103.0, 94.0, 98.0);
        assert_eq!(
            IntrabarPolicy::NearestExtreme.resolve(&c, Side::Long, 102.0, 95.0),
            CandleHit::TakeProfit
        );
    }
}
