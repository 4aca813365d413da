//! Laddered exit: four take-profit targets with partial closes and a trailing stop.
//!
//! | Target | Closes              | Stop moves to |
//! |--------|---------------------|---------------|
//! | TP1    | 50% of position     | entry         |
//! | TP2    | 50% of remainder    | TP1           |
//! | TP3    | 50% of remainder    | TP2           |
//! | TP4    | everything left     | n/a           |
//!
//! Entry detection (including the entry timeout), window expiry and same-candle
//! conflicts follow the single-exit simulator. A stop moved by a target fill takes
//! effect from the next candle; further targets may still fill inside the same candle.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::domain::{Candle, CandleSeries, OutcomeKind, Signal, SimulationParams, TradeOutcome};
use crate::engine::intrabar::CandleHit;
use crate::engine::simulator::{SimulationError, Simulator};

/// Fraction of the *remaining* position closed at each target.
pub const LADDER_CLOSE_FRACTIONS: [f64; 4] = [0.5, 0.5, 0.5, 1.0];

/// Prices closer than this to entry count as a breakeven stop.
const BREAKEVEN_EPSILON: f64 = 1e-4;

/// Result of a laddered simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LadderOutcome {
    pub outcome: TradeOutcome,
    /// Number of targets filled before the position closed.
    pub targets_hit: usize,
}

struct LadderState {
    remaining: f64,
    realized: f64,
    stop: f64,
    next_target: usize,
}

impl Simulator {
    /// Simulate a signal with its own four take-profit targets and stop-loss.
    ///
    /// `params.hours_window` bounds the holding time; its TP/SL percentages are only
    /// used for validation. Signals without a complete ladder fall back to
    /// [`Simulator::simulate`].
    pub fn simulate_ladder(
        &self,
        signal: &Signal,
        params: &SimulationParams,
        series: &CandleSeries,
    ) -> Result<LadderOutcome, SimulationError> {
        let (Some(initial_stop), true) = (signal.stop_price(), signal.has_ladder()) else {
            let outcome = self.simulate(signal, params, series)?;
            return Ok(LadderOutcome {
                outcome,
                targets_hit: 0,
            });
        };
        let Some(fill) = self.locate_entry(signal, params, series)? else {
            return Ok(LadderOutcome {
                outcome: TradeOutcome::no_entry(),
                targets_hit: 0,
            });
        };

        let targets = &signal.take_profits;
        let boundary = fill.time + params.window();
        let candles = &series.candles()[fill.index..];
        let mut state = LadderState {
            remaining: 1.0,
            realized: 0.0,
            stop: initial_stop,
            next_target: 0,
        };

        let mut last_in_window: Option<&Candle> = None;
        for candle in candles.iter().take_while(|c| c.end_time() <= boundary) {
            let stop_this_candle = state.stop;
            loop {
                let tp = targets[state.next_target];
                match self.intrabar.resolve(candle, signal.side, tp, stop_this_candle) {
                    CandleHit::StopLoss => {
                        let exit = stop_this_candle;
                        self.realize(signal, &mut state, exit, 1.0);
                        let kind = if state.realized >= 0.0 && state.next_target > 0 {
                            OutcomeKind::Win
                        } else {
                            OutcomeKind::Loss
                        };
                        return Ok(self.finish(fill.time, candle, kind, exit, state));
                    }
                    CandleHit::TakeProfit => {
                        let fraction = LADDER_CLOSE_FRACTIONS[state.next_target];
                        self.realize(signal, &mut state, tp, fraction);
                        state.stop = if state.next_target == 0 {
                            signal.entry
                        } else {
                            targets[state.next_target - 1]
                        };
                        state.next_target += 1;
                        if state.next_target == targets.len() {
                            return Ok(self.finish(fill.time, candle, OutcomeKind::Win, tp, state));
                        }
                    }
                    CandleHit::None => break,
                }
            }
            last_in_window = Some(candle);
        }

        let last = last_in_window.unwrap_or(&candles[0]);
        self.realize(signal, &mut state, last.close, 1.0);
        Ok(self.finish(fill.time, last, OutcomeKind::Expired, last.close, state))
    }

    /// Close `fraction` of what is left at `exit`.
    fn realize(&self, signal: &Signal, state: &mut LadderState, exit: f64, fraction: f64) {
        let closed = state.remaining * fraction;
        if (exit - signal.entry).abs() >= BREAKEVEN_EPSILON {
            state.realized += self.position.pnl(signal.side, signal.entry, exit, closed);
        }
        state.remaining -= closed;
    }

    fn finish(
        &self,
        entry_time: NaiveDateTime,
        candle: &Candle,
        kind: OutcomeKind,
        exit_price: f64,
        state: LadderState,
    ) -> LadderOutcome {
        LadderOutcome {
            outcome: TradeOutcome::closed(
                kind,
                entry_time,
                candle.timestamp,
                exit_price,
                state.realized,
            ),
            targets_hit: state.next_target,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Side, StopLoss};
    use chrono::{Duration, NaiveDate};

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 6, 2)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap()
    }

    fn ladder_signal() -> Signal {
        Signal {
            symbol: "ETHUSDT".into(),
            side: Side::Long,
            entry: 100.0,
            signal_time: t0(),
            stop_loss: Some(StopLoss::Price(95.0)),
            take_profits: vec![101.0, 102.0, 103.0, 104.0],
            tp_percent: 2.5,
            sl_percent: 5.0,
        }
    }

    /// Flat candles from t0-60m with (minute, high, low, close) overrides.
    /// The t0 candle dips to 99.8 (entry fill); later ones trade 100.2..100.6.
    fn series(overrides: &[(i64, f64, f64, f64)]) -> CandleSeries {
        let candles = (-60..300)
            .map(|m| {
                let flat = if m <= 0 {
                    (100.3, 99.8, 100.0)
                } else {
                    (100.6, 100.2, 100.4)
                };
                let (high, low, close) = overrides
                    .iter()
                    .find(|o| o.0 == m)
                    .map(|o| (o.1, o.2, o.3))
                    .unwrap_or(flat);
                Candle {
                    timestamp: t0() + Duration::minutes(m),
                    open: close.clamp(low, high),
                    high,
                    low,
                    close,
                    volume: 1.0,
                }
            })
            .collect();
        CandleSeries::new(candles).unwrap()
    }

    fn params() -> SimulationParams {
        SimulationParams::new(2.5, 5.0, 4)
    }

    #[test]
    fn all_targets_fill() {
        let s = series(&[
            (10, 101.2, 100.5, 101.0),
            (11, 102.2, 101.5, 102.0),
            (12, 103.2, 102.5, 103.0),
            (13, 104.2, 103.5, 104.0),
        ]);
        let out = Simulator::default()
            .simulate_ladder(&ladder_signal(), &params(), &s)
            .unwrap();
        assert_eq!(out.targets_hit, 4);
        assert_eq!(out.outcome.kind, OutcomeKind::Win);
        // 50 * (0.5*1% + 0.25*2% + 0.125*3% + 0.125*4%)
        let expected = 50.0 * (0.005 + 0.005 + 0.00375 + 0.005);
        assert!((out.outcome.pnl_usdt - expected).abs() < 1e-9);
    }

    #[test]
    fn breakeven_stop_after_first_target_is_a_win() {
        let s = series(&[(10, 101.2, 100.5, 101.0), (20, 100.5, 99.5, 99.8)]);
        let out = Simulator::default()
            .simulate_ladder(&ladder_signal(), &params(), &s)
            .unwrap();
        assert_eq!(out.targets_hit, 1);
        assert_eq!(out.outcome.kind, OutcomeKind::Win);
        assert!((out.outcome.pnl_usdt - 0.25).abs() < 1e-9);
        assert_eq!(out.outcome.exit_price, Some(100.0));
    }

    #[test]
    fn initial_stop_is_a_loss() {
        let s = series(&[(10, 100.0, 94.0, 95.5)]);
        let out = Simulator::default()
            .simulate_ladder(&ladder_signal(), &params(), &s)
            .unwrap();
        assert_eq!(out.targets_hit, 0);
        assert_eq!(out.outcome.kind, OutcomeKind::Loss);
        assert!((out.outcome.pnl_usdt + 2.5).abs() < 1e-9);
    }

    #[test]
    fn several_targets_in_one_candle() {
        // TP1 and TP2 fill at minute 10; the stop trails to TP1 (101) and the
        // next candle's low of 100.2 takes it out.
        let s = series(&[(10, 102.5, 100.5, 102.2)]);
        let out = Simulator::default()
            .simulate_ladder(&ladder_signal(), &params(), &s)
            .unwrap();
        assert_eq!(out.targets_hit, 2);
        assert_eq!(out.outcome.kind, OutcomeKind::Win);
        assert_eq!(out.outcome.exit_price, Some(101.0));
        assert_eq!(out.outcome.exit_time, Some(t0() + Duration::minutes(11)));
        assert!((out.outcome.pnl_usdt - 0.625).abs() < 1e-9);
    }

    #[test]
    fn untouched_ladder_expires_at_window_close() {
        let s = series(&[]);
        let out = Simulator::default()
            .simulate_ladder(&ladder_signal(), &SimulationParams::new(2.5, 5.0, 1), &s)
            .unwrap();
        assert_eq!(out.outcome.kind, OutcomeKind::Expired);
        assert_eq!(out.outcome.exit_time, Some(t0() + Duration::minutes(59)));
        assert!((out.outcome.pnl_usdt - 0.2).abs() < 1e-9);
    }

    #[test]
    fn ladder_honours_entry_timeout() {
        // No dip at t0; the first touch of 100 comes at +90m.
        let s = series(&[
            (0, 100.6, 100.2, 100.4),
            (90, 100.3, 99.8, 100.0),
            (95, 104.2, 100.5, 104.0),
        ]);
        let out = Simulator::default()
            .simulate_ladder(&ladder_signal(), &params(), &s)
            .unwrap();
        assert_eq!(out.outcome.kind, OutcomeKind::NoEntry);
        assert_eq!(out.targets_hit, 0);
    }

    #[test]
    fn without_ladder_falls_back_to_single_exit() {
        let mut sig = ladder_signal();
        sig.take_profits.clear();
        let s = series(&[(10, 102.6, 100.5, 102.5)]);
        let out = Simulator::default()
            .simulate_ladder(&sig, &params(), &s)
            .unwrap();
        assert_eq!(out.targets_hit, 0);
        assert_eq!(out.outcome.kind, OutcomeKind::Win);
    }
}
