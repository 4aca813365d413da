//! Trade simulator: replays one signal under one TP/SL/window against minute candles.
//!
//! Steps:
//! 1. Entry detection: first candle opening inside the entry timeout that reaches the
//!    entry price (resting limit order: LONG fills on `low <= entry`, SHORT on
//!    `high >= entry`). The timeout is independent of the holding window.
//! 2. TP/SL levels from the fill price and the parameter percentages.
//! 3. Resolution scan from the entry candle (inclusive) through the window boundary.
//!    The earliest touching candle decides; same-candle conflicts go to the
//!    [`IntrabarPolicy`].
//! 4. Expiry: no touch before the boundary marks the trade to the close of the last
//!    candle that ends at or before the boundary.

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{
    Candle, CandleSeries, OutcomeKind, PositionSpec, Side, Signal, SimulationParams,
    TradeOutcome,
};
use crate::engine::intrabar::{CandleHit, IntrabarPolicy};

/// Precondition failures. None of these are produced by market behavior.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimulationError {
    #[error(
        "invalid simulation parameters: tp={tp_percent}% sl={sl_percent}% window={hours_window}h"
    )]
    InvalidParams {
        tp_percent: f64,
        sl_percent: f64,
        hours_window: u32,
    },

    #[error("invalid signal for {symbol}: entry {entry} must be positive")]
    InvalidEntry { symbol: String, entry: f64 },

    #[error("insufficient candle coverage for {symbol}: need {required_start} .. {required_end}")]
    InsufficientCoverage {
        symbol: String,
        required_start: NaiveDateTime,
        required_end: NaiveDateTime,
    },
}

/// Where and when the entry order filled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntryFill {
    /// Index into the candle series.
    pub index: usize,
    pub time: NaiveDateTime,
}

/// Minutes after the signal during which the entry order may fill.
pub const DEFAULT_ENTRY_TIMEOUT_MINUTES: u32 = 60;

fn default_entry_timeout() -> u32 {
    DEFAULT_ENTRY_TIMEOUT_MINUTES
}

/// Fixed simulation settings shared by every combination of a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Simulator {
    pub position: PositionSpec,
    pub intrabar: IntrabarPolicy,
    /// Candles opening later than this many minutes after the signal never fill.
    #[serde(default = "default_entry_timeout")]
    pub entry_timeout_minutes: u32,
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new(PositionSpec::default(), IntrabarPolicy::default())
    }
}

impl Simulator {
    pub fn new(position: PositionSpec, intrabar: IntrabarPolicy) -> Self {
        Self {
            position,
            intrabar,
            entry_timeout_minutes: DEFAULT_ENTRY_TIMEOUT_MINUTES,
        }
    }

    pub fn with_entry_timeout(mut self, minutes: u32) -> Self {
        self.entry_timeout_minutes = minutes;
        self
    }

    /// Last candle open time at which the entry may still fill.
    pub fn entry_deadline(&self, signal: &Signal) -> NaiveDateTime {
        signal.signal_time + Duration::minutes(i64::from(self.entry_timeout_minutes))
    }

    /// Simulate `signal` under `params` against `series`.
    ///
    /// `series` must cover `[signal_time, signal_time + hours_window]` and, once the
    /// entry fills, the full window after the fill. Callers fetch with a buffer of at
    /// least the entry timeout after the longest window.
    pub fn simulate(
        &self,
        signal: &Signal,
        params: &SimulationParams,
        series: &CandleSeries,
    ) -> Result<TradeOutcome, SimulationError> {
        let Some(fill) = self.locate_entry(signal, params, series)? else {
            return Ok(TradeOutcome::no_entry());
        };

        let (tp, sl) = params.levels(signal.side, signal.entry);
        let boundary = fill.time + params.window();
        let candles = &series.candles()[fill.index..];

        let mut last_in_window: Option<&Candle> = None;
        for candle in candles.iter().take_while(|c| c.end_time() <= boundary) {
            match self.intrabar.resolve(candle, signal.side, tp, sl) {
                CandleHit::None => last_in_window = Some(candle),
                CandleHit::TakeProfit => {
                    return Ok(self.close(signal, fill, candle, OutcomeKind::Win, tp));
                }
                CandleHit::StopLoss => {
                    return Ok(self.close(signal, fill, candle, OutcomeKind::Loss, sl));
                }
            }
        }

        // The entry candle itself always ends inside any window of at least one hour.
        let last = last_in_window.unwrap_or(&candles[0]);
        Ok(self.close(signal, fill, last, OutcomeKind::Expired, last.close))
    }

    /// Preconditions, then the entry fill inside the timeout. A fill whose window runs
    /// past the supplied data, or a timeout the data does not reach, is a coverage error.
    pub(crate) fn locate_entry(
        &self,
        signal: &Signal,
        params: &SimulationParams,
        series: &CandleSeries,
    ) -> Result<Option<EntryFill>, SimulationError> {
        check_preconditions(signal, params, series)?;

        let deadline = self.entry_deadline(signal);
        let fill = find_entry(series, signal.side, signal.entry, signal.signal_time, deadline);
        let required_end = match fill {
            Some(fill) => fill.time + params.window(),
            None => deadline + Duration::minutes(1),
        };
        let data_end = series.candles().last().map(Candle::end_time);
        if !data_end.is_some_and(|end| end >= required_end) {
            return Err(SimulationError::InsufficientCoverage {
                symbol: signal.symbol.clone(),
                required_start: signal.signal_time,
                required_end,
            });
        }
        Ok(fill)
    }

    fn close(
        &self,
        signal: &Signal,
        fill: EntryFill,
        candle: &Candle,
        kind: OutcomeKind,
        exit_price: f64,
    ) -> TradeOutcome {
        let pnl = self
            .position
            .pnl(signal.side, signal.entry, exit_price, 1.0);
        TradeOutcome::closed(kind, fill.time, candle.timestamp, exit_price, pnl)
    }
}

/// Validate parameters, entry and data coverage before simulating.
pub fn check_preconditions(
    signal: &Signal,
    params: &SimulationParams,
    series: &CandleSeries,
) -> Result<(), SimulationError> {
    if !params.is_valid_for(signal.side) {
        return Err(SimulationError::InvalidParams {
            tp_percent: params.tp_percent,
            sl_percent: params.sl_percent,
            hours_window: params.hours_window,
        });
    }
    if !(signal.entry.is_finite() && signal.entry > 0.0) {
        return Err(SimulationError::InvalidEntry {
            symbol: signal.symbol.clone(),
            entry: signal.entry,
        });
    }
    let required_end = signal.signal_time + params.window();
    if !series.covers(signal.signal_time, required_end) {
        return Err(SimulationError::InsufficientCoverage {
            symbol: signal.symbol.clone(),
            required_start: signal.signal_time,
            required_end,
        });
    }
    Ok(())
}

/// First candle opening in `[from, until]` whose range reaches `entry`.
pub fn find_entry(
    series: &CandleSeries,
    side: Side,
    entry: f64,
    from: NaiveDateTime,
    until: NaiveDateTime,
) -> Option<EntryFill> {
    let start = series.index_at_or_after(from);
    series.candles()[start..]
        .iter()
        .take_while(|c| c.timestamp <= until)
        .position(|c| match side {
            Side::Long => c.low <= entry,
            Side::Short => c.high >= entry,
        })
        .map(|offset| {
            let index = start + offset;
            EntryFill {
                index,
                time: series.candles()[index].timestamp,
            }
        })
}

/// Convenience wrapper with default position sizing and the stop-first policy.
pub fn simulate(
    signal: &Signal,
    params: &SimulationParams,
    series: &CandleSeries,
) -> Result<TradeOutcome, SimulationError> {
    Simulator::default().simulate(signal, params, series)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 12, 18)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn signal(side: Side, entry: f64) -> Signal {
        Signal {
            symbol: "BTCUSDT".into(),
            side,
            entry,
            signal_time: t0(),
            stop_loss: None,
            take_profits: vec![],
            tp_percent: 2.0,
            sl_percent: 5.0,
        }
    }

    /// Minute candles from t0 - 60m, flat at `price` (range ±0.5), with overrides.
    fn series(minutes: i64, price: f64, overrides: &[(i64, f64, f64, f64)]) -> CandleSeries {
        let candles = (-60..minutes)
            .map(|m| {
                let (high, low, close) = overrides
                    .iter()
                    .find(|o| o.0 == m)
                    .map(|o| (o.1, o.2, o.3))
                    .unwrap_or((price + 0.5, price - 0.5, price));
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

    #[test]
    fn long_fills_on_drop_then_wins() {
        let s = series(300, 101.0, &[(5, 101.0, 99.0, 100.0), (30, 102.5, 100.0, 102.0)]);
        let out = simulate(&signal(Side::Long, 100.0), &SimulationParams::new(2.0, 5.0, 4), &s)
            .unwrap();
        assert_eq!(out.kind, OutcomeKind::Win);
        assert_eq!(out.entry_time, Some(t0() + Duration::minutes(5)));
        assert_eq!(out.exit_time, Some(t0() + Duration::minutes(30)));
        assert!((out.exit_price.unwrap() - 102.0).abs() < 1e-9);
        assert!((out.pnl_usdt - 1.0).abs() < 1e-9);
    }

    #[test]
    fn candles_before_signal_time_do_not_fill() {
        // Pre-signal dip to 99 is ignored; price stays above 100 afterwards.
        let s = series(300, 101.0, &[(-10, 101.0, 99.0, 100.0)]);
        let out = simulate(&signal(Side::Long, 100.0), &SimulationParams::new(2.0, 5.0, 4), &s)
            .unwrap();
        assert_eq!(out.kind, OutcomeKind::NoEntry);
        assert_eq!(out.pnl_usdt, 0.0);
    }

    #[test]
    fn short_fills_on_rise_then_loses() {
        let s = series(300, 99.0, &[(1, 100.5, 98.8, 100.0), (50, 105.5, 100.0, 105.0)]);
        let out = simulate(&signal(Side::Short, 100.0), &SimulationParams::new(2.0, 5.0, 4), &s)
            .unwrap();
        assert_eq!(out.kind, OutcomeKind::Loss);
        assert!((out.exit_price.unwrap() - 105.0).abs() < 1e-9);
        assert!((out.pnl_usdt + 2.5).abs() < 1e-9);
    }

    #[test]
    fn entry_candle_counts_for_resolution() {
        let s = series(300, 101.0, &[(0, 102.5, 99.0, 101.0)]);
        let out = simulate(&signal(Side::Long, 100.0), &SimulationParams::new(2.0, 5.0, 4), &s)
            .unwrap();
        assert_eq!(out.kind, OutcomeKind::Win);
        assert_eq!(out.exit_time, out.entry_time);
    }

    #[test]
    fn expires_at_boundary_close_not_later() {
        // Fill at t0; window 1h ends at t0+60m. Candle t0+59m closes at 100.7,
        // candle t0+60m (post-boundary) closes at 101.9 and must be ignored.
        let s = series(
            180,
            100.0,
            &[(59, 100.9, 100.2, 100.7), (60, 101.95, 100.5, 101.9)],
        );
        let out = simulate(&signal(Side::Long, 100.0), &SimulationParams::new(2.0, 5.0, 1), &s)
            .unwrap();
        assert_eq!(out.kind, OutcomeKind::Expired);
        assert_eq!(out.exit_time, Some(t0() + Duration::minutes(59)));
        assert!((out.exit_price.unwrap() - 100.7).abs() < 1e-9);
        assert!((out.pnl_usdt - 0.35).abs() < 1e-9);
    }

    #[test]
    fn insufficient_coverage_is_an_error() {
        let s = series(120, 100.0, &[]);
        let err = simulate(&signal(Side::Long, 100.0), &SimulationParams::new(2.0, 5.0, 4), &s)
            .unwrap_err();
        assert!(matches!(err, SimulationError::InsufficientCoverage { .. }));
    }

    #[test]
    fn invalid_params_fail_fast() {
        let s = series(300, 100.0, &[]);
        let err = simulate(&signal(Side::Long, 100.0), &SimulationParams::new(0.0, 5.0, 4), &s)
            .unwrap_err();
        assert!(matches!(err, SimulationError::InvalidParams { .. }));
    }

    #[test]
    fn invalid_entry_fails_fast() {
        let s = series(300, 100.0, &[]);
        let err = simulate(&signal(Side::Long, 0.0), &SimulationParams::new(2.0, 5.0, 4), &s)
            .unwrap_err();
        assert!(matches!(err, SimulationError::InvalidEntry { .. }));
    }

    #[test]
    fn fill_after_entry_timeout_is_no_entry() {
        // Dip at +90m is past the 60m timeout; the later spike must not count.
        let s = series(600, 101.0, &[(90, 101.0, 99.0, 100.0), (120, 102.5, 100.0, 102.0)]);
        let out = simulate(&signal(Side::Long, 100.0), &SimulationParams::new(2.0, 5.0, 4), &s)
            .unwrap();
        assert_eq!(out.kind, OutcomeKind::NoEntry);

        let patient = Simulator::default().with_entry_timeout(120);
        let out = patient
            .simulate(&signal(Side::Long, 100.0), &SimulationParams::new(2.0, 5.0, 4), &s)
            .unwrap();
        assert_eq!(out.kind, OutcomeKind::Win);
        assert_eq!(out.entry_time, Some(t0() + Duration::minutes(90)));
    }

    #[test]
    fn late_fill_without_a_full_window_is_a_coverage_error() {
        // Data covers signal + 4h but not fill (+45m) + 4h.
        let s = series(260, 101.0, &[(45, 101.0, 99.0, 100.0)]);
        let err = simulate(&signal(Side::Long, 100.0), &SimulationParams::new(2.0, 5.0, 4), &s)
            .unwrap_err();
        match err {
            SimulationError::InsufficientCoverage { required_end, .. } => {
                assert_eq!(required_end, t0() + Duration::minutes(45 + 240));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn entry_at_the_timeout_minute_still_fills() {
        let s = series(360, 101.0, &[(60, 101.0, 99.0, 100.0)]);
        let out = simulate(&signal(Side::Long, 100.0), &SimulationParams::new(2.0, 5.0, 4), &s)
            .unwrap();
        assert_eq!(out.kind, OutcomeKind::Expired);
        assert_eq!(out.entry_time, Some(t0() + Duration::minutes(60)));
    }

    #[test]
    fn short_with_stop_beyond_double_entry_is_valid() {
        let s = series(300, 99.0, &[(1, 100.5, 98.8, 100.0), (50, 98.5, 97.5, 98.0)]);
        let out = simulate(&signal(Side::Short, 100.0), &SimulationParams::new(2.0, 150.0, 4), &s)
            .unwrap();
        assert_eq!(out.kind, OutcomeKind::Win);

        let err = simulate(&signal(Side::Long, 100.0), &SimulationParams::new(2.0, 150.0, 4), &s)
            .unwrap_err();
        assert!(matches!(err, SimulationError::InvalidParams { .. }));
    }

    #[test]
    fn leverage_scales_pnl() {
        let s = series(300, 101.0, &[(5, 101.0, 99.0, 100.0), (30, 102.5, 100.0, 102.0)]);
        let sim = Simulator::new(
            PositionSpec {
                size_usdt: 100.0,
                leverage: 10.0,
            },
            IntrabarPolicy::StopFirst,
        );
        let out = sim
            .simulate(&signal(Side::Long, 100.0), &SimulationParams::new(2.0, 5.0, 4), &s)
            .unwrap();
        assert!((out.pnl_usdt - 20.0).abs() < 1e-9);
    }
}
