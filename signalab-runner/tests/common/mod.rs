//! Shared fixtures: a deterministic synthetic market and signals on it.

#![allow(dead_code)]

use chrono::{Duration, NaiveDate, NaiveDateTime};

use signalab_core::data::MemoryProvider;
use signalab_core::domain::{Candle, Side, Signal};
use signalab_runner::config::{PercentRange, SweepConfig};
use signalab_runner::signal_loader::SignalSet;

pub const SYMBOLS: [&str; 2] = ["BTCUSDT", "ETHUSDT"];

/// Four days of minute candles.
pub const MINUTES: i64 = 4 * 24 * 60;

pub fn t0() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 3, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

/// Two superimposed waves, phase-shifted per symbol.
pub fn price_at(symbol_idx: usize, minute: i64) -> f64 {
    let m = minute as f64 + 37.0 * symbol_idx as f64;
    100.0 + 3.0 * (m / 90.0).sin() + 1.5 * (m / 17.0).sin()
}

pub fn candles(symbol_idx: usize) -> Vec<Candle> {
    (0..MINUTES)
        .map(|m| {
            let open = price_at(symbol_idx, m);
            let close = price_at(symbol_idx, m + 1);
            Candle {
                timestamp: t0() + Duration::minutes(m),
                open,
                high: open.max(close) + 0.3,
                low: open.min(close) - 0.3,
                close,
                volume: 10.0,
            }
        })
        .collect()
}

pub fn provider() -> MemoryProvider {
    SYMBOLS
        .iter()
        .enumerate()
        .fold(MemoryProvider::new(), |p, (i, sym)| {
            p.with_symbol(sym, candles(i))
        })
}

/// One signal every two hours over the first two days, alternating side.
pub fn signals() -> Vec<Signal> {
    let mut out = Vec::new();
    for (i, sym) in SYMBOLS.iter().enumerate() {
        for k in 0..24 {
            let minute = 60 + k * 120 + i as i64 * 7;
            let side = if k % 2 == 0 { Side::Long } else { Side::Short };
            let px = price_at(i, minute);
            let entry = match side {
                Side::Long => px - 0.4,
                Side::Short => px + 0.4,
            };
            out.push(Signal {
                symbol: (*sym).to_string(),
                side,
                entry,
                signal_time: t0() + Duration::minutes(minute),
                stop_loss: None,
                take_profits: vec![],
                tp_percent: 2.0,
                sl_percent: 5.0,
            });
        }
    }
    out
}

pub fn signal_set() -> SignalSet {
    SignalSet::from_signals(signals())
}

/// 4 tp values x 4 sl values x 2 windows.
pub fn config() -> SweepConfig {
    SweepConfig {
        tp_range: PercentRange::new(0.5, 2.0, 0.5),
        sl_range: PercentRange::new(0.5, 2.0, 0.5),
        windows: vec![4, 12],
        ..SweepConfig::default()
    }
}
