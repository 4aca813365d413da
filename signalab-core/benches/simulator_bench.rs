//! Criterion benchmarks for signalab hot paths.
//!
//! Benchmarks:
//! 1. Single-exit simulation over a 12h window (expiry path, full scan)
//! 2. Laddered-exit simulation
//! 3. One signal across a 50×50 TP/SL grid

use chrono::{Duration, NaiveDate, NaiveDateTime};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use signalab_core::domain::{Candle, CandleSeries, Side, Signal, SimulationParams, StopLoss};
use signalab_core::engine::Simulator;

// ── Helpers ──────────────────────────────────────────────────────────

fn t0() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 1, 6)
        .unwrap()
        .and_hms_opt(9, 0, 0)
        .unwrap()
}

/// Sine-wave minute candles around 100 from `t0 - 1h` to `t0 + 14h`.
fn make_series() -> CandleSeries {
    let start = t0() - Duration::hours(1);
    let candles = (0..15 * 60)
        .map(|i| {
            let close = 100.0 + (i as f64 * 0.05).sin() * 1.5;
            Candle {
                timestamp: start + Duration::minutes(i),
                open: close - 0.05,
                high: close + 0.3,
                low: close - 0.3,
                close,
                volume: 10.0,
            }
        })
        .collect();
    CandleSeries::new(candles).unwrap()
}

fn make_signal() -> Signal {
    Signal {
        symbol: "BENCHUSDT".into(),
        side: Side::Long,
        entry: 100.0,
        signal_time: t0(),
        stop_loss: Some(StopLoss::Price(97.0)),
        take_profits: vec![100.5, 101.0, 101.5, 102.0],
        tp_percent: 1.25,
        sl_percent: 3.0,
    }
}

// ── Benchmarks ───────────────────────────────────────────────────────

fn bench_simulate(c: &mut Criterion) {
    let series = make_series();
    let signal = make_signal();
    let sim = Simulator::default();

    let mut group = c.benchmark_group("simulate");
    for window in [4u32, 8, 12] {
        // Levels outside the sine range force a full scan to expiry.
        let params = SimulationParams::new(5.0, 5.0, window);
        group.bench_with_input(BenchmarkId::new("expiry_scan", window), &params, |b, p| {
            b.iter(|| sim.simulate(black_box(&signal), black_box(p), black_box(&series)))
        });
    }
    group.finish();
}

fn bench_ladder(c: &mut Criterion) {
    let series = make_series();
    let signal = make_signal();
    let sim = Simulator::default();
    let params = SimulationParams::new(1.25, 3.0, 12);

    c.bench_function("simulate_ladder_12h", |b| {
        b.iter(|| sim.simulate_ladder(black_box(&signal), black_box(&params), black_box(&series)))
    });
}

fn bench_grid(c: &mut Criterion) {
    let series = make_series();
    let signal = make_signal();
    let sim = Simulator::default();
    let percents: Vec<f64> = (1..=50).map(|p| f64::from(p) / 10.0).collect();

    c.bench_function("grid_50x50_12h_one_signal", |b| {
        b.iter(|| {
            let mut pnl = 0.0;
            for &tp in &percents {
                for &sl in &percents {
                    let params = SimulationParams::new(tp, sl, 12);
                    if let Ok(out) = sim.simulate(&signal, &params, &series) {
                        pnl += out.pnl_usdt;
                    }
                }
            }
            black_box(pnl)
        })
    });
}

criterion_group!(benches, bench_simulate, bench_ladder, bench_grid);
criterion_main!(benches);
