//! Replay mode: every signal with its own levels, in chronological order.
//!
//! Signals carrying tp1..tp4 and a stop-loss run through the laddered-exit
//! simulator; the rest run the single-exit simulator at the configured default
//! TP and their effective SL percentage. A running balance gates new trades:
//! 1. Balance below the position size → `InsufficientBalance`
//! 2. Open positions at signal time (entry ≤ t < exit) at the limit → `MaxPositionsReached`
//! 3. Otherwise the trade is simulated and its PnL applied to the balance
//!
//! A new signal for a symbol within one window of its previous signal is
//! counted as a signal update.

use std::collections::HashMap;
use std::fmt;

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use signalab_core::data::PriceSeriesProvider;
use signalab_core::domain::{OutcomeKind, Side, SimulationParams};
use signalab_core::engine::{SimulationError, Simulator};
use tracing::{debug, info};

use crate::acquisition::{acquire, AcquisitionWindow, PricedSignal, SkippedSignal};
use crate::config::{ConfigError, SweepConfig};
use crate::signal_loader::SignalSet;

/// What happened to one signal during replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayStatus {
    Completed,
    InsufficientBalance,
    MaxPositionsReached,
    DataUnavailable,
    /// Levels or entry the simulator rejects, independent of market data.
    InvalidSignal,
}

impl fmt::Display for ReplayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Completed => "completed",
            Self::InsufficientBalance => "insufficient_balance",
            Self::MaxPositionsReached => "max_positions_reached",
            Self::DataUnavailable => "data_unavailable",
            Self::InvalidSignal => "invalid_signal",
        };
        f.write_str(s)
    }
}

/// Which exit model a trade used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitModel {
    Ladder,
    SingleExit,
}

/// One row of the replay trade table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayTrade {
    pub symbol: String,
    pub side: Side,
    pub signal_time: NaiveDateTime,
    pub entry: f64,
    pub status: ReplayStatus,
    pub exit_model: Option<ExitModel>,
    pub tp_percent: Option<f64>,
    pub sl_percent: Option<f64>,
    pub outcome: Option<OutcomeKind>,
    pub entry_time: Option<NaiveDateTime>,
    pub exit_time: Option<NaiveDateTime>,
    pub exit_price: Option<f64>,
    pub pnl_usdt: f64,
    pub targets_hit: usize,
    pub balance_after: f64,
    /// Skip cause for `DataUnavailable` and `InvalidSignal` rows.
    pub note: Option<String>,
}

impl ReplayTrade {
    /// Entry filled and the trade closed (win, loss or expired).
    pub fn is_filled(&self) -> bool {
        self.status == ReplayStatus::Completed
            && matches!(
                self.outcome,
                Some(OutcomeKind::Win | OutcomeKind::Loss | OutcomeKind::Expired)
            )
    }

    pub fn duration_minutes(&self) -> Option<i64> {
        Some((self.exit_time? - self.entry_time?).num_minutes())
    }
}

/// Outcome statistics over a subset of filled trades.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplayStats {
    pub trades: u64,
    pub wins: u64,
    pub losses: u64,
    pub expired: u64,
    pub total_pnl: f64,
    pub win_pnl: f64,
    pub loss_pnl: f64,
}

impl ReplayStats {
    fn record(&mut self, kind: OutcomeKind, pnl: f64) {
        match kind {
            OutcomeKind::NoEntry => return,
            OutcomeKind::Win => {
                self.wins += 1;
                self.win_pnl += pnl;
            }
            OutcomeKind::Loss => {
                self.losses += 1;
                self.loss_pnl += pnl;
            }
            OutcomeKind::Expired => self.expired += 1,
        }
        self.trades += 1;
        self.total_pnl += pnl;
    }

    pub fn win_rate(&self) -> f64 {
        if self.trades == 0 {
            0.0
        } else {
            self.wins as f64 / self.trades as f64 * 100.0
        }
    }

    pub fn expectancy(&self) -> f64 {
        if self.trades == 0 {
            0.0
        } else {
            self.total_pnl / self.trades as f64
        }
    }

    pub fn avg_win(&self) -> f64 {
        if self.wins == 0 {
            0.0
        } else {
            self.win_pnl / self.wins as f64
        }
    }

    pub fn avg_loss(&self) -> f64 {
        if self.losses == 0 {
            0.0
        } else {
            self.loss_pnl / self.losses as f64
        }
    }

    /// Winning PnL over the magnitude of losing PnL.
    pub fn profit_factor(&self) -> Option<f64> {
        (self.loss_pnl < 0.0).then(|| self.win_pnl / -self.loss_pnl)
    }
}

/// Headline numbers for one window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplaySummary {
    pub hours_window: u32,
    pub starting_balance: f64,
    pub final_balance: f64,
    pub total_signals: usize,
    pub signal_updates: usize,
    pub entries_filled: usize,
    pub no_entry: usize,
    pub insufficient_balance: usize,
    pub max_positions_reached: usize,
    pub data_unavailable: usize,
    #[serde(default)]
    pub invalid_signal: usize,
    pub overall: ReplayStats,
    pub long: ReplayStats,
    pub short: ReplayStats,
    pub ladder: ReplayStats,
    pub single_exit: ReplayStats,
}

impl ReplaySummary {
    /// Percent return on the starting balance.
    pub fn return_pct(&self) -> f64 {
        if self.starting_balance > 0.0 {
            (self.final_balance - self.starting_balance) / self.starting_balance * 100.0
        } else {
            0.0
        }
    }
}

/// Replay of one window.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowReplay {
    pub summary: ReplaySummary,
    pub trades: Vec<ReplayTrade>,
}

/// Replay of every configured window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplayReport {
    pub windows: Vec<WindowReplay>,
}

enum Input<'a> {
    Priced(&'a PricedSignal),
    Skipped(&'a SkippedSignal),
}

impl Input<'_> {
    fn time(&self) -> NaiveDateTime {
        match self {
            Input::Priced(p) => p.signal.signal_time,
            Input::Skipped(s) => s.signal_time,
        }
    }

    fn symbol(&self) -> &str {
        match self {
            Input::Priced(p) => &p.signal.symbol,
            Input::Skipped(s) => &s.symbol,
        }
    }
}

/// Replay acquired signals over every configured window.
pub fn replay(
    priced: &[PricedSignal],
    skipped: &[SkippedSignal],
    config: &SweepConfig,
) -> Result<ReplayReport, ConfigError> {
    config.validate()?;
    let mut inputs: Vec<Input<'_>> = priced
        .iter()
        .map(Input::Priced)
        .chain(skipped.iter().map(Input::Skipped))
        .collect();
    inputs.sort_by_key(|i| i.time());

    let mut windows: Vec<u32> = config.windows.clone();
    windows.sort_unstable();
    windows.dedup();

    let simulator = config.simulator();
    let windows = windows
        .into_iter()
        .map(|h| replay_window(&inputs, h, &simulator, config))
        .collect();
    Ok(ReplayReport { windows })
}

/// Acquire data for every signal, then replay.
pub fn run_replay<P>(
    config: &SweepConfig,
    signals: &SignalSet,
    provider: &P,
) -> Result<ReplayReport, ConfigError>
where
    P: PriceSeriesProvider + ?Sized,
{
    config.validate()?;
    let acquired = acquire(
        signals.signals(),
        provider,
        AcquisitionWindow::from_config(config),
    );
    replay(&acquired.priced, &acquired.skipped, config)
}

fn replay_window(
    inputs: &[Input<'_>],
    hours_window: u32,
    simulator: &Simulator,
    config: &SweepConfig,
) -> WindowReplay {
    let window = Duration::hours(i64::from(hours_window));
    let size = config.position.size_usdt;
    let mut balance = config.replay.starting_balance;
    let mut open: Vec<(NaiveDateTime, NaiveDateTime)> = Vec::new();
    let mut last_seen: HashMap<&str, NaiveDateTime> = HashMap::new();

    let mut summary = ReplaySummary {
        hours_window,
        starting_balance: balance,
        final_balance: balance,
        total_signals: inputs.len(),
        signal_updates: 0,
        entries_filled: 0,
        no_entry: 0,
        insufficient_balance: 0,
        max_positions_reached: 0,
        data_unavailable: 0,
        invalid_signal: 0,
        overall: ReplayStats::default(),
        long: ReplayStats::default(),
        short: ReplayStats::default(),
        ladder: ReplayStats::default(),
        single_exit: ReplayStats::default(),
    };
    let mut trades = Vec::with_capacity(inputs.len());

    for input in inputs {
        let t = input.time();
        if let Some(prev) = last_seen.insert(input.symbol(), t) {
            if t - prev <= window {
                summary.signal_updates += 1;
            }
        }

        let priced = match input {
            Input::Skipped(s) => {
                summary.data_unavailable += 1;
                trades.push(skipped_row(s, balance));
                continue;
            }
            Input::Priced(p) => *p,
        };
        let signal = &priced.signal;
        let mut row = ReplayTrade {
            symbol: signal.symbol.clone(),
            side: signal.side,
            signal_time: t,
            entry: signal.entry,
            status: ReplayStatus::Completed,
            exit_model: None,
            tp_percent: None,
            sl_percent: None,
            outcome: None,
            entry_time: None,
            exit_time: None,
            exit_price: None,
            pnl_usdt: 0.0,
            targets_hit: 0,
            balance_after: balance,
            note: None,
        };

        open.retain(|&(_, exit)| exit > t);
        let open_now = open.iter().filter(|&&(entry, _)| entry <= t).count();
        if config
            .replay
            .max_concurrent_positions
            .is_some_and(|max| open_now >= max)
        {
            summary.max_positions_reached += 1;
            row.status = ReplayStatus::MaxPositionsReached;
            trades.push(row);
            continue;
        }
        if balance < size {
            summary.insufficient_balance += 1;
            row.status = ReplayStatus::InsufficientBalance;
            trades.push(row);
            continue;
        }

        let (model, tp_percent) = if signal.has_ladder() {
            (ExitModel::Ladder, signal.tp_percent)
        } else {
            (ExitModel::SingleExit, config.defaults.tp_percent)
        };
        let params = SimulationParams::new(tp_percent, signal.sl_percent, hours_window);
        let result = match model {
            ExitModel::Ladder => {
                simulator
                    .simulate_ladder(signal, &params, &priced.series)
                    .map(|l| (l.outcome, l.targets_hit))
            }
            ExitModel::SingleExit => simulator
                .simulate(signal, &params, &priced.series)
                .map(|o| (o, 0)),
        };
        row.exit_model = Some(model);
        row.tp_percent = Some(tp_percent);
        row.sl_percent = Some(signal.sl_percent);

        let (outcome, targets_hit) = match result {
            Ok(r) => r,
            Err(e) => {
                debug!(symbol = %signal.symbol, reason = %e, "replay skipped signal");
                row.status = match e {
                    SimulationError::InsufficientCoverage { .. } => {
                        summary.data_unavailable += 1;
                        ReplayStatus::DataUnavailable
                    }
                    SimulationError::InvalidParams { .. }
                    | SimulationError::InvalidEntry { .. } => {
                        summary.invalid_signal += 1;
                        ReplayStatus::InvalidSignal
                    }
                };
                row.note = Some(e.to_string());
                trades.push(row);
                continue;
            }
        };

        row.outcome = Some(outcome.kind);
        row.entry_time = outcome.entry_time;
        row.exit_time = outcome.exit_time;
        row.exit_price = outcome.exit_price;
        row.pnl_usdt = outcome.pnl_usdt;
        row.targets_hit = targets_hit;

        if let (Some(entry), Some(exit)) = (outcome.entry_time, outcome.exit_time) {
            summary.entries_filled += 1;
            balance += outcome.pnl_usdt;
            open.push((entry, exit));

            let kind = outcome.kind;
            let pnl = outcome.pnl_usdt;
            summary.overall.record(kind, pnl);
            match signal.side {
                Side::Long => summary.long.record(kind, pnl),
                Side::Short => summary.short.record(kind, pnl),
            }
            match model {
                ExitModel::Ladder => summary.ladder.record(kind, pnl),
                ExitModel::SingleExit => summary.single_exit.record(kind, pnl),
            }
        } else {
            summary.no_entry += 1;
        }
        row.balance_after = balance;
        trades.push(row);
    }

    summary.final_balance = balance;
    info!(
        hours_window,
        filled = summary.entries_filled,
        final_balance = balance,
        updates = summary.signal_updates,
        "replay window finished"
    );
    WindowReplay { summary, trades }
}

fn skipped_row(s: &SkippedSignal, balance: f64) -> ReplayTrade {
    ReplayTrade {
        symbol: s.symbol.clone(),
        side: s.side,
        signal_time: s.signal_time,
        entry: s.entry,
        status: ReplayStatus::DataUnavailable,
        exit_model: None,
        tp_percent: None,
        sl_percent: None,
        outcome: None,
        entry_time: None,
        exit_time: None,
        exit_price: None,
        pnl_usdt: 0.0,
        targets_hit: 0,
        balance_after: balance,
        note: Some(s.reason.clone()),
    }
}
