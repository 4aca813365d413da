//! Per-combination aggregation of trade outcomes.
//!
//! An [`AggregateResult`] stores only base counters and PnL sums. Every rate
//! and average is derived on demand, so partial aggregates can be summed in any
//! order and still agree with a single-pass computation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use signalab_core::domain::{OutcomeKind, TradeOutcome};

use crate::grid::ComboKey;

/// Aggregates for a whole grid, ordered by key.
pub type AggregateMap = BTreeMap<ComboKey, AggregateResult>;

/// Counters and PnL sums for one (tp, sl, window) combination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub tp_percent: f64,
    pub sl_percent: f64,
    pub hours_window: u32,

    /// Simulated signals: wins + losses + expired + no_entry.
    pub total_trades: u64,
    pub wins: u64,
    pub losses: u64,
    pub expired: u64,
    pub no_entry: u64,

    /// Signals skipped for missing price data. Not part of `total_trades`.
    pub skipped: u64,

    pub total_pnl: f64,
    /// Sum of positive trade PnL.
    pub gross_profit: f64,
    /// Magnitude of the sum of negative trade PnL.
    pub gross_loss: f64,
    /// Sum of PnL over expired trades.
    pub expired_pnl: f64,
    /// Sum of PnL over winning trades.
    pub win_pnl: f64,
    /// Sum of PnL over losing trades.
    pub loss_pnl: f64,
}

impl AggregateResult {
    pub fn new(key: ComboKey) -> Self {
        Self {
            tp_percent: key.tp_percent(),
            sl_percent: key.sl_percent(),
            hours_window: key.hours_window,
            total_trades: 0,
            wins: 0,
            losses: 0,
            expired: 0,
            no_entry: 0,
            skipped: 0,
            total_pnl: 0.0,
            gross_profit: 0.0,
            gross_loss: 0.0,
            expired_pnl: 0.0,
            win_pnl: 0.0,
            loss_pnl: 0.0,
        }
    }

    pub fn key(&self) -> ComboKey {
        ComboKey::new(self.tp_percent, self.sl_percent, self.hours_window)
    }

    /// Fold one simulated outcome into the counters.
    pub fn record(&mut self, outcome: &TradeOutcome) {
        self.total_trades += 1;
        let pnl = outcome.pnl_usdt;
        match outcome.kind {
            OutcomeKind::NoEntry => {
                self.no_entry += 1;
                return;
            }
            OutcomeKind::Win => {
                self.wins += 1;
                self.win_pnl += pnl;
            }
            OutcomeKind::Loss => {
                self.losses += 1;
                self.loss_pnl += pnl;
            }
            OutcomeKind::Expired => {
                self.expired += 1;
                self.expired_pnl += pnl;
            }
        }
        self.total_pnl += pnl;
        if pnl > 0.0 {
            self.gross_profit += pnl;
        } else {
            self.gross_loss -= pnl;
        }
    }

    /// Count a signal that could not be simulated.
    pub fn record_skip(&mut self) {
        self.skipped += 1;
    }

    /// Sum another partial aggregate for the same key into this one.
    pub fn merge(&mut self, other: &AggregateResult) {
        debug_assert_eq!(self.key(), other.key(), "merging aggregates of different keys");
        self.total_trades += other.total_trades;
        self.wins += other.wins;
        self.losses += other.losses;
        self.expired += other.expired;
        self.no_entry += other.no_entry;
        self.skipped += other.skipped;
        self.total_pnl += other.total_pnl;
        self.gross_profit += other.gross_profit;
        self.gross_loss += other.gross_loss;
        self.expired_pnl += other.expired_pnl;
        self.win_pnl += other.win_pnl;
        self.loss_pnl += other.loss_pnl;
    }

    // ── Derived metrics ──

    /// Trades whose entry filled.
    pub fn filled_trades(&self) -> u64 {
        self.wins + self.losses + self.expired
    }

    /// Percent of simulated signals whose entry filled.
    pub fn entry_hit_rate(&self) -> f64 {
        percent(self.filled_trades(), self.total_trades)
    }

    /// Percent of filled trades that hit TP.
    pub fn win_rate(&self) -> f64 {
        percent(self.wins, self.filled_trades())
    }

    pub fn loss_rate(&self) -> f64 {
        percent(self.losses, self.filled_trades())
    }

    pub fn expired_rate(&self) -> f64 {
        percent(self.expired, self.filled_trades())
    }

    /// Average realized PnL per filled trade.
    pub fn expectancy(&self) -> f64 {
        mean(self.total_pnl, self.filled_trades())
    }

    pub fn avg_pnl(&self) -> f64 {
        self.expectancy()
    }

    pub fn avg_win(&self) -> f64 {
        mean(self.win_pnl, self.wins)
    }

    pub fn avg_loss(&self) -> f64 {
        mean(self.loss_pnl, self.losses)
    }

    pub fn avg_expired_pnl(&self) -> f64 {
        mean(self.expired_pnl, self.expired)
    }

    /// Gross profit over gross loss. `None` when nothing was lost.
    pub fn profit_factor(&self) -> Option<f64> {
        if self.gross_loss > 0.0 {
            Some(self.gross_profit / self.gross_loss)
        } else {
            None
        }
    }

    /// `total_trades == wins + losses + expired + no_entry`.
    pub fn is_consistent(&self) -> bool {
        self.total_trades == self.wins + self.losses + self.expired + self.no_entry
    }
}

fn percent(n: u64, d: u64) -> f64 {
    if d == 0 {
        0.0
    } else {
        n as f64 / d as f64 * 100.0
    }
}

fn mean(sum: f64, n: u64) -> f64 {
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

/// Sum `other` into `into`, key by key.
pub fn merge_maps(into: &mut AggregateMap, other: AggregateMap) {
    for (key, agg) in other {
        match into.get_mut(&key) {
            Some(existing) => existing.merge(&agg),
            None => {
                into.insert(key, agg);
            }
        }
    }
}
