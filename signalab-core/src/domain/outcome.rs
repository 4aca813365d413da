//! TradeOutcome: the single result of simulating one signal under one parameter set.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a simulated trade ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeKind {
    /// Entry price never reached in the available data.
    NoEntry,
    /// Take-profit resolved first.
    Win,
    /// Stop-loss resolved first (including same-candle conflicts).
    Loss,
    /// Window elapsed with neither level touched; marked to the boundary close.
    Expired,
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NoEntry => "no_entry",
            Self::Win => "win",
            Self::Loss => "loss",
            Self::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// Immutable result of one simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub kind: OutcomeKind,
    pub entry_time: Option<NaiveDateTime>,
    pub exit_time: Option<NaiveDateTime>,
    pub exit_price: Option<f64>,
    pub pnl_usdt: f64,
}

impl TradeOutcome {
    pub fn no_entry() -> Self {
        Self {
            kind: OutcomeKind::NoEntry,
            entry_time: None,
            exit_time: None,
            exit_price: None,
            pnl_usdt: 0.0,
        }
    }

    pub fn closed(
        kind: OutcomeKind,
        entry_time: NaiveDateTime,
        exit_time: NaiveDateTime,
        exit_price: f64,
        pnl_usdt: f64,
    ) -> Self {
        Self {
            kind,
            entry_time: Some(entry_time),
            exit_time: Some(exit_time),
            exit_price: Some(exit_price),
            pnl_usdt,
        }
    }

    pub fn entry_hit(&self) -> bool {
        self.kind != OutcomeKind::NoEntry
    }

    /// Minutes between entry fill and exit, if the trade was entered.
    pub fn duration_minutes(&self) -> Option<i64> {
        Some((self.exit_time? - self.entry_time?).num_minutes())
    }
}
