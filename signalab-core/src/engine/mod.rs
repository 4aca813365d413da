//! Trade simulation engine: replays one signal under one parameter set.
//!
//! 1. Entry: resting limit order at the signal's entry price
//! 2. Resolution: earliest TP/SL touch inside the holding window
//! 3. Intrabar: same-candle conflicts resolved by [`IntrabarPolicy`]
//! 4. Expiry: mark-to-close at the window boundary

pub mod intrabar;
pub mod ladder;
pub mod simulator;

pub use intrabar::{CandleHit, IntrabarPolicy};
pub use ladder::{LadderOutcome, LADDER_CLOSE_FRACTIONS};
pub use simulator::{
    check_preconditions, find_entry, simulate, EntryFill, SimulationError, Simulator,
    DEFAULT_ENTRY_TIMEOUT_MINUTES,
};
