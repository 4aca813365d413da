//! Domain types for signalab

pub mod candle;
pub mod outcome;
pub mod params;
pub mod signal;

pub use candle::{Candle, CandleSeries, Gap, SeriesError};
pub use outcome::{OutcomeKind, TradeOutcome};
pub use params::{PositionSpec, SimulationParams};
pub use signal::{
    level_from_percent, percent_from_level, MalformedSignal, RawSignal, Side, Signal,
    SignalDefaults, StopLoss,
};

/// Symbol type alias
pub type Symbol = String;
