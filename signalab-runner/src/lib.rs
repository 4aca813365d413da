//! Signalab Runner: parameter sweeps, aggregation, ranking, reports.
//!
//! This crate builds on `signalab-core` to provide:
//! - Signal CSV loading with per-row rejection
//! - Data acquisition ahead of simulation, with skip accounting
//! - The (tp, sl, window) parameter grid and its parallel evaluation
//! - Mergeable per-combination aggregates
//! - Composite scoring, minimum-support filtering and ranking
//! - Chronological replay with balance and position limits
//! - CSV/JSON report artifacts and a run manifest

pub mod acquisition;
pub mod aggregate;
pub mod config;
pub mod export;
pub mod grid;
pub mod replay;
pub mod scoring;
pub mod signal_loader;
pub mod sweep;

pub use acquisition::{
    acquire, download, AcquisitionWindow, Acquired, DownloadReport, PricedSignal, SkipTally,
    SkippedSignal,
};
pub use aggregate::{merge_maps, AggregateMap, AggregateResult};
pub use config::{
    ConfigError, GridConfig, Partitioning, PercentRange, RankingConfig, ReplayConfig, RunId,
    SweepConfig,
};
pub use export::{load_aggregates, save_recommendations, save_replay, save_sweep, AggregatesFile};
pub use grid::{ComboKey, ParamSpace};
pub use replay::{
    replay, run_replay, ExitModel, ReplayReport, ReplayStats, ReplayStatus, ReplaySummary,
    ReplayTrade, WindowReplay,
};
pub use scoring::{
    rank, top_by_expectancy, Exclusion, Normalization, Ranking, ScoredCombination, Scorer,
};
pub use signal_loader::{
    load_signals, read_signals, LoadError, RejectedSignal, SignalSet, SignalSummary,
};
pub use sweep::{run_grid, run_sweep, CancelToken, GridResult, GridRunner, SweepRun, SweepStats};
