//! Grid search over (tp, sl, window) combinations.
//!
//! Every combination is independent. Work is split either per combination
//! (each task owns one aggregate) or per signal batch (each task owns a full
//! aggregate map); partial maps are combined with [`merge_maps`], which is
//! associative and commutative, so the split never changes the result.
//!
//! Cancellation is coarse: the token is checked before each combination or
//! batch, and a cancelled run returns what finished, flagged `cancelled`.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use signalab_core::data::PriceSeriesProvider;
use signalab_core::engine::Simulator;
use tracing::{debug, info, warn};

use crate::acquisition::{acquire, AcquisitionWindow, PricedSignal, SkipTally, SkippedSignal};
use crate::aggregate::{merge_maps, AggregateMap, AggregateResult};
use crate::config::{ConfigError, Partitioning, RunId, SweepConfig};
use crate::grid::{ComboKey, ParamSpace};
use crate::signal_loader::{SignalSet, SignalSummary};

/// Shared flag for aborting a run between combinations.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Aggregates produced by one grid run.
#[derive(Debug, Clone, Default)]
pub struct GridResult {
    pub aggregates: AggregateMap,
    /// Combinations in the parameter space.
    pub combinations: usize,
    /// Tasks (combinations or batches) that ran to completion.
    pub completed_tasks: usize,
    pub total_tasks: usize,
    pub cancelled: bool,
}

/// Grid executor.
#[derive(Debug, Clone)]
pub struct GridRunner {
    simulator: Simulator,
    partitioning: Partitioning,
    batch_size: usize,
    parallel: bool,
    cancel: CancelToken,
}

impl Default for GridRunner {
    fn default() -> Self {
        Self::new(Simulator::default())
    }
}

impl GridRunner {
    pub fn new(simulator: Simulator) -> Self {
        Self {
            simulator,
            partitioning: Partitioning::Combination,
            batch_size: 64,
            parallel: true,
            cancel: CancelToken::new(),
        }
    }

    pub fn from_config(config: &SweepConfig) -> Self {
        Self::new(config.simulator())
            .with_partitioning(config.grid.partitioning)
            .with_batch_size(config.grid.batch_size)
            .with_parallelism(config.grid.parallel)
    }

    pub fn with_partitioning(mut self, partitioning: Partitioning) -> Self {
        self.partitioning = partitioning;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Enables or disables parallel execution.
    pub fn with_parallelism(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Run every signal through every combination.
    pub fn run(&self, signals: &[PricedSignal], space: &ParamSpace) -> GridResult {
        self.run_with_progress(signals, space, |_, _| {})
    }

    /// Run with a callback invoked after each task as `(done, total)`.
    pub fn run_with_progress<F>(
        &self,
        signals: &[PricedSignal],
        space: &ParamSpace,
        progress: F,
    ) -> GridResult
    where
        F: Fn(usize, usize) + Send + Sync,
    {
        let keys = space.keys();
        let started = Instant::now();
        info!(
            combinations = keys.len(),
            signals = signals.len(),
            partitioning = ?self.partitioning,
            parallel = self.parallel,
            "grid started"
        );

        let result = match self.partitioning {
            Partitioning::Combination => self.by_combination(signals, &keys, &progress),
            Partitioning::SignalBatch => self.by_signal_batch(signals, &keys, &progress),
        };

        if result.cancelled {
            warn!(
                completed = result.completed_tasks,
                total = result.total_tasks,
                "grid cancelled, returning partial aggregates"
            );
        }
        info!(
            aggregates = result.aggregates.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "grid finished"
        );
        result
    }

    fn by_combination<F>(
        &self,
        signals: &[PricedSignal],
        keys: &[ComboKey],
        progress: &F,
    ) -> GridResult
    where
        F: Fn(usize, usize) + Send + Sync,
    {
        let total = keys.len();
        let done = AtomicUsize::new(0);
        let task = |key: &ComboKey| -> Option<(ComboKey, AggregateResult)> {
            if self.cancel.is_cancelled() {
                return None;
            }
            let agg = self.aggregate_combination(*key, signals);
            progress(done.fetch_add(1, Ordering::Relaxed) + 1, total);
            Some((*key, agg))
        };

        let finished: Vec<(ComboKey, AggregateResult)> = if self.parallel {
            keys.par_iter().filter_map(task).collect()
        } else {
            keys.iter().filter_map(task).collect()
        };

        let completed_tasks = finished.len();
        GridResult {
            aggregates: finished.into_iter().collect(),
            combinations: total,
            completed_tasks,
            total_tasks: total,
            cancelled: completed_tasks < total,
        }
    }

    fn by_signal_batch<F>(
        &self,
        signals: &[PricedSignal],
        keys: &[ComboKey],
        progress: &F,
    ) -> GridResult
    where
        F: Fn(usize, usize) + Send + Sync,
    {
        let total = signals.len().div_ceil(self.batch_size);
        let done = AtomicUsize::new(0);
        let task = |batch: &[PricedSignal]| -> Option<AggregateMap> {
            if self.cancel.is_cancelled() {
                return None;
            }
            let map: AggregateMap = keys
                .iter()
                .map(|key| (*key, self.aggregate_combination(*key, batch)))
                .collect();
            progress(done.fetch_add(1, Ordering::Relaxed) + 1, total);
            Some(map)
        };
        let combine = |mut a: AggregateMap, b: AggregateMap| {
            merge_maps(&mut a, b);
            a
        };

        let partials: Vec<AggregateMap> = if self.parallel {
            signals.par_chunks(self.batch_size).filter_map(task).collect()
        } else {
            signals.chunks(self.batch_size).filter_map(task).collect()
        };
        let completed_tasks = partials.len();
        let cancelled = completed_tasks < total;
        let mut aggregates = partials.into_iter().fold(AggregateMap::new(), combine);

        if !cancelled {
            for key in keys {
                aggregates
                    .entry(*key)
                    .or_insert_with(|| AggregateResult::new(*key));
            }
        }

        GridResult {
            aggregates,
            combinations: keys.len(),
            completed_tasks,
            total_tasks: total,
            cancelled,
        }
    }

    fn aggregate_combination(&self, key: ComboKey, signals: &[PricedSignal]) -> AggregateResult {
        let params = key.params();
        let mut agg = AggregateResult::new(key);
        for priced in signals {
            match self.simulator.simulate(&priced.signal, &params, &priced.series) {
                Ok(outcome) => agg.record(&outcome),
                Err(e) => {
                    debug!(symbol = %priced.signal.symbol, %key, reason = %e, "simulation skipped");
                    agg.record_skip();
                }
            }
        }
        agg
    }
}

/// Run the grid with default execution settings.
pub fn run_grid(signals: &[PricedSignal], space: &ParamSpace, simulator: Simulator) -> GridResult {
    GridRunner::new(simulator).run(signals, space)
}

/// Everything a finished (or cancelled) sweep produced.
#[derive(Debug, Clone)]
pub struct SweepRun {
    pub run_id: RunId,
    pub config: SweepConfig,
    pub grid: GridResult,
    pub signal_summary: SignalSummary,
    pub skips: SkipTally,
    pub skipped_signals: Vec<SkippedSignal>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Run statistics persisted next to the aggregates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepStats {
    pub combinations: usize,
    pub completed_tasks: usize,
    pub total_tasks: usize,
    pub cancelled: bool,
}

impl SweepRun {
    pub fn stats(&self) -> SweepStats {
        SweepStats {
            combinations: self.grid.combinations,
            completed_tasks: self.grid.completed_tasks,
            total_tasks: self.grid.total_tasks,
            cancelled: self.grid.cancelled,
        }
    }
}

/// Acquisition, then the grid.
///
/// Signals whose data could not be acquired are counted in every aggregate's
/// `skipped` as well as in the skip tally.
pub fn run_sweep<P>(
    config: &SweepConfig,
    signals: &SignalSet,
    provider: &P,
    cancel: CancelToken,
) -> Result<SweepRun, ConfigError>
where
    P: PriceSeriesProvider + ?Sized,
{
    let space = ParamSpace::from_config(config)?;
    let run_id = config.run_id()?;
    let started_at = Utc::now();

    let acquired = acquire(
        signals.signals(),
        provider,
        AcquisitionWindow::from_config(config),
    );
    let skips = acquired.tally(signals.rejected().len());

    let mut grid = GridRunner::from_config(config)
        .with_cancel_token(cancel)
        .run(&acquired.priced, &space);
    let unavailable = acquired.skipped.len() as u64;
    for agg in grid.aggregates.values_mut() {
        agg.skipped += unavailable;
    }

    Ok(SweepRun {
        run_id,
        config: config.clone(),
        grid,
        signal_summary: signals.summary(),
        skips,
        skipped_signals: acquired.skipped,
        started_at,
        finished_at: Utc::now(),
    })
}
