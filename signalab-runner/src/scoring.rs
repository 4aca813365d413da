//! Composite scoring and ranking of grid combinations.
//!
//! ```text
//! score = 0.40 × norm(expectancy) + 0.30 × norm(win_rate)
//!       + 0.20 × norm(total_pnl)  − 0.10 × norm(expired_rate)
//! ```
//!
//! Normalization is fitted on the combinations that participate in ranking
//! (more trades than the support threshold, and passing any configured filters),
//! either min-max or percentile rank. Ranking is a pure function of the aggregate
//! set: re-ranking persisted aggregates reproduces the same order.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::aggregate::AggregateResult;
use crate::config::RankingConfig;

pub const WEIGHT_EXPECTANCY: f64 = 0.40;
pub const WEIGHT_WIN_RATE: f64 = 0.30;
pub const WEIGHT_TOTAL_PNL: f64 = 0.20;
pub const WEIGHT_EXPIRED_RATE: f64 = 0.10;

/// How raw metrics are mapped onto `[0, 1]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// `(v - min) / (max - min)`; a flat metric maps to 0.5.
    #[default]
    MinMax,
    /// Average-rank percentile; insensitive to outliers.
    PercentileRank,
}

/// Min-max normalize a slice. Empty in, empty out; a constant slice maps to 0.5.
pub fn min_max_normalize(values: &[f64]) -> Vec<f64> {
    let fit = Fitted::new(values.to_vec(), Normalization::MinMax);
    values.iter().map(|v| fit.apply(*v)).collect()
}

/// Rank-normalize a slice to `[0, 1]`, ties sharing their average rank.
///
/// A single value maps to 0.5.
pub fn rank_normalize(values: &[f64]) -> Vec<f64> {
    let fit = Fitted::new(values.to_vec(), Normalization::PercentileRank);
    values.iter().map(|v| fit.apply(*v)).collect()
}

/// One metric's fitted population.
#[derive(Debug, Clone)]
struct Fitted {
    sorted: Vec<f64>,
    method: Normalization,
}

impl Fitted {
    fn new(mut values: Vec<f64>, method: Normalization) -> Self {
        values.sort_by(f64::total_cmp);
        Self {
            sorted: values,
            method,
        }
    }

    fn apply(&self, v: f64) -> f64 {
        let n = self.sorted.len();
        if n == 0 {
            return 0.5;
        }
        let (min, max) = (self.sorted[0], self.sorted[n - 1]);
        match self.method {
            Normalization::MinMax => {
                if (max - min).abs() < 1e-15 {
                    0.5
                } else {
                    ((v - min) / (max - min)).clamp(0.0, 1.0)
                }
            }
            Normalization::PercentileRank => {
                if n == 1 {
                    return 0.5;
                }
                let less = self.sorted.partition_point(|x| *x < v - 1e-15);
                let not_greater = self.sorted.partition_point(|x| *x <= v + 1e-15);
                let equal = not_greater - less;
                // Average 1-based rank of the tie group, rescaled to [0, 1].
                let rank = less as f64 + (equal as f64 - 1.0) / 2.0;
                (rank / (n as f64 - 1.0)).clamp(0.0, 1.0)
            }
        }
    }
}

/// Composite scorer fitted on a population of aggregates.
#[derive(Debug, Clone)]
pub struct Scorer {
    expectancy: Fitted,
    win_rate: Fitted,
    total_pnl: Fitted,
    expired_rate: Fitted,
}

impl Scorer {
    pub fn fit<'a, I>(population: I, method: Normalization) -> Self
    where
        I: IntoIterator<Item = &'a AggregateResult>,
    {
        let mut expectancy = Vec::new();
        let mut win_rate = Vec::new();
        let mut total_pnl = Vec::new();
        let mut expired_rate = Vec::new();
        for agg in population {
            expectancy.push(agg.expectancy());
            win_rate.push(agg.win_rate());
            total_pnl.push(agg.total_pnl);
            expired_rate.push(agg.expired_rate());
        }
        Self {
            expectancy: Fitted::new(expectancy, method),
            win_rate: Fitted::new(win_rate, method),
            total_pnl: Fitted::new(total_pnl, method),
            expired_rate: Fitted::new(expired_rate, method),
        }
    }

    /// Composite score of one aggregate against the fitted population.
    pub fn score(&self, agg: &AggregateResult) -> f64 {
        WEIGHT_EXPECTANCY * self.expectancy.apply(agg.expectancy())
            + WEIGHT_WIN_RATE * self.win_rate.apply(agg.win_rate())
            + WEIGHT_TOTAL_PNL * self.total_pnl.apply(agg.total_pnl)
            - WEIGHT_EXPIRED_RATE * self.expired_rate.apply(agg.expired_rate())
    }
}

/// Why a combination is not part of the recommendation set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Exclusion {
    BelowSupport,
    BelowWinRate,
    NonPositiveExpectancy,
}

/// An aggregate with its composite score and rank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCombination {
    pub aggregate: AggregateResult,
    pub score: f64,
    /// 1-based position among ranked combinations; `None` when excluded.
    pub rank: Option<usize>,
    pub excluded: Option<Exclusion>,
}

/// Ranked combinations plus the ones reported but excluded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ranking {
    pub ranked: Vec<ScoredCombination>,
    pub excluded: Vec<ScoredCombination>,
    pub top_n: usize,
}

impl Ranking {
    /// The recommendation table.
    pub fn top(&self) -> &[ScoredCombination] {
        &self.ranked[..self.top_n.min(self.ranked.len())]
    }

    pub fn best(&self) -> Option<&ScoredCombination> {
        self.ranked.first()
    }

    /// Ranked first, then excluded.
    pub fn all(&self) -> impl Iterator<Item = &ScoredCombination> {
        self.ranked.iter().chain(self.excluded.iter())
    }

    pub fn below_support(&self) -> impl Iterator<Item = &ScoredCombination> {
        self.excluded
            .iter()
            .filter(|s| s.excluded == Some(Exclusion::BelowSupport))
    }
}

fn exclusion(agg: &AggregateResult, config: &RankingConfig) -> Option<Exclusion> {
    if agg.total_trades <= config.min_support {
        return Some(Exclusion::BelowSupport);
    }
    if let Some(min) = config.min_win_rate {
        if agg.win_rate() < min {
            return Some(Exclusion::BelowWinRate);
        }
    }
    if config.require_positive_expectancy && agg.expectancy() <= 0.0 {
        return Some(Exclusion::NonPositiveExpectancy);
    }
    None
}

/// Score descending; then expectancy descending, expired rate ascending, key ascending.
fn compare(a: &ScoredCombination, b: &ScoredCombination) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.aggregate.expectancy().total_cmp(&a.aggregate.expectancy()))
        .then_with(|| a.aggregate.expired_rate().total_cmp(&b.aggregate.expired_rate()))
        .then_with(|| a.aggregate.key().cmp(&b.aggregate.key()))
}

/// Score every aggregate and rank the participating ones.
pub fn rank<'a, I>(aggregates: I, config: &RankingConfig) -> Ranking
where
    I: IntoIterator<Item = &'a AggregateResult>,
{
    let mut participating = Vec::new();
    let mut excluded = Vec::new();
    for agg in aggregates {
        match exclusion(agg, config) {
            None => participating.push(agg),
            Some(reason) => excluded.push((agg, reason)),
        }
    }

    let scorer = Scorer::fit(participating.iter().copied(), config.normalization);

    let mut ranked: Vec<ScoredCombination> = participating
        .into_iter()
        .map(|agg| ScoredCombination {
            aggregate: agg.clone(),
            score: scorer.score(agg),
            rank: None,
            excluded: None,
        })
        .collect();
    ranked.sort_by(compare);
    for (i, scored) in ranked.iter_mut().enumerate() {
        scored.rank = Some(i + 1);
    }

    let mut excluded: Vec<ScoredCombination> = excluded
        .into_iter()
        .map(|(agg, reason)| ScoredCombination {
            aggregate: agg.clone(),
            score: scorer.score(agg),
            rank: None,
            excluded: Some(reason),
        })
        .collect();
    excluded.sort_by(|a, b| a.aggregate.key().cmp(&b.aggregate.key()));

    Ranking {
        ranked,
        excluded,
        top_n: config.top_n,
    }
}

/// The `n` highest-expectancy aggregates of one window, ties by key.
pub fn top_by_expectancy<'a, I>(
    aggregates: I,
    hours_window: u32,
    n: usize,
) -> Vec<&'a AggregateResult>
where
    I: IntoIterator<Item = &'a AggregateResult>,
{
    let mut window: Vec<&AggregateResult> = aggregates
        .into_iter()
        .filter(|a| a.hours_window == hours_window)
        .collect();
    window.sort_by(|a, b| {
        b.expectancy()
            .total_cmp(&a.expectancy())
            .then_with(|| a.key().cmp(&b.key()))
    });
    window.truncate(n);
    window
}
