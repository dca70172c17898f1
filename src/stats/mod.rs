//! Per-period score statistics.
//!
//! [`aggregate`] reduces the runs of one [`PeriodKey`] into a [`PeriodStat`].
//! Each period is treated as a closed population of observed runs, so the
//! standard deviation divides by `N`, not `N - 1`.

mod accumulator;

pub use accumulator::{Moments, ScoreAccumulator};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    period::PeriodKey,
    run::BenchmarkRun,
};

/// Aggregated statistics of the runs in one period.
///
/// Invariants: `pass_count + fail_count == run_count`, `run_count >= 1` and
/// `min_score <= avg_score <= max_score`. A stat is never mutated in place;
/// recomputation replaces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodStat {
    /// The period these statistics cover.
    #[serde(flatten)]
    pub key: PeriodKey,
    /// Arithmetic mean of the overall scores.
    pub avg_score: f64,
    /// Lowest overall score.
    pub min_score: f64,
    /// Highest overall score.
    pub max_score: f64,
    /// Population standard deviation of the overall scores.
    pub score_stddev: f64,
    /// Mean score per dimension, over the runs that reported it.
    pub dimension_avgs: BTreeMap<String, f64>,
    /// Number of runs in the period.
    pub run_count: u64,
    /// Runs whose overall score met the pass threshold.
    pub pass_count: u64,
    /// Runs whose overall score fell below the pass threshold.
    pub fail_count: u64,
}

impl PeriodStat {
    /// Fraction of runs that passed.
    pub fn pass_rate(&self) -> f64 {
        self.pass_count as f64 / self.run_count as f64
    }

    fn from_accumulator(key: PeriodKey, acc: &ScoreAccumulator) -> Result<Self> {
        if acc.is_empty() {
            return Err(Error::EmptyAggregationSet);
        }
        let run_count = acc.overall.count;
        Ok(Self {
            key,
            // Rounding in the running mean must not push it outside the observed range.
            avg_score: acc.overall.mean.clamp(acc.min, acc.max),
            min_score: acc.min,
            max_score: acc.max,
            score_stddev: acc.overall.stddev(),
            dimension_avgs: acc.dimensions.iter().map(|(k, m)| (k.clone(), m.mean)).collect(),
            run_count,
            pass_count: acc.passed,
            fail_count: run_count - acc.passed,
        })
    }
}

/// Aggregates the runs of one period.
///
/// A run passes when `overall_score >= pass_threshold`. Fails with
/// [`Error::EmptyAggregationSet`] if `runs` is empty and with
/// [`Error::InvalidScore`] if any overall or dimension score is NaN or infinite.
pub fn aggregate<'a, I>(runs: I, key: PeriodKey, pass_threshold: f64) -> Result<PeriodStat>
where
    I: IntoIterator<Item = &'a BenchmarkRun>,
{
    let mut acc = ScoreAccumulator::new(pass_threshold);
    for run in runs {
        check_scores(run)?;
        acc += run;
    }
    PeriodStat::from_accumulator(key, &acc)
}

fn check_scores(run: &BenchmarkRun) -> Result<()> {
    let scores = std::iter::once(("overall", run.overall_score))
        .chain(run.dimension_scores.iter().map(|(name, score)| (name.as_str(), *score)));
    for (name, value) in scores {
        if !value.is_finite() {
            return Err(Error::InvalidScore { prompt_id: run.prompt_id.clone(), name: name.to_string(), value });
        }
    }
    Ok(())
}
