use std::collections::BTreeMap;

use crate::run::BenchmarkRun;

/// Running mean and population variance (Welford).
#[derive(Default, Clone, Copy, Debug, PartialEq)]
pub struct Moments {
    /// Number of samples.
    pub count: u64,
    /// Running mean.
    pub mean:  f64,
    m2:        f64,
}

impl Moments {
    /// Adds a sample.
    pub fn push(&mut self, x: f64) {
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
    }

    /// Population standard deviation; 0 for fewer than two samples.
    pub fn stddev(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        (self.m2 / self.count as f64).max(0.0).sqrt()
    }
}

/// Incremental score statistics for the runs of one period.
#[derive(Clone, Debug)]
pub struct ScoreAccumulator {
    /// Moments of the overall score.
    pub overall:    Moments,
    /// Lowest overall score seen.
    pub min:        f64,
    /// Highest overall score seen.
    pub max:        f64,
    /// Runs at or above the pass threshold.
    pub passed:     u64,
    /// Moments per reported dimension.
    pub dimensions: BTreeMap<String, Moments>,
    threshold:      f64,
}

impl ScoreAccumulator {
    /// Creates an empty accumulator counting runs at or above `pass_threshold` as passed.
    pub fn new(pass_threshold: f64) -> Self {
        Self {
            overall: Moments::default(),
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            passed: 0,
            dimensions: BTreeMap::new(),
            threshold: pass_threshold,
        }
    }

    /// Returns true if no run has been added.
    pub fn is_empty(&self) -> bool {
        self.overall.count == 0
    }
}

impl std::ops::AddAssign<&BenchmarkRun> for ScoreAccumulator {
    fn add_assign(&mut self, run: &BenchmarkRun) {
        let score = run.overall_score;
        self.overall.push(score);
        self.min = self.min.min(score);
        self.max = self.max.max(score);
        if score >= self.threshold {
            self.passed += 1;
        }
        // a run only contributes to the dimensions it reports
        for (name, &value) in &run.dimension_scores {
            self.dimensions.entry(name.clone()).or_default().push(value);
        }
    }
}
