//! Quality gate evaluation.
//!
//! A gate is a named pass/fail threshold check. [`evaluate`] checks a scored
//! record (a single [`BenchmarkRun`] or a whole [`PeriodStat`]) against a
//! [`GateConfig`] and returns every gate result in a stable order: declared
//! thresholds first, then the freshness gate, then the regression gate.
//!
//! The freshness gate is advisory: a stale record is reported as a warning
//! but does not fail the evaluation.
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    run::BenchmarkRun,
    stats::PeriodStat,
};

/// Threshold key compared against the overall score.
pub const OVERALL: &str = "overall";
/// Threshold key holding the allowed decline from the baseline.
pub const MAX_REGRESSION: &str = "max_regression";
/// Name of the regression gate in evaluation results.
pub const REGRESSION_GATE: &str = "regression";
/// Name of the freshness gate in evaluation results.
pub const FRESHNESS_GATE: &str = "freshness";

/// Default allowed decline from the baseline.
pub const DEFAULT_MAX_REGRESSION: f64 = 0.10;

/// Something that carries an overall score and per-dimension scores.
pub trait Scored {
    /// The overall score.
    fn overall_score(&self) -> f64;

    /// The score of a dimension, if reported.
    fn dimension_score(&self, name: &str) -> Option<f64>;

    /// When the scores were observed, used by the freshness gate.
    fn observed_at(&self) -> Option<DateTime<Utc>> {
        None
    }
}

impl Scored for BenchmarkRun {
    fn overall_score(&self) -> f64 {
        self.overall_score
    }

    fn dimension_score(&self, name: &str) -> Option<f64> {
        self.dimension_scores.get(name).copied()
    }

    fn observed_at(&self) -> Option<DateTime<Utc>> {
        Some(self.executed_at)
    }
}

impl Scored for PeriodStat {
    fn overall_score(&self) -> f64 {
        self.avg_score
    }

    fn dimension_score(&self, name: &str) -> Option<f64> {
        self.dimension_avgs.get(name).copied()
    }

    // The oldest instant the period may contain.
    fn observed_at(&self) -> Option<DateTime<Utc>> {
        Some(self.key.period_start)
    }
}

/// A minimum score required by a gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateThreshold {
    /// `overall` or a dimension name.
    pub name: String,
    /// Minimum passing score.
    pub min: f64,
}

/// Gate thresholds, in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct GateConfig {
    /// Minimum score thresholds.
    pub thresholds: Vec<GateThreshold>,
    /// Largest allowed `baseline - overall_score`.
    pub max_regression: f64,
    /// Oldest acceptable observation, if freshness is gated.
    pub max_age: Option<Duration>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self { thresholds: Vec::new(), max_regression: DEFAULT_MAX_REGRESSION, max_age: None }
    }
}

impl GateConfig {
    /// Creates an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a raw threshold map, keeping its order.
    ///
    /// The key `overall` gates the overall score, `max_regression` sets the
    /// allowed decline from the baseline, and every other key gates the
    /// dimension of that name.
    pub fn from_thresholds<I, K>(thresholds: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, f64)>,
        K: Into<String>,
    {
        let mut config = Self::new();
        for (name, value) in thresholds {
            let name = name.into();
            check_unit(&name, value)?;
            if name == MAX_REGRESSION {
                config.max_regression = value;
            } else {
                config.set(name, value);
            }
        }
        Ok(config)
    }

    /// Adds or replaces a minimum score threshold.
    pub fn threshold(mut self, name: impl Into<String>, min: f64) -> Self {
        self.set(name.into(), min);
        self
    }

    /// Sets the allowed decline from the baseline.
    pub fn max_regression(mut self, max: f64) -> Self {
        self.max_regression = max;
        self
    }

    /// Gates the age of the scored record.
    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    /// Checks that every threshold and the regression allowance lie in `[0, 1]`.
    pub fn validate(&self) -> Result<()> {
        for GateThreshold { name, min } in &self.thresholds {
            check_unit(name, *min)?;
        }
        check_unit(MAX_REGRESSION, self.max_regression)
    }

    /// Looks up a threshold by name.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.thresholds.iter().find(|t| t.name == name).map(|t| t.min)
    }

    // A repeated key keeps its first position.
    fn set(&mut self, name: String, min: f64) {
        match self.thresholds.iter_mut().find(|t| t.name == name) {
            Some(t) => t.min = min,
            None => self.thresholds.push(GateThreshold { name, min }),
        }
    }
}

pub(crate) fn check_unit(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(Error::InvalidThreshold { name: name.to_string(), value })
    }
}

/// Result of a single gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateResult {
    /// Gate name: `overall`, a dimension, `freshness` or `regression`.
    pub gate_name: String,
    /// Whether the gate passed.
    pub passed: bool,
    /// Whether a failure of this gate fails the evaluation.
    pub blocking: bool,
    /// Observed value; `None` when the value was not reported.
    pub value: Option<f64>,
    /// The threshold the value was compared against.
    pub threshold: f64,
}

/// Outcome of evaluating all gates of a [`GateConfig`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateEvaluation {
    /// True iff every blocking gate passed.
    pub passed: bool,
    /// The evaluated overall score.
    pub overall_score: f64,
    /// Gate results in evaluation order.
    pub gates: Vec<GateResult>,
    /// One recommendation per failed gate.
    pub recommendations: Vec<String>,
}

impl GateEvaluation {
    /// Number of gates that passed.
    pub fn passed_count(&self) -> usize {
        self.gates.iter().filter(|g| g.passed).count()
    }

    /// Number of gates that failed.
    pub fn failed_count(&self) -> usize {
        self.gates.len() - self.passed_count()
    }

    /// Number of non-blocking gates that failed.
    pub fn warning_count(&self) -> usize {
        self.gates.iter().filter(|g| !g.passed && !g.blocking).count()
    }

    /// Looks up a gate result by name.
    pub fn gate(&self, name: &str) -> Option<&GateResult> {
        self.gates.iter().find(|g| g.gate_name == name)
    }

    /// A one-line human-readable summary.
    pub fn summary(&self) -> String {
        let total = self.gates.len();
        let failed = |blocking: bool| {
            self.gates
                .iter()
                .filter(|g| !g.passed && g.blocking == blocking)
                .map(|g| g.gate_name.as_str())
                .collect::<Vec<_>>()
        };
        let (blocking, warnings) = (failed(true), failed(false));

        let mut summary = match (blocking.is_empty(), warnings.is_empty()) {
            (true, true) => return format!("All {total} quality gates passed"),
            (true, false) => format!("{} of {total} quality gates passed", total - warnings.len()),
            (false, _) => format!("{} of {total} quality gates failed: {}", blocking.len(), blocking.join(", ")),
        };
        if !warnings.is_empty() {
            summary.push_str(&format!("; {} warning(s): {}", warnings.len(), warnings.join(", ")));
        }
        summary
    }
}

/// Evaluates `scored` against `config` at the current time.
///
/// The regression gate is only evaluated when a `baseline` is supplied.
/// Fails with [`Error::EmptyGateConfig`] if no gate would be evaluated.
pub fn evaluate<S>(scored: &S, baseline: Option<f64>, config: &GateConfig) -> Result<GateEvaluation>
where
    S: Scored + ?Sized,
{
    evaluate_at(scored, baseline, config, Utc::now())
}

/// Like [`evaluate`], with an explicit evaluation time for the freshness gate.
pub fn evaluate_at<S>(
    scored: &S,
    baseline: Option<f64>,
    config: &GateConfig,
    now: DateTime<Utc>,
) -> Result<GateEvaluation>
where
    S: Scored + ?Sized,
{
    if config.thresholds.is_empty() && config.max_age.is_none() && baseline.is_none() {
        return Err(Error::EmptyGateConfig);
    }
    config.validate()?;

    let overall = scored.overall_score();
    let mut gates = Vec::with_capacity(config.thresholds.len() + 2);
    let mut recommendations = Vec::new();

    for GateThreshold { name, min } in &config.thresholds {
        let value = if name == OVERALL { Some(overall) } else { scored.dimension_score(name) };
        let passed = value.is_some_and(|v| v >= *min);
        if !passed {
            recommendations.push(score_recommendation(name, value, *min));
        }
        gates.push(GateResult { gate_name: name.clone(), passed, blocking: true, value, threshold: *min });
    }

    if let Some(max_age) = config.max_age {
        let max_hours = max_age.as_secs_f64() / 3600.0;
        let age_hours = scored
            .observed_at()
            .map(|at| (now - at).num_milliseconds() as f64 / 3_600_000.0);
        let passed = age_hours.is_some_and(|h| h <= max_hours);
        if !passed {
            recommendations.push(match age_hours {
                Some(h) => format!(
                    "Benchmark is {h:.1}h old, {:.1}h past the {max_hours:.1}h freshness limit; re-run the benchmark",
                    h - max_hours
                ),
                None => "Benchmark has no execution time; re-run the benchmark".to_string(),
            });
        }
        gates.push(GateResult {
            gate_name: FRESHNESS_GATE.into(),
            passed,
            blocking: false,
            value: age_hours,
            threshold: max_hours,
        });
    }

    if let Some(baseline) = baseline {
        let drop = baseline - overall;
        let passed = drop <= config.max_regression;
        if !passed {
            recommendations.push(format!(
                "Overall score {overall:.3} dropped {drop:.3} from baseline {baseline:.3}, {:.3} more than the allowed {:.3}",
                drop - config.max_regression,
                config.max_regression
            ));
        }
        gates.push(GateResult {
            gate_name: REGRESSION_GATE.into(),
            passed,
            blocking: true,
            value: Some(drop),
            threshold: config.max_regression,
        });
    }

    let passed = gates.iter().all(|g| g.passed || !g.blocking);
    Ok(GateEvaluation { passed, overall_score: overall, gates, recommendations })
}

fn score_recommendation(name: &str, value: Option<f64>, min: f64) -> String {
    match value {
        Some(v) if name == OVERALL => {
            format!("Overall score {v:.3} is {:.3} below the minimum of {min:.3}", min - v)
        }
        Some(v) => format!("Dimension '{name}' scored {v:.3}, {:.3} below the minimum of {min:.3}", min - v),
        None => format!("Dimension '{name}' was not reported; re-run the suite with '{name}' scoring (minimum {min:.3})"),
    }
}
