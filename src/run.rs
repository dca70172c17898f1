//! Benchmark run records consumed by the trend engine.
use std::{collections::BTreeMap, fs, path::Path};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::period::SeriesKey;

/// A single benchmark run: one prompt version evaluated by one suite against one model.
///
/// Runs are produced by an external scoring collaborator and are read-only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkRun {
    /// The benchmarked prompt.
    pub prompt_id: String,
    /// The prompt version that was benchmarked.
    pub prompt_version: String,
    /// The benchmark suite.
    pub suite_id: String,
    /// The model the prompt was run against.
    pub model_id: String,
    /// The model version, if reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
    /// Overall score in `[0, 1]`.
    pub overall_score: f64,
    /// Per-dimension scores in `[0, 1]`.
    #[serde(default)]
    pub dimension_scores: BTreeMap<String, f64>,
    /// Wall time of the run in milliseconds.
    #[serde(default)]
    pub execution_time_ms: u64,
    /// When the run was executed.
    pub executed_at: DateTime<Utc>,
    /// Environment the run was executed in (e.g. `staging`).
    #[serde(default = "default_environment")]
    pub environment: String,
}

fn default_environment() -> String {
    "staging".to_string()
}

impl BenchmarkRun {
    /// Returns the series this run belongs to for the given period type.
    pub fn series(&self, period_type: crate::period::PeriodType) -> SeriesKey {
        SeriesKey {
            prompt_id: self.prompt_id.clone(),
            suite_id: self.suite_id.clone(),
            model_id: self.model_id.clone(),
            period_type,
        }
    }
}

/// Filter used to read runs from a [`RunSource`](crate::store::RunSource).
///
/// The time range is half-open: `start <= executed_at < end`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunFilter {
    /// Restrict to a prompt.
    pub prompt_id: Option<String>,
    /// Restrict to a suite.
    pub suite_id: Option<String>,
    /// Restrict to a model.
    pub model_id: Option<String>,
    /// Inclusive lower bound.
    pub start: Option<DateTime<Utc>>,
    /// Exclusive upper bound.
    pub end: Option<DateTime<Utc>>,
}

impl RunFilter {
    /// Returns true if the run satisfies every constraint of this filter.
    pub fn matches(&self, run: &BenchmarkRun) -> bool {
        fn eq(want: &Option<String>, got: &str) -> bool {
            want.as_deref().is_none_or(|w| w == got)
        }

        eq(&self.prompt_id, &run.prompt_id)
            && eq(&self.suite_id, &run.suite_id)
            && eq(&self.model_id, &run.model_id)
            && self.start.is_none_or(|s| run.executed_at >= s)
            && self.end.is_none_or(|e| run.executed_at < e)
    }
}

/// Reads runs from a file holding either a JSON array or one JSON object per line.
pub fn load_runs(path: &Path) -> anyhow::Result<Vec<BenchmarkRun>> {
    let text = fs::read_to_string(path).with_context(|| format!("failed to read runs file '{}'", path.display()))?;
    parse_runs(&text).with_context(|| format!("failed to parse runs file '{}'", path.display()))
}

/// Parses a JSON array of runs, or JSON lines. Blank lines are skipped.
pub fn parse_runs(text: &str) -> anyhow::Result<Vec<BenchmarkRun>> {
    if text.trim_start().starts_with('[') {
        return Ok(serde_json::from_str(text)?);
    }
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| serde_json::from_str(line).with_context(|| format!("line {}", i + 1)))
        .collect()
}
