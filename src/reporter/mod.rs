//! This module defines a trait for printing trend, gate and chart reports.
mod json;
mod text;

pub use json::JsonReporter;
pub use text::TextReporter;

use crate::{
    chart::ChartData,
    gate::GateEvaluation,
    trend::{BuildOutcome, TrendSummary},
};

/// A trait for reporting engine results.
pub trait TrendReporter {
    /// Print the trends and alerts of a build.
    fn print_trends(&self, w: &mut dyn std::io::Write, outcome: &BuildOutcome) -> anyhow::Result<()>;

    /// Print a quality gate evaluation.
    fn print_gates(&self, w: &mut dyn std::io::Write, eval: &GateEvaluation) -> anyhow::Result<()>;

    /// Print a chart projection with the rolling summary of its series.
    fn print_chart(&self, w: &mut dyn std::io::Write, chart: &ChartData, summary: &TrendSummary) -> anyhow::Result<()>;

    /// Print the series found regressing by a scan.
    fn print_regressions(&self, w: &mut dyn std::io::Write, summaries: &[TrendSummary]) -> anyhow::Result<()>;
}
