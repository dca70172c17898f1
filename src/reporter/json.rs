use crate::{
    chart::ChartData,
    gate::GateEvaluation,
    trend::{BuildOutcome, TrendSummary},
};

use super::TrendReporter;

use serde::Serialize;
use std::io::Write;

/// Machine-readable JSON reporter.
pub struct JsonReporter;

impl JsonReporter {
    fn write<T: Serialize>(w: &mut dyn Write, value: &T) -> anyhow::Result<()> {
        serde_json::to_writer_pretty(&mut *w, value)?;
        writeln!(w)?;
        Ok(())
    }
}

impl TrendReporter for JsonReporter {
    fn print_trends(&self, w: &mut dyn Write, outcome: &BuildOutcome) -> anyhow::Result<()> {
        Self::write(w, outcome)
    }

    fn print_gates(&self, w: &mut dyn Write, eval: &GateEvaluation) -> anyhow::Result<()> {
        #[derive(Serialize)]
        struct Report<'a> {
            summary: String,
            passed_count: usize,
            failed_count: usize,
            warning_count: usize,
            #[serde(flatten)]
            eval: &'a GateEvaluation,
        }

        Self::write(
            w,
            &Report {
                summary: eval.summary(),
                passed_count: eval.passed_count(),
                failed_count: eval.failed_count(),
                warning_count: eval.warning_count(),
                eval,
            },
        )
    }

    fn print_chart(&self, w: &mut dyn Write, chart: &ChartData, summary: &TrendSummary) -> anyhow::Result<()> {
        #[derive(Serialize)]
        struct Report<'a> {
            chart: &'a ChartData,
            summary: &'a TrendSummary,
        }

        Self::write(w, &Report { chart, summary })
    }

    fn print_regressions(&self, w: &mut dyn Write, summaries: &[TrendSummary]) -> anyhow::Result<()> {
        Self::write(w, &summaries)
    }
}
