use crossterm::style::{StyledContent, Stylize};
use itertools::Itertools;
use std::io::Write;
use tabled::settings::object::{Columns, FirstColumn, Object, Rows};
use tabled::settings::Padding;
use tabled::{
    builder::Builder,
    settings::{themes::Colorization, Alignment, Color, Margin, Style},
};

use crate::{
    chart::ChartData,
    gate::{GateEvaluation, GateResult, FRESHNESS_GATE, REGRESSION_GATE},
    regression::AlertSeverity,
    trend::{BenchmarkTrend, BuildOutcome, RegressionAlert, TrendSummary},
};

/// Human-readable terminal reporter.
pub struct TextReporter;

impl super::TrendReporter for TextReporter {
    fn print_trends(&self, w: &mut dyn Write, outcome: &BuildOutcome) -> anyhow::Result<()> {
        print_trend_table(w, &outcome.trends)?;
        writeln!(w)?;

        print_alerts(w, &outcome.alerts)?;

        if outcome.cancelled {
            writeln!(w)?;
            writeln!(w, "{}", "Build cancelled before all periods were written".yellow().bold())?;
        }
        Ok(())
    }

    fn print_gates(&self, w: &mut dyn Write, eval: &GateEvaluation) -> anyhow::Result<()> {
        writeln!(w, "{}", "Quality gates".h1())?;
        let summary = eval.summary();
        let summary = match (eval.passed, eval.warning_count()) {
            (false, _) => summary.red().bold(),
            (true, 0) => summary.green().bold(),
            (true, _) => summary.yellow().bold(),
        };
        writeln!(w, "  {summary}")?;
        writeln!(w, "  Overall score: {}", render_score(eval.overall_score))?;
        writeln!(w)?;

        print_gate_table(w, &eval.gates)?;

        if !eval.recommendations.is_empty() {
            writeln!(w)?;
            writeln!(w, "{}", "  Recommendations".h2())?;
            for rec in &eval.recommendations {
                writeln!(w, "    - {rec}")?;
            }
        }
        Ok(())
    }

    fn print_chart(&self, w: &mut dyn Write, chart: &ChartData, summary: &TrendSummary) -> anyhow::Result<()> {
        writeln!(w, "{}", "Chart".h1())?;
        if chart.is_empty() {
            writeln!(w, "  No trends stored for this series")?;
            return Ok(());
        }
        print_chart_table(w, chart)?;
        writeln!(w)?;
        print_summary(w, summary)
    }

    fn print_regressions(&self, w: &mut dyn Write, summaries: &[TrendSummary]) -> anyhow::Result<()> {
        writeln!(w, "{}", "Regressing series".h1())?;
        if summaries.is_empty() {
            writeln!(w, "  {}", "None".green())?;
            return Ok(());
        }
        for summary in summaries {
            writeln!(
                w,
                "  {} {}: {}",
                "[regressing]".red().bold(),
                summary.series,
                summary.regression_alert.as_deref().unwrap_or("score dropped"),
            )?;
            writeln!(
                w,
                "    7d avg {}, 7d delta {}",
                render_optional(summary.rolling_avg_7d, false),
                render_optional(summary.score_delta_7d, true),
            )?;
        }
        Ok(())
    }
}

fn print_chart_table(w: &mut dyn Write, chart: &ChartData) -> anyhow::Result<()> {
    let header = std::iter::once(String::from("Period"))
        .chain(chart.datasets.iter().map(|d| d.label.clone()))
        .chain(std::iter::once(String::new()))
        .collect_vec();
    let rows = chart.labels.iter().enumerate().map(|(i, label)| {
        let mut row = vec![label.clone()];
        row.extend(chart.datasets.iter().map(|d| match d.data[i] {
            Some(v) => format!("{v:.3}"),
            None => "-".into(),
        }));
        row.push(chart.datasets.first().and_then(|d| d.data[i]).map(render_bar).unwrap_or_default());
        row
    });

    let mut table = Builder::from_iter(std::iter::once(header).chain(rows)).build();
    table
        .with(Style::empty())
        .with(Margin::new(2, 0, 0, 0))
        .with(Alignment::right())
        .with(Padding::new(1, 1, 0, 0))
        .with(Colorization::exact([Color::BOLD], Rows::first()))
        .with(Colorization::exact([Color::FG_GREEN], Columns::new(1..=1).not(Rows::first())))
        .modify(Columns::last(), Alignment::left())
        .modify(FirstColumn, Alignment::left());
    writeln!(w, "{}", table)?;
    Ok(())
}

fn print_summary(w: &mut dyn Write, summary: &TrendSummary) -> anyhow::Result<()> {
    writeln!(w, "{}", format!("  Rolling averages as of {}", summary.as_of.format("%Y-%m-%d %H:%M")).h2())?;
    let row = |label: &str, avg: Option<f64>, delta: Option<f64>| {
        vec![
            label.to_string(),
            avg.map(|v| render_score(v).to_string()).unwrap_or_else(|| "-".into()),
            render_optional(delta, true),
        ]
    };
    let rows = [
        ["Window", "Avg", "Delta"].map(String::from).to_vec(),
        row("7 days", summary.rolling_avg_7d, summary.score_delta_7d),
        row("30 days", summary.rolling_avg_30d, summary.score_delta_30d),
    ];
    let mut table = Builder::from_iter(rows).build();
    table
        .with(Style::empty())
        .with(Margin::new(3, 0, 0, 0))
        .with(Alignment::right())
        .with(Padding::new(1, 1, 0, 0))
        .with(Colorization::exact([Color::BOLD], Rows::first()))
        .modify(FirstColumn, Alignment::left());
    writeln!(w, "{}", table)?;

    if let Some(alert) = &summary.regression_alert {
        writeln!(w, "   {}", alert.as_str().red().bold())?;
    }
    Ok(())
}

fn render_optional(value: Option<f64>, signed: bool) -> String {
    match value {
        Some(v) if signed => format!("{v:+.3}"),
        Some(v) => format!("{v:.3}"),
        None => "-".into(),
    }
}

fn render_score(score: f64) -> StyledContent<String> {
    let text = format!("{score:.3}");
    if score >= 0.8 {
        text.green().bold()
    } else if score >= 0.5 {
        text.yellow().bold()
    } else {
        text.red().bold()
    }
}

fn render_delta(trend: &BenchmarkTrend) -> StyledContent<String> {
    let d = &trend.detection;
    match (d.regression_delta, d.change_percent) {
        (None, _) => "-".to_string().dark_grey(),
        (Some(delta), pct) => {
            let pct = pct.map(|p| format!(" ({p:+.1}%)")).unwrap_or_default();
            let text = format!("{delta:+.3}{pct}");
            if d.regression_detected {
                text.red().bold()
            } else if delta >= 0.0 {
                text.green()
            } else {
                text.yellow()
            }
        }
    }
}

fn render_bar(score: f64) -> String {
    let len = 32.0 * score.clamp(0.0, 1.0);
    let mut bar = "■".repeat(len as usize);
    if len.fract() >= 0.5 {
        bar.push('◧');
    }
    bar
}

#[rustfmt::skip]
fn print_trend_table(w: &mut dyn Write, trends: &[BenchmarkTrend]) -> anyhow::Result<()> {
    writeln!(w, "{}", "Trends".h1())?;
    if trends.is_empty() {
        writeln!(w, "  No benchmark runs matched")?;
        return Ok(());
    }

    for (series, trends) in &trends.iter().chunk_by(|t| t.series()) {
        writeln!(w, "{}", format!("  {series}").h2())?;

        let header = ["Period", "Runs", "Avg", "Min", "Max", "Stdev", "Pass", "Delta"].map(String::from).to_vec();
        let rows = trends.map(|t| {
            let s = &t.stat;
            vec![
                t.period_start().format(t.series().period_type.label_format()).to_string(),
                s.run_count.to_string(),
                render_score(s.avg_score).to_string(),
                format!("{:.3}", s.min_score),
                format!("{:.3}", s.max_score),
                format!("{:.3}", s.score_stddev),
                format!("{:.0}%", 100.0 * s.pass_rate()),
                render_delta(t).to_string(),
            ]
        });
        let mut table = Builder::from_iter(std::iter::once(header).chain(rows)).build();
        table
            .with(Style::empty())
            .with(Margin::new(3, 0, 0, 0))
            .with(Alignment::right())
            .with(Padding::new(1, 1, 0, 0))
            .with(Colorization::exact([Color::BOLD], Rows::first()))
            .modify(FirstColumn, Alignment::left());
        writeln!(w, "{}", table)?;
    }
    Ok(())
}

fn print_alerts(w: &mut dyn Write, alerts: &[RegressionAlert]) -> anyhow::Result<()> {
    writeln!(w, "{}", "Regressions".h1())?;
    if alerts.is_empty() {
        writeln!(w, "  {}", "None".green())?;
        return Ok(());
    }
    for alert in alerts {
        let severity = match alert.severity {
            AlertSeverity::Critical => alert.severity.to_string().red().bold(),
            AlertSeverity::Warning => alert.severity.to_string().yellow().bold(),
        };
        let pct = alert.delta_percent.map(|p| format!(" ({p:+.1}%)")).unwrap_or_default();
        writeln!(
            w,
            "  [{severity}] {} on {}/{} {}: {:.3} -> {:.3} ({:+.3}{pct})",
            alert.prompt_name,
            alert.suite_id,
            alert.model_id,
            alert.period_start.format("%Y-%m-%d"),
            alert.previous_avg,
            alert.current_avg,
            alert.delta,
        )?;
    }
    Ok(())
}

fn print_gate_table(w: &mut dyn Write, gates: &[GateResult]) -> anyhow::Result<()> {
    let header = ["Gate", "Value", "Threshold", "Status"].map(String::from).to_vec();
    let rows = gates.iter().map(|g| {
        let (value, threshold) = match g.gate_name.as_str() {
            FRESHNESS_GATE => (g.value.map(|v| format!("{v:.1}h")), format!("<= {:.1}h", g.threshold)),
            REGRESSION_GATE => (g.value.map(|v| format!("{v:+.3}")), format!("<= {:.3}", g.threshold)),
            _ => (g.value.map(|v| format!("{v:.3}")), format!(">= {:.3}", g.threshold)),
        };
        let status = match (g.passed, g.blocking) {
            (true, _) => "PASS".green().bold(),
            (false, true) => "FAIL".red().bold(),
            (false, false) => "WARN".yellow().bold(),
        };
        vec![g.gate_name.clone(), value.unwrap_or_else(|| "missing".into()), threshold, status.to_string()]
    });
    let mut table = Builder::from_iter(std::iter::once(header).chain(rows)).build();
    table
        .with(Style::empty())
        .with(Margin::new(1, 0, 0, 0))
        .with(Alignment::right())
        .with(Padding::new(1, 1, 0, 0))
        .with(Colorization::exact([Color::BOLD], Rows::first()))
        .modify(FirstColumn, Alignment::left());
    writeln!(w, "{}", table)?;
    Ok(())
}

trait ReportStyle {
    fn h1(&self) -> StyledContent<&str>;
    fn h2(&self) -> StyledContent<&str>;
}

impl<T: AsRef<str>> ReportStyle for T {
    fn h1(&self) -> StyledContent<&str> {
        self.as_ref().bold().underlined().yellow()
    }

    fn h2(&self) -> StyledContent<&str> {
        self.as_ref().bold().cyan()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;

    use super::*;
    use crate::{
        chart::project,
        gate::{evaluate, evaluate_at, GateConfig},
        period::PeriodType,
        regression::RegressionConfig,
        reporter::TrendReporter,
        run::tests::{run, run_with_dims},
    };

    fn empty_summary() -> TrendSummary {
        TrendSummary::from_trends(run(0.9).series(PeriodType::Daily), &[], Utc::now(), &RegressionConfig::default())
    }

    fn plain(buf: Vec<u8>) -> String {
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn gate_report_lists_every_gate() {
        let config = GateConfig::new().threshold("overall", 0.8).threshold("safety", 0.9);
        let eval = evaluate(&run_with_dims(0.82, &[("safety", 0.85)]), Some(0.95), &config).unwrap();

        let mut buf = Vec::new();
        TextReporter.print_gates(&mut buf, &eval).unwrap();
        let out = plain(buf);
        assert!(out.contains("2 of 3 quality gates failed: safety, regression"));
        assert!(out.contains("safety"));
        assert!(out.contains("Recommendations"));
    }

    #[test]
    fn empty_reports() {
        let mut buf = Vec::new();
        TextReporter.print_trends(&mut buf, &BuildOutcome::default()).unwrap();
        TextReporter.print_chart(&mut buf, &project(&[]), &empty_summary()).unwrap();
        TextReporter.print_regressions(&mut buf, &[]).unwrap();
        let out = plain(buf);
        assert!(out.contains("No benchmark runs matched"));
        assert!(out.contains("No trends stored"));
        assert!(out.contains("Regressing series"));
    }

    #[test]
    fn stale_gate_is_a_warning() {
        let r = run(0.9);
        let config = GateConfig::new().threshold("overall", 0.8).max_age(Duration::from_secs(3600));
        let eval = evaluate_at(&r, None, &config, r.executed_at + chrono::Duration::days(2)).unwrap();

        let mut buf = Vec::new();
        TextReporter.print_gates(&mut buf, &eval).unwrap();
        let out = plain(buf);
        assert!(out.contains("WARN"));
        assert!(!out.contains("FAIL"));
        assert!(out.contains("1 warning(s): freshness"));
    }

    #[test]
    fn regressions_list_alerts() {
        let mut summary = empty_summary();
        summary.is_regressing = true;
        summary.rolling_avg_7d = Some(0.8);
        summary.score_delta_7d = Some(-0.1);
        summary.regression_alert = Some("Score dropped 0.100".into());

        let mut buf = Vec::new();
        TextReporter.print_regressions(&mut buf, &[summary]).unwrap();
        let out = plain(buf);
        assert!(out.contains("p1/default/m1/daily"));
        assert!(out.contains("Score dropped 0.100"));
        assert!(out.contains("-0.100"));
    }

    #[test]
    fn bar_scales_with_score() {
        assert_eq!(render_bar(0.0), "");
        assert_eq!(render_bar(1.0).chars().count(), 32);
        assert_eq!(render_bar(0.5).chars().count(), 16);
    }
}
