//! Chart projection of a trend series.
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::trend::BenchmarkTrend;

/// Label of the dataset holding the average overall score.
pub const AVERAGE_LABEL: &str = "Average score";

/// One plotted line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartDataset {
    /// Legend label: [`AVERAGE_LABEL`] or a dimension name.
    pub label: String,
    /// One point per label; `None` where the period has no value.
    pub data: Vec<Option<f64>>,
}

/// Labels plus aligned datasets, ready for a line chart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChartData {
    /// Period start labels, oldest first.
    pub labels: Vec<String>,
    /// The average score first, then one dataset per dimension in name order.
    pub datasets: Vec<ChartDataset>,
}

impl ChartData {
    /// Returns true if there is nothing to plot.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Projects trends of one series into chart form.
///
/// Input order does not matter: points are sorted by period start. A dimension
/// missing from some periods yields `None` at those points, so every dataset
/// has exactly one entry per label.
pub fn project(trends: &[BenchmarkTrend]) -> ChartData {
    if trends.is_empty() {
        return ChartData::default();
    }
    let mut sorted: Vec<&BenchmarkTrend> = trends.iter().collect();
    sorted.sort_by_key(|t| t.period_start());

    let labels = sorted
        .iter()
        .map(|t| t.period_start().format(t.series().period_type.label_format()).to_string())
        .collect();

    let dimensions: BTreeSet<&str> =
        sorted.iter().flat_map(|t| t.stat.dimension_avgs.keys().map(String::as_str)).collect();

    let mut datasets = Vec::with_capacity(dimensions.len() + 1);
    datasets.push(ChartDataset {
        label: AVERAGE_LABEL.to_string(),
        data: sorted.iter().map(|t| Some(t.stat.avg_score)).collect(),
    });
    datasets.extend(dimensions.into_iter().map(|dim| ChartDataset {
        label: dim.to_string(),
        data: sorted.iter().map(|t| t.stat.dimension_avgs.get(dim).copied()).collect(),
    }));

    ChartData { labels, datasets }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};
    use proptest::prelude::*;

    use super::*;
    use crate::{
        period::{DEFAULT_WEEK_START, PeriodType},
        regression::Detection,
        run::tests::run_at,
        stats::aggregate,
    };

    fn trend(at: DateTime<Utc>, period_type: PeriodType, score: f64, dims: &[(&str, f64)]) -> BenchmarkTrend {
        let mut run = run_at(score, at);
        run.dimension_scores = dims.iter().map(|(k, v)| (k.to_string(), *v)).collect();
        let key = run.series(period_type).period_at(at, DEFAULT_WEEK_START);
        BenchmarkTrend { stat: aggregate([&run], key, 0.8).unwrap(), detection: Detection::default() }
    }

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, d, 8, 0, 0).unwrap()
    }

    #[test]
    fn empty_input() {
        assert!(project(&[]).is_empty());
        assert!(project(&[]).datasets.is_empty());
    }

    #[test]
    fn sorted_with_sparse_dimensions() {
        let trends = [
            trend(day(3), PeriodType::Daily, 0.7, &[("safety", 0.6)]),
            trend(day(1), PeriodType::Daily, 0.9, &[("quality", 0.8), ("safety", 0.9)]),
        ];
        let chart = project(&trends);

        assert_eq!(chart.labels, ["2024-03-01", "2024-03-03"]);
        let labels: Vec<_> = chart.datasets.iter().map(|d| d.label.as_str()).collect();
        assert_eq!(labels, [AVERAGE_LABEL, "quality", "safety"]);
        assert_eq!(chart.datasets[0].data, [Some(0.9), Some(0.7)]);
        assert_eq!(chart.datasets[1].data, [Some(0.8), None]);
        assert_eq!(chart.datasets[2].data, [Some(0.9), Some(0.6)]);
    }

    #[test]
    fn monthly_labels() {
        let chart = project(&[trend(day(15), PeriodType::Monthly, 0.5, &[])]);
        assert_eq!(chart.labels, ["2024-03"]);
    }

    proptest! {
        #[test]
        fn every_dataset_matches_label_count(days in prop::collection::btree_set(1u32..=28, 0..10), with_dim in any::<bool>()) {
            let trends: Vec<_> = days
                .iter()
                .map(|&d| {
                    let dims: &[(&str, f64)] = if with_dim && d % 2 == 0 { &[("quality", 0.5)] } else { &[] };
                    trend(day(d), PeriodType::Daily, 0.5, dims)
                })
                .collect();
            let chart = project(&trends);
            prop_assert_eq!(chart.labels.len(), trends.len());
            for dataset in &chart.datasets {
                prop_assert_eq!(dataset.data.len(), chart.labels.len());
            }
        }
    }
}
