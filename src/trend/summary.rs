//! Rolling averages over the stored trends of a series.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::BenchmarkTrend;
use crate::{
    period::{PeriodType, SeriesKey},
    regression::RegressionConfig,
    store::TrendStore,
};

/// Length of the short rolling window, in days.
pub const SHORT_WINDOW_DAYS: i64 = 7;
/// Length of the long rolling window, in days.
pub const LONG_WINDOW_DAYS: i64 = 30;

/// Periods before the short window that `score_delta_7d` compares against.
const SHORT_REFERENCE_PERIODS: usize = 5;
/// Periods before the long window that `score_delta_30d` compares against.
const LONG_REFERENCE_PERIODS: usize = 10;
/// Newest periods of the short window checked for a sudden drop.
const RECENT_PERIODS: usize = 3;

/// Rolling view of one series as of a point in time.
///
/// Averages are weighted by the run count of each period, so they equal the
/// mean over every run inside the window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendSummary {
    /// The summarized series.
    #[serde(flatten)]
    pub series: SeriesKey,
    /// The instant the windows end at.
    pub as_of: DateTime<Utc>,
    /// Average of the newest stored period.
    pub latest_avg: Option<f64>,
    /// Mean score of the periods starting in the last 7 days.
    pub rolling_avg_7d: Option<f64>,
    /// Mean score of the periods starting in the last 30 days.
    pub rolling_avg_30d: Option<f64>,
    /// `rolling_avg_7d` minus the mean of the last 5 periods before the window.
    pub score_delta_7d: Option<f64>,
    /// `rolling_avg_30d` minus the mean of the last 10 periods before the window.
    pub score_delta_30d: Option<f64>,
    /// Whether the newest 3 periods of the short window fell below its average
    /// by at least the warning delta.
    pub is_regressing: bool,
    /// Human-readable description of the drop, when regressing.
    pub regression_alert: Option<String>,
}

impl TrendSummary {
    /// Summarizes the trends of `series` as of `now`.
    ///
    /// `trends` may be in any order; trends of other series and periods
    /// starting after `now` are ignored.
    pub fn from_trends(
        series: SeriesKey,
        trends: &[BenchmarkTrend],
        now: DateTime<Utc>,
        config: &RegressionConfig,
    ) -> Self {
        let mut trends: Vec<_> = trends
            .iter()
            .filter(|t| t.series() == &series && t.period_start() <= now)
            .collect();
        trends.sort_by_key(|t| t.period_start());

        let (before_short, short) = split_window(&trends, now - Duration::days(SHORT_WINDOW_DAYS));
        let (before_long, long) = split_window(&trends, now - Duration::days(LONG_WINDOW_DAYS));

        let rolling_avg_7d = weighted_avg(short);
        let rolling_avg_30d = weighted_avg(long);
        let delta = |rolling: Option<f64>, before: &[&BenchmarkTrend], n: usize| {
            Some(rolling? - weighted_avg(&before[before.len().saturating_sub(n)..])?)
        };

        let mut summary = Self {
            latest_avg: trends.last().map(|t| t.stat.avg_score),
            rolling_avg_7d,
            rolling_avg_30d,
            score_delta_7d: delta(rolling_avg_7d, before_short, SHORT_REFERENCE_PERIODS),
            score_delta_30d: delta(rolling_avg_30d, before_long, LONG_REFERENCE_PERIODS),
            is_regressing: false,
            regression_alert: None,
            series,
            as_of: now,
        };

        let recent = match short.len().checked_sub(RECENT_PERIODS) {
            Some(start) => weighted_avg(&short[start..]),
            None => None,
        };
        let drop = rolling_avg_7d
            .zip(recent)
            .map(|(rolling, recent)| (rolling, rolling - recent))
            .filter(|(_, drop)| *drop >= config.warning_delta);
        if let Some((rolling, drop)) = drop {
            summary.is_regressing = true;
            summary.regression_alert =
                Some(format!("Score dropped {drop:.3} below the {SHORT_WINDOW_DAYS}-day average of {rolling:.3}"));
        }
        summary
    }
}

/// Splits oldest-first `trends` into the periods before `cutoff` and the rest.
fn split_window<'a>(
    trends: &'a [&'a BenchmarkTrend],
    cutoff: DateTime<Utc>,
) -> (&'a [&'a BenchmarkTrend], &'a [&'a BenchmarkTrend]) {
    trends.split_at(trends.partition_point(|t| t.period_start() < cutoff))
}

fn weighted_avg(trends: &[&BenchmarkTrend]) -> Option<f64> {
    let runs: u64 = trends.iter().map(|t| t.stat.run_count).sum();
    if runs == 0 {
        return None;
    }
    let total: f64 = trends.iter().map(|t| t.stat.avg_score * t.stat.run_count as f64).sum();
    Some(total / runs as f64)
}

/// Summarizes the stored trends of `series` as of `now`.
pub async fn summarize(
    store: &dyn TrendStore,
    series: &SeriesKey,
    now: DateTime<Utc>,
    config: &RegressionConfig,
) -> anyhow::Result<TrendSummary> {
    let trends = store.recent(series, None, usize::MAX).await?;
    Ok(TrendSummary::from_trends(series.clone(), &trends, now, config))
}

/// Summaries of every stored series that is currently regressing.
///
/// Only series with a period starting in the last 7 days are considered, and
/// only those of `period_type` when given. The result is ordered by series.
pub async fn scan_regressions(
    store: &dyn TrendStore,
    period_type: Option<PeriodType>,
    now: DateTime<Utc>,
    config: &RegressionConfig,
) -> anyhow::Result<Vec<TrendSummary>> {
    let cutoff = now - Duration::days(SHORT_WINDOW_DAYS);
    let mut regressing = Vec::new();
    for series in store.series().await? {
        if period_type.is_some_and(|p| p != series.period_type) {
            continue;
        }
        let trends = store.recent(&series, Some(now + Duration::nanoseconds(1)), usize::MAX).await?;
        if trends.first().is_none_or(|t| t.period_start() < cutoff) {
            continue;
        }
        let summary = TrendSummary::from_trends(series, &trends, now, config);
        if summary.is_regressing {
            #[cfg(feature = "tracing")]
            tracing::warn!(series = %summary.series, alert = ?summary.regression_alert, "series is regressing");
            regressing.push(summary);
        }
    }
    #[cfg(feature = "tracing")]
    tracing::info!(regressing = regressing.len(), "regression scan finished");
    Ok(regressing)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::{
        period::DEFAULT_WEEK_START,
        regression::Detection,
        run::tests::run_at,
        stats::aggregate,
        store::MemoryTrendStore,
    };

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 31, 12, 0, 0).unwrap()
    }

    fn trend(days_ago: i64, scores: &[f64]) -> BenchmarkTrend {
        let at = now() - Duration::days(days_ago);
        let runs: Vec<_> = scores.iter().map(|&s| run_at(s, at)).collect();
        let key = runs[0].series(PeriodType::Daily).period_at(at, DEFAULT_WEEK_START);
        BenchmarkTrend { stat: aggregate(&runs, key, 0.8).unwrap(), detection: Detection::default() }
    }

    fn summary(trends: &[BenchmarkTrend]) -> TrendSummary {
        let series = trend(0, &[0.0]).series().clone();
        TrendSummary::from_trends(series, trends, now(), &RegressionConfig::default())
    }

    #[test]
    fn empty_series_has_no_averages() {
        let s = summary(&[]);
        assert_eq!(s.latest_avg, None);
        assert_eq!(s.rolling_avg_7d, None);
        assert_eq!(s.score_delta_30d, None);
        assert!(!s.is_regressing);
    }

    #[test]
    fn rolling_averages_weight_periods_by_run_count() {
        let s = summary(&[trend(1, &[0.9, 0.9, 0.9]), trend(2, &[0.5]), trend(20, &[0.6])]);

        assert!((s.rolling_avg_7d.unwrap() - 0.8).abs() < 1e-9);
        assert!((s.rolling_avg_30d.unwrap() - 0.76).abs() < 1e-9);
        assert!((s.score_delta_7d.unwrap() - 0.2).abs() < 1e-9);
        assert_eq!(s.score_delta_30d, None);
        assert_eq!(s.latest_avg, Some(0.9));
    }

    #[test]
    fn deltas_use_the_newest_periods_before_each_window() {
        let mut trends: Vec<_> = (8..=14).map(|d| trend(d, &[0.5])).collect();
        trends.extend((10..=12).map(|d| trend(d + 30, &[0.4])));
        trends.push(trend(45, &[0.0]));
        trends.push(trend(3, &[0.7]));
        let s = summary(&trends);

        // The 5 newest periods before the short window all scored 0.5.
        assert!((s.score_delta_7d.unwrap() - 0.2).abs() < 1e-9);
        // Only four periods precede the long window: three at 0.4 and one at 0.0.
        assert!((s.score_delta_30d.unwrap() - (s.rolling_avg_30d.unwrap() - 0.3)).abs() < 1e-9);
    }

    #[test]
    fn sudden_drop_is_regressing() {
        let mut trends: Vec<_> = (4..=6).map(|d| trend(d, &[0.9])).collect();
        trends.extend((1..=3).map(|d| trend(d, &[0.7])));
        let s = summary(&trends);

        assert!((s.rolling_avg_7d.unwrap() - 0.8).abs() < 1e-9);
        assert!(s.is_regressing);
        assert!(s.regression_alert.unwrap().contains("0.100"));
    }

    #[test]
    fn steady_scores_are_not_regressing() {
        let trends: Vec<_> = (1..=6).map(|d| trend(d, &[0.8])).collect();
        assert!(!summary(&trends).is_regressing);
        assert!(!summary(&trends[..2]).is_regressing);
    }

    #[test]
    fn future_periods_are_ignored() {
        let s = summary(&[trend(1, &[0.8]), trend(-2, &[0.1])]);
        assert_eq!(s.latest_avg, Some(0.8));
        assert_eq!(s.rolling_avg_7d, Some(0.8));
    }

    #[tokio::test]
    async fn scan_reports_only_recent_regressing_series() {
        let store = MemoryTrendStore::new();
        let regressing = [(6, 0.9), (5, 0.9), (4, 0.9), (3, 0.6), (2, 0.6), (1, 0.6)];
        for (days_ago, score) in regressing {
            store.upsert(trend(days_ago, &[score])).await.unwrap();
        }
        for (days_ago, score) in [(3, 0.8), (2, 0.8), (1, 0.8)] {
            let mut t = trend(days_ago, &[score]);
            t.stat.key.series.prompt_id = "steady".into();
            store.upsert(t).await.unwrap();
        }
        for (days_ago, score) in [(12, 0.9), (11, 0.9), (10, 0.5), (9, 0.5), (8, 0.5)] {
            let mut t = trend(days_ago, &[score]);
            t.stat.key.series.prompt_id = "stale".into();
            store.upsert(t).await.unwrap();
        }

        let found = scan_regressions(&store, None, now(), &RegressionConfig::default()).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].series.prompt_id, "p1");
        assert!((found[0].rolling_avg_7d.unwrap() - 0.75).abs() < 1e-9);

        let weekly = scan_regressions(&store, Some(PeriodType::Weekly), now(), &RegressionConfig::default()).await.unwrap();
        assert!(weekly.is_empty());

        let single = summarize(&store, &found[0].series, now(), &RegressionConfig::default()).await.unwrap();
        assert_eq!(single, found[0]);
    }
}
