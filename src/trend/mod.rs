//! Trend records and regression alerts.
//!
//! A [`BenchmarkTrend`] is a [`PeriodStat`] plus the outcome of comparing it
//! with the previous period of its series. Trends are keyed by [`PeriodKey`]
//! and are always replaced as a whole when a period is recomputed.
//! [`TrendSummary`] condenses the stored trends of a series into rolling
//! 7-day and 30-day averages.

mod builder;
mod locks;
mod summary;

pub use builder::{BuildOutcome, BuilderConfig, TrendBuilder};
pub use locks::{KeyGuard, KeyLocks};
pub use summary::{LONG_WINDOW_DAYS, SHORT_WINDOW_DAYS, TrendSummary, scan_regressions, summarize};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    period::{PeriodKey, PeriodType, SeriesKey},
    regression::{AlertSeverity, Detection},
    stats::PeriodStat,
    store::PromptInfo,
};

/// Persisted trend record of one period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkTrend {
    /// Aggregated statistics of the period.
    #[serde(flatten)]
    pub stat: PeriodStat,
    /// Comparison with the previous period.
    #[serde(flatten)]
    pub detection: Detection,
}

impl BenchmarkTrend {
    /// The period this trend covers.
    pub fn key(&self) -> &PeriodKey {
        &self.stat.key
    }

    /// The series this trend belongs to.
    pub fn series(&self) -> &SeriesKey {
        &self.stat.key.series
    }

    /// Inclusive start of the period.
    pub fn period_start(&self) -> DateTime<Utc> {
        self.stat.key.period_start
    }

    /// Whether this period regressed against the previous one.
    pub fn regression_detected(&self) -> bool {
        self.detection.regression_detected
    }
}

/// Notification emitted when a period regresses against the previous one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionAlert {
    /// The regressed prompt.
    pub prompt_id: String,
    /// Slug of the prompt, or its id when unknown.
    pub prompt_slug: String,
    /// Display name of the prompt, or its id when unknown.
    pub prompt_name: String,
    /// The benchmark suite.
    pub suite_id: String,
    /// The evaluated model.
    pub model_id: String,
    /// Granularity of the compared periods.
    pub period_type: PeriodType,
    /// Start of the regressed period.
    pub period_start: DateTime<Utc>,
    /// Average score of the regressed period.
    pub current_avg: f64,
    /// Average score of the previous period.
    pub previous_avg: f64,
    /// `current_avg - previous_avg`.
    pub delta: f64,
    /// Delta relative to the previous average, in percent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta_percent: Option<f64>,
    /// Severity classification.
    pub severity: AlertSeverity,
    /// When the regression was detected.
    pub detected_at: DateTime<Utc>,
}

impl RegressionAlert {
    /// Builds the alert for a regressed trend. Returns `None` if the trend did not regress.
    pub fn from_trend(
        trend: &BenchmarkTrend,
        severity: AlertSeverity,
        prompt: &PromptInfo,
        detected_at: DateTime<Utc>,
    ) -> Option<Self> {
        let detection = &trend.detection;
        if !detection.regression_detected {
            return None;
        }
        let series = trend.series();
        Some(Self {
            prompt_id: series.prompt_id.clone(),
            prompt_slug: prompt.slug.clone(),
            prompt_name: prompt.name.clone(),
            suite_id: series.suite_id.clone(),
            model_id: series.model_id.clone(),
            period_type: series.period_type,
            period_start: trend.period_start(),
            current_avg: trend.stat.avg_score,
            previous_avg: detection.prev_period_avg?,
            delta: detection.regression_delta?,
            delta_percent: detection.change_percent,
            severity,
            detected_at,
        })
    }
}
