//! Regression detection between consecutive periods.
//!
//! [`detect`] compares the average score of a period against the previous
//! period of the same series (or, with [`detect_against_baseline`], against a
//! pinned baseline score). Deltas are signed: a negative delta is a decline.

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    stats::PeriodStat,
};

/// Thresholds for regression detection and severity classification.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegressionConfig {
    /// Minimum decline (absolute score points) flagged as a regression.
    pub warning_delta: f64,
    /// Decline at or beyond which a regression is critical.
    pub critical_delta: f64,
    /// Average score below which any regression is critical.
    pub critical_floor: f64,
}

impl Default for RegressionConfig {
    fn default() -> Self {
        Self { warning_delta: 0.05, critical_delta: 0.15, critical_floor: 0.5 }
    }
}

impl RegressionConfig {
    /// Validates the thresholds.
    pub fn validate(&self) -> Result<()> {
        let Self { warning_delta, critical_delta, critical_floor } = *self;
        if !(warning_delta.is_finite() && critical_delta.is_finite() && critical_floor.is_finite()) {
            return Err(Error::InvalidRegressionConfig("thresholds must be finite".into()));
        }
        if warning_delta <= 0.0 {
            return Err(Error::InvalidRegressionConfig(format!(
                "warning_delta must be positive, got {warning_delta}"
            )));
        }
        if critical_delta < warning_delta {
            return Err(Error::InvalidRegressionConfig(format!(
                "critical_delta ({critical_delta}) must not be below warning_delta ({warning_delta})"
            )));
        }
        if !(0.0..=1.0).contains(&critical_floor) {
            return Err(Error::InvalidRegressionConfig(format!(
                "critical_floor must be within [0, 1], got {critical_floor}"
            )));
        }
        Ok(())
    }
}

/// Severity of a detected regression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AlertSeverity {
    /// The decline met the warning threshold.
    Warning,
    /// The decline met the critical threshold or the score fell below the floor.
    Critical,
}

/// Outcome of comparing a period against its predecessor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Whether the decline met the warning threshold.
    pub regression_detected: bool,
    /// `current - previous`; absent without a previous period.
    pub regression_delta: Option<f64>,
    /// Average score of the previous period (or the pinned baseline).
    pub prev_period_avg: Option<f64>,
    /// `delta / previous * 100`; absent without a previous period or when it averaged zero.
    pub change_percent: Option<f64>,
}

impl Detection {
    /// Severity of this detection, or `None` if no regression was detected.
    pub fn severity(&self, current_avg: f64, config: &RegressionConfig) -> Option<AlertSeverity> {
        match (self.regression_detected, self.regression_delta) {
            (true, Some(delta)) => Some(classify(delta, current_avg, config)),
            _ => None,
        }
    }
}

/// Compares `current` with the previous period of the same series.
///
/// Without a previous period there is no baseline to regress against, so
/// nothing is detected and every optional field is absent.
pub fn detect(current: &PeriodStat, previous: Option<&PeriodStat>, config: &RegressionConfig) -> Detection {
    detect_avg(current.avg_score, previous.map(|p| p.avg_score), config)
}

/// Compares `current` with a pinned baseline score instead of the previous period.
pub fn detect_against_baseline(current: &PeriodStat, baseline: f64, config: &RegressionConfig) -> Detection {
    detect_avg(current.avg_score, Some(baseline), config)
}

fn detect_avg(current: f64, previous: Option<f64>, config: &RegressionConfig) -> Detection {
    let Some(previous) = previous else {
        return Detection::default();
    };

    let delta = current - previous;
    let change_percent = if previous == 0.0 { None } else { Some(delta / previous * 100.0) };

    Detection {
        regression_detected: delta <= -config.warning_delta,
        regression_delta: Some(delta),
        prev_period_avg: Some(previous),
        change_percent,
    }
}

/// Classifies a regression. Ties resolve to [`AlertSeverity::Critical`].
pub fn classify(delta: f64, current_avg: f64, config: &RegressionConfig) -> AlertSeverity {
    if delta.abs() >= config.critical_delta || current_avg < config.critical_floor {
        AlertSeverity::Critical
    } else {
        AlertSeverity::Warning
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::{run::tests::run, stats::aggregate, stats::tests::key};

    fn stat(avg: f64) -> PeriodStat {
        aggregate(&[run(avg)], key(), 0.8).unwrap()
    }

    #[test]
    fn first_period_detects_nothing() {
        let d = detect(&stat(0.2), None, &RegressionConfig::default());
        assert!(!d.regression_detected);
        assert_eq!(d.regression_delta, None);
        assert_eq!(d.prev_period_avg, None);
        assert_eq!(d.change_percent, None);
        assert_eq!(d.severity(0.2, &RegressionConfig::default()), None);
    }

    #[test]
    fn decline_beyond_warning_is_detected() {
        let config = RegressionConfig { warning_delta: 0.05, critical_delta: 0.15, critical_floor: 0.5 };
        let d = detect(&stat(0.70), Some(&stat(0.85)), &config);

        assert!(d.regression_detected);
        assert!((d.regression_delta.unwrap() + 0.15).abs() < 1e-9);
        assert_eq!(d.prev_period_avg, Some(0.85));
        assert!((d.change_percent.unwrap() + 17.647_058).abs() < 1e-4);
        assert_eq!(d.severity(0.70, &config), Some(AlertSeverity::Critical));
    }

    #[test]
    fn moderate_decline_is_a_warning() {
        let config = RegressionConfig::default();
        let d = detect(&stat(0.78), Some(&stat(0.85)), &config);
        assert!(d.regression_detected);
        assert_eq!(d.severity(0.78, &config), Some(AlertSeverity::Warning));
    }

    #[test]
    fn small_decline_and_improvement_are_not_regressions() {
        let config = RegressionConfig::default();
        assert!(!detect(&stat(0.83), Some(&stat(0.85)), &config).regression_detected);
        let d = detect(&stat(0.95), Some(&stat(0.85)), &config);
        assert!(!d.regression_detected);
        assert!(d.regression_delta.unwrap() > 0.0);
    }

    #[test]
    fn zero_previous_average_has_no_percent() {
        let d = detect(&stat(0.4), Some(&stat(0.0)), &RegressionConfig::default());
        assert_eq!(d.change_percent, None);
        assert_eq!(d.prev_period_avg, Some(0.0));
        assert!(!d.regression_detected);
    }

    #[test]
    fn score_below_floor_is_critical() {
        let config = RegressionConfig { warning_delta: 0.05, critical_delta: 0.5, critical_floor: 0.6 };
        assert_eq!(classify(-0.06, 0.55, &config), AlertSeverity::Critical);
        assert_eq!(classify(-0.06, 0.65, &config), AlertSeverity::Warning);
    }

    #[test]
    fn critical_threshold_tie_is_critical() {
        let config = RegressionConfig { warning_delta: 0.05, critical_delta: 0.25, critical_floor: 0.0 };
        assert_eq!(classify(-0.25, 0.5, &config), AlertSeverity::Critical);
    }

    #[test]
    fn pinned_baseline() {
        let d = detect_against_baseline(&stat(0.7), 0.9, &RegressionConfig::default());
        assert!(d.regression_detected);
        assert_eq!(d.prev_period_avg, Some(0.9));
    }

    #[test]
    fn validate_rejects_inconsistent_config() {
        assert!(RegressionConfig::default().validate().is_ok());
        let bad = RegressionConfig { warning_delta: 0.2, critical_delta: 0.1, critical_floor: 0.5 };
        assert!(matches!(bad.validate(), Err(Error::InvalidRegressionConfig(_))));
        let bad = RegressionConfig { warning_delta: 0.0, ..Default::default() };
        assert!(bad.validate().is_err());
        let bad = RegressionConfig { critical_floor: f64::NAN, ..Default::default() };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: RegressionConfig = serde_json::from_str(r#"{"warning_delta": 0.1}"#).unwrap();
        assert_eq!(config.warning_delta, 0.1);
        assert_eq!(config.critical_delta, 0.15);
    }

    proptest! {
        #[test]
        fn swapping_periods_negates_delta(a in 0.0f64..=1.0, b in 0.0f64..=1.0) {
            let config = RegressionConfig::default();
            let forward = detect(&stat(a), Some(&stat(b)), &config);
            let backward = detect(&stat(b), Some(&stat(a)), &config);
            prop_assert!((forward.regression_delta.unwrap() + backward.regression_delta.unwrap()).abs() < 1e-12);
        }
    }
}
