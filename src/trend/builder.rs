use std::{collections::BTreeMap, num::NonZeroUsize, sync::Arc};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc, Weekday};
use nonzero_ext::nonzero;
use serde::{Deserialize, Serialize};
use tokio::{select, sync::Semaphore, task::JoinSet};
use tokio_util::sync::CancellationToken;

use super::{BenchmarkTrend, KeyLocks, RegressionAlert};
use crate::{
    period::{DEFAULT_WEEK_START, PeriodKey, PeriodType, SeriesKey},
    regression::{RegressionConfig, detect, detect_against_baseline},
    run::{BenchmarkRun, RunFilter},
    stats::aggregate,
    store::{AlertSink, PromptCatalog, PromptInfo, RunSource, TrendStore},
    suite::DEFAULT_PASS_THRESHOLD,
};

/// Options of a [`TrendBuilder`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    /// Granularity of the computed trends.
    pub period_type: PeriodType,
    /// Minimum overall score for a run to count as passed.
    pub pass_threshold: f64,
    /// Regression thresholds.
    pub regression: RegressionConfig,
    /// First day of weekly windows.
    pub week_start: Weekday,
    /// Maximum number of series built concurrently.
    pub parallelism: NonZeroUsize,
    /// Pinned score every period is compared against instead of its previous period.
    pub baseline: Option<f64>,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            period_type: PeriodType::Weekly,
            pass_threshold: DEFAULT_PASS_THRESHOLD,
            regression: RegressionConfig::default(),
            week_start: DEFAULT_WEEK_START,
            parallelism: nonzero!(4usize),
            baseline: None,
        }
    }
}

impl BuilderConfig {
    /// Validates the thresholds.
    pub fn validate(&self) -> crate::Result<()> {
        crate::gate::check_unit("pass_threshold", self.pass_threshold)?;
        if let Some(baseline) = self.baseline {
            crate::gate::check_unit("baseline", baseline)?;
        }
        self.regression.validate()
    }
}

/// Result of one build invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildOutcome {
    /// Every trend written, ordered by series then period start.
    pub trends: Vec<BenchmarkTrend>,
    /// Every alert emitted, in the same order.
    pub alerts: Vec<RegressionAlert>,
    /// Whether the build stopped early because it was cancelled.
    pub cancelled: bool,
}

impl BuildOutcome {
    fn merge(&mut self, other: BuildOutcome) {
        self.trends.extend(other.trends);
        self.alerts.extend(other.alerts);
        self.cancelled |= other.cancelled;
    }
}

/// Aggregates runs into per-period trends, detects regressions and persists
/// the results.
///
/// Series are built concurrently, up to [`BuilderConfig::parallelism`] at a
/// time. Within a series periods are built oldest first, so each period is
/// compared against a previous period that is already up to date. Reading the
/// previous period and writing the current one happen under a per-key lock;
/// builders sharing a [`KeyLocks`] (see [`TrendBuilder::with_locks`]) never
/// interleave on the same period.
///
/// When a rebuilt period is followed by a stored period that this build does
/// not touch, the stored period is compared again against its new
/// predecessor. With [`BuilderConfig::baseline`] every period is compared
/// against the pinned score instead and no neighbour is revisited.
///
/// Rebuilding a period with the same runs stores the same trend, so a failed
/// build can simply be retried.
#[derive(Clone)]
pub struct TrendBuilder {
    store: Arc<dyn TrendStore>,
    alerts: Option<Arc<dyn AlertSink>>,
    catalog: Option<Arc<dyn PromptCatalog>>,
    locks: Arc<KeyLocks>,
    config: BuilderConfig,
}

impl TrendBuilder {
    /// Creates a builder writing to `store`.
    pub fn new(store: Arc<dyn TrendStore>, config: BuilderConfig) -> crate::Result<Self> {
        config.validate()?;
        Ok(Self { store, alerts: None, catalog: None, locks: Arc::default(), config })
    }

    /// Delivers regression alerts to `sink`.
    pub fn with_alert_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.alerts = Some(sink);
        self
    }

    /// Resolves prompt slugs and names of alerts through `catalog`.
    pub fn with_catalog(mut self, catalog: Arc<dyn PromptCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Shares period locks with other builders writing to the same store.
    pub fn with_locks(mut self, locks: Arc<KeyLocks>) -> Self {
        self.locks = locks;
        self
    }

    /// The builder options.
    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    /// Builds the trends of every period touched by `runs`.
    ///
    /// Each period is aggregated from the runs given here only; pass every run
    /// of a period, or use [`TrendBuilder::refresh`] to read them from a source.
    pub async fn build(&self, runs: &[BenchmarkRun]) -> Result<BuildOutcome> {
        self.build_with_cancel(runs, CancellationToken::new()).await
    }

    /// Like [`TrendBuilder::build`], stopping before the next period once `cancel` fires.
    ///
    /// A period being written when cancellation fires is completed.
    pub async fn build_with_cancel(&self, runs: &[BenchmarkRun], cancel: CancellationToken) -> Result<BuildOutcome> {
        let grouped = self.group(runs);
        #[cfg(feature = "tracing")]
        tracing::info!(
            runs = runs.len(),
            series = grouped.len(),
            period_type = %self.config.period_type,
            "building trends"
        );

        let permits = Arc::new(Semaphore::new(self.config.parallelism.get()));
        let mut set = JoinSet::new();
        for (series, periods) in grouped {
            let this = self.clone();
            let permits = permits.clone();
            let cancel = cancel.clone();
            set.spawn(async move { this.build_series(series, periods, permits, cancel).await });
        }

        let mut outcome = BuildOutcome::default();
        while let Some(res) = set.join_next().await {
            outcome.merge(res??);
        }
        outcome.trends.sort_by(|a, b| a.key().cmp(b.key()));
        outcome.alerts.sort_by(|a, b| {
            (&a.prompt_id, &a.suite_id, &a.model_id, a.period_start)
                .cmp(&(&b.prompt_id, &b.suite_id, &b.model_id, b.period_start))
        });

        #[cfg(feature = "tracing")]
        tracing::info!(
            trends = outcome.trends.len(),
            alerts = outcome.alerts.len(),
            cancelled = outcome.cancelled,
            "trends built"
        );
        Ok(outcome)
    }

    /// Re-reads every run of the periods overlapping `filter` from `source` and rebuilds them.
    ///
    /// The time range of `filter` is widened to whole periods so no period is
    /// aggregated from a partial set of runs.
    pub async fn refresh(&self, source: &dyn RunSource, filter: &RunFilter) -> Result<BuildOutcome> {
        self.refresh_with_cancel(source, filter, CancellationToken::new()).await
    }

    /// Like [`TrendBuilder::refresh`], stopping before the next period once `cancel` fires.
    pub async fn refresh_with_cancel(
        &self,
        source: &dyn RunSource,
        filter: &RunFilter,
        cancel: CancellationToken,
    ) -> Result<BuildOutcome> {
        let filter = self.widen(filter);
        let runs = source.runs(&filter).await.context("failed to read benchmark runs")?;
        self.build_with_cancel(&runs, cancel).await
    }

    fn widen(&self, filter: &RunFilter) -> RunFilter {
        let BuilderConfig { period_type, week_start, .. } = self.config;
        let window = |at: DateTime<Utc>| crate::period::bucket_with(at, period_type, week_start);
        RunFilter {
            start: filter.start.map(|s| window(s).0),
            end: filter.end.map(|e| match window(e) {
                (start, _) if start == e => e,
                (_, end) => end,
            }),
            ..filter.clone()
        }
    }

    fn group(&self, runs: &[BenchmarkRun]) -> BTreeMap<SeriesKey, BTreeMap<PeriodKey, Vec<BenchmarkRun>>> {
        let mut grouped: BTreeMap<_, BTreeMap<_, Vec<_>>> = BTreeMap::new();
        for run in runs {
            let series = run.series(self.config.period_type);
            let key = series.period_at(run.executed_at, self.config.week_start);
            grouped.entry(series).or_default().entry(key).or_default().push(run.clone());
        }
        grouped
    }

    async fn build_series(
        self,
        series: SeriesKey,
        periods: BTreeMap<PeriodKey, Vec<BenchmarkRun>>,
        permits: Arc<Semaphore>,
        cancel: CancellationToken,
    ) -> Result<BuildOutcome> {
        let mut outcome = BuildOutcome::default();
        let _permit = select! {
            permit = permits.acquire_owned() => permit.with_context(|| format!("no build permit for {series}"))?,
            _ = cancel.cancelled() => {
                outcome.cancelled = true;
                return Ok(outcome);
            }
        };
        let mut periods = periods.into_iter().peekable();
        while let Some((key, runs)) = periods.next() {
            if cancel.is_cancelled() {
                #[cfg(feature = "tracing")]
                tracing::debug!(%series, "build cancelled");
                outcome.cancelled = true;
                break;
            }
            let trend = self.build_period(&key, &runs).await?;
            outcome.alerts.extend(self.alert(&trend).await?);
            outcome.trends.push(trend);

            if self.config.baseline.is_some() {
                continue;
            }
            let next_built = periods.peek().map(|(next, _)| next.period_start);
            if let Some((trend, was_regressed)) = self.redetect_following(&key, next_built).await? {
                if !was_regressed {
                    outcome.alerts.extend(self.alert(&trend).await?);
                }
                outcome.trends.push(trend);
            }
        }
        Ok(outcome)
    }

    async fn build_period(&self, key: &PeriodKey, runs: &[BenchmarkRun]) -> Result<BenchmarkTrend> {
        let stat = aggregate(runs, key.clone(), self.config.pass_threshold)?;

        let _guard = self.locks.lock(key).await;
        let detection = match self.config.baseline {
            Some(baseline) => detect_against_baseline(&stat, baseline, &self.config.regression),
            None => {
                let previous = self
                    .store
                    .previous(key)
                    .await
                    .with_context(|| format!("failed to read the period before {key}"))?;
                detect(&stat, previous.as_ref(), &self.config.regression)
            }
        };
        let trend = BenchmarkTrend { stat, detection };
        self.store
            .upsert(trend.clone())
            .await
            .with_context(|| format!("failed to store trend {key}"))?;

        #[cfg(feature = "tracing")]
        tracing::debug!(
            %key,
            runs = trend.stat.run_count,
            avg = trend.stat.avg_score,
            delta = ?trend.detection.regression_delta,
            "period built"
        );
        Ok(trend)
    }

    /// Compares the stored period after `key` against its predecessor again,
    /// unless it is rebuilt later in this build (it starts at or after `next_built`).
    ///
    /// Returns the rewritten trend and whether it was flagged before, or `None`
    /// if its detection did not change.
    async fn redetect_following(
        &self,
        key: &PeriodKey,
        next_built: Option<DateTime<Utc>>,
    ) -> Result<Option<(BenchmarkTrend, bool)>> {
        let following = self
            .store
            .following(key)
            .await
            .with_context(|| format!("failed to read the period after {key}"))?;
        let Some(following) = following.filter(|f| next_built.is_none_or(|next| f.period_start() < next)) else {
            return Ok(None);
        };

        let key = following.key().clone();
        let _guard = self.locks.lock(&key).await;
        let Some(stored) = self.store.get(&key).await.with_context(|| format!("failed to read trend {key}"))? else {
            return Ok(None);
        };
        let previous = self
            .store
            .previous(&key)
            .await
            .with_context(|| format!("failed to read the period before {key}"))?;
        let detection = detect(&stored.stat, previous.as_ref(), &self.config.regression);
        if detection == stored.detection {
            return Ok(None);
        }

        let was_regressed = stored.regression_detected();
        let trend = BenchmarkTrend { detection, ..stored };
        self.store
            .upsert(trend.clone())
            .await
            .with_context(|| format!("failed to store trend {key}"))?;

        #[cfg(feature = "tracing")]
        tracing::debug!(%key, prev = ?trend.detection.prev_period_avg, "following period re-detected");
        Ok(Some((trend, was_regressed)))
    }

    /// Builds and delivers the alert of `trend`, if it regressed.
    async fn alert(&self, trend: &BenchmarkTrend) -> Result<Option<RegressionAlert>> {
        let Some(severity) = trend.detection.severity(trend.stat.avg_score, &self.config.regression) else {
            return Ok(None);
        };
        let key = trend.key();
        let info = self.prompt_info(&key.series.prompt_id).await;
        let alert = RegressionAlert::from_trend(trend, severity, &info, Utc::now());
        if let Some(alert) = &alert {
            #[cfg(feature = "tracing")]
            tracing::warn!(%key, %severity, delta = alert.delta, "regression detected");
            if let Some(sink) = &self.alerts {
                sink.emit(alert).await.with_context(|| format!("failed to emit alert for {key}"))?;
            }
        }
        Ok(alert)
    }

    async fn prompt_info(&self, prompt_id: &str) -> PromptInfo {
        let Some(catalog) = &self.catalog else {
            return PromptInfo::fallback(prompt_id);
        };
        match catalog.prompt(prompt_id).await {
            Ok(Some(info)) => info,
            Ok(None) => PromptInfo::fallback(prompt_id),
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(prompt_id, error = %_e, "prompt lookup failed, using its id");
                PromptInfo::fallback(prompt_id)
            }
        }
    }
}
