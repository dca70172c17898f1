use std::{
    collections::{BTreeMap, HashMap},
    ops::Bound,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use super::{AlertSink, PromptCatalog, PromptInfo, RunSource, TrendStore};
use crate::{
    period::{PeriodKey, SeriesKey},
    run::{BenchmarkRun, RunFilter},
    trend::{BenchmarkTrend, RegressionAlert},
};

/// Runs held in memory.
#[derive(Debug, Default)]
pub struct MemoryRunSource {
    runs: RwLock<Vec<BenchmarkRun>>,
}

impl MemoryRunSource {
    /// Creates a source over `runs`.
    pub fn new(runs: Vec<BenchmarkRun>) -> Self {
        Self { runs: RwLock::new(runs) }
    }

    /// Adds a run.
    pub fn push(&self, run: BenchmarkRun) {
        self.runs.write().push(run);
    }
}

#[async_trait]
impl RunSource for MemoryRunSource {
    async fn runs(&self, filter: &RunFilter) -> anyhow::Result<Vec<BenchmarkRun>> {
        Ok(self.runs.read().iter().filter(|r| filter.matches(r)).cloned().collect())
    }
}

/// Trends held in memory, ordered by period start within each series.
#[derive(Debug, Default)]
pub struct MemoryTrendStore {
    series: RwLock<HashMap<SeriesKey, BTreeMap<DateTime<Utc>, BenchmarkTrend>>>,
}

impl MemoryTrendStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored trends.
    pub fn len(&self) -> usize {
        self.series.read().values().map(BTreeMap::len).sum()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TrendStore for MemoryTrendStore {
    async fn recent(
        &self,
        series: &SeriesKey,
        before: Option<DateTime<Utc>>,
        limit: usize,
    ) -> anyhow::Result<Vec<BenchmarkTrend>> {
        let guard = self.series.read();
        let Some(trends) = guard.get(series) else {
            return Ok(Vec::new());
        };
        let range = match before {
            Some(before) => trends.range(..before),
            None => trends.range(..),
        };
        Ok(range.rev().take(limit).map(|(_, t)| t.clone()).collect())
    }

    async fn upsert(&self, trend: BenchmarkTrend) -> anyhow::Result<()> {
        self.series
            .write()
            .entry(trend.series().clone())
            .or_default()
            .insert(trend.period_start(), trend);
        Ok(())
    }

    async fn series(&self) -> anyhow::Result<Vec<SeriesKey>> {
        let mut series = self.series.read().keys().cloned().collect::<Vec<_>>();
        series.sort();
        Ok(series)
    }

    async fn following(&self, key: &PeriodKey) -> anyhow::Result<Option<BenchmarkTrend>> {
        let guard = self.series.read();
        Ok(guard.get(&key.series).and_then(|trends| {
            trends.range((Bound::Excluded(key.period_start), Bound::Unbounded)).next().map(|(_, t)| t.clone())
        }))
    }
}

/// Collects alerts in memory.
#[derive(Debug, Default)]
pub struct MemoryAlertSink {
    alerts: Mutex<Vec<RegressionAlert>>,
}

impl MemoryAlertSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Alerts received so far, in delivery order.
    pub fn alerts(&self) -> Vec<RegressionAlert> {
        self.alerts.lock().clone()
    }
}

#[async_trait]
impl AlertSink for MemoryAlertSink {
    async fn emit(&self, alert: &RegressionAlert) -> anyhow::Result<()> {
        self.alerts.lock().push(alert.clone());
        Ok(())
    }
}

/// Writes alerts to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn emit(&self, _alert: &RegressionAlert) -> anyhow::Result<()> {
        #[cfg(feature = "tracing")]
        tracing::warn!(
            prompt = %_alert.prompt_slug,
            suite = %_alert.suite_id,
            model = %_alert.model_id,
            period_start = %_alert.period_start.format("%Y-%m-%d"),
            severity = %_alert.severity,
            current = _alert.current_avg,
            previous = _alert.previous_avg,
            delta = _alert.delta,
            "score regression"
        );
        Ok(())
    }
}

/// Prompt metadata held in memory.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    prompts: HashMap<String, PromptInfo>,
}

impl MemoryCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a prompt.
    pub fn with_prompt(mut self, prompt_id: impl Into<String>, info: PromptInfo) -> Self {
        self.prompts.insert(prompt_id.into(), info);
        self
    }
}

#[async_trait]
impl PromptCatalog for MemoryCatalog {
    async fn prompt(&self, prompt_id: &str) -> anyhow::Result<Option<PromptInfo>> {
        Ok(self.prompts.get(prompt_id).cloned())
    }
}
