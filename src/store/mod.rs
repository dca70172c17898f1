//! Collaborator seams: where runs come from, where trends live and where
//! alerts go.
//!
//! Every trait is async and object safe so the [`TrendBuilder`] can hold them
//! behind an `Arc<dyn _>`. I/O failures surface as [`anyhow::Error`] and are
//! propagated unchanged by the builder.
//!
//! [`TrendBuilder`]: crate::trend::TrendBuilder

mod json;
mod memory;

pub use json::{JsonTrendStore, STORE_DIR_ENV, resolve_store_dir};
pub use memory::{LogAlertSink, MemoryAlertSink, MemoryCatalog, MemoryRunSource, MemoryTrendStore};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    period::{PeriodKey, SeriesKey},
    run::{BenchmarkRun, RunFilter},
    stats::PeriodStat,
    trend::{BenchmarkTrend, RegressionAlert},
};

/// Read access to benchmark runs.
#[async_trait]
pub trait RunSource: Send + Sync {
    /// Returns every run matching `filter`, in no particular order.
    async fn runs(&self, filter: &RunFilter) -> anyhow::Result<Vec<BenchmarkRun>>;
}

/// Persistent trend storage keyed by [`PeriodKey`].
#[async_trait]
pub trait TrendStore: Send + Sync {
    /// Returns up to `limit` trends of `series`, newest first.
    ///
    /// With `before`, only trends whose period starts strictly before it are returned.
    async fn recent(
        &self,
        series: &SeriesKey,
        before: Option<DateTime<Utc>>,
        limit: usize,
    ) -> anyhow::Result<Vec<BenchmarkTrend>>;

    /// Inserts the trend, replacing any stored trend with the same key.
    async fn upsert(&self, trend: BenchmarkTrend) -> anyhow::Result<()>;

    /// Every series with at least one stored trend.
    async fn series(&self) -> anyhow::Result<Vec<SeriesKey>>;

    /// Statistics of the most recent stored period before `key`.
    async fn previous(&self, key: &PeriodKey) -> anyhow::Result<Option<PeriodStat>> {
        let mut recent = self.recent(&key.series, Some(key.period_start), 1).await?;
        Ok(recent.pop().map(|t| t.stat))
    }

    /// The stored trend of exactly `key`.
    async fn get(&self, key: &PeriodKey) -> anyhow::Result<Option<BenchmarkTrend>> {
        let mut recent = self.recent(&key.series, Some(key.period_end), 1).await?;
        Ok(recent.pop().filter(|t| t.key() == key))
    }

    /// The oldest stored trend of the series that starts after `key`.
    async fn following(&self, key: &PeriodKey) -> anyhow::Result<Option<BenchmarkTrend>> {
        let recent = self.recent(&key.series, None, usize::MAX).await?;
        Ok(recent.into_iter().take_while(|t| t.period_start() > key.period_start).last())
    }
}

/// Receives regression alerts.
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Delivers one alert.
    async fn emit(&self, alert: &RegressionAlert) -> anyhow::Result<()>;
}

/// Display metadata of a prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptInfo {
    /// URL-safe identifier.
    pub slug: String,
    /// Human readable name.
    pub name: String,
}

impl PromptInfo {
    /// Metadata for a prompt the catalog does not know: the id is used for both fields.
    pub fn fallback(prompt_id: &str) -> Self {
        Self { slug: prompt_id.to_string(), name: prompt_id.to_string() }
    }
}

/// Looks up prompt metadata for alerts.
#[async_trait]
pub trait PromptCatalog: Send + Sync {
    /// Returns the metadata of `prompt_id`, or `None` if it is unknown.
    async fn prompt(&self, prompt_id: &str) -> anyhow::Result<Option<PromptInfo>>;
}
