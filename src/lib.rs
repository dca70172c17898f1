//! Benchmark trend aggregation, regression detection and quality gates for
//! prompt evaluations.
//!
//! Raw benchmark runs (one prompt version scored by one suite against one
//! model) are bucketed into daily, weekly or monthly periods and aggregated
//! into [`PeriodStat`]s. Each period is compared with the previous period of
//! its series to detect score regressions, and the resulting
//! [`BenchmarkTrend`]s are persisted through a [`TrendStore`]. Independently,
//! a single run or period can be checked against the quality gates of a suite.
//!
//! ## Features
//!
//! - **Pure core**: bucketing, aggregation, detection, gating and chart
//!   projection are plain functions over plain data.
//! - **Pluggable storage**: runs, trends, alerts and prompt metadata sit
//!   behind async traits; in-memory and JSON file implementations are included.
//! - **Concurrent builds**: series are built in parallel while each period is
//!   read and written under its own lock.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use scoretrend::{
//!     BuilderConfig, GateConfig, PeriodType, TrendBuilder,
//!     gate::evaluate,
//!     run::load_runs,
//!     store::{LogAlertSink, MemoryTrendStore},
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runs = load_runs("runs.json".as_ref())?;
//!
//!     let config = BuilderConfig { period_type: PeriodType::Daily, ..Default::default() };
//!     let builder = TrendBuilder::new(Arc::new(MemoryTrendStore::new()), config)?
//!         .with_alert_sink(Arc::new(LogAlertSink));
//!     let outcome = builder.build(&runs).await?;
//!     println!("{} trends, {} regressions", outcome.trends.len(), outcome.alerts.len());
//!
//!     let gates = GateConfig::new().threshold("overall", 0.8).threshold("safety", 0.9);
//!     let eval = evaluate(&runs[0], Some(0.85), &gates)?;
//!     println!("{}", eval.summary());
//!     Ok(())
//! }
//! ```
#![deny(missing_docs)]

mod error;

pub mod chart;
pub mod cli;
pub mod gate;
pub mod period;
pub mod regression;
pub mod reporter;
pub mod run;
pub mod stats;
pub mod store;
pub mod suite;
pub mod trend;

pub use crate::{
    error::{Error, Result, StoreError},
    gate::{GateConfig, GateEvaluation, GateResult},
    period::{PeriodKey, PeriodType, SeriesKey, bucket},
    regression::{AlertSeverity, Detection, RegressionConfig, detect},
    run::{BenchmarkRun, RunFilter},
    stats::{PeriodStat, aggregate},
    store::{AlertSink, PromptCatalog, RunSource, TrendStore},
    trend::{BenchmarkTrend, BuildOutcome, BuilderConfig, RegressionAlert, TrendBuilder, TrendSummary},
};
