//! This module provides the command line interface of the trend engine.
//!
//! ```shell
//! $ scoretrend --help
//! Usage: scoretrend [OPTIONS] <COMMAND>
//!
//! Commands:
//!   trends       Aggregate benchmark runs into trends and detect regressions
//!   gate         Evaluate a benchmark run against the quality gates of a suite
//!   chart        Show the stored trend of one series as a chart
//!   regressions  List stored series whose recent periods dropped below their 7-day average
//!
//! Options:
//!   -o, --output <OUTPUT>            Output format for the report [default: text]
//!   -O, --output-file <OUTPUT_FILE>  Output file path for the report
//! ```
use std::{
    fs::File,
    io::stdout,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use clap::{
    Args, Parser, Subcommand, ValueEnum,
    builder::{
        Styles,
        styling::{AnsiColor, Effects},
    },
};
use tokio_util::sync::CancellationToken;

use crate::{
    chart,
    gate::evaluate,
    period::{PeriodType, SeriesKey},
    regression::RegressionConfig,
    reporter::{JsonReporter, TextReporter, TrendReporter},
    run::{RunFilter, load_runs},
    store::{JsonTrendStore, LogAlertSink, MemoryRunSource, MemoryTrendStore, TrendStore, resolve_store_dir},
    suite::{DEFAULT_PASS_THRESHOLD, SuiteConfig},
    trend::{BuilderConfig, TrendBuilder, scan_regressions, summarize},
};

#[derive(Parser, Clone, Debug)]
#[clap(
    version,
    about,
    styles(Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Cyan.on_default())
    )
)]
#[allow(missing_docs)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Output format for the report
    #[clap(short, long, value_enum, default_value_t = ReportFormat::Text, ignore_case = true, global = true)]
    pub output: ReportFormat,

    /// Output file path for the report
    ///
    /// When set, the report will be written to the specified file instead of stdout.
    #[clap(long, short = 'O', global = true)]
    pub output_file: Option<PathBuf>,
}

/// Subcommands.
#[derive(Subcommand, Clone, Debug)]
pub enum Command {
    /// Aggregate benchmark runs into trends and detect regressions
    Trends(TrendsArgs),

    /// Evaluate a benchmark run against the quality gates of a suite
    Gate(GateArgs),

    /// Show the stored trend of one series as a chart
    Chart(ChartArgs),

    /// List stored series whose recent periods dropped below their 7-day average
    Regressions(RegressionsArgs),
}

/// Options shared by commands that read the trend store.
#[derive(Args, Clone, Debug)]
#[allow(missing_docs)]
pub struct StoreArgs {
    /// Directory of the JSON trend store
    ///
    /// Defaults to $SCORETREND_STORE_DIR, then $CARGO_TARGET_DIR/scoretrend/trends,
    /// then target/scoretrend/trends.
    #[clap(long)]
    pub store_dir: Option<PathBuf>,
}

#[derive(Args, Clone, Debug)]
#[allow(missing_docs)]
pub struct TrendsArgs {
    /// File with benchmark runs: a JSON array or JSON lines
    #[clap(long, short = 'r')]
    pub runs: PathBuf,

    /// Period granularity
    #[clap(long, short = 'p', value_enum, default_value_t = PeriodType::Weekly, ignore_case = true)]
    pub period: PeriodType,

    /// Only build trends of this prompt
    #[clap(long)]
    pub prompt: Option<String>,

    /// Only build trends of this suite
    #[clap(long)]
    pub suite: Option<String>,

    /// Only build trends of this model
    #[clap(long)]
    pub model: Option<String>,

    /// Only rebuild periods overlapping runs executed at or after this instant (RFC 3339)
    #[clap(long)]
    pub since: Option<DateTime<Utc>>,

    /// Only rebuild periods overlapping runs executed before this instant (RFC 3339)
    #[clap(long)]
    pub until: Option<DateTime<Utc>>,

    /// Minimum overall score for a run to count as passed
    #[clap(long, default_value_t = DEFAULT_PASS_THRESHOLD)]
    pub pass_threshold: f64,

    /// Minimum decline flagged as a regression
    #[clap(long, default_value_t = RegressionConfig::default().warning_delta)]
    pub warning_delta: f64,

    /// Decline at or beyond which a regression is critical
    #[clap(long, default_value_t = RegressionConfig::default().critical_delta)]
    pub critical_delta: f64,

    /// Average score below which any regression is critical
    #[clap(long, default_value_t = RegressionConfig::default().critical_floor)]
    pub critical_floor: f64,

    /// Compare every period against this pinned score instead of the previous period
    #[clap(long, short = 'b')]
    pub baseline: Option<f64>,

    /// Number of series built concurrently
    #[clap(long, short = 'j', default_value = "4")]
    pub parallelism: NonZeroUsize,

    #[command(flatten)]
    pub store: StoreArgs,

    /// Keep trends in memory only
    #[clap(long, conflicts_with = "store_dir")]
    pub memory: bool,

    /// Exit with a failure status if any regression is detected
    #[clap(long)]
    pub fail_on_regression: bool,
}

impl TrendsArgs {
    /// Builder options from the command line.
    pub fn builder_config(&self) -> BuilderConfig {
        BuilderConfig {
            period_type: self.period,
            pass_threshold: self.pass_threshold,
            regression: RegressionConfig {
                warning_delta: self.warning_delta,
                critical_delta: self.critical_delta,
                critical_floor: self.critical_floor,
            },
            parallelism: self.parallelism,
            baseline: self.baseline,
            ..Default::default()
        }
    }

    /// Run filter from the command line.
    pub fn filter(&self) -> RunFilter {
        RunFilter {
            prompt_id: self.prompt.clone(),
            suite_id: self.suite.clone(),
            model_id: self.model.clone(),
            start: self.since,
            end: self.until,
        }
    }
}

#[derive(Args, Clone, Debug)]
#[allow(missing_docs)]
pub struct GateArgs {
    /// File with the benchmark run to evaluate (a single JSON object)
    #[clap(long, short = 'r')]
    pub run: PathBuf,

    /// Suite configuration file
    #[clap(long, short = 's')]
    pub suite: PathBuf,

    /// Baseline overall score for the regression gate
    #[clap(long, short = 'b')]
    pub baseline: Option<f64>,
}

#[derive(Args, Clone, Debug)]
#[allow(missing_docs)]
pub struct ChartArgs {
    /// Prompt of the series
    #[clap(long)]
    pub prompt: String,

    /// Suite of the series
    #[clap(long)]
    pub suite: String,

    /// Model of the series
    #[clap(long)]
    pub model: String,

    /// Period granularity of the series
    #[clap(long, short = 'p', value_enum, default_value_t = PeriodType::Weekly, ignore_case = true)]
    pub period: PeriodType,

    /// Number of most recent periods to show
    #[clap(long, short = 'n', default_value = "12")]
    pub limit: NonZeroUsize,

    /// End of the rolling windows (RFC 3339) [default: now]
    #[clap(long)]
    pub as_of: Option<DateTime<Utc>>,

    #[command(flatten)]
    pub store: StoreArgs,
}

#[derive(Args, Clone, Debug)]
#[allow(missing_docs)]
pub struct RegressionsArgs {
    /// Only scan series of this period granularity
    #[clap(long, short = 'p', value_enum, ignore_case = true)]
    pub period: Option<PeriodType>,

    /// Minimum drop below the 7-day average flagged as a regression
    #[clap(long, default_value_t = RegressionConfig::default().warning_delta)]
    pub warning_delta: f64,

    /// End of the rolling windows (RFC 3339) [default: now]
    #[clap(long)]
    pub as_of: Option<DateTime<Utc>>,

    #[command(flatten)]
    pub store: StoreArgs,

    /// Exit with a failure status if any series is regressing
    #[clap(long)]
    pub fail_on_regression: bool,
}

impl RegressionsArgs {
    /// Regression thresholds from the command line.
    pub fn regression_config(&self) -> anyhow::Result<RegressionConfig> {
        let defaults = RegressionConfig::default();
        let config = RegressionConfig {
            warning_delta: self.warning_delta,
            critical_delta: defaults.critical_delta.max(self.warning_delta),
            ..defaults
        };
        config.validate()?;
        Ok(config)
    }
}

/// Report format.
#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum ReportFormat {
    /// Report in plain text format. See [`TextReporter`].
    Text,

    /// Report in JSON format. See [`JsonReporter`].
    Json,
}

/// Run the command. Returns `false` when the command's checks failed.
pub async fn run(cli: Cli) -> anyhow::Result<bool> {
    let reporter: &dyn TrendReporter = match cli.output {
        ReportFormat::Text => &TextReporter,
        ReportFormat::Json => &JsonReporter,
    };
    let mut out: Box<dyn std::io::Write> = match &cli.output_file {
        Some(path) => Box::new(File::create(path)?),
        None => Box::new(stdout()),
    };

    match cli.command {
        Command::Trends(args) => {
            let store: Arc<dyn TrendStore> = if args.memory {
                Arc::new(MemoryTrendStore::new())
            } else {
                Arc::new(JsonTrendStore::new(resolve_store_dir(args.store.store_dir.as_deref())))
            };
            let builder = TrendBuilder::new(store, args.builder_config())?.with_alert_sink(Arc::new(LogAlertSink));
            let source = MemoryRunSource::new(load_runs(&args.runs)?);

            let cancel = CancellationToken::new();
            let ctrl_c = tokio::spawn({
                let cancel = cancel.clone();
                async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        cancel.cancel();
                    }
                }
            });
            let outcome = builder.refresh_with_cancel(&source, &args.filter(), cancel).await;
            ctrl_c.abort();
            let outcome = outcome?;

            reporter.print_trends(&mut out, &outcome)?;
            Ok(!outcome.cancelled && !(args.fail_on_regression && !outcome.alerts.is_empty()))
        }
        Command::Gate(args) => {
            let suite = SuiteConfig::load(&args.suite)?;
            let run = load_single_run(&args.run)?;
            let eval = evaluate(&run, args.baseline, &suite.gate_config()?)?;
            reporter.print_gates(&mut out, &eval)?;
            Ok(eval.passed)
        }
        Command::Chart(args) => {
            let store = JsonTrendStore::new(resolve_store_dir(args.store.store_dir.as_deref()));
            let series = SeriesKey {
                prompt_id: args.prompt,
                suite_id: args.suite,
                model_id: args.model,
                period_type: args.period,
            };
            let now = args.as_of.unwrap_or_else(Utc::now);
            let trends = store.recent(&series, None, args.limit.get()).await?;
            let summary = summarize(&store, &series, now, &RegressionConfig::default()).await?;
            reporter.print_chart(&mut out, &chart::project(&trends), &summary)?;
            Ok(true)
        }
        Command::Regressions(args) => {
            let store = JsonTrendStore::new(resolve_store_dir(args.store.store_dir.as_deref()));
            let config = args.regression_config()?;
            let now = args.as_of.unwrap_or_else(Utc::now);
            let regressing = scan_regressions(&store, args.period, now, &config).await?;
            reporter.print_regressions(&mut out, &regressing)?;
            Ok(!(args.fail_on_regression && !regressing.is_empty()))
        }
    }
}

fn load_single_run(path: &Path) -> anyhow::Result<crate::run::BenchmarkRun> {
    let mut runs = load_runs(path)?;
    match runs.len() {
        1 => Ok(runs.remove(0)),
        n => anyhow::bail!("expected exactly one benchmark run in '{}', found {n}", path.display()),
    }
}
