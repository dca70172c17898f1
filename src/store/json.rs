//! JSON file trend store: one file per series.

use std::{
    fs::{self, File},
    io::{BufReader, BufWriter, ErrorKind, Write},
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::TrendStore;
use crate::{error::StoreError, period::SeriesKey, trend::BenchmarkTrend};

/// Environment variable overriding the default store directory.
pub const STORE_DIR_ENV: &str = "SCORETREND_STORE_DIR";

/// Current version of the series file format.
const SCHEMA_VERSION: u32 = 1;

/// Resolve the trend store directory using the priority order:
/// 1. CLI flag (if specified)
/// 2. SCORETREND_STORE_DIR environment variable (if set)
/// 3. ${CARGO_TARGET_DIR}/scoretrend/trends (if CARGO_TARGET_DIR is set)
/// 4. target/scoretrend/trends (default fallback)
pub fn resolve_store_dir(cli_dir: Option<&Path>) -> PathBuf {
    if let Some(dir) = cli_dir {
        return dir.to_path_buf();
    }
    std::env::var(STORE_DIR_ENV)
        .map(PathBuf::from)
        .or_else(|_| std::env::var("CARGO_TARGET_DIR").map(|d| PathBuf::from(d).join("scoretrend/trends")))
        .unwrap_or_else(|_| PathBuf::from("target/scoretrend/trends"))
}

#[derive(Debug, Serialize, Deserialize)]
struct SeriesFile {
    schema_version: u32,
    series: SeriesKey,
    /// Sorted by period start, oldest first.
    trends: Vec<BenchmarkTrend>,
}

/// Trend store persisting each series to `<dir>/<series>.json`.
///
/// Files are rewritten atomically (write to a temporary file, then rename), so
/// a crash never leaves a half-written series behind. Writes through one store
/// instance are serialized. File I/O runs on the blocking thread pool.
#[derive(Debug)]
pub struct JsonTrendStore {
    dir: PathBuf,
    write: Mutex<()>,
}

impl JsonTrendStore {
    /// Opens a store rooted at `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), write: Mutex::new(()) }
    }

    /// Root directory of the store.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file holding `series`.
    pub fn series_path(&self, series: &SeriesKey) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(series)))
    }
}

fn load(path: &Path) -> Result<Vec<BenchmarkTrend>, StoreError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StoreError::Open { path: path.to_path_buf(), source: e }),
    };
    let file: SeriesFile = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| StoreError::Parse { path: path.to_path_buf(), source: e })?;

    #[cfg(feature = "tracing")]
    if file.schema_version > SCHEMA_VERSION {
        tracing::warn!(
            path = %path.display(),
            schema_version = file.schema_version,
            "trend file was written by a newer version, attempting best-effort parsing"
        );
    }

    Ok(file.trends)
}

fn save(dir: &Path, series: SeriesKey, trends: Vec<BenchmarkTrend>) -> Result<(), StoreError> {
    fs::create_dir_all(dir).map_err(|e| StoreError::CreateDir { dir: dir.to_path_buf(), source: e })?;

    let stem = file_stem(&series);
    let path = dir.join(format!("{stem}.json"));
    let temp_path = dir.join(format!("{stem}.json.tmp"));
    let file = SeriesFile { schema_version: SCHEMA_VERSION, series, trends };

    {
        macro_rules! map_err {
            ($expr:expr, $variant:ident) => {
                $expr.map_err(|e| StoreError::$variant { path: temp_path.clone(), source: e })?
            };
        }

        let f = map_err!(File::create(&temp_path), CreateTemp);
        let mut writer = BufWriter::new(f);
        map_err!(serde_json::to_writer_pretty(&mut writer, &file), Serialize);
        map_err!(writer.flush(), Flush);
        map_err!(writer.get_ref().sync_all(), Sync);
    }

    fs::rename(&temp_path, &path).map_err(|e| StoreError::Rename { from: temp_path, to: path, source: e })
}

/// Series keys of every `*.json` file in `dir`.
fn list(dir: &Path) -> Result<Vec<SeriesKey>, StoreError> {
    #[derive(Deserialize)]
    struct Header {
        series: SeriesKey,
    }

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StoreError::Open { path: dir.to_path_buf(), source: e }),
    };
    let mut series = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| StoreError::Open { path: dir.to_path_buf(), source: e })?.path();
        if path.extension().is_none_or(|ext| ext != "json") {
            continue;
        }
        let file = File::open(&path).map_err(|e| StoreError::Open { path: path.clone(), source: e })?;
        let header: Header =
            serde_json::from_reader(BufReader::new(file)).map_err(|e| StoreError::Parse { path, source: e })?;
        series.push(header.series);
    }
    Ok(series)
}

#[async_trait]
impl TrendStore for JsonTrendStore {
    async fn recent(
        &self,
        series: &SeriesKey,
        before: Option<DateTime<Utc>>,
        limit: usize,
    ) -> anyhow::Result<Vec<BenchmarkTrend>> {
        let path = self.series_path(series);
        let trends = tokio::task::spawn_blocking(move || load(&path)).await??;
        Ok(trends
            .into_iter()
            .rev()
            .filter(|t| before.is_none_or(|b| t.period_start() < b))
            .take(limit)
            .collect())
    }

    async fn upsert(&self, trend: BenchmarkTrend) -> anyhow::Result<()> {
        let _write = self.write.lock().await;
        let (dir, path, series) = (self.dir.clone(), self.series_path(trend.series()), trend.series().clone());
        tokio::task::spawn_blocking(move || {
            let mut trends = load(&path)?;
            match trends.binary_search_by_key(&trend.period_start(), BenchmarkTrend::period_start) {
                Ok(i) => trends[i] = trend,
                Err(i) => trends.insert(i, trend),
            }
            save(&dir, series, trends)
        })
        .await??;
        Ok(())
    }

    async fn series(&self) -> anyhow::Result<Vec<SeriesKey>> {
        let dir = self.dir.clone();
        let mut series = tokio::task::spawn_blocking(move || list(&dir)).await??;
        series.sort();
        Ok(series)
    }
}

/// File stem of a series: its components percent-encoded and joined by `+`.
fn file_stem(series: &SeriesKey) -> String {
    let mut stem = String::new();
    for part in [&series.prompt_id, &series.suite_id, &series.model_id] {
        encode_into(part, &mut stem);
        stem.push('+');
    }
    stem.push_str(&series.period_type.to_string());
    stem
}

fn encode_into(s: &str, out: &mut String) {
    for b in s.bytes() {
        match b {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' => out.push(b as char),
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::{
        period::{DEFAULT_WEEK_START, PeriodType},
        regression::Detection,
        run::tests::run_at,
        stats::aggregate,
    };

    fn trend_at(day: u32, score: f64) -> BenchmarkTrend {
        let at = Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap();
        let run = run_at(score, at);
        let key = run.series(PeriodType::Daily).period_at(at, DEFAULT_WEEK_START);
        BenchmarkTrend { stat: aggregate([&run], key, 0.8).unwrap(), detection: Detection::default() }
    }

    #[test]
    fn test_resolve_store_dir_cli_override() {
        let cli_dir = PathBuf::from("/custom/path");
        assert_eq!(resolve_store_dir(Some(&cli_dir)), cli_dir);
    }

    #[test]
    fn test_file_stem_is_path_safe() {
        let mut series = trend_at(1, 0.5).series().clone();
        series.prompt_id = "../etc/passwd".into();
        series.model_id = "gpt-4o mini".into();
        let stem = file_stem(&series);
        assert_eq!(stem, "%2E%2E%2Fetc%2Fpasswd+default+gpt-4o%20mini+daily");
        assert!(!stem.contains('/'));
    }

    #[test]
    fn test_file_stem_is_injective_over_separators() {
        let mut a = trend_at(1, 0.5).series().clone();
        let mut b = a.clone();
        a.prompt_id = "x+y".into();
        a.suite_id = "z".into();
        b.prompt_id = "x".into();
        b.suite_id = "y+z".into();
        assert_ne!(file_stem(&a), file_stem(&b));
    }

    #[tokio::test]
    async fn test_upsert_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonTrendStore::new(dir.path().join("trends"));
        let series = trend_at(1, 0.5).series().clone();

        assert!(store.recent(&series, None, 10).await.unwrap().is_empty());

        store.upsert(trend_at(2, 0.6)).await.unwrap();
        store.upsert(trend_at(1, 0.5)).await.unwrap();
        store.upsert(trend_at(2, 0.7)).await.unwrap();

        let reopened = JsonTrendStore::new(store.dir());
        let trends = reopened.recent(&series, None, 10).await.unwrap();
        assert_eq!(trends.len(), 2);
        assert_eq!(trends[0].stat.avg_score, 0.7);
        assert_eq!(trends[1].stat.avg_score, 0.5);

        let previous = reopened.previous(trend_at(2, 0.0).key()).await.unwrap().unwrap();
        assert_eq!(previous.avg_score, 0.5);
        assert!(!store.dir().join(format!("{}.json.tmp", file_stem(&series))).exists());
    }

    #[tokio::test]
    async fn test_series_lists_stored_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonTrendStore::new(dir.path().join("trends"));
        assert!(store.series().await.unwrap().is_empty());

        let mut other = trend_at(1, 0.5);
        other.stat.key.series.prompt_id = "p2".into();
        store.upsert(trend_at(1, 0.5)).await.unwrap();
        store.upsert(trend_at(2, 0.6)).await.unwrap();
        store.upsert(other).await.unwrap();
        fs::write(store.dir().join("notes.txt"), "ignored").unwrap();

        let series = store.series().await.unwrap();
        let prompts: Vec<_> = series.iter().map(|s| s.prompt_id.as_str()).collect();
        assert_eq!(prompts, ["p1", "p2"]);
    }

    #[tokio::test]
    async fn test_following_and_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonTrendStore::new(dir.path());
        for (day, score) in [(1, 0.5), (3, 0.7), (6, 0.9)] {
            store.upsert(trend_at(day, score)).await.unwrap();
        }

        let next = store.following(trend_at(3, 0.0).key()).await.unwrap().unwrap();
        assert_eq!(next.stat.avg_score, 0.9);
        assert!(store.following(trend_at(6, 0.0).key()).await.unwrap().is_none());

        assert_eq!(store.get(trend_at(3, 0.0).key()).await.unwrap().unwrap().stat.avg_score, 0.7);
        assert!(store.get(trend_at(4, 0.0).key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonTrendStore::new(dir.path());
        let series = trend_at(1, 0.5).series().clone();
        fs::write(store.series_path(&series), "not json").unwrap();

        let err = store.recent(&series, None, 1).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<StoreError>(), Some(StoreError::Parse { .. })));
    }
}
