//! Benchmark suite configuration.
//!
//! A suite declares the dimensions it scores and a `thresholds` map. The map
//! is parsed into a typed [`GateConfig`] at this boundary; its declaration
//! order becomes the gate order.
use std::{fmt, fs::File, io::BufReader, path::Path};

use anyhow::Context;
use serde::{
    Deserialize, Deserializer, Serialize, Serializer,
    de::{MapAccess, Visitor},
    ser::SerializeMap,
};

use crate::{
    error::{Error, Result},
    gate::{self, GateConfig},
};

/// Default minimum overall score for a run to count as passed.
pub const DEFAULT_PASS_THRESHOLD: f64 = 0.8;

fn default_pass_threshold() -> f64 {
    DEFAULT_PASS_THRESHOLD
}

/// Scoring configuration of a benchmark suite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteConfig {
    /// Suite identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Dimensions the suite scores, in display order.
    #[serde(default)]
    pub dimensions: Vec<String>,
    /// Named thresholds, in declaration order.
    #[serde(default, serialize_with = "serialize_ordered", deserialize_with = "deserialize_ordered")]
    pub thresholds: Vec<(String, f64)>,
    /// Minimum overall score for a run to count as passed.
    #[serde(default = "default_pass_threshold")]
    pub pass_threshold: f64,
    /// Maximum age of a benchmark accepted by the freshness gate, e.g. `24h`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age: Option<String>,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            id: None,
            dimensions: Vec::new(),
            thresholds: Vec::new(),
            pass_threshold: DEFAULT_PASS_THRESHOLD,
            max_age: None,
        }
    }
}

impl SuiteConfig {
    /// Loads a suite configuration from a JSON file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let file = File::open(path).with_context(|| format!("failed to open suite config '{}'", path.display()))?;
        serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("failed to parse suite config '{}'", path.display()))
    }

    /// Builds the gate configuration of this suite.
    pub fn gate_config(&self) -> Result<GateConfig> {
        gate::check_unit("pass_threshold", self.pass_threshold)?;

        #[cfg(feature = "tracing")]
        if !self.dimensions.is_empty() {
            for (name, _) in &self.thresholds {
                if name != gate::OVERALL && name != gate::MAX_REGRESSION && !self.dimensions.contains(name) {
                    tracing::warn!(suite = ?self.id, threshold = %name, "threshold does not match a declared dimension");
                }
            }
        }

        let mut config = GateConfig::from_thresholds(self.thresholds.iter().map(|(k, v)| (k.as_str(), *v)))?;
        if let Some(max_age) = &self.max_age {
            let max_age =
                humantime::parse_duration(max_age).map_err(|_| Error::InvalidMaxAge(max_age.clone()))?;
            config = config.max_age(max_age);
        }
        Ok(config)
    }
}

fn serialize_ordered<S: Serializer>(entries: &[(String, f64)], serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(entries.len()))?;
    for (k, v) in entries {
        map.serialize_entry(k, v)?;
    }
    map.end()
}

fn deserialize_ordered<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<(String, f64)>, D::Error> {
    struct Ordered;

    impl<'de> Visitor<'de> for Ordered {
        type Value = Vec<(String, f64)>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a map of threshold names to numbers")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
            let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
            while let Some(entry) = access.next_entry::<String, f64>()? {
                entries.push(entry);
            }
            Ok(entries)
        }
    }

    deserializer.deserialize_map(Ordered)
}

#[cfg(test)]
mod tests {
    use std::{io::Write, time::Duration};

    use super::*;

    const SUITE: &str = r#"{
        "id": "default",
        "dimensions": ["quality", "safety", "clarity"],
        "thresholds": {"safety": 0.9, "overall": 0.8, "max_regression": 0.05, "clarity": 0.7},
        "max_age": "24h"
    }"#;

    #[test]
    fn thresholds_keep_declaration_order() {
        let suite: SuiteConfig = serde_json::from_str(SUITE).unwrap();
        let names: Vec<_> = suite.thresholds.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(names, ["safety", "overall", "max_regression", "clarity"]);
        assert_eq!(suite.pass_threshold, DEFAULT_PASS_THRESHOLD);
    }

    #[test]
    fn gate_config_from_suite() {
        let suite: SuiteConfig = serde_json::from_str(SUITE).unwrap();
        let config = suite.gate_config().unwrap();

        let names: Vec<_> = config.thresholds.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["safety", "overall", "clarity"]);
        assert_eq!(config.max_regression, 0.05);
        assert_eq!(config.max_age, Some(Duration::from_secs(24 * 3600)));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let suite = SuiteConfig { thresholds: vec![("overall".into(), 1.5)], ..Default::default() };
        assert!(matches!(suite.gate_config(), Err(Error::InvalidThreshold { .. })));

        let suite = SuiteConfig { max_age: Some("yesterday".into()), ..Default::default() };
        assert_eq!(suite.gate_config(), Err(Error::InvalidMaxAge("yesterday".into())));
    }

    #[test]
    fn serializes_thresholds_as_an_ordered_map() {
        let suite: SuiteConfig = serde_json::from_str(SUITE).unwrap();
        let json = serde_json::to_string(&suite).unwrap();
        let safety = json.find("\"safety\":0.9").unwrap();
        let clarity = json.find("\"clarity\":0.7").unwrap();
        assert!(safety < clarity);
        let back: SuiteConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, suite);
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SUITE.as_bytes()).unwrap();
        let suite = SuiteConfig::load(file.path()).unwrap();
        assert_eq!(suite.id.as_deref(), Some("default"));
        assert!(SuiteConfig::load(Path::new("/nonexistent/suite.json")).is_err());
    }
}
