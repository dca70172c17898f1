//! Error types for trend computation and trend storage.
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the pure compute functions.
///
/// Only malformed configuration or a caller contract violation produces one of
/// these. Data-dependent conditions (a missing dimension, a missing baseline, a
/// zero previous average) are represented in the returned structures instead.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    /// The period type string is not one of `daily`, `weekly` or `monthly`.
    #[error("invalid period type '{0}': expected one of daily, weekly, monthly")]
    InvalidPeriodType(String),

    /// Aggregation was requested for a period without runs.
    #[error("cannot aggregate an empty set of benchmark runs")]
    EmptyAggregationSet,

    /// A run carries a score that is not a finite number.
    #[error("invalid {name} score {value} in a run of prompt '{prompt_id}'")]
    InvalidScore {
        /// Prompt of the offending run.
        prompt_id: String,
        /// `overall` or the dimension name.
        name: String,
        /// The rejected value.
        value: f64,
    },

    /// Gate evaluation was requested but the configuration yields no gates.
    #[error("gate configuration is empty: at least one threshold or a baseline is required")]
    EmptyGateConfig,

    /// A threshold is not a finite number within `[0, 1]`.
    #[error("invalid threshold for '{name}': {value} (expected a finite value within [0, 1])")]
    InvalidThreshold {
        /// Name of the threshold key.
        name: String,
        /// The rejected value.
        value: f64,
    },

    /// The freshness limit could not be parsed.
    #[error("invalid max_age '{0}': expected a duration such as 24h or 7d")]
    InvalidMaxAge(String),

    /// The regression configuration is inconsistent.
    #[error("invalid regression config: {0}")]
    InvalidRegressionConfig(String),
}

/// Result type of the compute functions.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised by the JSON trend store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failed to open a series file.
    #[error("failed to open trend file '{path}'")]
    Open {
        /// Path of the series file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse a series file.
    #[error("failed to parse trend file '{path}'")]
    Parse {
        /// Path of the series file.
        path: PathBuf,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// Failed to create the store directory.
    #[error("failed to create trend store directory '{dir}'")]
    CreateDir {
        /// The directory that could not be created.
        dir: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to create the temporary file used for atomic writes.
    #[error("failed to create temporary file '{path}'")]
    CreateTemp {
        /// Path of the temporary file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to serialize trends.
    #[error("failed to serialize trends to '{path}'")]
    Serialize {
        /// Path of the temporary file.
        path: PathBuf,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// Failed to flush the temporary file.
    #[error("failed to flush '{path}'")]
    Flush {
        /// Path of the temporary file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to sync the temporary file to disk.
    #[error("failed to sync '{path}'")]
    Sync {
        /// Path of the temporary file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to move the temporary file into place.
    #[error("failed to rename '{from}' to '{to}'")]
    Rename {
        /// Source path.
        from: PathBuf,
        /// Destination path.
        to: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}
