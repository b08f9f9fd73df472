//! Runtime configuration
//!
//! Loaded from TOML or JSON; every field has a default so partial files are
//! fine:
//!
//! ```toml
//! auto_size_timeout_ms = 250
//! default_series_type = "bar"
//!
//! [default_size]
//! width = 800
//! height = 400
//! ```

use crate::error::ConfigError;
use crate::types::{SeriesKind, Size};
use chartflow_pipeline::SchedulerConfig;
use chartflow_reconcile::{GroupingPredicate, MatcherConfig, SERIES_IDENTITY_KEYS};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Chart runtime configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChartflowConfig {
    /// How long the first layout waits for an auto-size signal
    pub auto_size_timeout_ms: u64,
    /// Scene size used when no size is known after the wait
    pub default_size: Size,
    /// Extra passes allowed before a render is forced
    pub max_shortcuts: u32,
    /// Poll interval while waiting for quiescence
    pub poll_interval_ms: u64,
    /// Default timeout for `wait_for_update`
    pub wait_timeout_ms: u64,
    /// Series type assumed when a series omits `type`
    pub default_series_type: SeriesKind,
    /// Properties that distinguish series of the same type
    pub series_identity_keys: Vec<String>,
    /// Series property whose changes count as regrouping
    pub grouping_key: String,
    /// Fields of the grouping property that matter
    pub grouping_fields: Vec<String>,
    /// Key holding inline data, on the chart and on series
    pub data_key: String,
}

impl Default for ChartflowConfig {
    fn default() -> Self {
        Self {
            auto_size_timeout_ms: 500,
            default_size: Size::new(600, 300),
            max_shortcuts: 3,
            poll_interval_ms: 5,
            wait_timeout_ms: 10_000,
            default_series_type: SeriesKind::Line,
            series_identity_keys: SERIES_IDENTITY_KEYS.iter().map(|k| (*k).to_string()).collect(),
            grouping_key: "seriesGrouping".to_string(),
            grouping_fields: vec!["groupIndex".to_string(), "stackIndex".to_string()],
            data_key: "data".to_string(),
        }
    }
}

impl ChartflowConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With auto-size timeout
    #[inline]
    #[must_use]
    pub fn with_auto_size_timeout(mut self, timeout: Duration) -> Self {
        self.auto_size_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// With fallback scene size
    #[inline]
    #[must_use]
    pub fn with_default_size(mut self, size: Size) -> Self {
        self.default_size = size;
        self
    }

    /// With default series type
    #[inline]
    #[must_use]
    pub fn with_default_series_type(mut self, kind: SeriesKind) -> Self {
        self.default_series_type = kind;
        self
    }

    /// Parse TOML text
    ///
    /// # Errors
    /// Returns [`ConfigError::Toml`] on syntax or type errors.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()
    }

    /// Parse JSON text
    ///
    /// # Errors
    /// Returns [`ConfigError::Json`] on syntax or type errors.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()
    }

    /// Load from a `.toml` or `.json` file
    ///
    /// # Errors
    /// Fails when the file cannot be read, has another extension, or does not
    /// parse.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_str(&text),
            Some("json") => Self::from_json_str(&text),
            other => Err(ConfigError::UnsupportedFormat(
                other.unwrap_or_default().to_string(),
            )),
        }
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.data_key.is_empty() {
            return Err(ConfigError::Invalid("data_key must not be empty".to_string()));
        }
        Ok(self)
    }

    /// Auto-size wait as a duration
    #[inline]
    #[must_use]
    pub fn auto_size_timeout(&self) -> Duration {
        Duration::from_millis(self.auto_size_timeout_ms)
    }

    /// Default wait timeout as a duration
    #[inline]
    #[must_use]
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    /// Scheduler settings derived from this configuration
    #[must_use]
    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            max_shortcuts: self.max_shortcuts,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }

    /// Matcher settings for the series list
    #[must_use]
    pub fn series_matcher(&self) -> MatcherConfig {
        MatcherConfig::series()
            .with_identity_keys(self.series_identity_keys.iter().cloned())
            .with_grouping(GroupingPredicate::nested(
                self.grouping_key.clone(),
                self.grouping_fields.iter().cloned(),
            ))
    }
}
