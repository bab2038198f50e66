//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/vizreport/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/vizreport/` (~/.config/vizreport/)
//! - State/Logs: `$XDG_STATE_HOME/vizreport/` (~/.local/state/vizreport/)
//!
//! The `[report]` table is a flat key/value section read by convention:
//!
//! | Key | Meaning |
//! |-----|---------|
//! | `<ds>_metrics_agg`, `<ds>_metrics_ts`, `<ds>_metrics_trends` | Replace a data source's metric set |
//! | `reports` | Report-only metrics to enable (`organizations`, `countries`, `domains`) |
//! | `people_out` | Identities excluded from every metric |
//! | `<ds>_startdate`, `<ds>_enddate` | Date range override for one data source |
//! | `<ds>_start_date`, `<ds>_end_date` | Date range override for per-company studies |
//! | `<plural>_out` | Items excluded from one filter dimension |
//!
//! List values may be written as a comma separated string or a TOML array.

use crate::error::{Error, Result};
use crate::period::Period;
use crate::types::ReportMode;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Report automation entries
    #[serde(default)]
    pub report: ReportConfig,

    /// Output settings
    #[serde(default)]
    pub output: OutputConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// A `[report]` value: a string or a list of strings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ConfigValue {
    Text(String),
    List(Vec<String>),
}

impl ConfigValue {
    /// The value as a list; strings are split on commas.
    pub fn as_list(&self) -> Vec<String> {
        match self {
            ConfigValue::Text(text) => text
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            ConfigValue::List(items) => items.clone(),
        }
    }

    /// The value as a single string; lists are joined with commas.
    pub fn as_text(&self) -> String {
        match self {
            ConfigValue::Text(text) => text.clone(),
            ConfigValue::List(items) => items.join(","),
        }
    }
}

/// Report automation entries, keyed by convention.
#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct ReportConfig {
    entries: BTreeMap<String, ConfigValue>,
}

impl ReportConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an entry (mainly for programmatic configuration and tests).
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.entries
            .insert(key.into(), ConfigValue::Text(value.into()));
        self
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Override of a data source's metric set for `mode`.
    pub fn metric_ids(&self, ds: &str, mode: ReportMode) -> Option<Vec<String>> {
        self.get(&format!("{}_metrics_{}", ds, mode.config_suffix()))
            .map(ConfigValue::as_list)
    }

    /// Override of a data source's trend metric set.
    pub fn trend_metric_ids(&self, ds: &str) -> Option<Vec<String>> {
        self.get(&format!("{}_metrics_trends", ds))
            .map(ConfigValue::as_list)
    }

    /// Report-only metrics enabled for unfiltered reports.
    pub fn enabled_reports(&self) -> Vec<String> {
        self.get("reports")
            .map(ConfigValue::as_list)
            .unwrap_or_default()
    }

    /// Identities excluded from every metric.
    pub fn people_out(&self) -> Vec<String> {
        self.get("people_out")
            .map(ConfigValue::as_list)
            .unwrap_or_default()
    }

    /// Start date override for data source `ds`.
    pub fn start_date(&self, ds: &str) -> Option<String> {
        self.get(&format!("{}_startdate", ds))
            .map(ConfigValue::as_text)
    }

    /// End date override for data source `ds`.
    pub fn end_date(&self, ds: &str) -> Option<String> {
        self.get(&format!("{}_enddate", ds))
            .map(ConfigValue::as_text)
    }

    /// Start date override for studies run per company on `ds`.
    pub fn study_start_date(&self, ds: &str) -> Option<String> {
        self.get(&format!("{}_start_date", ds))
            .map(ConfigValue::as_text)
    }

    /// End date override for studies run per company on `ds`.
    pub fn study_end_date(&self, ds: &str) -> Option<String> {
        self.get(&format!("{}_end_date", ds))
            .map(ConfigValue::as_text)
    }

    /// Items excluded from the filter dimension whose plural is `plural`.
    pub fn filter_bots(&self, plural: &str) -> Vec<String> {
        let bots = self
            .get(&format!("{}_out", plural))
            .map(ConfigValue::as_list)
            .unwrap_or_default();
        if !bots.is_empty() {
            tracing::info!(filter = plural, bots = ?bots, "Excluding filter items");
        }
        bots
    }
}

/// Output settings
#[derive(Debug, Deserialize)]
pub struct OutputConfig {
    /// Directory the JSON files are written to
    #[serde(default = "default_destdir")]
    pub destdir: PathBuf,

    /// Time series granularity
    #[serde(default)]
    pub period: Period,

    /// Identities database handed to the query backends
    #[serde(default = "default_identities_db")]
    pub identities_db: String,

    /// Number of people in top listings
    #[serde(default = "default_npeople")]
    pub npeople: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            destdir: default_destdir(),
            period: Period::default(),
            identities_db: default_identities_db(),
            npeople: default_npeople(),
        }
    }
}

fn default_destdir() -> PathBuf {
    PathBuf::from("json")
}

fn default_identities_db() -> String {
    "identities".to_string()
}

fn default_npeople() -> usize {
    10
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("failed to parse config: {}", e)))
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/vizreport/config.toml` (~/.config/vizreport/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("vizreport").join("config.toml")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/vizreport/` (~/.local/state/vizreport/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("vizreport")
    }
}
