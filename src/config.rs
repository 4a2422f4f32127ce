//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.pendo-insights.toml` files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default configuration file name, looked up in the working directory.
pub const CONFIG_FILE: &str = ".pendo-insights.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Pendo API settings.
    #[serde(default)]
    pub api: ApiConfig,

    /// LLM summary settings.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Local metric store settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// NPS poll to track.
    #[serde(default)]
    pub nps: NpsConfig,

    /// Report settings.
    #[serde(default)]
    pub report: ReportConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Default report output path.
    #[serde(default = "default_output")]
    pub output: String,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,

    /// Number of aggregation queries in flight at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            verbose: false,
            concurrency: default_concurrency(),
        }
    }
}

fn default_output() -> String {
    "pendo_insights_report.md".to_string()
}

fn default_concurrency() -> usize {
    4
}

/// Pendo API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// API host.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Integration key. Prefer the PENDO_API_KEY environment variable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Request timeout in seconds.
    #[serde(default = "default_api_timeout")]
    pub timeout_seconds: u64,

    /// Size of the query window in days.
    #[serde(default = "default_days")]
    pub days: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            timeout_seconds: default_api_timeout(),
            days: default_days(),
        }
    }
}

fn default_base_url() -> String {
    "https://app.pendo.io".to_string()
}

fn default_api_timeout() -> u64 {
    15
}

fn default_days() -> u32 {
    30
}

/// LLM settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Ask the model for a summary when building reports.
    #[serde(default)]
    pub enabled: bool,

    /// Ollama API URL.
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,

    /// Model name.
    #[serde(default = "default_model")]
    pub model: String,

    /// Temperature for generation.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Request timeout in seconds.
    #[serde(default = "default_llm_timeout")]
    pub timeout_seconds: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ollama_url: default_ollama_url(),
            model: default_model(),
            temperature: default_temperature(),
            timeout_seconds: default_llm_timeout(),
        }
    }
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_model() -> String {
    "llama3.2:latest".to_string()
}

fn default_temperature() -> f32 {
    0.2
}

fn default_llm_timeout() -> u64 {
    300
}

/// Metric store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Maximum visitors and accounts stored per sync.
    #[serde(default = "default_entity_limit")]
    pub entity_limit: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            entity_limit: default_entity_limit(),
        }
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from(".pendo-insights/metrics.db")
}

fn default_entity_limit() -> usize {
    500
}

/// NPS poll location. Both ids are needed to query poll events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NpsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guide_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_id: Option<String>,
}

impl NpsConfig {
    /// The (guide, poll) pair when both are set.
    pub fn poll(&self) -> Option<(String, String)> {
        match (&self.guide_id, &self.poll_id) {
            (Some(guide), Some(poll)) => Some((guide.clone(), poll.clone())),
            _ => None,
        }
    }
}

/// Report generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Guides, pages and features listed per section.
    #[serde(default = "default_top_n")]
    pub top_n: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            top_n: default_top_n(),
        }
    }
}

fn default_top_n() -> usize {
    10
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings, but only
    /// when they were actually given.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref key) = args.api_key {
            self.api.api_key = Some(key.clone());
        }
        if let Some(ref url) = args.base_url {
            self.api.base_url = url.clone();
        }
        if let Some(days) = args.days {
            self.api.days = days;
        }
        if let Some(timeout) = args.timeout {
            self.api.timeout_seconds = timeout;
        }
        if let Some(concurrency) = args.concurrency {
            self.general.concurrency = concurrency;
        }
        if let Some(top_n) = args.top {
            self.report.top_n = top_n;
        }
        if let Some(ref database) = args.database {
            self.storage.database_path = database.clone();
        }

        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
