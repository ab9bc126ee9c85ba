//! Application configuration loaded from environment variables.

use anyhow::{Context, Result};
use inference_client::ClientConfig;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Inference endpoint and dispatcher configuration
    pub inference: ClientConfig,

    /// Cost ledger configuration
    #[serde(default)]
    pub ledger: LedgerConfig,

    /// Runner configuration
    #[serde(default)]
    pub runner: RunnerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    /// JSON pricing table; usage is not recorded when unset
    #[serde(default)]
    pub pricing_path: Option<PathBuf>,

    /// Root of per-task output directories
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Task whose ledger is updated
    #[serde(default = "default_task_id")]
    pub task_id: String,

    /// Label usage is recorded under
    #[serde(default = "default_label")]
    pub label: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunnerConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log output format
    #[serde(default)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            pricing_path: None,
            output_dir: default_output_dir(),
            task_id: default_task_id(),
            label: default_label(),
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("outputs")
}

fn default_task_id() -> String {
    "default".into()
}

fn default_label() -> String {
    "main".into()
}

fn default_log_level() -> String {
    "info".into()
}

impl Config {
    /// Load configuration from `.env` and the process environment.
    pub fn load() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        Self::from_environment(None)
    }

    /// Build from an explicit variable map instead of the process
    /// environment when `vars` is given.
    pub fn from_environment(vars: Option<HashMap<String, String>>) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    // Keep strings as strings; numeric-looking model ids and
                    // task ids must not be coerced.
                    .try_parsing(false)
                    .source(vars),
            )
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}
