//! Configuration management for StudySpark services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default, config/{APP_ENV}, config/local)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    /// Generative model provider
    #[serde(default)]
    pub model: ModelConfig,

    /// Backoff schedule for model calls
    #[serde(default)]
    pub retry: RetryConfig,

    /// Trigger budgets and scratch space
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Storage layout
    #[serde(default)]
    pub storage: StorageConfig,

    /// Blob retention sweep
    #[serde(default)]
    pub janitor: JanitorConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelConfig {
    /// Model provider: gemini, mock
    #[serde(default = "default_model_provider")]
    pub provider: String,

    /// API key for the model provider
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_model_name")]
    pub model: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_model_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    /// Total attempts including the first call
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry in milliseconds
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    /// Growth factor between consecutive delays
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Upper bound for a single delay in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Random jitter as a fraction of the delay
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Wall-clock budget for one trigger invocation in seconds
    #[serde(default = "default_trigger_timeout")]
    pub trigger_timeout_secs: u64,

    /// Directory for transient upload buffers (system temp dir if unset)
    pub tmp_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Bucket uploads land in
    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// Keep uploads as files in this directory instead of in memory
    pub blob_dir: Option<PathBuf>,

    /// Mirror every processing record as `<id>.json` in this directory
    pub records_dir: Option<PathBuf>,

    /// How often the blob directory is scanned for files written by other
    /// processes
    #[serde(default = "default_scan_interval")]
    pub scan_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JanitorConfig {
    /// Blobs older than this are deleted
    #[serde(default = "default_retention")]
    pub retention_secs: u64,

    /// Time between sweeps
    #[serde(default = "default_sweep_interval")]
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level or filter directive (debug, info, studyspark=debug)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_model_provider() -> String { "gemini".to_string() }
fn default_model_name() -> String { "gemini-2.0-flash".to_string() }
fn default_model_timeout() -> u64 { 120 }
fn default_max_attempts() -> u32 { 5 }
fn default_base_delay() -> u64 { 1_000 }
fn default_multiplier() -> f64 { 2.0 }
fn default_max_delay() -> u64 { 30_000 }
fn default_jitter_ratio() -> f64 { 0.5 }
fn default_trigger_timeout() -> u64 { 540 }
fn default_bucket() -> String { "studyspark-uploads".to_string() }
fn default_scan_interval() -> u64 { 2_000 }
fn default_retention() -> u64 { 2 * 60 * 60 }
fn default_sweep_interval() -> u64 { 60 * 60 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 0 }
fn default_service_name() -> String { "studyspark".to_string() }

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_model_provider(),
            api_key: None,
            api_base: None,
            model: default_model_name(),
            timeout_secs: default_model_timeout(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay(),
            jitter_ratio: default_jitter_ratio(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            trigger_timeout_secs: default_trigger_timeout(),
            tmp_dir: None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket: default_bucket(),
            blob_dir: None,
            records_dir: None,
            scan_interval_ms: default_scan_interval(),
        }
    }
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            retention_secs: default_retention(),
            interval_secs: default_sweep_interval(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__MODEL__API_KEY=...
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        config.try_deserialize()
    }

    /// Trigger wall-clock budget as Duration
    pub fn trigger_timeout(&self) -> Duration {
        Duration::from_secs(self.pipeline.trigger_timeout_secs)
    }

    /// Blob directory scan interval as Duration
    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.storage.scan_interval_ms)
    }

    /// Blob retention window as Duration
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.janitor.retention_secs)
    }

    /// Janitor sweep interval as Duration
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.janitor.interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.model.model, "gemini-2.0-flash");
        assert_eq!(config.retention(), Duration::from_secs(7200));
        assert_eq!(config.sweep_interval(), Duration::from_secs(3600));
        assert_eq!(config.retry.max_attempts, 5);
    }

    #[test]
    fn test_from_file_fills_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[model]\nprovider = \"mock\"\n\n[janitor]\nretention_secs = 60").unwrap();

        let config = AppConfig::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.model.provider, "mock");
        assert_eq!(config.model.model, "gemini-2.0-flash");
        assert_eq!(config.janitor.retention_secs, 60);
        assert_eq!(config.janitor.interval_secs, 3600);
        assert_eq!(config.pipeline.trigger_timeout_secs, 540);
        assert!(config.storage.blob_dir.is_none());
    }

    #[test]
    fn test_storage_directories_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[storage]\nblob_dir = \"/srv/uploads\"\nscan_interval_ms = 250").unwrap();

        let config = AppConfig::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.storage.blob_dir, Some(PathBuf::from("/srv/uploads")));
        assert!(config.storage.records_dir.is_none());
        assert_eq!(config.storage.bucket, "studyspark-uploads");
        assert_eq!(config.scan_interval(), Duration::from_millis(250));
    }
}
