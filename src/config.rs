use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::drift::{DriftThresholds, Severity};
use crate::error::{MonitorError, Result};

/// Monitoring configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Service name attached to exported reports
    pub service_name: String,
    /// Where observations are persisted
    pub storage: StorageConfig,
    /// Lookback window used when callers do not pass one
    pub default_window_days: u32,
    /// Drift detection thresholds
    pub thresholds: DriftThresholds,
    /// Log output
    pub logging: LoggingConfig,
    /// Report export target
    pub exporter: ExporterConfig,
    /// Drift alert delivery
    pub alerts: AlertConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            service_name: "ryzanstein".to_string(),
            storage: StorageConfig::default(),
            default_window_days: 7,
            thresholds: DriftThresholds::default(),
            logging: LoggingConfig::default(),
            exporter: ExporterConfig::default(),
            alerts: AlertConfig::default(),
        }
    }
}

impl MonitorConfig {
    /// Load a configuration from a JSON file; missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read(path.as_ref())?;
        let config: MonitorConfig = serde_json::from_slice(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with `SIGMA_MONITOR_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = MonitorConfig::default();

        if let Ok(uri) = std::env::var("SIGMA_MONITOR_STORAGE") {
            config.storage = StorageConfig::from_uri(&uri)?;
        }
        if let Ok(days) = std::env::var("SIGMA_MONITOR_WINDOW_DAYS") {
            config.default_window_days = days
                .parse()
                .map_err(|_| MonitorError::Config(format!("invalid window days: {}", days)))?;
        }
        if let Ok(k) = std::env::var("SIGMA_MONITOR_THRESHOLD_STD") {
            config.thresholds.threshold_std = k
                .parse()
                .map_err(|_| MonitorError::Config(format!("invalid threshold_std: {}", k)))?;
        }
        if let Ok(endpoint) = std::env::var("SIGMA_MONITOR_OTLP_ENDPOINT") {
            config.exporter.otlp_endpoint = endpoint;
        }
        if let Ok(url) = std::env::var("SIGMA_MONITOR_ALERT_WEBHOOK") {
            config.alerts.webhook_url = Some(url);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_window_days == 0 {
            return Err(MonitorError::Config("default_window_days must be at least 1".into()));
        }
        self.thresholds.validate()
    }
}

/// Storage engine selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "engine", rename_all = "snake_case")]
pub enum StorageConfig {
    /// Process-local, lost on exit
    Memory,
    /// Append-only JSON Lines file
    Jsonl { path: PathBuf },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Jsonl {
            path: PathBuf::from("monitoring/observations.jsonl"),
        }
    }
}

impl StorageConfig {
    /// Parse `memory://`, `file://<path>`, `jsonl://<path>` or a bare file path.
    pub fn from_uri(uri: &str) -> Result<Self> {
        let uri = uri.trim();
        if uri.is_empty() {
            return Err(MonitorError::Config("empty storage uri".into()));
        }
        if uri == "memory://" || uri == "memory" {
            return Ok(StorageConfig::Memory);
        }
        let path = match uri.split_once("://") {
            Some(("file", rest)) | Some(("jsonl", rest)) => rest,
            Some((scheme, _)) => {
                return Err(MonitorError::Config(format!(
                    "unsupported storage scheme: {}",
                    scheme
                )))
            }
            None => uri,
        };
        if path.is_empty() {
            return Err(MonitorError::Config(format!("storage uri has no path: {}", uri)));
        }
        Ok(StorageConfig::Jsonl {
            path: PathBuf::from(path),
        })
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
    /// OTLP gRPC endpoint for span export (requires the `otlp` feature)
    pub otlp_endpoint: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "sigma_monitor=info".to_string(),
            json: false,
            otlp_endpoint: None,
        }
    }
}

/// Report exporter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExporterConfig {
    /// OTLP/HTTP endpoint for metric export
    pub otlp_endpoint: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: "http://localhost:4318".to_string(),
            timeout_secs: 10,
        }
    }
}

/// Drift alert configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Webhook receiving alert payloads; alerts are only logged when unset
    pub webhook_url: Option<String>,
    /// Lowest severity that raises an alert
    pub min_severity: Severity,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            min_severity: Severity::Warning,
            timeout_secs: 10,
        }
    }
}
