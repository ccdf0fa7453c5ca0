//! Drift alert delivery.
//!
//! Alerts are built from drift results that clear the configured severity
//! floor and are posted as JSON to a webhook. Without a webhook they are only
//! logged. Delivery never sits on the `log_performance` path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::AlertConfig;
use crate::drift::{DataDriftResult, PerformanceDriftResult, Severity};
use crate::error::{MonitorError, Result};
use crate::report::MonitoringReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    DataDrift,
    PerformanceDrift,
}

/// Alert payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftAlert {
    pub kind: AlertKind,
    /// Feature name, or `model@version/metric`
    pub subject: String,
    pub severity: Severity,
    /// Absent for alerts raised from report summaries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drift_score: Option<f64>,
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

impl DriftAlert {
    pub fn from_data_drift(result: &DataDriftResult, min_severity: Severity) -> Option<Self> {
        if !result.drift_detected || result.severity < min_severity {
            return None;
        }
        Some(Self {
            kind: AlertKind::DataDrift,
            subject: result.feature_name.clone(),
            severity: result.severity,
            drift_score: Some(result.drift_score),
            message: result
                .message
                .clone()
                .unwrap_or_else(|| format!("Data drift on '{}'", result.feature_name)),
            raised_at: Utc::now(),
        })
    }

    pub fn from_performance_drift(result: &PerformanceDriftResult, min_severity: Severity) -> Option<Self> {
        if !result.drift_detected || result.severity < min_severity {
            return None;
        }
        let subject = format!("{}@{}/{}", result.model_name, result.model_version, result.metric_name);
        Some(Self {
            kind: AlertKind::PerformanceDrift,
            message: result
                .message
                .clone()
                .unwrap_or_else(|| format!("Performance drift on {}", subject)),
            subject,
            severity: result.severity,
            drift_score: Some(result.drift_score),
            raised_at: Utc::now(),
        })
    }

    /// One alert per drifting metric in a report.
    pub fn from_report(report: &MonitoringReport, min_severity: Severity) -> Vec<Self> {
        report
            .drifting_metrics()
            .filter(|(_, m)| m.drift_severity >= min_severity)
            .map(|(metric, m)| Self {
                kind: AlertKind::PerformanceDrift,
                subject: format!("{}@{}/{}", report.model_name, report.model_version, metric),
                severity: m.drift_severity,
                drift_score: None,
                message: format!(
                    "{} drifted over the last {} days (mean {:.4}, p95 {:.4})",
                    metric, report.report_period_days, m.mean, m.p95
                ),
                raised_at: Utc::now(),
            })
            .collect()
    }
}

/// How an alert left the process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertDelivery {
    Sent,
    Logged,
    /// Below the notifier's severity floor
    Suppressed,
}

/// Posts drift alerts to a webhook
pub struct AlertNotifier {
    webhook_url: Option<String>,
    min_severity: Severity,
    client: Option<reqwest::Client>,
}

impl AlertNotifier {
    pub fn new(config: &AlertConfig) -> Self {
        Self {
            webhook_url: config.webhook_url.clone(),
            min_severity: config.min_severity,
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(config.timeout_secs))
                .build()
                .ok(),
        }
    }

    pub fn min_severity(&self) -> Severity {
        self.min_severity
    }

    /// Deliver one alert, falling back to a log line when no webhook is set.
    pub async fn notify(&self, alert: &DriftAlert) -> Result<AlertDelivery> {
        if alert.severity < self.min_severity {
            return Ok(AlertDelivery::Suppressed);
        }
        let Some(url) = self.webhook_url.as_deref() else {
            tracing::warn!(
                subject = %alert.subject,
                severity = %alert.severity,
                score = ?alert.drift_score,
                "{}",
                alert.message
            );
            return Ok(AlertDelivery::Logged);
        };

        let client = self
            .client
            .as_ref()
            .ok_or_else(|| MonitorError::Export("HTTP client not initialized".into()))?;

        let resp = client
            .post(url)
            .json(alert)
            .send()
            .await
            .map_err(|e| MonitorError::Export(format!("Failed to reach alert webhook {}: {}", url, e)))?;

        if !resp.status().is_success() {
            return Err(MonitorError::Export(format!(
                "Alert webhook returned {}",
                resp.status()
            )));
        }
        Ok(AlertDelivery::Sent)
    }

    /// Deliver each alert; stops at the first failure.
    pub async fn notify_all(&self, alerts: &[DriftAlert]) -> Result<usize> {
        for alert in alerts {
            self.notify(alert).await?;
        }
        Ok(alerts.len())
    }
}
