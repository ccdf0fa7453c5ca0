//! Monitoring report assembly.
//!
//! A report covers one model version over a lookback window: descriptive
//! statistics per metric plus the performance-drift verdict for that metric.
//! A model version with nothing logged in the window yields an explicit
//! no-data outcome so dashboards can tell "not yet monitored" apart from
//! "healthy".

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::drift::{self, DriftThresholds, Severity};
use crate::error::{MonitorError, Result};
use crate::stats::Summary;
use crate::store::{MetricObservation, MetricStore};

/// Start of a lookback window of `days` ending at `now`.
pub(crate) fn window_start(now: DateTime<Utc>, days: u32) -> Result<DateTime<Utc>> {
    Duration::try_days(i64::from(days))
        .and_then(|span| now.checked_sub_signed(span))
        .ok_or_else(|| {
            MonitorError::InvalidArgument(format!("lookback window of {} days is out of range", days))
        })
}

/// Per-metric block of a monitoring report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p95: f64,
    pub data_points: usize,
    pub drift_detected: bool,
    pub drift_severity: Severity,
}

/// Summary of one model version over a window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringReport {
    pub model_name: String,
    pub model_version: String,
    pub report_period_days: u32,
    pub total_predictions: u64,
    pub metrics: BTreeMap<String, MetricSummary>,
}

impl MonitoringReport {
    pub fn drifting_metrics(&self) -> impl Iterator<Item = (&str, &MetricSummary)> {
        self.metrics
            .iter()
            .filter(|(_, m)| m.drift_detected)
            .map(|(name, m)| (name.as_str(), m))
    }

    /// Highest severity across all metrics.
    pub fn worst_severity(&self) -> Severity {
        self.metrics
            .values()
            .map(|m| m.drift_severity)
            .max()
            .unwrap_or(Severity::Info)
    }
}

/// Result of a report request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReportOutcome {
    #[serde(rename = "ok")]
    Report(MonitoringReport),
    NoData {
        model_name: String,
        model_version: String,
        report_period_days: u32,
        message: String,
    },
}

impl ReportOutcome {
    pub fn is_no_data(&self) -> bool {
        matches!(self, ReportOutcome::NoData { .. })
    }

    pub fn report(&self) -> Option<&MonitoringReport> {
        match self {
            ReportOutcome::Report(report) => Some(report),
            ReportOutcome::NoData { .. } => None,
        }
    }

    pub fn into_report(self) -> Option<MonitoringReport> {
        match self {
            ReportOutcome::Report(report) => Some(report),
            ReportOutcome::NoData { .. } => None,
        }
    }
}

/// Builds reports from a store snapshot
pub struct ReportGenerator<'a> {
    store: &'a dyn MetricStore,
    thresholds: &'a DriftThresholds,
}

impl<'a> ReportGenerator<'a> {
    pub fn new(store: &'a dyn MetricStore, thresholds: &'a DriftThresholds) -> Self {
        Self { store, thresholds }
    }

    /// Report for the window ending at `now`.
    pub fn generate(
        &self,
        model_name: &str,
        model_version: &str,
        days: u32,
        now: DateTime<Utc>,
    ) -> Result<ReportOutcome> {
        if days == 0 {
            return Err(MonitorError::InvalidArgument("report window must be at least 1 day".into()));
        }

        let since = window_start(now, days)?;
        let observations: Vec<MetricObservation> = self
            .store
            .query_model(model_name, model_version, since)?
            .into_iter()
            .filter(|o| o.timestamp <= now)
            .collect();

        if observations.is_empty() {
            tracing::debug!(model_name, model_version, days, "No observations in report window");
            return Ok(ReportOutcome::NoData {
                model_name: model_name.to_string(),
                model_version: model_version.to_string(),
                report_period_days: days,
                message: format!(
                    "No metrics logged for {}@{} in the last {} days",
                    model_name, model_version, days
                ),
            });
        }

        let total_predictions = observations
            .iter()
            .fold(0u64, |total, o| total.saturating_add(o.prediction_count));

        // Observations arrive oldest first, so each group stays chronological.
        let mut grouped: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for observation in &observations {
            grouped
                .entry(observation.metric_name.clone())
                .or_default()
                .push(observation.value);
        }

        let metrics = grouped
            .into_iter()
            .map(|(metric_name, values)| {
                let summary = Summary::from_values(&values);
                let evaluation = drift::evaluate_performance(&values, self.thresholds);
                if evaluation.drift_detected {
                    tracing::warn!(
                        model_name,
                        model_version,
                        metric = %metric_name,
                        severity = %evaluation.severity,
                        violation_rate = evaluation.violation_rate,
                        "Performance drift detected"
                    );
                }
                let block = MetricSummary {
                    mean: summary.mean,
                    std: summary.std,
                    min: summary.min,
                    max: summary.max,
                    p25: summary.p25,
                    p50: summary.p50,
                    p75: summary.p75,
                    p95: summary.p95,
                    data_points: summary.count,
                    drift_detected: evaluation.drift_detected,
                    drift_severity: evaluation.severity,
                };
                (metric_name, block)
            })
            .collect();

        Ok(ReportOutcome::Report(MonitoringReport {
            model_name: model_name.to_string(),
            model_version: model_version.to_string(),
            report_period_days: days,
            total_predictions,
            metrics,
        }))
    }
}
