//! Monitoring report export to OTLP and stdout.

use serde::Serialize;

use crate::config::ExporterConfig;
use crate::drift::Severity;
use crate::error::{MonitorError, Result};
use crate::metrics::gauge_name;
use crate::report::{MonitoringReport, ReportOutcome};

/// Export format
#[derive(Debug, Clone, PartialEq)]
pub enum ExportFormat {
    Otlp,
    Json,
    Stdout,
}

/// Report exporter
pub struct ReportExporter {
    config: ExporterConfig,
    service_name: String,
    format: ExportFormat,
}

/// One gauge reading derived from a report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportedGauge {
    pub name: String,
    pub value: f64,
}

fn severity_level(severity: Severity) -> f64 {
    match severity {
        Severity::Info => 0.0,
        Severity::Warning => 1.0,
        Severity::Critical => 2.0,
    }
}

/// Flatten a report into gauges, metric by metric.
pub fn report_gauges(report: &MonitoringReport) -> Vec<ExportedGauge> {
    let mut gauges = vec![ExportedGauge {
        name: "model.predictions.total".to_string(),
        value: report.total_predictions as f64,
    }];

    for (metric, summary) in &report.metrics {
        let readings = [
            ("mean", summary.mean),
            ("std", summary.std),
            ("p50", summary.p50),
            ("p95", summary.p95),
            ("data_points", summary.data_points as f64),
            ("drift", if summary.drift_detected { 1.0 } else { 0.0 }),
            ("severity", severity_level(summary.drift_severity)),
        ];
        gauges.extend(readings.iter().map(|(stat, value)| ExportedGauge {
            name: gauge_name(metric, stat),
            value: *value,
        }));
    }
    gauges
}

impl ReportExporter {
    /// Create a new exporter
    pub fn new(config: ExporterConfig, service_name: impl Into<String>, format: ExportFormat) -> Self {
        Self {
            config,
            service_name: service_name.into(),
            format,
        }
    }

    /// Export a report outcome
    pub fn export(&self, outcome: &ReportOutcome) -> Result<String> {
        match self.format {
            ExportFormat::Json => serde_json::to_string_pretty(outcome)
                .map_err(|e| MonitorError::Export(e.to_string())),
            ExportFormat::Stdout => {
                let rendered = serde_json::to_string_pretty(outcome)
                    .map_err(|e| MonitorError::Export(e.to_string()))?;
                println!("{}", rendered);
                Ok(rendered)
            }
            ExportFormat::Otlp => match outcome {
                ReportOutcome::Report(report) => self.push_otlp(report),
                ReportOutcome::NoData { model_name, model_version, .. } => {
                    tracing::debug!(model_name = %model_name, model_version = %model_version, "Skipping OTLP export, no data");
                    Ok(format!("No data to export for {}@{}", model_name, model_version))
                }
            },
        }
    }

    fn otlp_payload(&self, report: &MonitoringReport) -> serde_json::Value {
        let now_nanos = chrono::Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_default()
            .to_string();

        let metrics: Vec<serde_json::Value> = report_gauges(report)
            .iter()
            .map(|g| {
                serde_json::json!({
                    "name": &g.name,
                    "gauge": {
                        "dataPoints": [{
                            "asDouble": g.value,
                            "timeUnixNano": &now_nanos,
                        }]
                    }
                })
            })
            .collect();

        serde_json::json!({
            "resourceMetrics": [{
                "resource": {
                    "attributes": [
                        { "key": "service.name", "value": { "stringValue": &self.service_name } },
                        { "key": "model.name", "value": { "stringValue": &report.model_name } },
                        { "key": "model.version", "value": { "stringValue": &report.model_version } },
                        { "key": "report.period_days", "value": { "intValue": report.report_period_days.to_string() } },
                    ]
                },
                "scopeMetrics": [{
                    "scope": {
                        "name": "sigma-monitor",
                        "version": env!("CARGO_PKG_VERSION")
                    },
                    "metrics": metrics
                }]
            }]
        })
    }

    fn push_otlp(&self, report: &MonitoringReport) -> Result<String> {
        let body = serde_json::to_string(&self.otlp_payload(report))
            .map_err(|e| MonitorError::Export(e.to_string()))?;

        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(self.config.timeout_secs))
            .build()
            .map_err(|e| MonitorError::Export(e.to_string()))?;

        let endpoint = format!("{}/v1/metrics", self.config.otlp_endpoint.trim_end_matches('/'));
        let response = client
            .post(&endpoint)
            .header("Content-Type", "application/json")
            .body(body)
            .send();

        match response {
            Ok(resp) if resp.status().is_success() => Ok(format!(
                "Exported {} metrics for {}@{} to {}",
                report.metrics.len(),
                report.model_name,
                report.model_version,
                endpoint
            )),
            Ok(resp) => Err(MonitorError::Export(format!(
                "OTLP endpoint returned {}: {}",
                resp.status(),
                resp.text().unwrap_or_default()
            ))),
            Err(e) => Err(MonitorError::Export(format!(
                "Failed to reach OTLP endpoint {}: {}",
                endpoint, e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::MetricSummary;
    use std::collections::BTreeMap;

    fn sample_report() -> MonitoringReport {
        let mut metrics = BTreeMap::new();
        metrics.insert(
            "accuracy".to_string(),
            MetricSummary {
                mean: 0.9,
                std: 0.01,
                min: 0.88,
                max: 0.92,
                p25: 0.89,
                p50: 0.9,
                p75: 0.91,
                p95: 0.92,
                data_points: 40,
                drift_detected: true,
                drift_severity: Severity::Warning,
            },
        );
        MonitoringReport {
            model_name: "ranker".to_string(),
            model_version: "2.1".to_string(),
            report_period_days: 7,
            total_predictions: 4000,
            metrics,
        }
    }

    #[test]
    fn test_json_export() {
        let exporter = ReportExporter::new(ExporterConfig::default(), "ryzanstein", ExportFormat::Json);
        let result = exporter.export(&ReportOutcome::Report(sample_report())).unwrap();
        assert!(result.contains("\"accuracy\""));
        assert!(result.contains("\"drift_severity\": \"warning\""));
    }

    #[test]
    fn test_report_gauges() {
        let gauges = report_gauges(&sample_report());
        assert_eq!(gauges.len(), 1 + 7);
        assert_eq!(gauges[0].value, 4000.0);
        let severity = gauges.iter().find(|g| g.name == "model.metric.accuracy.severity").unwrap();
        assert_eq!(severity.value, 1.0);
        let drift = gauges.iter().find(|g| g.name == "model.metric.accuracy.drift").unwrap();
        assert_eq!(drift.value, 1.0);
    }

    #[test]
    fn test_otlp_payload_shape() {
        let exporter = ReportExporter::new(ExporterConfig::default(), "ryzanstein", ExportFormat::Otlp);
        let payload = exporter.otlp_payload(&sample_report());
        let resource = &payload["resourceMetrics"][0];
        assert_eq!(resource["resource"]["attributes"][1]["value"]["stringValue"], "ranker");
        let metrics = resource["scopeMetrics"][0]["metrics"].as_array().unwrap();
        assert_eq!(metrics.len(), 8);
        assert_eq!(metrics[0]["gauge"]["dataPoints"][0]["asDouble"], 4000.0);
    }

    #[test]
    fn test_otlp_no_data_skips_network() {
        let exporter = ReportExporter::new(ExporterConfig::default(), "ryzanstein", ExportFormat::Otlp);
        let outcome = ReportOutcome::NoData {
            model_name: "ranker".into(),
            model_version: "2.1".into(),
            report_period_days: 7,
            message: "nothing".into(),
        };
        assert!(exporter.export(&outcome).unwrap().contains("No data"));
    }

    #[test]
    fn test_otlp_unreachable_endpoint() {
        let config = ExporterConfig {
            otlp_endpoint: "http://127.0.0.1:9".to_string(),
            timeout_secs: 2,
        };
        let exporter = ReportExporter::new(config, "ryzanstein", ExportFormat::Otlp);
        match exporter.export(&ReportOutcome::Report(sample_report())) {
            Ok(msg) => assert!(msg.contains("metrics")),
            Err(e) => {
                let err_msg = e.to_string();
                assert!(
                    err_msg.contains("127.0.0.1:9") || err_msg.contains("OTLP"),
                    "Unexpected error: {err_msg}"
                );
            }
        }
    }
}
