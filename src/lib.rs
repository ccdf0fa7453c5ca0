//! # sigma-monitor
//!
//! Model performance monitoring and drift detection for the Ryzanstein LLM
//! ecosystem. Inference services log scalar metric observations per model
//! version; the monitor answers with statistical-process-control drift
//! checks, distributional drift checks on feature samples, and per-model
//! monitoring reports for dashboards and alerting.
//!
//! ```no_run
//! use sigma_monitor::{config::MonitorConfig, ModelMonitor};
//!
//! let monitor = ModelMonitor::open(MonitorConfig::default())?;
//! monitor.log_performance("ranker", "2.1", "accuracy", 0.93, 128, None)?;
//! let outcome = monitor.generate_monitoring_report("ranker", "2.1", None)?;
//! # Ok::<(), sigma_monitor::error::MonitorError>(())
//! ```

pub mod alerts;
pub mod config;
pub mod drift;
pub mod error;
pub mod exporter;
pub mod logging;
pub mod metrics;
pub mod report;
pub mod stats;
pub mod store;

use std::sync::Arc;

use chrono::{DateTime, Utc};

use alerts::AlertNotifier;
use config::MonitorConfig;
use drift::{DataDriftResult, PerformanceDriftResult};
use error::{MonitorError, Result};
use exporter::{ExportFormat, ReportExporter};
use report::{ReportGenerator, ReportOutcome};
use store::{MetricKey, MetricObservation, MetricStore, NewObservation, Tags};

pub use drift::Severity;

/// Owned monitoring handle: one store plus the thresholds applied to it.
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
pub struct ModelMonitor {
    config: MonitorConfig,
    store: Arc<dyn MetricStore>,
}

impl ModelMonitor {
    /// Open the store named by `config.storage`.
    pub fn open(config: MonitorConfig) -> Result<Self> {
        config.validate()?;
        let store = store::open_store(&config.storage)?;
        Ok(Self { config, store })
    }

    /// Use an already opened store.
    pub fn with_store(config: MonitorConfig, store: Arc<dyn MetricStore>) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, store })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn MetricStore> {
        &self.store
    }

    /// Record one metric sample for a model version.
    #[tracing::instrument(level = "debug", skip(self, tags), err)]
    pub fn log_performance(
        &self,
        model_name: &str,
        model_version: &str,
        metric_name: &str,
        value: f64,
        prediction_count: u64,
        tags: Option<Tags>,
    ) -> Result<MetricObservation> {
        let observation = NewObservation::new(MetricKey::new(model_name, model_version, metric_name), value)
            .with_prediction_count(prediction_count)
            .with_tags(tags.unwrap_or_default());
        self.store.append(observation)
    }

    /// Record a prepared observation.
    pub fn log(&self, observation: NewObservation) -> Result<MetricObservation> {
        self.store.append(observation)
    }

    /// Observations for one metric since `since`, oldest first.
    pub fn query(&self, key: &MetricKey, since: DateTime<Utc>) -> Result<Vec<MetricObservation>> {
        let rows = self.store.query(key, since)?;
        tracing::debug!(key = %key, rows = rows.len(), "Queried metric series");
        Ok(rows)
    }

    /// Every metric of one model version since `since`, oldest first.
    pub fn query_model(
        &self,
        model_name: &str,
        model_version: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<MetricObservation>> {
        let rows = self.store.query_model(model_name, model_version, since)?;
        tracing::debug!(model_name, model_version, rows = rows.len(), "Queried model metrics");
        Ok(rows)
    }

    /// Compare a current feature sample against its reference sample.
    #[tracing::instrument(level = "debug", skip(self, baseline, current), fields(baseline_size = baseline.len(), current_size = current.len()))]
    pub fn detect_data_drift(
        &self,
        feature_name: &str,
        baseline: &[f64],
        current: &[f64],
    ) -> Result<DataDriftResult> {
        let result = drift::detect_data_drift(feature_name, baseline, current, &self.config.thresholds)?;
        if result.drift_detected {
            tracing::warn!(
                feature = feature_name,
                severity = %result.severity,
                psi = result.psi,
                ks = result.ks_statistic,
                "Data drift detected"
            );
        }
        Ok(result)
    }

    /// Control-chart and trend check of one metric over the last `days`
    /// (config default when `None`), with limits at `threshold_std` standard
    /// deviations (config default when `None`).
    pub fn detect_performance_drift(
        &self,
        model_name: &str,
        model_version: &str,
        metric_name: &str,
        days: Option<u32>,
        threshold_std: Option<f64>,
    ) -> Result<PerformanceDriftResult> {
        let key = MetricKey::new(model_name, model_version, metric_name);
        self.detect_performance_drift_at(&key, days, threshold_std, Utc::now())
    }

    /// Performance drift over the window ending at `now`.
    #[tracing::instrument(level = "debug", skip(self), fields(key = %key))]
    pub fn detect_performance_drift_at(
        &self,
        key: &MetricKey,
        days: Option<u32>,
        threshold_std: Option<f64>,
        now: DateTime<Utc>,
    ) -> Result<PerformanceDriftResult> {
        let days = self.window(days)?;
        let thresholds = match threshold_std {
            Some(k) => {
                let thresholds = self.config.thresholds.clone().with_threshold_std(k);
                thresholds
                    .validate()
                    .map_err(|e| MonitorError::InvalidArgument(e.to_string()))?;
                thresholds
            }
            None => self.config.thresholds.clone(),
        };

        let since = report::window_start(now, days)?;
        let values: Vec<f64> = self
            .store
            .query(key, since)?
            .into_iter()
            .filter(|o| o.timestamp <= now)
            .map(|o| o.value)
            .collect();

        let evaluation = drift::evaluate_performance(&values, &thresholds);
        let result = PerformanceDriftResult::from_evaluation(key, days, evaluation);
        if result.drift_detected {
            tracing::warn!(
                key = %key,
                severity = %result.severity,
                violation_rate = result.violation_rate,
                slope = result.slope,
                "Performance drift detected"
            );
        }
        Ok(result)
    }

    /// Per-metric statistics and drift status for a model version over the
    /// last `days` (config default when `None`).
    pub fn generate_monitoring_report(
        &self,
        model_name: &str,
        model_version: &str,
        days: Option<u32>,
    ) -> Result<ReportOutcome> {
        self.generate_monitoring_report_at(model_name, model_version, days, Utc::now())
    }

    /// Report over the window ending at `now`. Repeated calls with the same
    /// `now` and no new writes in the window return identical reports.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn generate_monitoring_report_at(
        &self,
        model_name: &str,
        model_version: &str,
        days: Option<u32>,
        now: DateTime<Utc>,
    ) -> Result<ReportOutcome> {
        let days = self.window(days)?;
        ReportGenerator::new(self.store.as_ref(), &self.config.thresholds).generate(
            model_name,
            model_version,
            days,
            now,
        )
    }

    /// Exporter bound to this monitor's exporter settings.
    pub fn exporter(&self, format: ExportFormat) -> ReportExporter {
        ReportExporter::new(self.config.exporter.clone(), &self.config.service_name, format)
    }

    /// Alert notifier bound to this monitor's alert settings.
    pub fn alert_notifier(&self) -> AlertNotifier {
        AlertNotifier::new(&self.config.alerts)
    }

    fn window(&self, days: Option<u32>) -> Result<u32> {
        match days.unwrap_or(self.config.default_window_days) {
            0 => Err(MonitorError::InvalidArgument("lookback window must be at least 1 day".into())),
            d => Ok(d),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use crate::config::StorageConfig;
    use crate::metrics::MetricNames;

    fn test_monitor() -> ModelMonitor {
        let config = MonitorConfig {
            storage: StorageConfig::Memory,
            ..Default::default()
        };
        ModelMonitor::open(config).unwrap()
    }

    fn later() -> DateTime<Utc> {
        Utc::now() + Duration::seconds(5)
    }

    #[test]
    fn test_new_monitor() {
        let m = test_monitor();
        assert_eq!(m.config().service_name, "ryzanstein");
        assert!(m.store().is_empty().unwrap());
    }

    #[test]
    fn test_log_and_query_monotonic() {
        let m = test_monitor();
        let before = Utc::now() - Duration::seconds(1);
        for i in 0..30 {
            m.log_performance("ranker", "2.1", MetricNames::ACCURACY, 0.9 - i as f64 * 0.001, 1, None)
                .unwrap();
        }
        let rows = m
            .query(&MetricKey::new("ranker", "2.1", MetricNames::ACCURACY), before)
            .unwrap();
        assert_eq!(rows.len(), 30);
        assert!(rows.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn test_log_rejects_invalid() {
        let m = test_monitor();
        assert!(matches!(
            m.log_performance("ranker", "2.1", "accuracy", f64::NAN, 1, None),
            Err(MonitorError::InvalidObservation(_))
        ));
        assert!(matches!(
            m.log_performance("ranker", "2.1", "accuracy", 0.9, 0, None),
            Err(MonitorError::InvalidObservation(_))
        ));
    }

    #[test]
    fn test_degrading_accuracy_detected() {
        let m = test_monitor();
        for i in 0..20 {
            let value = 0.95 - 0.25 * i as f64 / 19.0;
            m.log_performance("ranker", "2.1", "accuracy", value, 10, None).unwrap();
        }
        let key = MetricKey::new("ranker", "2.1", "accuracy");
        let result = m.detect_performance_drift_at(&key, None, None, later()).unwrap();
        assert_eq!(result.data_points, 20);
        assert!(result.trend_detected);
        assert!(result.is_degrading);
        assert!(result.drift_detected);
        assert!(result.severity >= Severity::Warning);
        assert_eq!(result.window_days, 7);
    }

    #[test]
    fn test_performance_insufficient_data() {
        let m = test_monitor();
        for _ in 0..9 {
            m.log_performance("ranker", "2.1", "accuracy", 0.5, 1, None).unwrap();
        }
        let result = m
            .detect_performance_drift("ranker", "2.1", "accuracy", Some(7), Some(2.0))
            .unwrap();
        assert!(!result.drift_detected);
        assert_eq!(result.data_points, 9);
        assert!(result.message.is_some());
    }

    #[test]
    fn test_invalid_threshold_std_rejected() {
        let m = test_monitor();
        let result = m.detect_performance_drift("ranker", "2.1", "accuracy", None, Some(-1.0));
        assert!(matches!(result, Err(MonitorError::InvalidArgument(_))));
        let result = m.detect_performance_drift("ranker", "2.1", "accuracy", Some(0), None);
        assert!(matches!(result, Err(MonitorError::InvalidArgument(_))));
    }

    #[test]
    fn test_report_is_idempotent() {
        let m = test_monitor();
        for i in 0..15 {
            m.log_performance("ranker", "2.1", "accuracy", 0.9 + (i % 4) as f64 * 0.005, 20, None)
                .unwrap();
            m.log_performance("ranker", "2.1", "latency_ms", 30.0 + (i % 5) as f64, 20, None)
                .unwrap();
        }
        let now = later();
        let first = m.generate_monitoring_report_at("ranker", "2.1", None, now).unwrap();
        let second = m.generate_monitoring_report_at("ranker", "2.1", None, now).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.report().unwrap().total_predictions, 600);
    }

    #[test]
    fn test_empty_report_is_flagged() {
        let m = test_monitor();
        m.log_performance("ranker", "2.1", "accuracy", 0.9, 1, None).unwrap();
        let outcome = m.generate_monitoring_report("ranker", "9.9", Some(7)).unwrap();
        assert!(outcome.is_no_data());
    }

    #[test]
    fn test_data_drift_through_monitor() {
        let m = test_monitor();
        let baseline = vec![1.0; 50];
        let result = m.detect_data_drift("accuracy", &baseline, &baseline).unwrap();
        assert!(!result.drift_detected);
        assert_eq!(result.severity, Severity::Info);
    }

    #[test]
    fn test_query_model_spans_metrics() {
        let m = test_monitor();
        let since = Utc::now() - Duration::seconds(1);
        m.log_performance("ranker", "2.1", "accuracy", 0.9, 1, None).unwrap();
        m.log_performance("ranker", "2.1", "latency_ms", 35.0, 1, None).unwrap();
        m.log_performance("ranker", "2.2", "accuracy", 0.8, 1, None).unwrap();
        let rows = m.query_model("ranker", "2.1", since).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].metric_name, "accuracy");
        assert_eq!(rows[1].metric_name, "latency_ms");
    }

    #[test]
    fn test_oversized_window_is_an_error() {
        let m = test_monitor();
        m.log_performance("ranker", "2.1", "accuracy", 0.9, 1, None).unwrap();
        let report = m.generate_monitoring_report("ranker", "2.1", Some(u32::MAX));
        assert!(matches!(report, Err(MonitorError::InvalidArgument(_))));
        let drift = m.detect_performance_drift("ranker", "2.1", "accuracy", Some(u32::MAX), None);
        assert!(matches!(drift, Err(MonitorError::InvalidArgument(_))));
    }

    #[test]
    fn test_tags_are_stored() {
        let m = test_monitor();
        let mut tags = Tags::new();
        tags.insert("gpu".into(), serde_json::json!("a100"));
        tags.insert("batch".into(), serde_json::json!(64));
        let stored = m
            .log_performance("ranker", "2.1", "latency_ms", 41.5, 64, Some(tags))
            .unwrap();
        assert_eq!(stored.tags["gpu"], "a100");
        assert_eq!(stored.prediction_count, 64);
    }
}
