//! Well-known model metric names.

/// Standard metric names reported by inference services
pub struct MetricNames;

impl MetricNames {
    // Quality metrics
    pub const ACCURACY: &'static str = "accuracy";
    pub const PRECISION: &'static str = "precision";
    pub const RECALL: &'static str = "recall";
    pub const F1_SCORE: &'static str = "f1_score";
    pub const AUC: &'static str = "auc";

    // Error metrics
    pub const ERROR_RATE: &'static str = "error_rate";
    pub const MAE: &'static str = "mae";
    pub const RMSE: &'static str = "rmse";

    // Serving metrics
    pub const LATENCY_MS: &'static str = "latency_ms";
    pub const THROUGHPUT_RPS: &'static str = "throughput_rps";

    /// Metrics where a falling value is an improvement.
    ///
    /// The performance detector always reads a negative slope as degrading;
    /// negate these before logging if that reading should hold for them too.
    pub const LOWER_IS_BETTER: &'static [&'static str] = &[
        Self::ERROR_RATE,
        Self::MAE,
        Self::RMSE,
        Self::LATENCY_MS,
    ];

    pub fn is_lower_better(metric_name: &str) -> bool {
        Self::LOWER_IS_BETTER.contains(&metric_name)
    }
}

/// Exported gauge name for one statistic of a metric, e.g. `model.metric.accuracy.p95`.
pub fn gauge_name(metric_name: &str, statistic: &str) -> String {
    format!("model.metric.{}.{}", metric_name, statistic)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names_unique() {
        let names = vec![
            MetricNames::ACCURACY,
            MetricNames::PRECISION,
            MetricNames::RECALL,
            MetricNames::F1_SCORE,
            MetricNames::AUC,
            MetricNames::ERROR_RATE,
            MetricNames::MAE,
            MetricNames::RMSE,
            MetricNames::LATENCY_MS,
            MetricNames::THROUGHPUT_RPS,
        ];
        let unique: std::collections::HashSet<_> = names.iter().collect();
        assert_eq!(names.len(), unique.len());
    }

    #[test]
    fn test_lower_is_better() {
        assert!(MetricNames::is_lower_better(MetricNames::LATENCY_MS));
        assert!(!MetricNames::is_lower_better(MetricNames::ACCURACY));
        assert!(!MetricNames::is_lower_better("custom_metric"));
    }

    #[test]
    fn test_gauge_name() {
        assert_eq!(gauge_name("accuracy", "mean"), "model.metric.accuracy.mean");
    }
}
