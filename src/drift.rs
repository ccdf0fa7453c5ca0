//! Drift detection over numeric samples.
//!
//! Two independent detectors:
//! - data drift: KS two-sample test combined with the Population Stability
//!   Index, comparing a reference sample against a current one;
//! - performance drift: statistical process control (mean ± k·std control
//!   limits) plus an OLS trend test over a metric's recent history.
//!
//! Both are pure functions of their inputs and safe to call from any thread.
//! Too little data is reported as a normal, non-drifting result with a
//! message, never as an error.

use serde::{Deserialize, Serialize};

use crate::error::{MonitorError, Result};
use crate::stats::{self, LinearTrend};
use crate::store::MetricKey;

/// How actionable a drift finding is. Ordered `Info < Warning < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// Tunable constants for both detectors. Defaults are the empirically chosen
/// values the monitoring dashboards were built against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftThresholds {
    /// p-value below which a KS or trend test counts as significant
    pub significance_level: f64,
    /// Number of PSI histogram bins
    pub psi_bins: usize,
    /// PSI above which data drift is flagged
    pub psi_drift: f64,
    pub psi_warning: f64,
    pub psi_critical: f64,
    /// PSI is divided by this before blending into the drift score
    pub psi_score_divisor: f64,
    pub score_warning: f64,
    pub score_critical: f64,
    /// Minimum observations for performance drift
    pub min_observations: usize,
    /// Control limit width in standard deviations
    pub threshold_std: f64,
    /// Violation rate above which performance drift is flagged
    pub violation_drift: f64,
    pub violation_warning: f64,
    pub violation_critical: f64,
    /// Fitted change across the window, as a fraction of std, that makes a
    /// significant trend count as drift
    pub trend_std_fraction: f64,
}

impl Default for DriftThresholds {
    fn default() -> Self {
        Self {
            significance_level: 0.05,
            psi_bins: 10,
            psi_drift: 0.2,
            psi_warning: 0.25,
            psi_critical: 0.5,
            psi_score_divisor: 10.0,
            score_warning: 0.3,
            score_critical: 0.5,
            min_observations: 10,
            threshold_std: 2.0,
            violation_drift: 0.1,
            violation_warning: 0.15,
            violation_critical: 0.3,
            trend_std_fraction: 0.5,
        }
    }
}

impl DriftThresholds {
    pub fn validate(&self) -> Result<()> {
        if self.psi_bins == 0 {
            return Err(MonitorError::Config("psi_bins must be at least 1".into()));
        }
        if !self.threshold_std.is_finite() || self.threshold_std <= 0.0 {
            return Err(MonitorError::Config(format!(
                "threshold_std must be positive, got {}",
                self.threshold_std
            )));
        }
        if !self.psi_score_divisor.is_finite() || self.psi_score_divisor <= 0.0 {
            return Err(MonitorError::Config("psi_score_divisor must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.significance_level) {
            return Err(MonitorError::Config("significance_level must be in [0, 1]".into()));
        }
        Ok(())
    }

    /// Same thresholds with a different control-limit width.
    pub fn with_threshold_std(mut self, threshold_std: f64) -> Self {
        self.threshold_std = threshold_std;
        self
    }
}

/// Outcome of a reference-vs-current distribution comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataDriftResult {
    pub feature_name: String,
    pub drift_detected: bool,
    /// `max(ks_statistic, psi / psi_score_divisor)`
    pub drift_score: f64,
    pub severity: Severity,
    pub ks_statistic: f64,
    pub p_value: f64,
    pub psi: f64,
    pub baseline_size: usize,
    pub current_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl DataDriftResult {
    fn insufficient(feature_name: &str, baseline_size: usize, current_size: usize) -> Self {
        Self {
            feature_name: feature_name.to_string(),
            drift_detected: false,
            drift_score: 0.0,
            severity: Severity::Info,
            ks_statistic: 0.0,
            p_value: 1.0,
            psi: 0.0,
            baseline_size,
            current_size,
            message: Some(format!(
                "Insufficient data: baseline has {} values, current has {}",
                baseline_size, current_size
            )),
        }
    }
}

/// Compare `current` against `baseline` for one feature.
///
/// Returns `InvalidArgument` only for non-finite sample values; empty samples
/// produce a non-drifting result with an explanatory message.
pub fn detect_data_drift(
    feature_name: &str,
    baseline: &[f64],
    current: &[f64],
    thresholds: &DriftThresholds,
) -> Result<DataDriftResult> {
    if baseline.is_empty() || current.is_empty() {
        return Ok(DataDriftResult::insufficient(feature_name, baseline.len(), current.len()));
    }
    if let Some(bad) = baseline.iter().chain(current.iter()).find(|v| !v.is_finite()) {
        return Err(MonitorError::InvalidArgument(format!(
            "feature '{}' contains non-finite value {}",
            feature_name, bad
        )));
    }

    let ks = stats::ks_two_sample(baseline, current);
    let psi = stats::population_stability_index(baseline, current, thresholds.psi_bins).max(0.0);

    let drift_score = ks.statistic.max(psi / thresholds.psi_score_divisor);
    let drift_detected = ks.p_value < thresholds.significance_level || psi > thresholds.psi_drift;
    let severity = classify_data_drift(psi, drift_score, thresholds);

    let message = drift_detected.then(|| {
        format!(
            "Distribution shift on '{}': KS={:.4} (p={:.4}), PSI={:.4}",
            feature_name, ks.statistic, ks.p_value, psi
        )
    });

    Ok(DataDriftResult {
        feature_name: feature_name.to_string(),
        drift_detected,
        drift_score,
        severity,
        ks_statistic: ks.statistic,
        p_value: ks.p_value,
        psi,
        baseline_size: baseline.len(),
        current_size: current.len(),
        message,
    })
}

pub fn classify_data_drift(psi: f64, drift_score: f64, t: &DriftThresholds) -> Severity {
    if psi > t.psi_critical || drift_score > t.score_critical {
        Severity::Critical
    } else if psi > t.psi_warning || drift_score > t.score_warning {
        Severity::Warning
    } else {
        Severity::Info
    }
}

pub fn classify_performance_drift(
    violation_rate: f64,
    is_degrading: bool,
    t: &DriftThresholds,
) -> Severity {
    if violation_rate > t.violation_critical
        || (is_degrading && violation_rate > t.violation_warning)
    {
        Severity::Critical
    } else if violation_rate > t.violation_warning || is_degrading {
        Severity::Warning
    } else {
        Severity::Info
    }
}

/// Control-chart and trend analysis of a metric series, independent of
/// where the values came from.
#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceEvaluation {
    pub data_points: usize,
    pub drift_detected: bool,
    pub drift_score: f64,
    pub severity: Severity,
    pub mean: f64,
    pub std: f64,
    pub upper_control_limit: f64,
    pub lower_control_limit: f64,
    pub violation_rate: f64,
    pub slope: f64,
    pub trend_p_value: f64,
    pub trend_detected: bool,
    pub is_degrading: bool,
    pub message: Option<String>,
}

/// Evaluate a chronologically ordered series of metric values.
pub fn evaluate_performance(values: &[f64], thresholds: &DriftThresholds) -> PerformanceEvaluation {
    let n = values.len();
    if n < thresholds.min_observations {
        return PerformanceEvaluation {
            data_points: n,
            drift_detected: false,
            drift_score: 0.0,
            severity: Severity::Info,
            mean: stats::mean(values),
            std: stats::population_std(values),
            upper_control_limit: 0.0,
            lower_control_limit: 0.0,
            violation_rate: 0.0,
            slope: 0.0,
            trend_p_value: 1.0,
            trend_detected: false,
            is_degrading: false,
            message: Some(format!(
                "Insufficient data: {} observations, need at least {}",
                n, thresholds.min_observations
            )),
        };
    }

    let mean = stats::mean(values);
    let std = stats::population_std(values);
    let upper = mean + thresholds.threshold_std * std;
    let lower = mean - thresholds.threshold_std * std;

    let violations = if std == 0.0 {
        values.iter().filter(|&&v| v != mean).count()
    } else {
        values.iter().filter(|&&v| v < lower || v > upper).count()
    };
    let violation_rate = violations as f64 / n as f64;

    let LinearTrend { slope, p_value, .. } = stats::linear_trend(values);
    let trend_detected = p_value < thresholds.significance_level;
    let is_degrading = trend_detected && slope < 0.0;

    let window_change = slope.abs() * (n - 1) as f64;
    let drift_detected = violation_rate > thresholds.violation_drift
        || (trend_detected && window_change > thresholds.trend_std_fraction * std);
    let severity = classify_performance_drift(violation_rate, is_degrading, thresholds);

    let message = drift_detected.then(|| {
        format!(
            "{:.1}% of observations outside control limits, slope {:.6} (p={:.4})",
            violation_rate * 100.0,
            slope,
            p_value
        )
    });

    PerformanceEvaluation {
        data_points: n,
        drift_detected,
        drift_score: violation_rate,
        severity,
        mean,
        std,
        upper_control_limit: upper,
        lower_control_limit: lower,
        violation_rate,
        slope,
        trend_p_value: p_value,
        trend_detected,
        is_degrading,
        message,
    }
}

/// Performance drift for one monitored metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceDriftResult {
    pub model_name: String,
    pub model_version: String,
    pub metric_name: String,
    pub window_days: u32,
    pub data_points: usize,
    pub drift_detected: bool,
    /// Fraction of observations outside the control limits
    pub drift_score: f64,
    pub severity: Severity,
    pub mean: f64,
    pub std: f64,
    pub upper_control_limit: f64,
    pub lower_control_limit: f64,
    pub violation_rate: f64,
    pub slope: f64,
    pub trend_p_value: f64,
    pub trend_detected: bool,
    pub is_degrading: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl PerformanceDriftResult {
    pub fn from_evaluation(key: &MetricKey, window_days: u32, eval: PerformanceEvaluation) -> Self {
        Self {
            model_name: key.model_name.clone(),
            model_version: key.model_version.clone(),
            metric_name: key.metric_name.clone(),
            window_days,
            data_points: eval.data_points,
            drift_detected: eval.drift_detected,
            drift_score: eval.drift_score,
            severity: eval.severity,
            mean: eval.mean,
            std: eval.std,
            upper_control_limit: eval.upper_control_limit,
            lower_control_limit: eval.lower_control_limit,
            violation_rate: eval.violation_rate,
            slope: eval.slope,
            trend_p_value: eval.trend_p_value,
            trend_detected: eval.trend_detected,
            is_degrading: eval.is_degrading,
            message: eval.message,
        }
    }
}
