//! Z-score outlier detection over metric series.
//!
//! Each metric name forms one series. The latest sample is compared against
//! the baseline made of every earlier sample:
//!
//! ```text
//! score = |latest - mean(baseline)| / stdev(baseline)
//! ```
//!
//! A constant baseline (stdev 0) always scores 0.

use std::collections::BTreeMap;

use fleetwatch_core::IssueSeverity;
use fleetwatch_store::PerformanceMetric;
use serde::{Deserialize, Serialize};

/// Samples required before a series is scored.
pub const MIN_SAMPLES: usize = 3;

/// Only scores strictly above this are reported.
pub const ANOMALY_REPORT_THRESHOLD: f64 = 2.0;

/// An outlying latest sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    /// Series name.
    pub metric_name: String,
    /// Distance from the baseline mean in standard deviations.
    pub anomaly_score: f64,
    /// Band of `anomaly_score`.
    pub severity: IssueSeverity,
    /// The latest sample.
    pub current_value: f64,
    /// Mean of the earlier samples.
    pub baseline_mean: f64,
    /// Sample standard deviation of the earlier samples.
    pub baseline_std: f64,
}

/// Severity band for an anomaly score.
#[must_use]
pub fn severity_for(score: f64) -> IssueSeverity {
    if score > 4.0 {
        IssueSeverity::Critical
    } else if score > 3.0 {
        IssueSeverity::High
    } else if score > ANOMALY_REPORT_THRESHOLD {
        IssueSeverity::Medium
    } else {
        IssueSeverity::Low
    }
}

/// Find anomalous latest samples, one entry per affected metric name.
///
/// Samples are ordered by timestamp within each series before scoring.
/// Results are ordered by metric name.
#[must_use]
pub fn detect_anomalies(metrics: &[PerformanceMetric]) -> Vec<Anomaly> {
    let mut series: BTreeMap<&str, Vec<&PerformanceMetric>> = BTreeMap::new();
    for metric in metrics {
        series.entry(metric.metric_name.as_str()).or_default().push(metric);
    }

    series
        .into_iter()
        .filter_map(|(name, mut samples)| {
            samples.sort_by_key(|m| m.timestamp);
            let values: Vec<f64> = samples.iter().map(|m| m.value).collect();
            score_series(&values).map(|(anomaly_score, mean, std)| Anomaly {
                metric_name: name.to_string(),
                anomaly_score,
                severity: severity_for(anomaly_score),
                current_value: values[values.len() - 1],
                baseline_mean: mean,
                baseline_std: std,
            })
        })
        .filter(|a| a.anomaly_score > ANOMALY_REPORT_THRESHOLD)
        .collect()
}

/// Score the last value against the rest. Returns `(score, mean, stdev)`,
/// or `None` for series shorter than [`MIN_SAMPLES`].
#[allow(clippy::cast_precision_loss)]
fn score_series(values: &[f64]) -> Option<(f64, f64, f64)> {
    if values.len() < MIN_SAMPLES {
        return None;
    }
    let (latest, baseline) = values.split_last()?;
    let n = baseline.len() as f64;
    let mean = baseline.iter().sum::<f64>() / n;
    let variance = baseline.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let std = variance.sqrt();

    let score = if std > 0.0 {
        (latest - mean).abs() / std
    } else {
        0.0
    };
    Some((score, mean, std))
}
