//! Weighted agent health scoring.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use fleetwatch_core::AgentId;
use fleetwatch_store::{Agent, Heartbeat, PerformanceMetric, SystemEvent};
use serde::{Deserialize, Serialize};

use crate::metric_names;

/// Sub-score weights. They sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Weights {
    /// Heartbeat consistency.
    pub heartbeat: f64,
    /// Processing performance.
    pub performance: f64,
    /// Error rate.
    pub error_rate: f64,
    /// Resource efficiency.
    pub resource: f64,
    /// Business impact.
    pub business: f64,
}

/// The weights applied by [`score_agent`].
pub const WEIGHTS: Weights = Weights {
    heartbeat: 0.30,
    performance: 0.25,
    error_rate: 0.20,
    resource: 0.15,
    business: 0.10,
};

const HEARTBEAT_WINDOW_MINUTES: i64 = 5;
const TREND_SAMPLES: usize = 5;
const RECOMMENDATION_THRESHOLD: f64 = 70.0;
const BUSINESS_BASE: f64 = 100.0;
const BUSINESS_BONUS: f64 = 10.0;
const BUSINESS_BONUS_THRESHOLD: f64 = 100.0;

/// Status band derived from the overall score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthBand {
    /// 90 and above.
    Excellent,
    /// 75 to 90.
    Good,
    /// 60 to 75.
    Fair,
    /// 40 to 60.
    Poor,
    /// Below 40.
    Critical,
}

impl HealthBand {
    /// Band for an overall score.
    #[must_use]
    pub fn from_score(score: f64) -> Self {
        if score >= 90.0 {
            Self::Excellent
        } else if score >= 75.0 {
            Self::Good
        } else if score >= 60.0 {
            Self::Fair
        } else if score >= 40.0 {
            Self::Poor
        } else {
            Self::Critical
        }
    }

    /// Lowercase label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::Fair => "fair",
            Self::Poor => "poor",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for HealthBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of recent processing times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    /// Latest sample faster than the earliest.
    Improving,
    /// Latest sample slower than the earliest.
    Degrading,
    /// Equal, or fewer than two samples.
    Stable,
}

impl Trend {
    /// Lowercase label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Improving => "improving",
            Self::Degrading => "degrading",
            Self::Stable => "stable",
        }
    }
}

/// The five sub-scores, each in `0..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthComponents {
    /// Heartbeats in the last five minutes.
    pub heartbeat_consistency: f64,
    /// Mean processing time.
    pub performance: f64,
    /// Error and critical events.
    pub error_rate: f64,
    /// CPU and memory headroom.
    pub resource_efficiency: f64,
    /// Business value generated.
    pub business_impact: f64,
}

impl HealthComponents {
    /// Weighted sum of the sub-scores.
    #[must_use]
    pub fn weighted(&self) -> f64 {
        self.heartbeat_consistency * WEIGHTS.heartbeat
            + self.performance * WEIGHTS.performance
            + self.error_rate * WEIGHTS.error_rate
            + self.resource_efficiency * WEIGHTS.resource
            + self.business_impact * WEIGHTS.business
    }

    fn named(&self) -> [(&'static str, f64); 5] {
        [
            ("heartbeat_consistency", self.heartbeat_consistency),
            ("performance", self.performance),
            ("error_rate", self.error_rate),
            ("resource_efficiency", self.resource_efficiency),
            ("business_impact", self.business_impact),
        ]
    }
}

/// Result of [`score_agent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentHealth {
    /// Scored agent.
    pub agent_id: AgentId,
    /// Weighted composite in `0..=100`.
    pub overall_score: f64,
    /// The individual sub-scores.
    pub components: HealthComponents,
    /// Band of `overall_score`.
    pub status: HealthBand,
    /// Processing-time direction.
    pub trend: Trend,
    /// Advisory lines, one per weak sub-score.
    pub recommendations: Vec<String>,
    /// Heartbeats counted in the consistency window.
    pub heartbeat_count: u32,
    /// Error and critical events counted.
    pub error_count: u32,
}

/// Score one agent.
///
/// Only inputs attributed to `agent` are considered; heartbeats and metrics
/// of other agents, and events that are not `ERROR`/`CRITICAL`, are ignored.
/// Heartbeats stamped after `now` are skipped.
#[must_use]
pub fn score_agent(
    agent: &Agent,
    heartbeats: &[Heartbeat],
    metrics: &[PerformanceMetric],
    errors: &[SystemEvent],
    now: DateTime<Utc>,
) -> AgentHealth {
    let id = &agent.agent_id;
    let own_metrics: Vec<&PerformanceMetric> = metrics
        .iter()
        .filter(|m| m.agent_id.as_ref() == Some(id))
        .collect();

    let heartbeat_count = count_recent_heartbeats(id, heartbeats, now);
    let error_count = errors
        .iter()
        .filter(|e| e.agent_id.as_ref() == Some(id) && e.severity.is_retained())
        .count();
    let error_count = u32::try_from(error_count).unwrap_or(u32::MAX);

    let components = HealthComponents {
        heartbeat_consistency: heartbeat_score(heartbeat_count),
        performance: performance_score(&own_metrics),
        error_rate: error_score(error_count),
        resource_efficiency: resource_score(&own_metrics),
        business_impact: business_score(&own_metrics),
    };

    let overall_score = components.weighted().clamp(0.0, 100.0);

    AgentHealth {
        agent_id: id.clone(),
        overall_score,
        components,
        status: HealthBand::from_score(overall_score),
        trend: processing_trend(&own_metrics),
        recommendations: recommendations(&components),
        heartbeat_count,
        error_count,
    }
}

fn count_recent_heartbeats(id: &AgentId, heartbeats: &[Heartbeat], now: DateTime<Utc>) -> u32 {
    let window_start = now - Duration::minutes(HEARTBEAT_WINDOW_MINUTES);
    let count = heartbeats
        .iter()
        .filter(|hb| &hb.agent_id == id)
        .filter(|hb| hb.timestamp >= window_start && hb.timestamp <= now)
        .count();
    u32::try_from(count).unwrap_or(u32::MAX)
}

/// Heartbeats in the window mapped onto the consistency scale.
#[must_use]
pub fn heartbeat_score(count: u32) -> f64 {
    match count {
        0 => 0.0,
        1..=2 => 50.0,
        3..=4 => 75.0,
        _ => 100.0,
    }
}

fn values<'a>(metrics: &'a [&'a PerformanceMetric], name: &'a str) -> impl Iterator<Item = f64> + 'a {
    metrics
        .iter()
        .filter(move |m| m.metric_name == name)
        .map(|m| m.value)
}

#[allow(clippy::cast_precision_loss)]
fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

fn performance_score(metrics: &[&PerformanceMetric]) -> f64 {
    match mean(values(metrics, metric_names::PROCESSING_TIME)) {
        None => 100.0,
        Some(avg) if avg <= 1.0 => 100.0,
        Some(avg) if avg <= 3.0 => 80.0,
        Some(avg) if avg <= 5.0 => 60.0,
        Some(_) => 40.0,
    }
}

/// Error event count mapped onto the error-rate scale.
#[must_use]
pub fn error_score(count: u32) -> f64 {
    match count {
        0 => 100.0,
        1..=2 => 80.0,
        3..=5 => 60.0,
        6..=10 => 40.0,
        _ => 20.0,
    }
}

fn resource_score(metrics: &[&PerformanceMetric]) -> f64 {
    let headroom = |name| {
        mean(values(metrics, name)).map_or(100.0, |avg| (100.0 - avg).clamp(0.0, 100.0))
    };
    (headroom(metric_names::CPU_USAGE) + headroom(metric_names::MEMORY_USAGE)) / 2.0
}

fn business_score(metrics: &[&PerformanceMetric]) -> f64 {
    let generated: f64 = values(metrics, metric_names::BUSINESS_VALUE).sum();
    if generated > BUSINESS_BONUS_THRESHOLD {
        (BUSINESS_BASE + BUSINESS_BONUS).min(100.0)
    } else {
        BUSINESS_BASE
    }
}

fn processing_trend(metrics: &[&PerformanceMetric]) -> Trend {
    let mut samples: Vec<&PerformanceMetric> = metrics
        .iter()
        .copied()
        .filter(|m| m.metric_name == metric_names::PROCESSING_TIME)
        .collect();
    if samples.len() < 2 {
        return Trend::Stable;
    }
    samples.sort_by_key(|m| m.timestamp);

    let recent = &samples[samples.len().saturating_sub(TREND_SAMPLES)..];
    let (earliest, latest) = (recent[0].value, recent[recent.len() - 1].value);
    if latest < earliest {
        Trend::Improving
    } else if latest > earliest {
        Trend::Degrading
    } else {
        Trend::Stable
    }
}

fn recommendations(components: &HealthComponents) -> Vec<String> {
    components
        .named()
        .into_iter()
        .filter(|(_, score)| *score < RECOMMENDATION_THRESHOLD)
        .map(|(name, score)| {
            let advice = match name {
                "heartbeat_consistency" => "check agent liveness and heartbeat interval",
                "performance" => "investigate slow processing",
                "error_rate" => "review recent error events",
                "resource_efficiency" => "reduce CPU or memory pressure",
                _ => "review business value generation",
            };
            format!("{name} score {score:.0}: {advice}")
        })
        .collect()
}
