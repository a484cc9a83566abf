//! Fleet-wide health summary.

use std::collections::BTreeMap;

use fleetwatch_core::AgentId;
use serde::{Deserialize, Serialize};

use crate::health::{AgentHealth, HealthBand};

/// Aggregate of per-agent health results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetHealth {
    /// Agents scored.
    pub agent_count: usize,
    /// Mean overall score; 0 for an empty fleet.
    pub mean_score: f64,
    /// Agents per status band.
    pub by_status: BTreeMap<HealthBand, usize>,
    /// Agents scoring below the threshold, lowest first.
    pub below_threshold: Vec<AgentId>,
}

/// Summarize a set of health results against `threshold`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn summarize_fleet(results: &[AgentHealth], threshold: f64) -> FleetHealth {
    let mut by_status = BTreeMap::new();
    for health in results {
        *by_status.entry(health.status).or_insert(0) += 1;
    }

    let mean_score = if results.is_empty() {
        0.0
    } else {
        results.iter().map(|h| h.overall_score).sum::<f64>() / results.len() as f64
    };

    let mut low: Vec<&AgentHealth> = results
        .iter()
        .filter(|h| h.overall_score < threshold)
        .collect();
    low.sort_by(|a, b| a.overall_score.total_cmp(&b.overall_score));

    FleetHealth {
        agent_count: results.len(),
        mean_score,
        by_status,
        below_threshold: low.into_iter().map(|h| h.agent_id.clone()).collect(),
    }
}
