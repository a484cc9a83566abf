//! Health scoring and anomaly detection for fleetwatch.
//!
//! Everything in this crate is a pure function over data already read from
//! the store: no I/O, no clocks (callers pass `now`), no shared state.
//!
//! - [`score_agent`] folds heartbeats, metrics and error events into a
//!   weighted composite score with a status band, a trend and advisory text.
//! - [`summarize_fleet`] aggregates per-agent results for reporting.
//! - [`detect_anomalies`] flags z-score outliers in metric series.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod anomaly;
pub mod fleet;
pub mod health;

pub use anomaly::{detect_anomalies, Anomaly, ANOMALY_REPORT_THRESHOLD, MIN_SAMPLES};
pub use fleet::{summarize_fleet, FleetHealth};
pub use health::{score_agent, AgentHealth, HealthBand, HealthComponents, Trend, WEIGHTS};

/// Metric names the analysis functions read.
pub mod metric_names {
    /// Seconds spent per work item or cycle.
    pub const PROCESSING_TIME: &str = "processing_time";
    /// CPU utilisation in percent.
    pub const CPU_USAGE: &str = "cpu_usage";
    /// Memory utilisation in percent.
    pub const MEMORY_USAGE: &str = "memory_usage";
    /// Business value produced, in policy units.
    pub const BUSINESS_VALUE: &str = "business_value_generated";
}
