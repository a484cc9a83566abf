//! Detector and recovery configuration.

use std::time::Duration;

/// Thresholds and windows for the detection rules.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Window for the liveness rules, in minutes.
    pub liveness_window_minutes: u32,
    /// Heartbeat counts up to this many in the liveness window are irregular.
    pub irregular_max_heartbeats: usize,
    /// Window for the state-consistency rule, in minutes.
    pub state_window_minutes: u32,
    /// Probe latency above this is a MEDIUM database issue.
    pub db_response_warning: Duration,
    /// Probe latency above this is a HIGH database issue.
    pub db_response_high: Duration,
    /// Window for metric and event based rules, in hours.
    pub analysis_window_hours: u32,
    /// Mean processing time (seconds) above this is MEDIUM.
    pub processing_time_medium: f64,
    /// Mean processing time (seconds) above this is HIGH.
    pub processing_time_high: f64,
    /// Error share above this is MEDIUM.
    pub error_rate_medium: f64,
    /// Error share above this is HIGH.
    pub error_rate_high: f64,
    /// Memory growth percentage above this is MEDIUM.
    pub memory_growth_medium: f64,
    /// Memory growth percentage above this is HIGH.
    pub memory_growth_high: f64,
    /// Samples compared at each end of the memory series.
    pub memory_sample_span: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            liveness_window_minutes: 10,
            irregular_max_heartbeats: 2,
            state_window_minutes: 5,
            db_response_warning: Duration::from_secs(2),
            db_response_high: Duration::from_secs(5),
            analysis_window_hours: 1,
            processing_time_medium: 5.0,
            processing_time_high: 10.0,
            error_rate_medium: 0.10,
            error_rate_high: 0.20,
            memory_growth_medium: 20.0,
            memory_growth_high: 50.0,
            memory_sample_span: 5,
        }
    }
}

/// Limits applied by the recovery engine and executor.
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Issues recovered per cycle; the rest wait for the next cycle.
    pub max_concurrent_recoveries: usize,
    /// Wait between a restart signal and the heartbeat re-check.
    pub restart_settle: Duration,
    /// Bound on a single action, including rollback-free handlers.
    pub action_timeout: Duration,
    /// Heartbeat window used by state synchronization, in minutes.
    pub sync_window_minutes: u32,
    /// Factor applied by parameter down-tuning.
    pub tune_factor: f64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_concurrent_recoveries: 3,
            restart_settle: Duration::from_secs(30),
            action_timeout: Duration::from_secs(120),
            sync_window_minutes: 5,
            tune_factor: 0.8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_thresholds_are_ordered() {
        let config = DetectorConfig::default();
        assert!(config.db_response_warning < config.db_response_high);
        assert!(config.processing_time_medium < config.processing_time_high);
        assert!(config.error_rate_medium < config.error_rate_high);
        assert!(config.memory_growth_medium < config.memory_growth_high);
    }

    #[test]
    fn default_recovery_limits() {
        let config = RecoveryConfig::default();
        assert_eq!(config.max_concurrent_recoveries, 3);
        assert_eq!(config.restart_settle, Duration::from_secs(30));
        assert!(config.tune_factor < 1.0);
    }
}
