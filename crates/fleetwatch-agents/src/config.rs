//! Fleet configuration.
//!
//! Every setting has a default; [`FleetConfig::from_env`] overrides them from
//! plain environment variables. Unparseable values are ignored with a warning.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use fleetwatch_recovery::{
    DetectorConfig, RecoveryConfig, RecoveryPolicy, RuleRegistry, SubsystemRegistry, SubsystemSpec,
};
use fleetwatch_store::StoreConfig;

use crate::error::{AgentError, Result};

/// Configuration for the whole process.
#[derive(Debug, Clone)]
pub struct FleetConfig {
    /// Store connection and pool sizing.
    pub store: StoreConfig,
    /// Issue detector thresholds.
    pub detector: DetectorConfig,
    /// Recovery engine limits.
    pub recovery: RecoveryConfig,
    /// Optional JSON file overriding the default recovery policy.
    pub policy_path: Option<PathBuf>,
    /// Optional JSON file declaring extra tunable subsystems.
    pub subsystems_path: Option<PathBuf>,
    /// How often every agent heartbeats, independent of its work interval.
    pub heartbeat_interval: Duration,
    /// Heartbeat agent wake interval.
    pub health_check_interval: Duration,
    /// Performance agent wake interval.
    pub performance_interval: Duration,
    /// Self-healing agent wake interval.
    pub self_healing_interval: Duration,
    /// Maintenance agent wake interval.
    pub maintenance_interval: Duration,
    /// Scores below this raise a WARNING health alert.
    pub critical_threshold: f64,
    /// Scores below this raise a CRITICAL health alert.
    pub emergency_threshold: f64,
    /// Days of history kept by the maintenance agent.
    pub retention_days: u32,
    /// Outer deadline for a single work cycle.
    pub cycle_timeout: Duration,
    /// Status API listen address.
    pub listen_addr: String,
    /// Base URL of the agent control endpoint. `None` disables control signals.
    pub controller_url: Option<String>,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            detector: DetectorConfig::default(),
            recovery: RecoveryConfig::default(),
            policy_path: None,
            subsystems_path: None,
            heartbeat_interval: Duration::from_secs(30),
            health_check_interval: Duration::from_secs(60),
            performance_interval: Duration::from_secs(120),
            self_healing_interval: Duration::from_secs(60),
            maintenance_interval: Duration::from_secs(24 * 60 * 60),
            critical_threshold: 70.0,
            emergency_threshold: 50.0,
            retention_days: 30,
            cycle_timeout: Duration::from_secs(300),
            listen_addr: "0.0.0.0:8090".to_string(),
            controller_url: None,
        }
    }
}

impl FleetConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Setting |
    /// |---|---|
    /// | `DATABASE_URL` | store URL |
    /// | `DB_MIN_CONNECTIONS`, `DB_MAX_CONNECTIONS` | pool sizing |
    /// | `DB_COMMAND_TIMEOUT_MS` | command timeout |
    /// | `HEARTBEAT_INTERVAL_SECS` | per-agent heartbeat interval |
    /// | `HEALTH_CHECK_INTERVAL_SECS` | heartbeat agent interval |
    /// | `PERFORMANCE_INTERVAL_SECS` | performance agent interval |
    /// | `SELF_HEALING_INTERVAL_SECS` | self-healing agent interval |
    /// | `MAINTENANCE_INTERVAL_SECS` | maintenance agent interval |
    /// | `CRITICAL_THRESHOLD`, `EMERGENCY_THRESHOLD` | health alert thresholds |
    /// | `RETENTION_DAYS` | history kept |
    /// | `CYCLE_TIMEOUT_SECS` | watchdog deadline |
    /// | `MAX_CONCURRENT_RECOVERIES` | issues recovered per cycle |
    /// | `ACTION_TIMEOUT_SECS` | per-action deadline |
    /// | `LISTEN_ADDR` | status API address |
    /// | `AGENT_CONTROL_URL` | agent control endpoint |
    /// | `RECOVERY_POLICY_PATH` | policy JSON file |
    /// | `SUBSYSTEMS_PATH` | subsystem JSON file |
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("DATABASE_URL") {
            config.store.database_url = val;
        }
        set_parsed("DB_MIN_CONNECTIONS", &mut config.store.min_connections);
        set_parsed("DB_MAX_CONNECTIONS", &mut config.store.max_connections);
        set_parsed("DB_COMMAND_TIMEOUT_MS", &mut config.store.command_timeout_ms);

        set_secs("HEARTBEAT_INTERVAL_SECS", &mut config.heartbeat_interval);
        set_secs("HEALTH_CHECK_INTERVAL_SECS", &mut config.health_check_interval);
        set_secs("PERFORMANCE_INTERVAL_SECS", &mut config.performance_interval);
        set_secs("SELF_HEALING_INTERVAL_SECS", &mut config.self_healing_interval);
        set_secs("MAINTENANCE_INTERVAL_SECS", &mut config.maintenance_interval);
        set_secs("CYCLE_TIMEOUT_SECS", &mut config.cycle_timeout);
        set_secs("ACTION_TIMEOUT_SECS", &mut config.recovery.action_timeout);

        set_parsed("CRITICAL_THRESHOLD", &mut config.critical_threshold);
        set_parsed("EMERGENCY_THRESHOLD", &mut config.emergency_threshold);
        set_parsed("RETENTION_DAYS", &mut config.retention_days);
        set_parsed(
            "MAX_CONCURRENT_RECOVERIES",
            &mut config.recovery.max_concurrent_recoveries,
        );

        if let Ok(val) = std::env::var("LISTEN_ADDR") {
            config.listen_addr = val;
        }
        config.controller_url = std::env::var("AGENT_CONTROL_URL")
            .ok()
            .filter(|url| !url.is_empty());
        config.policy_path = std::env::var("RECOVERY_POLICY_PATH")
            .ok()
            .filter(|path| !path.is_empty())
            .map(PathBuf::from);
        config.subsystems_path = std::env::var("SUBSYSTEMS_PATH")
            .ok()
            .filter(|path| !path.is_empty())
            .map(PathBuf::from);

        config
    }

    /// Check the settings for contradictions.
    ///
    /// # Errors
    ///
    /// Returns `AgentError::Config` describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.emergency_threshold > self.critical_threshold {
            return Err(AgentError::Config(format!(
                "emergency threshold {} is above critical threshold {}",
                self.emergency_threshold, self.critical_threshold
            )));
        }
        if self.store.min_connections > self.store.max_connections {
            return Err(AgentError::Config(format!(
                "min_connections {} exceeds max_connections {}",
                self.store.min_connections, self.store.max_connections
            )));
        }
        if self.retention_days == 0 {
            return Err(AgentError::Config("retention_days must be at least 1".into()));
        }

        // More than `irregular_max_heartbeats` must land in the liveness window
        // and at least one in the state window.
        let liveness = minutes(self.detector.liveness_window_minutes);
        let required = u32::try_from(self.detector.irregular_max_heartbeats)
            .unwrap_or(u32::MAX)
            .saturating_add(1);
        if self.heartbeat_interval.is_zero()
            || self.heartbeat_interval.saturating_mul(required) >= liveness
            || self.heartbeat_interval >= minutes(self.detector.state_window_minutes)
        {
            return Err(AgentError::Config(format!(
                "heartbeat interval {:?} is too long for the {:?} liveness window",
                self.heartbeat_interval, liveness
            )));
        }
        Ok(())
    }

    /// The recovery policy: the file at `policy_path` if set, else the default.
    ///
    /// # Errors
    ///
    /// Returns `AgentError::Recovery` if the file cannot be read or is invalid.
    pub fn load_policy(&self) -> Result<RecoveryPolicy> {
        match &self.policy_path {
            Some(path) => {
                let policy = RecoveryPolicy::from_file(path)?;
                tracing::info!(path = %path.display(), "Loaded recovery policy");
                Ok(policy)
            }
            None => Ok(RecoveryPolicy::default()),
        }
    }

    /// The subsystems recovery may tune: the built-in ones, one per
    /// event-rate rule component, plus those declared in `subsystems_path`.
    ///
    /// # Errors
    ///
    /// Returns `AgentError::Recovery` if the file cannot be read or is invalid.
    pub fn load_subsystems(&self, rules: &RuleRegistry) -> Result<SubsystemRegistry> {
        let registry = SubsystemRegistry::for_rules(rules);
        if let Some(path) = &self.subsystems_path {
            let specs = SubsystemSpec::load(path)?;
            registry.register_specs(&specs);
            tracing::info!(path = %path.display(), subsystems = specs.len(), "Loaded subsystems");
        }
        Ok(registry)
    }
}

fn minutes(count: u32) -> Duration {
    Duration::from_secs(u64::from(count) * 60)
}

fn set_parsed<T: FromStr>(key: &str, target: &mut T) {
    if let Ok(val) = std::env::var(key) {
        match val.parse() {
            Ok(parsed) => *target = parsed,
            Err(_) => tracing::warn!(key, value = %val, "Ignoring unparseable setting"),
        }
    }
}

fn set_secs(key: &str, target: &mut Duration) {
    let mut secs = target.as_secs();
    set_parsed(key, &mut secs);
    *target = Duration::from_secs(secs);
}
