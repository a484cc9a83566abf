//! Named subsystems that resource-tuning actions act on.
//!
//! A subsystem (an LLM client, a cache, a vector index) exposes tunable
//! numeric parameters, a cache and a stateful store. Recovery tunes them in
//! place instead of restarting the owning process.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{RecoveryError, Result};
use crate::rules::RuleRegistry;

/// Subsystem behind the built-in fallback-storm rule.
pub const LLM_SERVICE: &str = "llm_service";

/// A tunable parameter with a lower bound.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tunable {
    /// Current value.
    pub value: f64,
    /// Down-tuning never goes below this.
    pub floor: f64,
}

/// Parameter values captured before a tuning step.
pub type ParameterSnapshot = BTreeMap<String, f64>;

#[derive(Debug, Default)]
struct Subsystem {
    parameters: BTreeMap<String, Tunable>,
    cache_entries: u64,
    state_entries: u64,
    rebuilds: u64,
}

/// Point-in-time view of one subsystem.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubsystemSnapshot {
    /// Subsystem name.
    pub name: String,
    /// Parameter values.
    pub parameters: BTreeMap<String, Tunable>,
    /// Entries currently cached.
    pub cache_entries: u64,
    /// Entries in the stateful store.
    pub state_entries: u64,
    /// Times the stateful store has been rebuilt.
    pub rebuilds: u64,
}

/// Declared parameters of one subsystem.
///
/// ```json
/// [{ "name": "search_service", "parameters": { "max_results": { "value": 50, "floor": 5 } } }]
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubsystemSpec {
    /// Subsystem name, matched against `SystemIssue::affected_component`.
    pub name: String,
    /// Tunable parameters by key.
    #[serde(default)]
    pub parameters: BTreeMap<String, Tunable>,
}

impl SubsystemSpec {
    /// Read a JSON array of specs.
    ///
    /// # Errors
    ///
    /// Returns `RecoveryError::Subsystems` if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Vec<Self>> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| RecoveryError::Subsystems(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&text)
            .map_err(|e| RecoveryError::Subsystems(format!("{}: {e}", path.display())))
    }
}

/// Registry of subsystems, keyed by name.
#[derive(Debug, Default)]
pub struct SubsystemRegistry {
    inner: RwLock<HashMap<String, Subsystem>>,
}

impl SubsystemRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in subsystems and one entry per component
    /// named by `rules`.
    #[must_use]
    pub fn for_rules(rules: &RuleRegistry) -> Self {
        let registry = Self::new();
        registry.register_parameter(LLM_SERVICE, "max_concurrency", 10.0, 1.0);
        registry.register_parameter(LLM_SERVICE, "max_tokens", 4096.0, 256.0);
        for rule in rules.rules() {
            registry.ensure(&rule.component);
        }
        registry
    }

    /// Register a subsystem with no parameters unless it already exists.
    ///
    /// Returns true if it was added.
    pub fn ensure(&self, subsystem: &str) -> bool {
        let mut inner = self.inner.write();
        if inner.contains_key(subsystem) {
            return false;
        }
        inner.insert(subsystem.to_string(), Subsystem::default());
        tracing::debug!(subsystem, "Subsystem registered");
        true
    }

    /// Register every parameter of every spec.
    pub fn register_specs(&self, specs: &[SubsystemSpec]) {
        for spec in specs {
            self.ensure(&spec.name);
            for (key, tunable) in &spec.parameters {
                self.register_parameter(&spec.name, key, tunable.value, tunable.floor);
            }
        }
    }

    /// Register a subsystem, or add to an existing one, with a parameter.
    pub fn register_parameter(&self, subsystem: &str, key: &str, value: f64, floor: f64) {
        let mut inner = self.inner.write();
        inner
            .entry(subsystem.to_string())
            .or_default()
            .parameters
            .insert(key.to_string(), Tunable { value, floor });
    }

    /// Record current cache and state sizes reported by a subsystem.
    pub fn report_usage(&self, subsystem: &str, cache_entries: u64, state_entries: u64) {
        let mut inner = self.inner.write();
        let entry = inner.entry(subsystem.to_string()).or_default();
        entry.cache_entries = cache_entries;
        entry.state_entries = state_entries;
    }

    /// Returns true if the subsystem is registered.
    #[must_use]
    pub fn contains(&self, subsystem: &str) -> bool {
        self.inner.read().contains_key(subsystem)
    }

    /// Current view of a subsystem.
    #[must_use]
    pub fn snapshot(&self, subsystem: &str) -> Option<SubsystemSnapshot> {
        self.inner.read().get(subsystem).map(|s| SubsystemSnapshot {
            name: subsystem.to_string(),
            parameters: s.parameters.clone(),
            cache_entries: s.cache_entries,
            state_entries: s.state_entries,
            rebuilds: s.rebuilds,
        })
    }

    /// Multiply every parameter by `factor`, clamped to its floor.
    ///
    /// Returns the values held before tuning.
    ///
    /// # Errors
    ///
    /// Returns `RecoveryError::UnknownSubsystem` if the subsystem is not registered.
    pub fn tune_down(&self, subsystem: &str, factor: f64) -> Result<ParameterSnapshot> {
        let mut inner = self.inner.write();
        let entry = inner
            .get_mut(subsystem)
            .ok_or_else(|| RecoveryError::UnknownSubsystem(subsystem.to_string()))?;

        let mut previous = ParameterSnapshot::new();
        for (key, tunable) in &mut entry.parameters {
            previous.insert(key.clone(), tunable.value);
            tunable.value = (tunable.value * factor).max(tunable.floor);
        }

        tracing::info!(subsystem, factor, parameters = previous.len(), "Parameters tuned down");
        Ok(previous)
    }

    /// Put back parameter values captured by [`SubsystemRegistry::tune_down`].
    ///
    /// # Errors
    ///
    /// Returns `RecoveryError::UnknownSubsystem` if the subsystem is not registered.
    pub fn restore(&self, subsystem: &str, snapshot: &ParameterSnapshot) -> Result<()> {
        let mut inner = self.inner.write();
        let entry = inner
            .get_mut(subsystem)
            .ok_or_else(|| RecoveryError::UnknownSubsystem(subsystem.to_string()))?;

        for (key, value) in snapshot {
            if let Some(tunable) = entry.parameters.get_mut(key) {
                tunable.value = *value;
            }
        }
        tracing::info!(subsystem, "Parameters restored");
        Ok(())
    }

    /// Drop the subsystem's cache. Returns the entries dropped.
    ///
    /// # Errors
    ///
    /// Returns `RecoveryError::UnknownSubsystem` if the subsystem is not registered.
    pub fn clear_cache(&self, subsystem: &str) -> Result<u64> {
        let mut inner = self.inner.write();
        let entry = inner
            .get_mut(subsystem)
            .ok_or_else(|| RecoveryError::UnknownSubsystem(subsystem.to_string()))?;
        let cleared = std::mem::take(&mut entry.cache_entries);
        tracing::info!(subsystem, cleared, "Subsystem cache cleared");
        Ok(cleared)
    }

    /// Empty the subsystem's stateful store and mark it rebuilt. Returns the
    /// entries purged.
    ///
    /// # Errors
    ///
    /// Returns `RecoveryError::UnknownSubsystem` if the subsystem is not registered.
    pub fn purge_and_rebuild(&self, subsystem: &str) -> Result<u64> {
        let mut inner = self.inner.write();
        let entry = inner
            .get_mut(subsystem)
            .ok_or_else(|| RecoveryError::UnknownSubsystem(subsystem.to_string()))?;
        let purged = std::mem::take(&mut entry.state_entries);
        entry.cache_entries = 0;
        entry.rebuilds += 1;
        tracing::info!(subsystem, purged, rebuilds = entry.rebuilds, "Subsystem state rebuilt");
        Ok(purged)
    }
}
