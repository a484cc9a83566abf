//! Pluggable event-rate detector rules.
//!
//! An [`EventRateRule`] fires when a component emits at least
//! `threshold_per_hour` events of one type within the last hour. New
//! subsystems register a rule instead of adding a detector.

use fleetwatch_core::{IssueSeverity, Payload};
use fleetwatch_store::SystemEvent;
use serde::{Deserialize, Serialize};

/// Event-data key naming the emitting component.
pub const COMPONENT_KEY: &str = "component";

/// Threshold on the hourly count of one event type from one component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRateRule {
    /// Rule name, used in logs and rule error reports.
    pub name: String,
    /// Event type to count.
    pub event_type: String,
    /// Component emitting the events, matched against `event_data.component`.
    pub component: String,
    /// Events per hour that trigger the rule.
    pub threshold_per_hour: u32,
    /// Severity of the raised issue.
    pub severity: IssueSeverity,
}

impl EventRateRule {
    /// Returns true if the event counts toward this rule.
    #[must_use]
    pub fn matches(&self, event: &SystemEvent) -> bool {
        event.event_type == self.event_type && emitted_by(&event.event_data, &self.component)
    }

    /// Number of matching events.
    #[must_use]
    pub fn count(&self, events: &[SystemEvent]) -> u32 {
        let n = events.iter().filter(|e| self.matches(e)).count();
        u32::try_from(n).unwrap_or(u32::MAX)
    }

    /// Returns true if the count reaches the threshold.
    #[must_use]
    pub fn is_triggered(&self, count: u32) -> bool {
        count >= self.threshold_per_hour
    }
}

fn emitted_by(data: &Payload, component: &str) -> bool {
    data.get_str(COMPONENT_KEY) == Some(component)
}

/// The set of event-rate rules evaluated each detection cycle.
#[derive(Debug, Clone, Default)]
pub struct RuleRegistry {
    rules: Vec<EventRateRule>,
}

impl RuleRegistry {
    /// A registry with no rules.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// A registry holding the built-in fallback-storm rule.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(EventRateRule {
            name: "llm_fallback_storm".to_string(),
            event_type: "llm_fallback".to_string(),
            component: "llm_service".to_string(),
            threshold_per_hour: 5,
            severity: IssueSeverity::High,
        });
        registry
    }

    /// Add a rule. A rule with the same name is replaced.
    pub fn register(&mut self, rule: EventRateRule) {
        if let Some(existing) = self.rules.iter_mut().find(|r| r.name == rule.name) {
            *existing = rule;
        } else {
            self.rules.push(rule);
        }
    }

    /// Registered rules, in registration order.
    #[must_use]
    pub fn rules(&self) -> &[EventRateRule] {
        &self.rules
    }

    /// Number of registered rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns true if no rule is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fleetwatch_core::EventSeverity;

    fn event(event_type: &str, component: &str) -> SystemEvent {
        SystemEvent {
            id: 0,
            event_type: event_type.into(),
            event_data: Payload::new().with(COMPONENT_KEY, component),
            agent_id: None,
            severity: EventSeverity::Info,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn default_registry_has_fallback_rule() {
        let registry = RuleRegistry::with_defaults();
        assert_eq!(registry.len(), 1);
        let rule = &registry.rules()[0];
        assert_eq!(rule.event_type, "llm_fallback");
        assert_eq!(rule.threshold_per_hour, 5);
        assert_eq!(rule.severity, IssueSeverity::High);
    }

    #[test]
    fn counts_only_matching_component_and_type() {
        let registry = RuleRegistry::with_defaults();
        let rule = &registry.rules()[0];
        let events = vec![
            event("llm_fallback", "llm_service"),
            event("llm_fallback", "llm_service"),
            event("llm_fallback", "search_service"),
            event("llm_timeout", "llm_service"),
        ];
        assert_eq!(rule.count(&events), 2);
        assert!(!rule.is_triggered(2));
        assert!(rule.is_triggered(5));
    }

    #[test]
    fn register_replaces_by_name() {
        let mut registry = RuleRegistry::with_defaults();
        let mut rule = registry.rules()[0].clone();
        rule.threshold_per_hour = 20;
        registry.register(rule);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.rules()[0].threshold_per_hour, 20);

        registry.register(EventRateRule {
            name: "cache_miss_storm".into(),
            event_type: "cache_miss".into(),
            component: "cache".into(),
            threshold_per_hour: 100,
            severity: IssueSeverity::Medium,
        });
        assert_eq!(registry.len(), 2);
    }
}
