//! Severity scales.
//!
//! Persisted events use [`EventSeverity`]; in-memory issues produced by the
//! detector use [`IssueSeverity`]. Both are ordered from least to most severe.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Severity of a persisted `SystemEvent`.
///
/// Retention treats `Error` and `Critical` events as permanent records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventSeverity {
    /// Informational.
    Info,
    /// Something noteworthy, not yet a failure.
    Warning,
    /// A failure that needs attention.
    Error,
    /// A failure that needs immediate attention.
    Critical,
}

impl EventSeverity {
    /// All severities in ascending order.
    pub const ALL: [Self; 4] = [Self::Info, Self::Warning, Self::Error, Self::Critical];

    /// The canonical storage label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
        }
    }

    /// Returns true for severities that survive retention cleanup.
    #[must_use]
    pub const fn is_retained(self) -> bool {
        matches!(self, Self::Error | Self::Critical)
    }
}

impl fmt::Display for EventSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventSeverity {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "INFO" => Ok(Self::Info),
            "WARNING" | "WARN" => Ok(Self::Warning),
            "ERROR" => Ok(Self::Error),
            "CRITICAL" => Ok(Self::Critical),
            _ => Err(CoreError::UnknownLabel {
                kind: "event severity",
                value: s.to_string(),
            }),
        }
    }
}

/// Severity of a detected issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    /// Cosmetic or informational.
    Low,
    /// Degraded but functional.
    Medium,
    /// Functionality at risk.
    High,
    /// Functionality lost.
    Critical,
}

impl IssueSeverity {
    /// The canonical label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// The event severity used when this issue is written to the event log.
    #[must_use]
    pub const fn event_severity(self) -> EventSeverity {
        match self {
            Self::Low => EventSeverity::Info,
            Self::Medium => EventSeverity::Warning,
            Self::High => EventSeverity::Error,
            Self::Critical => EventSeverity::Critical,
        }
    }
}

impl fmt::Display for IssueSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IssueSeverity {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            _ => Err(CoreError::UnknownLabel {
                kind: "issue severity",
                value: s.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_severity_labels() {
        for severity in EventSeverity::ALL {
            assert_eq!(severity.as_str().parse::<EventSeverity>().unwrap(), severity);
        }
        assert_eq!("warn".parse::<EventSeverity>().unwrap(), EventSeverity::Warning);
        assert!("fatal".parse::<EventSeverity>().is_err());
    }

    #[test]
    fn event_severity_retention() {
        assert!(!EventSeverity::Info.is_retained());
        assert!(!EventSeverity::Warning.is_retained());
        assert!(EventSeverity::Error.is_retained());
        assert!(EventSeverity::Critical.is_retained());
    }

    #[test]
    fn event_severity_serializes_uppercase() {
        let json = serde_json::to_string(&EventSeverity::Critical).unwrap();
        assert_eq!(json, "\"CRITICAL\"");
    }

    #[test]
    fn issue_severity_ordering() {
        assert!(IssueSeverity::Critical > IssueSeverity::High);
        assert!(IssueSeverity::High > IssueSeverity::Medium);
        assert!(IssueSeverity::Medium > IssueSeverity::Low);
    }

    #[test]
    fn issue_severity_maps_to_event_severity() {
        assert_eq!(IssueSeverity::Medium.event_severity(), EventSeverity::Warning);
        assert_eq!(IssueSeverity::Critical.event_severity(), EventSeverity::Critical);
    }
}
