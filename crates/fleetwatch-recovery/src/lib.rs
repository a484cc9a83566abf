//! Issue detection and automated recovery for fleetwatch.
//!
//! This crate turns store data into typed [`SystemIssue`]s and drives each
//! issue through a recovery plan:
//!
//! ```text
//! IssueDetector::detect ─▶ RecoveryEngine::plan ─▶ RecoveryEngine::recover
//!                                                      │
//!                                          ActionExecutor::execute (in order,
//!                                          first success wins, rollback on failure)
//! ```
//!
//! # Modules
//!
//! - [`detector`] and [`rules`]: threshold rules over heartbeats, metrics,
//!   events and the store health check, plus pluggable event-rate rules.
//! - [`policy`]: the plan table and business-value heuristics.
//! - [`engine`] and [`phase`]: per-issue recovery state machine.
//! - [`executor`], [`controller`], [`subsystems`]: concrete action handlers
//!   and the collaborators they act on.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod action;
pub mod config;
pub mod controller;
pub mod detector;
pub mod engine;
pub mod error;
pub mod executor;
pub mod issue;
pub mod phase;
pub mod policy;
pub mod rules;
pub mod subsystems;

pub use action::{ActionType, RecoveryAction, RecoveryResult};
pub use config::{DetectorConfig, RecoveryConfig};
pub use controller::{AgentController, HttpAgentController, NoopAgentController};
pub use detector::{Detection, IssueDetector, RuleFailure};
pub use engine::{RecoveryCycle, RecoveryEngine, RecoveryReport};
pub use error::{RecoveryError, Result};
pub use executor::{ActionExecutor, FleetActionExecutor};
pub use issue::{IssueType, SystemIssue};
pub use phase::RecoveryPhase;
pub use policy::{PlannedAction, RecoveryPolicy};
pub use rules::{EventRateRule, RuleRegistry};
pub use subsystems::{SubsystemRegistry, SubsystemSpec};
