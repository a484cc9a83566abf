//! Orchestrating agents for fleetwatch.
//!
//! Each agent is a timer-driven loop that glues the store, the analysis
//! engines and the recovery engine into periodic work cycles:
//!
//! - [`HeartbeatAgent`] scores every registered agent and raises health alerts.
//! - [`PerformanceAgent`] records store diagnostics and reports metric anomalies.
//! - [`SelfHealingAgent`] runs issue detection and recovery.
//! - [`MaintenanceAgent`] prunes history past the retention window.
//!
//! [`AgentRunner`] supplies what every agent shares: self-registration, a
//! heartbeat per tick, a watchdog around the cycle and per-cycle metrics.
//! The [`api`] module serves a read-only view of the store over HTTP.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod agent;
pub mod api;
pub mod config;
pub mod control;
pub mod error;
pub mod heartbeat;
pub mod maintenance;
pub mod performance;
pub mod runner;
pub mod self_healing;

pub use agent::{CycleOutput, CycleResult, MonitorAgent};
pub use api::{create_router, ApiState};
pub use config::FleetConfig;
pub use control::ControlChannel;
pub use error::{AgentError, Result};
pub use heartbeat::HeartbeatAgent;
pub use maintenance::MaintenanceAgent;
pub use performance::PerformanceAgent;
pub use runner::AgentRunner;
pub use self_healing::SelfHealingAgent;
