//! Core types and utilities for fleetwatch.
//!
//! This crate provides the foundational types shared by every fleetwatch crate:
//!
//! - Strongly-typed identifiers ([`AgentId`], [`IssueId`], [`ActionId`])
//! - Severity scales for persisted events and detected issues
//! - [`Payload`], the schemaless key/value map carried by heartbeats and events
//! - Common error types

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod ids;
pub mod payload;
pub mod severity;

pub use error::{CoreError, Result};
pub use ids::{ActionId, AgentId, IdError, IssueId};
pub use payload::Payload;
pub use severity::{EventSeverity, IssueSeverity};
