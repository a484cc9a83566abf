//! Database schema definitions.
//!
//! Five tables: the four entity tables plus `schema_version`. Index
//! definitions cover the windowed queries (`agent_id`, `timestamp` and the
//! composite of both) and the event filters (`event_type`, `severity`).

/// Revision recorded in `schema_version` after a successful initialization.
pub const SCHEMA_VERSION: i64 = 1;

/// Table names.
pub mod table {
    /// Registered agents, keyed by `id`.
    pub const AGENTS: &str = "agents";

    /// Append-only heartbeat log.
    pub const HEARTBEATS: &str = "agent_heartbeats";

    /// Agent and system-level metric samples.
    pub const METRICS: &str = "performance_metrics";

    /// Notable occurrences, including alerts and recovery audit records.
    pub const EVENTS: &str = "system_events";

    /// Applied schema revisions.
    pub const SCHEMA_VERSION: &str = "schema_version";
}

/// Returns all table names for verification after initialization.
#[must_use]
pub fn all_tables() -> Vec<&'static str> {
    vec![
        table::AGENTS,
        table::HEARTBEATS,
        table::METRICS,
        table::EVENTS,
        table::SCHEMA_VERSION,
    ]
}

/// Table definitions, in dependency order.
pub const TABLES: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS agents (
        id TEXT PRIMARY KEY,
        agent_type TEXT NOT NULL,
        name TEXT NOT NULL,
        state TEXT NOT NULL DEFAULT 'initializing',
        metadata TEXT NOT NULL DEFAULT '{}',
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS agent_heartbeats (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        agent_id TEXT NOT NULL REFERENCES agents(id) ON DELETE CASCADE,
        timestamp INTEGER NOT NULL,
        payload TEXT NOT NULL DEFAULT '{}',
        health_score REAL
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS performance_metrics (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        agent_id TEXT REFERENCES agents(id) ON DELETE CASCADE,
        metric_name TEXT NOT NULL,
        value REAL NOT NULL,
        unit TEXT NOT NULL DEFAULT '',
        timestamp INTEGER NOT NULL
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS system_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        event_type TEXT NOT NULL,
        event_data TEXT NOT NULL DEFAULT '{}',
        agent_id TEXT REFERENCES agents(id) ON DELETE CASCADE,
        severity TEXT NOT NULL DEFAULT 'INFO',
        timestamp INTEGER NOT NULL
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER PRIMARY KEY,
        applied_at INTEGER NOT NULL
    )
    ",
];

/// Index definitions.
pub const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_agents_state ON agents(state)",
    "CREATE INDEX IF NOT EXISTS idx_heartbeats_agent ON agent_heartbeats(agent_id)",
    "CREATE INDEX IF NOT EXISTS idx_heartbeats_timestamp ON agent_heartbeats(timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_heartbeats_agent_timestamp ON agent_heartbeats(agent_id, timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_metrics_agent ON performance_metrics(agent_id)",
    "CREATE INDEX IF NOT EXISTS idx_metrics_timestamp ON performance_metrics(timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_metrics_agent_timestamp ON performance_metrics(agent_id, timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_metrics_name ON performance_metrics(metric_name)",
    "CREATE INDEX IF NOT EXISTS idx_events_type ON system_events(event_type)",
    "CREATE INDEX IF NOT EXISTS idx_events_severity ON system_events(severity)",
    "CREATE INDEX IF NOT EXISTS idx_events_timestamp ON system_events(timestamp)",
];
