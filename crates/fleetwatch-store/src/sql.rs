//! `SQLite` implementation of the Store trait.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use fleetwatch_core::{AgentId, EventSeverity, Payload};
use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde_json::Value;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{
    Sqlite, SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool,
    SqlitePoolOptions, SqliteRow,
};
use sqlx::Row;

use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::metrics::{StoreCounters, StoreMetrics};
use crate::schema::{self, SCHEMA_VERSION};
use crate::types::{
    Agent, AgentRegistration, AgentState, AgentStatus, CleanupReport, EventQuery, HealthStatus,
    Heartbeat, MetricQuery, NewEvent, PerformanceMetric, StoreHealth, SystemEvent,
};
use crate::Store;

const AGENT_COLUMNS: &str = "id, agent_type, name, state, metadata, created_at, updated_at";
const HEARTBEAT_COLUMNS: &str = "agent_id, timestamp, payload, health_score";
const METRIC_COLUMNS: &str = "agent_id, metric_name, value, unit, timestamp";
const EVENT_COLUMNS: &str = "id, event_type, event_data, agent_id, severity, timestamp";

/// Window used for "recent" heartbeat counts in agent status.
const STATUS_WINDOW_MINUTES: i64 = 5;

/// How a transaction acquires its locks.
///
/// `SQLite` is serializable in every mode; the modes differ in when the
/// write lock is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionMode {
    /// Locks are taken on first read/write.
    #[default]
    Deferred,
    /// The write lock is taken immediately.
    Immediate,
    /// Readers are excluded as well.
    Exclusive,
}

impl TransactionMode {
    const fn begin_statement(self) -> &'static str {
        match self {
            Self::Deferred => "BEGIN DEFERRED",
            Self::Immediate => "BEGIN IMMEDIATE",
            Self::Exclusive => "BEGIN EXCLUSIVE",
        }
    }
}

/// A connection with an open transaction. If dropped before commit or
/// rollback completed, the connection is closed instead of returned.
struct TransactionGuard {
    conn: PoolConnection<Sqlite>,
    finished: bool,
}

impl Drop for TransactionGuard {
    fn drop(&mut self) {
        if !self.finished {
            self.conn.close_on_drop();
        }
    }
}

/// `SQLite`-backed implementation of the `Store` trait.
pub struct SqlStore {
    pool: RwLock<SqlitePool>,
    config: StoreConfig,
    metrics: Arc<StoreMetrics>,
    status: RwLock<HealthStatus>,
}

impl SqlStore {
    /// Open the pool, create the schema and probe the database.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Init` if the database is unreachable or the schema
    /// cannot be created.
    pub async fn connect(config: StoreConfig) -> Result<Self> {
        Self::connect_with_metrics(config, Arc::new(StoreMetrics::new())).await
    }

    /// Like [`SqlStore::connect`], recording into an existing collector.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Init` if the database is unreachable or the schema
    /// cannot be created.
    pub async fn connect_with_metrics(
        config: StoreConfig,
        metrics: Arc<StoreMetrics>,
    ) -> Result<Self> {
        let pool = build_pool(&config, &metrics).await?;
        ensure_schema(&pool).await?;

        tracing::info!(
            url = %config.database_url,
            min_connections = config.min_connections,
            max_connections = config.max_connections,
            "Store initialized"
        );

        Ok(Self {
            pool: RwLock::new(pool),
            config,
            metrics,
            status: RwLock::new(HealthStatus::Unknown),
        })
    }

    /// The metrics collector this store records into.
    #[must_use]
    pub fn metrics(&self) -> &Arc<StoreMetrics> {
        &self.metrics
    }

    /// Status recorded by the most recent health check.
    #[must_use]
    pub fn last_status(&self) -> HealthStatus {
        *self.status.read()
    }

    fn pool(&self) -> SqlitePool {
        self.pool.read().clone()
    }

    fn track<T>(&self, result: std::result::Result<T, sqlx::Error>) -> Result<T> {
        self.metrics.query();
        result.map_err(|e| {
            self.metrics.error();
            StoreError::from(e)
        })
    }

    /// Acquire a pooled connection.
    ///
    /// The connection returns to the pool when dropped.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::PoolTimeout` if no connection frees up within the
    /// command timeout.
    pub async fn acquire(&self) -> Result<PoolConnection<Sqlite>> {
        self.pool().acquire().await.map_err(|e| {
            self.metrics.error();
            StoreError::from(e)
        })
    }

    /// Run `callback` inside a transaction.
    ///
    /// Commits when the callback succeeds and rolls back when it fails. If
    /// the returned future is dropped mid-transaction the connection is
    /// discarded rather than returned to the pool.
    ///
    /// # Errors
    ///
    /// Returns the callback's error, or the error of `BEGIN`/`COMMIT`.
    pub async fn with_transaction<F, R>(&self, mode: TransactionMode, callback: F) -> Result<R>
    where
        F: for<'c> FnOnce(&'c mut SqliteConnection) -> BoxFuture<'c, Result<R>> + Send,
        R: Send,
    {
        let conn = self.acquire().await?;
        let mut guard = TransactionGuard {
            conn,
            finished: false,
        };

        self.track(
            sqlx::query(mode.begin_statement())
                .execute(&mut *guard.conn)
                .await,
        )?;

        match callback(&mut guard.conn).await {
            Ok(value) => {
                let committed = self.track(sqlx::query("COMMIT").execute(&mut *guard.conn).await);
                match committed {
                    Ok(_) => {
                        self.metrics.commit();
                        guard.finished = true;
                        Ok(value)
                    }
                    Err(e) => {
                        self.rollback(&mut guard).await;
                        Err(e)
                    }
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "Transaction callback failed, rolling back");
                self.rollback(&mut guard).await;
                Err(e)
            }
        }
    }

    async fn rollback(&self, guard: &mut TransactionGuard) {
        self.metrics.query();
        match sqlx::query("ROLLBACK").execute(&mut *guard.conn).await {
            Ok(_) => {
                self.metrics.rollback();
                guard.finished = true;
            }
            Err(e) => {
                self.metrics.error();
                tracing::warn!(error = %e, "Rollback failed, discarding connection");
            }
        }
    }

    /// Close the pool. Subsequent operations fail with `StoreError::Closed`
    /// until [`Store::reconnect`] is called.
    pub async fn close(&self) {
        let pool = self.pool();
        self.metrics.connections_released(u64::from(pool.size()));
        pool.close().await;
        tracing::info!("Store closed");
    }
}

async fn build_pool(config: &StoreConfig, metrics: &Arc<StoreMetrics>) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&config.database_url)
        .map_err(|e| StoreError::Init(format!("invalid database url: {e}")))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(config.command_timeout());

    let counter = Arc::clone(metrics);
    SqlitePoolOptions::new()
        .min_connections(config.min_connections)
        .max_connections(config.max_connections.max(1))
        .acquire_timeout(config.command_timeout())
        .after_connect(move |_conn, _meta| {
            counter.connection_opened();
            Box::pin(async { Ok(()) })
        })
        .connect_with(options)
        .await
        .map_err(|e| StoreError::Init(e.to_string()))
}

async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
    for ddl in schema::TABLES.iter().chain(schema::INDEXES) {
        sqlx::query(ddl)
            .execute(pool)
            .await
            .map_err(|e| StoreError::Init(format!("schema creation failed: {e}")))?;
    }

    sqlx::query("INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (?, ?)")
        .bind(SCHEMA_VERSION)
        .bind(Utc::now().timestamp_millis())
        .execute(pool)
        .await
        .map_err(|e| StoreError::Init(format!("schema version record failed: {e}")))?;

    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .map_err(|e| StoreError::Init(format!("liveness probe failed: {e}")))?;

    Ok(())
}

fn cutoff(window: ChronoDuration) -> i64 {
    (Utc::now() - window).timestamp_millis()
}

fn minutes_window(minutes: u32) -> ChronoDuration {
    ChronoDuration::minutes(i64::from(minutes.max(1)))
}

fn hours_window(hours: u32) -> ChronoDuration {
    ChronoDuration::hours(i64::from(hours.max(1)))
}

fn timestamp_column(row: &SqliteRow, column: &str) -> Option<DateTime<Utc>> {
    let millis: i64 = row.try_get(column).ok()?;
    DateTime::from_timestamp_millis(millis)
}

fn payload_column(row: &SqliteRow, column: &str) -> Payload {
    match row.try_get::<Option<String>, _>(column) {
        Ok(Some(text)) => {
            Payload::from_json(&text).unwrap_or_else(|_| Payload::from_value(Value::String(text)))
        }
        _ => Payload::new(),
    }
}

fn optional_agent_column(row: &SqliteRow, column: &str) -> Option<Option<AgentId>> {
    match row.try_get::<Option<String>, _>(column).ok()? {
        Some(raw) => AgentId::new(raw).ok().map(Some),
        None => Some(None),
    }
}

fn agent_from_row(row: &SqliteRow) -> Option<Agent> {
    Some(Agent {
        agent_id: AgentId::new(row.try_get::<String, _>("id").ok()?).ok()?,
        agent_type: row.try_get("agent_type").ok()?,
        name: row.try_get("name").ok()?,
        state: row.try_get::<String, _>("state").ok()?.parse().ok()?,
        metadata: payload_column(row, "metadata"),
        created_at: timestamp_column(row, "created_at")?,
        updated_at: timestamp_column(row, "updated_at")?,
    })
}

fn heartbeat_from_row(row: &SqliteRow) -> Option<Heartbeat> {
    Some(Heartbeat {
        agent_id: AgentId::new(row.try_get::<String, _>("agent_id").ok()?).ok()?,
        timestamp: timestamp_column(row, "timestamp")?,
        payload: payload_column(row, "payload"),
        health_score: row.try_get("health_score").ok()?,
    })
}

fn metric_from_row(row: &SqliteRow) -> Option<PerformanceMetric> {
    Some(PerformanceMetric {
        agent_id: optional_agent_column(row, "agent_id")?,
        metric_name: row.try_get("metric_name").ok()?,
        value: row.try_get("value").ok()?,
        unit: row.try_get("unit").ok()?,
        timestamp: timestamp_column(row, "timestamp")?,
    })
}

fn event_from_row(row: &SqliteRow) -> Option<SystemEvent> {
    Some(SystemEvent {
        id: row.try_get("id").ok()?,
        event_type: row.try_get("event_type").ok()?,
        event_data: payload_column(row, "event_data"),
        agent_id: optional_agent_column(row, "agent_id")?,
        severity: row
            .try_get::<String, _>("severity")
            .ok()?
            .parse::<EventSeverity>()
            .ok()?,
        timestamp: timestamp_column(row, "timestamp")?,
    })
}

/// Decode rows, skipping (and logging) the malformed ones.
fn decode_rows<T>(rows: &[SqliteRow], table: &str, decode: fn(&SqliteRow) -> Option<T>) -> Vec<T> {
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        match decode(row) {
            Some(value) => out.push(value),
            None => tracing::warn!(table, "Skipping malformed row"),
        }
    }
    out
}

fn count_to_u32(count: i64) -> u32 {
    u32::try_from(count.max(0)).unwrap_or(u32::MAX)
}

#[async_trait]
impl Store for SqlStore {
    async fn register_agent(&self, registration: &AgentRegistration) -> Result<Agent> {
        let now = Utc::now().timestamp_millis();
        let metadata = registration.metadata.to_json()?;
        let sql = format!(
            "INSERT INTO agents ({AGENT_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
                 agent_type = excluded.agent_type, \
                 name = excluded.name, \
                 state = excluded.state, \
                 metadata = excluded.metadata, \
                 updated_at = excluded.updated_at \
             RETURNING {AGENT_COLUMNS}"
        );

        let row = self.track(
            sqlx::query(&sql)
                .bind(registration.agent_id.as_str())
                .bind(&registration.agent_type)
                .bind(&registration.name)
                .bind(registration.state.as_str())
                .bind(metadata)
                .bind(now)
                .bind(now)
                .fetch_one(&self.pool())
                .await,
        )?;

        let agent = agent_from_row(&row).ok_or_else(|| {
            StoreError::Serialization(format!(
                "registered agent {} could not be decoded",
                registration.agent_id
            ))
        })?;

        tracing::debug!(
            agent_id = %agent.agent_id,
            agent_type = %agent.agent_type,
            state = %agent.state,
            "Agent registered"
        );
        Ok(agent)
    }

    async fn update_agent_state(&self, agent_id: &AgentId, state: AgentState) -> Result<()> {
        let result = self.track(
            sqlx::query("UPDATE agents SET state = ?, updated_at = ? WHERE id = ?")
                .bind(state.as_str())
                .bind(Utc::now().timestamp_millis())
                .bind(agent_id.as_str())
                .execute(&self.pool())
                .await,
        )?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AgentNotFound(agent_id.clone()));
        }

        tracing::debug!(agent_id = %agent_id, state = %state, "Agent state updated");
        Ok(())
    }

    async fn get_agent(&self, agent_id: &AgentId) -> Result<Option<Agent>> {
        let sql = format!("SELECT {AGENT_COLUMNS} FROM agents WHERE id = ?");
        let row = self.track(
            sqlx::query(&sql)
                .bind(agent_id.as_str())
                .fetch_optional(&self.pool())
                .await,
        )?;

        Ok(row.as_ref().and_then(|row| {
            let agent = agent_from_row(row);
            if agent.is_none() {
                tracing::warn!(agent_id = %agent_id, "Skipping malformed agent row");
            }
            agent
        }))
    }

    async fn get_agent_status(&self, agent_id: &AgentId) -> Result<Option<AgentStatus>> {
        let Some(agent) = self.get_agent(agent_id).await? else {
            return Ok(None);
        };

        let pool = self.pool();
        let sql = format!(
            "SELECT {HEARTBEAT_COLUMNS} FROM agent_heartbeats \
             WHERE agent_id = ? ORDER BY timestamp DESC, id DESC LIMIT 1"
        );
        let latest = self.track(
            sqlx::query(&sql)
                .bind(agent_id.as_str())
                .fetch_optional(&pool)
                .await,
        )?;

        let recent: i64 = self.track(
            sqlx::query_scalar(
                "SELECT COUNT(*) FROM agent_heartbeats WHERE agent_id = ? AND timestamp >= ?",
            )
            .bind(agent_id.as_str())
            .bind(cutoff(ChronoDuration::minutes(STATUS_WINDOW_MINUTES)))
            .fetch_one(&pool)
            .await,
        )?;

        Ok(Some(AgentStatus {
            agent,
            last_heartbeat: latest.as_ref().and_then(heartbeat_from_row),
            recent_heartbeats: count_to_u32(recent),
        }))
    }

    async fn list_agents(&self, state: Option<AgentState>) -> Result<Vec<Agent>> {
        let label = state.map(AgentState::as_str);
        let sql = format!(
            "SELECT {AGENT_COLUMNS} FROM agents \
             WHERE (? IS NULL OR state = ?) ORDER BY created_at, id"
        );
        let rows = self.track(
            sqlx::query(&sql)
                .bind(label)
                .bind(label)
                .fetch_all(&self.pool())
                .await,
        )?;
        Ok(decode_rows(&rows, schema::table::AGENTS, agent_from_row))
    }

    async fn record_heartbeat(&self, heartbeat: &Heartbeat) -> Result<()> {
        let payload = heartbeat.payload.to_json()?;
        let result = self.track(
            sqlx::query(
                "INSERT INTO agent_heartbeats (agent_id, timestamp, payload, health_score) \
                 SELECT id, ?, ?, ? FROM agents WHERE id = ?",
            )
            .bind(heartbeat.timestamp.timestamp_millis())
            .bind(payload)
            .bind(heartbeat.health_score)
            .bind(heartbeat.agent_id.as_str())
            .execute(&self.pool())
            .await,
        )?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AgentNotFound(heartbeat.agent_id.clone()));
        }
        Ok(())
    }

    async fn get_recent_heartbeats(
        &self,
        agent_id: Option<&AgentId>,
        window_minutes: u32,
    ) -> Result<Vec<Heartbeat>> {
        let id = agent_id.map(AgentId::as_str);
        let sql = format!(
            "SELECT {HEARTBEAT_COLUMNS} FROM agent_heartbeats \
             WHERE timestamp >= ? AND (? IS NULL OR agent_id = ?) \
             ORDER BY timestamp DESC, id DESC"
        );
        let rows = self.track(
            sqlx::query(&sql)
                .bind(cutoff(minutes_window(window_minutes)))
                .bind(id)
                .bind(id)
                .fetch_all(&self.pool())
                .await,
        )?;
        Ok(decode_rows(&rows, schema::table::HEARTBEATS, heartbeat_from_row))
    }

    async fn record_metric(&self, metric: &PerformanceMetric) -> Result<i64> {
        let requested = metric.agent_id.as_ref().map(AgentId::as_str);
        let row = self.track(
            sqlx::query(
                "INSERT INTO performance_metrics (agent_id, metric_name, value, unit, timestamp) \
                 VALUES ((SELECT id FROM agents WHERE id = ?), ?, ?, ?, ?) \
                 RETURNING id, agent_id",
            )
            .bind(requested)
            .bind(&metric.metric_name)
            .bind(metric.value)
            .bind(&metric.unit)
            .bind(metric.timestamp.timestamp_millis())
            .fetch_one(&self.pool())
            .await,
        )?;

        let stored: Option<String> = row.try_get("agent_id").map_err(StoreError::from)?;
        if requested.is_some() && stored.is_none() {
            tracing::debug!(
                agent_id = requested.unwrap_or_default(),
                metric = %metric.metric_name,
                "Unknown agent, metric stored as system-level"
            );
        }
        row.try_get("id").map_err(StoreError::from)
    }

    async fn get_metrics(&self, query: &MetricQuery) -> Result<Vec<PerformanceMetric>> {
        let id = query.agent_id.as_ref().map(AgentId::as_str);
        let name = query.metric_name.as_deref();
        let sql = format!(
            "SELECT {METRIC_COLUMNS} FROM performance_metrics \
             WHERE timestamp >= ? \
               AND (? IS NULL OR agent_id = ?) \
               AND (? IS NULL OR metric_name = ?) \
             ORDER BY timestamp ASC, id ASC"
        );
        let rows = self.track(
            sqlx::query(&sql)
                .bind(cutoff(hours_window(query.window_hours)))
                .bind(id)
                .bind(id)
                .bind(name)
                .bind(name)
                .fetch_all(&self.pool())
                .await,
        )?;
        Ok(decode_rows(&rows, schema::table::METRICS, metric_from_row))
    }

    async fn record_event(&self, event: &NewEvent) -> Result<i64> {
        let requested = event.agent_id.as_ref().map(AgentId::as_str);
        let data = event.event_data.to_json()?;
        let row = self.track(
            sqlx::query(
                "INSERT INTO system_events (event_type, event_data, agent_id, severity, timestamp) \
                 VALUES (?, ?, (SELECT id FROM agents WHERE id = ?), ?, ?) \
                 RETURNING id, agent_id",
            )
            .bind(&event.event_type)
            .bind(data)
            .bind(requested)
            .bind(event.severity.as_str())
            .bind(event.timestamp.timestamp_millis())
            .fetch_one(&self.pool())
            .await,
        )?;

        let stored: Option<String> = row.try_get("agent_id").map_err(StoreError::from)?;
        if requested.is_some() && stored.is_none() {
            tracing::debug!(
                agent_id = requested.unwrap_or_default(),
                event_type = %event.event_type,
                "Unknown agent, event stored without agent"
            );
        }
        row.try_get("id").map_err(StoreError::from)
    }

    async fn get_events(&self, query: &EventQuery) -> Result<Vec<SystemEvent>> {
        let event_type = query.event_type.as_deref();
        let id = query.agent_id.as_ref().map(AgentId::as_str);
        let severity = query.severity.map(EventSeverity::as_str);
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM system_events \
             WHERE timestamp >= ? \
               AND (? IS NULL OR event_type = ?) \
               AND (? IS NULL OR agent_id = ?) \
               AND (? IS NULL OR severity = ?) \
             ORDER BY timestamp DESC, id DESC"
        );
        let rows = self.track(
            sqlx::query(&sql)
                .bind(cutoff(hours_window(query.window_hours)))
                .bind(event_type)
                .bind(event_type)
                .bind(id)
                .bind(id)
                .bind(severity)
                .bind(severity)
                .fetch_all(&self.pool())
                .await,
        )?;
        Ok(decode_rows(&rows, schema::table::EVENTS, event_from_row))
    }

    async fn health_check(&self) -> Result<StoreHealth> {
        let pool = self.pool();
        let started = Instant::now();

        self.metrics.query();
        let probe = match sqlx::query("SELECT 1").execute(&pool).await {
            Ok(_) => {
                self.metrics.query();
                sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM agents")
                    .fetch_one(&pool)
                    .await
            }
            Err(e) => Err(e),
        };
        let response_time = started.elapsed();

        let (status, agent_count, error) = match probe {
            Ok(count) => (HealthStatus::Healthy, Some(count), None),
            Err(e) => {
                self.metrics.error();
                tracing::warn!(error = %e, "Store health check failed");
                (HealthStatus::Unhealthy, None, Some(e.to_string()))
            }
        };
        *self.status.write() = status;

        Ok(StoreHealth {
            status,
            response_time,
            pool_size: pool.size(),
            idle_connections: pool.num_idle(),
            max_connections: self.config.max_connections,
            agent_count,
            counters: self.metrics.snapshot(),
            error,
            checked_at: Utc::now(),
        })
    }

    async fn cleanup_old_data(&self, retention_days: u32) -> Result<CleanupReport> {
        let threshold = cutoff(ChronoDuration::days(i64::from(retention_days)));
        let metrics = Arc::clone(&self.metrics);

        let (heartbeats_deleted, metrics_deleted, events_deleted) = self
            .with_transaction(TransactionMode::Immediate, move |conn| {
                Box::pin(async move {
                    metrics.query();
                    let heartbeats = sqlx::query("DELETE FROM agent_heartbeats WHERE timestamp < ?")
                        .bind(threshold)
                        .execute(&mut *conn)
                        .await?
                        .rows_affected();

                    metrics.query();
                    let samples = sqlx::query("DELETE FROM performance_metrics WHERE timestamp < ?")
                        .bind(threshold)
                        .execute(&mut *conn)
                        .await?
                        .rows_affected();

                    metrics.query();
                    let events = sqlx::query(
                        "DELETE FROM system_events \
                         WHERE timestamp < ? AND severity NOT IN ('ERROR', 'CRITICAL')",
                    )
                    .bind(threshold)
                    .execute(&mut *conn)
                    .await?
                    .rows_affected();

                    Ok((heartbeats, samples, events))
                })
            })
            .await?;

        let counters = self.metrics.reset();
        let report = CleanupReport {
            heartbeats_deleted,
            metrics_deleted,
            events_deleted,
            counters,
        };

        tracing::info!(
            retention_days,
            heartbeats = report.heartbeats_deleted,
            metrics = report.metrics_deleted,
            events = report.events_deleted,
            "Old data cleaned up"
        );
        Ok(report)
    }

    async fn reconnect(&self) -> Result<()> {
        tracing::warn!(url = %self.config.database_url, "Recreating connection pool");

        let fresh = build_pool(&self.config, &self.metrics).await?;
        ensure_schema(&fresh).await?;

        let old = std::mem::replace(&mut *self.pool.write(), fresh);
        self.metrics.connections_released(u64::from(old.size()));
        old.close().await;

        tracing::info!("Connection pool recreated");
        Ok(())
    }

    fn counters(&self) -> StoreCounters {
        self.metrics.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetwatch_core::Payload;
    use tempfile::TempDir;

    async fn create_test_store() -> (SqlStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let url = format!("sqlite://{}", dir.path().join("test.db").display());
        let store = SqlStore::connect(StoreConfig::with_url(url)).await.unwrap();
        (store, dir)
    }

    async fn create_single_connection_store(timeout_ms: u64) -> (SqlStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig {
            min_connections: 1,
            max_connections: 1,
            command_timeout_ms: timeout_ms,
            ..StoreConfig::with_url(format!("sqlite://{}", dir.path().join("test.db").display()))
        };
        let store = SqlStore::connect(config).await.unwrap();
        (store, dir)
    }

    fn agent_id(raw: &str) -> AgentId {
        AgentId::new(raw).unwrap()
    }

    async fn register(store: &SqlStore, raw: &str, state: AgentState) -> Agent {
        store
            .register_agent(
                &AgentRegistration::new(agent_id(raw), "test_agent", format!("Agent {raw}"))
                    .with_state(state),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn connect_creates_all_tables() {
        let (store, _dir) = create_test_store().await;
        let pool = store.pool();

        for table in schema::all_tables() {
            let count: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
            )
            .bind(table)
            .fetch_one(&pool)
            .await
            .unwrap();
            assert_eq!(count, 1, "missing table {table}");
        }

        let version: i64 = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn register_agent_is_idempotent() {
        let (store, _dir) = create_test_store().await;

        let first = register(&store, "A1", AgentState::Initializing).await;
        let second = store
            .register_agent(
                &AgentRegistration::new(agent_id("A1"), "test_agent", "Renamed")
                    .with_state(AgentState::Active)
                    .with_metadata(Payload::new().with("version", "2")),
            )
            .await
            .unwrap();

        assert_eq!(second.name, "Renamed");
        assert_eq!(second.state, AgentState::Active);
        assert_eq!(second.created_at, first.created_at);
        assert_eq!(second.metadata.get_str("version"), Some("2"));
        assert_eq!(store.list_agents(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn update_state_of_unknown_agent_fails() {
        let (store, _dir) = create_test_store().await;
        let result = store
            .update_agent_state(&agent_id("ghost"), AgentState::Active)
            .await;
        assert!(matches!(result, Err(StoreError::AgentNotFound(_))));
    }

    #[tokio::test]
    async fn list_agents_filters_by_state() {
        let (store, _dir) = create_test_store().await;
        register(&store, "A1", AgentState::Active).await;
        register(&store, "A2", AgentState::Inactive).await;
        store
            .update_agent_state(&agent_id("A2"), AgentState::Active)
            .await
            .unwrap();
        register(&store, "A3", AgentState::Error).await;

        let active = store.list_agents(Some(AgentState::Active)).await.unwrap();
        assert_eq!(active.len(), 2);
        assert_eq!(store.get_registered_agents().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn heartbeat_for_unknown_agent_fails() {
        let (store, _dir) = create_test_store().await;
        let result = store.record_heartbeat(&Heartbeat::now(agent_id("ghost"))).await;
        assert!(matches!(result, Err(StoreError::AgentNotFound(_))));
    }

    #[tokio::test]
    async fn recent_heartbeats_are_windowed_and_newest_first() {
        let (store, _dir) = create_test_store().await;
        register(&store, "A1", AgentState::Active).await;
        let id = agent_id("A1");
        let now = Utc::now();

        for minutes_ago in [20, 3, 1] {
            store
                .record_heartbeat(
                    &Heartbeat::now(id.clone())
                        .at(now - ChronoDuration::minutes(minutes_ago))
                        .with_health_score(90.0),
                )
                .await
                .unwrap();
        }

        let recent = store.get_recent_heartbeats(Some(&id), 10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert!(recent[0].timestamp > recent[1].timestamp);
        assert_eq!(recent[0].health_score, Some(90.0));

        let status = store.get_agent_status(&id).await.unwrap().unwrap();
        assert_eq!(status.recent_heartbeats, 2);
        assert!(status.last_heartbeat.is_some());
    }

    #[tokio::test]
    async fn malformed_heartbeat_rows_are_skipped() {
        let (store, _dir) = create_test_store().await;
        register(&store, "A1", AgentState::Active).await;
        let id = agent_id("A1");
        store.record_heartbeat(&Heartbeat::now(id.clone())).await.unwrap();

        sqlx::query(
            "INSERT INTO agent_heartbeats (agent_id, timestamp, payload) VALUES (?, 'yesterday', '{}')",
        )
        .bind("A1")
        .execute(&store.pool())
        .await
        .unwrap();

        let recent = store.get_recent_heartbeats(Some(&id), 5).await.unwrap();
        assert_eq!(recent.len(), 1);
    }

    #[tokio::test]
    async fn metrics_for_unknown_agents_degrade_to_system_level() {
        let (store, _dir) = create_test_store().await;
        register(&store, "A1", AgentState::Active).await;

        store
            .record_metric(&PerformanceMetric::new("queue_depth", 4.0, "items"))
            .await
            .unwrap();
        store
            .record_metric(&PerformanceMetric::new("queue_depth", 5.0, "items").for_agent(agent_id("ghost")))
            .await
            .unwrap();
        store
            .record_metric(&PerformanceMetric::new("queue_depth", 6.0, "items").for_agent(agent_id("A1")))
            .await
            .unwrap();

        let all = store
            .get_performance_metrics(None, Some("queue_depth"), 1)
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all.iter().filter(|m| m.agent_id.is_none()).count(), 2);

        let owned = store
            .get_metrics(&MetricQuery::within_hours(1).agent(agent_id("A1")))
            .await
            .unwrap();
        assert_eq!(owned.len(), 1);
        assert!((owned[0].value - 6.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn events_filter_and_degrade() {
        let (store, _dir) = create_test_store().await;
        register(&store, "A1", AgentState::Active).await;

        store
            .record_event(&NewEvent::new("health_alert", EventSeverity::Warning).for_agent(agent_id("A1")))
            .await
            .unwrap();
        store
            .log_system_event(
                NewEvent::new("llm_fallback", EventSeverity::Info)
                    .for_agent(agent_id("ghost"))
                    .with_data(Payload::new().with("component", "llm_service")),
            )
            .await
            .unwrap();

        let alerts = store
            .get_events(&EventQuery::within_hours(1).of_type("health_alert"))
            .await
            .unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].agent_id, Some(agent_id("A1")));

        let fallbacks = store
            .get_system_events(Some("llm_fallback"), Some(EventSeverity::Info), 1)
            .await
            .unwrap();
        assert_eq!(fallbacks.len(), 1);
        assert!(fallbacks[0].agent_id.is_none());
        assert_eq!(fallbacks[0].event_data.get_str("component"), Some("llm_service"));
    }

    #[tokio::test]
    async fn cleanup_keeps_error_and_critical_events() {
        let (store, _dir) = create_test_store().await;
        register(&store, "A1", AgentState::Active).await;
        let old = Utc::now() - ChronoDuration::days(30);

        for severity in EventSeverity::ALL {
            store
                .record_event(&NewEvent::new("old_event", severity).at(old))
                .await
                .unwrap();
        }
        store
            .record_event(&NewEvent::new("fresh_event", EventSeverity::Info))
            .await
            .unwrap();
        store
            .record_heartbeat(&Heartbeat::now(agent_id("A1")).at(old))
            .await
            .unwrap();
        store
            .record_metric(&PerformanceMetric::new("cpu_usage", 10.0, "percent").at(old))
            .await
            .unwrap();

        let report = store.cleanup_old_data(7).await.unwrap();
        assert_eq!(report.heartbeats_deleted, 1);
        assert_eq!(report.metrics_deleted, 1);
        assert_eq!(report.events_deleted, 2);
        assert!(report.counters.queries_executed > 0);
        assert_eq!(report.counters.transactions_committed, 1);

        let remaining = store.get_events(&EventQuery::within_hours(24 * 60)).await.unwrap();
        assert_eq!(remaining.len(), 3);
        assert!(remaining
            .iter()
            .filter(|e| e.event_type == "old_event")
            .all(|e| e.severity.is_retained()));

        assert_eq!(store.counters().transactions_committed, 0);
    }

    #[tokio::test]
    async fn failed_transaction_rolls_back() {
        let (store, _dir) = create_test_store().await;

        let result: Result<()> = store
            .with_transaction(TransactionMode::Deferred, |conn| {
                Box::pin(async move {
                    sqlx::query(
                        "INSERT INTO agents (id, agent_type, name, created_at, updated_at) \
                         VALUES ('tx', 'test', 'tx', 0, 0)",
                    )
                    .execute(&mut *conn)
                    .await?;
                    Err(StoreError::Database("forced".into()))
                })
            })
            .await;

        assert!(result.is_err());
        assert!(store.get_agent(&agent_id("tx")).await.unwrap().is_none());
        assert_eq!(store.counters().transactions_rolled_back, 1);
    }

    #[tokio::test]
    async fn exhausted_pool_times_out() {
        let (store, _dir) = create_single_connection_store(100).await;
        let held = store.acquire().await.unwrap();

        let started = Instant::now();
        let result = store.get_agent(&agent_id("A1")).await;
        assert!(matches!(result, Err(StoreError::PoolTimeout)));
        assert!(started.elapsed() >= std::time::Duration::from_millis(100));
        assert!(matches!(store.acquire().await, Err(StoreError::PoolTimeout)));
        assert!(store.counters().errors >= 2);

        drop(held);
        assert!(store.get_agent(&agent_id("A1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cancelled_transaction_is_discarded() {
        let (store, _dir) = create_single_connection_store(2_000).await;

        let cancelled = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            store.with_transaction(TransactionMode::Immediate, |conn| {
                Box::pin(async move {
                    sqlx::query(
                        "INSERT INTO agents (id, agent_type, name, created_at, updated_at) \
                         VALUES ('tx', 'test', 'tx', 0, 0)",
                    )
                    .execute(&mut *conn)
                    .await?;
                    std::future::pending::<()>().await;
                    Ok(())
                })
            }),
        )
        .await;
        assert!(cancelled.is_err());

        // The only connection was closed, not returned mid-transaction.
        assert!(store.get_agent(&agent_id("tx")).await.unwrap().is_none());
        assert_eq!(store.counters().transactions_committed, 0);
        register(&store, "after", AgentState::Active).await;
        assert!(store.get_agent(&agent_id("after")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn zero_windows_cover_the_last_unit() {
        let (store, _dir) = create_test_store().await;
        register(&store, "A1", AgentState::Active).await;
        store.record_heartbeat(&Heartbeat::now(agent_id("A1"))).await.unwrap();
        store
            .record_metric(&PerformanceMetric::new("cpu_usage", 10.0, "percent"))
            .await
            .unwrap();

        assert_eq!(store.get_recent_heartbeats(None, 0).await.unwrap().len(), 1);
        assert_eq!(
            store.get_metrics(&MetricQuery::within_hours(0)).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn health_check_tracks_close_and_reconnect() {
        let (store, _dir) = create_test_store().await;
        register(&store, "A1", AgentState::Active).await;

        let health = store.health_check().await.unwrap();
        assert!(health.is_healthy());
        assert_eq!(health.agent_count, Some(1));
        assert_eq!(store.last_status(), HealthStatus::Healthy);

        store.close().await;
        let health = store.health_check().await.unwrap();
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert!(health.error.is_some());
        assert!(matches!(
            store.get_agent(&agent_id("A1")).await,
            Err(StoreError::Closed)
        ));

        store.reconnect().await.unwrap();
        assert!(store.health_check().await.unwrap().is_healthy());
        assert!(store.get_agent(&agent_id("A1")).await.unwrap().is_some());
    }
}
