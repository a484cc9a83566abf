//! Fleetwatch - fleet monitoring and self-healing service
//!
//! Runs the heartbeat, performance, self-healing and maintenance agents
//! against one pooled store and serves the read-only status API.
//!
//! # Configuration
//!
//! All settings come from environment variables; see
//! [`FleetConfig::from_env`]. Set `AGENT_CONTROL_URL` to deliver restart,
//! cache-clear and heartbeat-reset signals; without it those signals are
//! only logged.

use std::sync::Arc;

use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fleetwatch_agents::{
    create_router, AgentRunner, ApiState, ControlChannel, FleetConfig, HeartbeatAgent,
    MaintenanceAgent, MonitorAgent, PerformanceAgent, SelfHealingAgent,
};
use fleetwatch_core::AgentId;
use fleetwatch_recovery::{FleetActionExecutor, IssueDetector, RecoveryEngine, RuleRegistry};
use fleetwatch_store::SqlStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,fleetwatch=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting fleetwatch");

    let config = FleetConfig::from_env();
    config.validate()?;

    tracing::info!(
        database_url = %config.store.database_url,
        max_connections = config.store.max_connections,
        listen_addr = %config.listen_addr,
        heartbeat_interval = ?config.heartbeat_interval,
        controller_url = ?config.controller_url,
        policy_path = ?config.policy_path,
        retention_days = config.retention_days,
        "Fleet configuration loaded"
    );

    // A store that cannot be opened is fatal.
    let store = Arc::new(SqlStore::connect(config.store.clone()).await?);
    tracing::info!("Store initialized");

    let policy = config.load_policy()?;
    let controller = Arc::new(ControlChannel::from_url(config.controller_url.as_deref())?);
    let rules = RuleRegistry::with_defaults();
    let subsystems = Arc::new(config.load_subsystems(&rules)?);

    let executor = Arc::new(FleetActionExecutor::new(
        Arc::clone(&store),
        controller,
        subsystems,
        config.recovery.clone(),
    ));
    let detector = IssueDetector::new(Arc::clone(&store), config.detector.clone(), rules);
    let engine = RecoveryEngine::new(
        Arc::clone(&store),
        executor,
        policy,
        config.recovery.clone(),
    );

    let agents: Vec<Arc<dyn MonitorAgent>> = vec![
        Arc::new(HeartbeatAgent::new(
            AgentId::new("heartbeat_monitor")?,
            Arc::clone(&store),
            config.health_check_interval,
            config.critical_threshold,
            config.emergency_threshold,
        )),
        Arc::new(PerformanceAgent::new(
            AgentId::new("performance_monitor")?,
            Arc::clone(&store),
            config.performance_interval,
        )),
        Arc::new(SelfHealingAgent::new(
            AgentId::new("self_healing")?,
            Arc::clone(&store),
            config.self_healing_interval,
            detector,
            engine,
        )),
        Arc::new(MaintenanceAgent::new(
            AgentId::new("maintenance")?,
            Arc::clone(&store),
            config.maintenance_interval,
            config.retention_days,
        )),
    ];

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut handles = Vec::with_capacity(agents.len());
    for agent in agents {
        let runner = AgentRunner::new(Arc::clone(&store), agent, config.cycle_timeout)
            .with_heartbeat_interval(config.heartbeat_interval);
        handles.push(tokio::spawn(runner.run(shutdown_rx.clone())));
    }
    tracing::info!(agents = handles.len(), "Agent loops started");

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutdown requested"),
            Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl-C"),
        }
        if let Err(e) = shutdown_tx.send(true) {
            tracing::debug!(error = %e, "No agent loop left to stop");
        }
    });

    // Start HTTP server
    let app = create_router(ApiState::new(Arc::clone(&store)));
    tracing::info!(listen_addr = %config.listen_addr, "Starting status API");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    let mut server_shutdown = shutdown_rx.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if server_shutdown.wait_for(|stop| *stop).await.is_err() {
                tracing::debug!("Shutdown channel closed");
            }
        })
        .await?;

    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Agent loop panicked");
        }
    }

    store.close().await;
    tracing::info!("Fleetwatch stopped");
    Ok(())
}
