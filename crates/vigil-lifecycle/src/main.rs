// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Vigil - Infrastructure Configuration and Monitoring Orchestration
//!
//! Runs in one process:
//! - One repository worker per persisted repository
//! - Deployment worker (document builder and rollout orderer)
//! - Lifecycle manager (unblock, cleanup, deadlocks, pokes)

use std::str::FromStr;
use std::sync::Arc;

use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use tracing::{info, warn};

use vigil_core::Supervisor;
use vigil_core::config::Config;
use vigil_core::persistence::{Persistence, PostgresPersistence};
use vigil_lifecycle::config::LifecycleConfig;
use vigil_lifecycle::runtime::LifecycleRuntime;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vigil_core=info,vigil_lifecycle=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;
    let lifecycle_config = LifecycleConfig::from_env()?;

    info!(
        max_connections = config.db_max_connections,
        statement_timeout_ms = config.statement_timeout.as_millis() as u64,
        tick_secs = lifecycle_config.tick_interval.as_secs(),
        "Starting Vigil"
    );

    // Statement timeouts surface as query errors and roll the job back.
    let connect_options = PgConnectOptions::from_str(&config.database_url)?.options([(
        "statement_timeout",
        config.statement_timeout.as_millis().to_string(),
    )]);
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect_with(connect_options)
        .await?;

    info!("Connected to database");

    sqlx::raw_sql(include_str!("../../vigil-core/migrations/schema.sql"))
        .execute(&pool)
        .await?;

    info!("Database schema verified");

    let persistence: Arc<dyn Persistence> = Arc::new(PostgresPersistence::new(pool));

    let supervisor = Supervisor::new(persistence.clone(), config.worker.clone());
    let started = supervisor.start_all().await?;
    info!(repositories = started, "Repository workers started");

    let runtime = LifecycleRuntime::builder()
        .persistence(persistence)
        .config(lifecycle_config)
        .build()?
        .start()
        .await?;

    info!("Vigil ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    // Graceful shutdown
    runtime.shutdown().await?;
    supervisor.shutdown().await;

    info!("Vigil shut down");

    Ok(())
}
