// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Ridehail Core - standalone runner
//!
//! Boots the engine against the configured database and runs until
//! interrupted. The request transport, telemetry and real PSP credentials
//! belong to the embedding process; this binary wires the scriptable
//! gateway and is meant for local development and smoke testing.

use std::sync::Arc;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};

use ridehail_core::config::Config;
use ridehail_core::gateway::StaticGateway;
use ridehail_core::migrations;
use ridehail_core::persistence::{Persistence, PostgresPersistence, SqlitePersistence};
use ridehail_core::runtime::EngineRuntime;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ridehail_core=info".parse().unwrap()),
        )
        .init();

    info!("Starting Ridehail Core");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!(
        batch_size = config.location_batch_size,
        match_attempts = config.match_max_attempts,
        search_radius_km = config.search_radius_km,
        "Configuration loaded"
    );

    // Connect to database and run migrations
    info!("Connecting to database...");
    let persistence: Arc<dyn Persistence> = if config.database_url.starts_with("sqlite") {
        let store = SqlitePersistence::from_path(
            config
                .database_url
                .trim_start_matches("sqlite:")
                .trim_start_matches("//"),
        )
        .await?;
        Arc::new(store)
    } else {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await?;
        info!("Running database migrations...");
        migrations::run_postgres(&pool).await?;
        Arc::new(PostgresPersistence::new(pool))
    };

    // Verify connection
    let healthy = persistence.health_check_db().await?;
    info!(healthy, "Database health check passed");

    // Start the runtime
    let runtime = EngineRuntime::builder()
        .persistence(persistence)
        .gateway(Arc::new(StaticGateway::new()))
        .config(config)
        .build()?
        .start()
        .await?;

    info!("Ridehail Core initialized successfully");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    runtime.shutdown().await?;
    info!("Shutdown complete");

    Ok(())
}
