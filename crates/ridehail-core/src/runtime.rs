// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for ridehail-core.
//!
//! This module provides [`EngineRuntime`] which wires the engine and its
//! background tasks into an existing tokio application.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ridehail_core::config::Config;
//! use ridehail_core::gateway::StaticGateway;
//! use ridehail_core::persistence::SqlitePersistence;
//! use ridehail_core::runtime::EngineRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let persistence = Arc::new(SqlitePersistence::from_path(".data/ridehail.db").await?);
//!
//!     let runtime = EngineRuntime::builder()
//!         .persistence(persistence)
//!         .gateway(Arc::new(StaticGateway::new()))
//!         .config(Config::default())
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     // ... serve requests through runtime.engine() ...
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::Config;
use crate::engine::RideEngine;
use crate::gateway::PaymentGateway;
use crate::persistence::Persistence;

/// Cadence of the housekeeping sweep (stale geo entries, expired locks and
/// idempotency entries).
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Builder for creating an [`EngineRuntime`].
#[derive(Default)]
pub struct EngineRuntimeBuilder {
    persistence: Option<Arc<dyn Persistence>>,
    gateway: Option<Arc<dyn PaymentGateway>>,
    config: Option<Config>,
}

impl std::fmt::Debug for EngineRuntimeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineRuntimeBuilder")
            .field("persistence", &self.persistence.as_ref().map(|_| "..."))
            .field("gateway", &self.gateway.as_ref().map(|_| "..."))
            .field("config", &self.config)
            .finish()
    }
}

impl EngineRuntimeBuilder {
    /// Create a new builder with no components wired.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the persistence layer (required).
    pub fn persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Set the payment gateway (required).
    pub fn gateway(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Set the engine configuration (required).
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required components are missing.
    pub fn build(self) -> Result<EngineRuntimeConfig> {
        let persistence = self
            .persistence
            .ok_or_else(|| anyhow::anyhow!("persistence is required"))?;
        let gateway = self
            .gateway
            .ok_or_else(|| anyhow::anyhow!("gateway is required"))?;
        let config = self
            .config
            .ok_or_else(|| anyhow::anyhow!("config is required"))?;

        Ok(EngineRuntimeConfig {
            persistence,
            gateway,
            config,
        })
    }
}

/// Configuration for an [`EngineRuntime`].
pub struct EngineRuntimeConfig {
    persistence: Arc<dyn Persistence>,
    gateway: Arc<dyn PaymentGateway>,
    config: Config,
}

impl EngineRuntimeConfig {
    /// Start the runtime: build the engine and spawn the location flusher
    /// and the housekeeping sweeper.
    pub async fn start(self) -> Result<EngineRuntime> {
        let engine = RideEngine::new(self.persistence, self.gateway, self.config);

        let flusher_handle = tokio::spawn(engine.pipeline().clone().run_flusher());

        let sweeper_shutdown = Arc::new(Notify::new());
        let sweeper_handle = tokio::spawn(run_sweeper(engine.clone(), sweeper_shutdown.clone()));

        info!("EngineRuntime started");
        Ok(EngineRuntime {
            engine,
            flusher_handle,
            sweeper_handle,
            sweeper_shutdown,
        })
    }
}

async fn run_sweeper(engine: RideEngine, shutdown: Arc<Notify>) {
    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                debug!("Housekeeping sweeper shutting down");
                break;
            }
            _ = tokio::time::sleep(SWEEP_INTERVAL) => {
                let staleness = engine.config().geo_staleness;
                let evicted = engine
                    .geo()
                    .sweep_stale(staleness, Utc::now().timestamp_millis());
                let locks = engine.locks().sweep_expired();
                let cached = engine.idempotency().sweep_expired();
                if evicted + locks + cached > 0 {
                    debug!(evicted, locks, cached, "Housekeeping sweep");
                }
            }
        }
    }
}

/// A running ridehail-core instance that can be embedded in an application.
///
/// The runtime manages:
/// - the location flusher draining the ping buffer to persistence
/// - the housekeeping sweeper (stale positions, expired locks and cache)
///
/// Call [`shutdown`](Self::shutdown) for graceful termination; the location
/// buffer is drained before the flusher stops.
pub struct EngineRuntime {
    engine: RideEngine,
    flusher_handle: JoinHandle<()>,
    sweeper_handle: JoinHandle<()>,
    sweeper_shutdown: Arc<Notify>,
}

impl EngineRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> EngineRuntimeBuilder {
        EngineRuntimeBuilder::new()
    }

    /// The engine facade serving requests.
    pub fn engine(&self) -> &RideEngine {
        &self.engine
    }

    /// Gracefully shut down the runtime.
    ///
    /// Signals both background tasks and waits for them; the flusher runs
    /// one final drain so buffered pings are persisted.
    pub async fn shutdown(self) -> Result<()> {
        info!("EngineRuntime shutting down...");

        self.engine.pipeline().shutdown();
        self.sweeper_shutdown.notify_one();

        self.flusher_handle.await?;
        self.sweeper_handle.await?;

        info!("EngineRuntime shutdown complete");
        Ok(())
    }
}
