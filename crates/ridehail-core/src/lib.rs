// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Ridehail Core - Ride Lifecycle Engine
//!
//! This crate is the backend core of a ride-hailing platform: it takes a
//! rider's request for transport, finds a suitable nearby driver in
//! sub-second time, coordinates the trip state machine, computes the fare,
//! settles payment idempotently, and keeps both participants informed in
//! real time.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                      Embedding process                              │
//! │         (HTTP/socket transport, auth, PSP credentials)              │
//! └─────────────────────────────────────────────────────────────────────┘
//!                │ ridehail-api requests             ▲ ride:<id> /
//!                ▼                                   │ location:<driverId>
//! ┌───────────────────────────┐              ┌───────┴───────┐
//! │        RideEngine         │─────────────►│   UpdateBus   │
//! │  create / match / cancel  │   publish    │ topic pub/sub │
//! │  arrive / start / settle  │              └───────────────┘
//! └──┬─────────┬─────────┬────┘
//!    │         │         │ charge
//!    │         │         ▼
//!    │         │  ┌──────────────────┐     ┌──────────────────┐
//!    │         │  │ PaymentGateway   │     │ LocationPipeline │◄── pings
//!    │         │  │  (PSP facade)    │     │ buffer + batcher │
//!    │         │  └──────────────────┘     └───┬──────────┬───┘
//!    │         ▼                               │ hot      │ cold
//!    │  ┌─────────────────────┐                ▼          │
//!    │  │ LockService /       │          ┌──────────┐     │
//!    │  │ IdempotencyStore /  │          │ GeoIndex │     │
//!    │  │ DriverDirectory     │          └──────────┘     │
//!    │  └─────────────────────┘                           │
//!    ▼                                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │              Persistence (PostgreSQL / SQLite via sqlx)             │
//! │   riders drivers rides trips payments refunds receipts earnings     │
//! │   notifications ride_events driver_locations pricing surge_zones    │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Ride Status State Machine
//!
//! ```text
//! SEARCHING ──► MATCHED ──► DRIVER_ARRIVING ──► ARRIVED ──► IN_PROGRESS ──► COMPLETED
//!     │ exhausted  │               │                │
//!     ▼            └───────────────┴────────────────┴──────► CANCELLED
//!  FAILED
//! ```
//!
//! Matching runs as a detached task per ride; the SEARCHING -> MATCHED
//! transition is protected by a per-ride lock plus a transaction that
//! re-checks driver availability, guaranteeing a single winner across any
//! number of concurrent accepts.
//!
//! # Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `RIDEHAIL_DATABASE_URL` | Yes | - | PostgreSQL or SQLite connection string |
//! | `LOCATION_BATCH_SIZE` | No | `100` | Pings per persisted batch |
//! | `LOCATION_BATCH_INTERVAL_MS` | No | `10000` | Max ping buffer age |
//! | `RIDEHAIL_MATCH_MAX_ATTEMPTS` | No | `3` | Matching attempts per ride |
//! | `RIDEHAIL_MATCH_BACKOFF_MS` | No | `5000` | Pause between empty attempts |
//! | `RIDEHAIL_SEARCH_RADIUS_KM` | No | `5.0` | Candidate search radius |
//! | `RIDEHAIL_GEO_STALENESS_SECS` | No | `300` | Position eviction age |
//!
//! # Modules
//!
//! - [`config`]: engine configuration from environment variables
//! - [`engine`]: the ride lifecycle engine and its operation surface
//! - [`geo`]: in-memory geospatial index of driver positions
//! - [`location`]: high-frequency ping ingest with batched persistence
//! - [`bus`]: topic pub/sub delivering live updates
//! - [`lock`]: TTL-bounded named locks with ownership fencing
//! - [`idempotency`]: key -> cached response store
//! - [`pricing`]: pure fare calculation
//! - [`gateway`]: PSP charge facade
//! - [`directory`]: in-memory driver live-state shadow
//! - [`persistence`]: sqlx-backed durable store (PostgreSQL and SQLite)
//! - [`runtime`]: embeddable runtime wiring engine and background tasks

#![deny(missing_docs)]

/// Topic pub/sub delivering state changes and live positions.
pub mod bus;

/// Engine configuration loaded from environment variables.
pub mod config;

/// In-memory shadow of driver live state for the ping hot path.
pub mod directory;

/// The ride lifecycle engine and its operation surface.
pub mod engine;

/// Error types for engine operations with wire error code mapping.
pub mod error;

/// PSP charge facade and test double.
pub mod gateway;

/// In-memory geospatial index of available drivers.
pub mod geo;

/// Idempotency store with first-writer-wins semantics.
pub mod idempotency;

/// High-frequency location ingest with batched durable persistence.
pub mod location;

/// Named TTL locks with ownership fencing.
pub mod lock;

/// Embedded database migrations.
pub mod migrations;

/// Durable store of riders, drivers, rides, trips and settlement entities.
pub mod persistence;

/// Pure fare calculation.
pub mod pricing;

/// Embeddable runtime wiring the engine and background tasks.
pub mod runtime;
