// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Location ingest pipeline.
//!
//! Absorbs driver position pings at high frequency. Each ping updates the
//! geo index synchronously and fans out to live subscribers; durable
//! persistence happens in batches from a single flusher task, so at most
//! one drain is ever in flight and per-driver ordering is preserved.
//!
//! Pings are never rejected once validated: over the high-water mark the
//! oldest buffered ping of the same driver is dropped in favor of the new
//! one (position tracking is naturally lossy), and a failed flush is
//! retried once before the batch is dropped with an error counter.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::sync::Notify;
use tracing::{debug, error, warn};

use ridehail_api::DriverStatus;

use crate::bus::UpdateBus;
use crate::directory::DriverDirectory;
use crate::error::{EngineError, Result};
use crate::geo::{GeoIndex, GeoMeta};
use crate::persistence::{DriverLocationRecord, Persistence};

/// Pipeline tuning knobs, taken from [`crate::config::Config`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Buffered pings that force a flush.
    pub batch_size: usize,
    /// Max age of the oldest buffered ping before a flush is forced.
    pub batch_interval: Duration,
    /// Buffer length above which old pings are dropped.
    pub high_water: usize,
    /// Pause before the single flush retry.
    pub retry_backoff: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            batch_interval: Duration::from_secs(10),
            high_water: 1000,
            retry_backoff: Duration::from_secs(1),
        }
    }
}

/// Counters snapshot for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStats {
    /// Pings accepted by `record_ping`.
    pub received: u64,
    /// Pings written durably.
    pub persisted: u64,
    /// Pings dropped by backpressure or failed flushes.
    pub dropped: u64,
    /// Completed drains.
    pub flushes: u64,
    /// Drains that exhausted their retry and dropped the batch.
    pub flush_failures: u64,
    /// Pings currently buffered.
    pub buffered: usize,
}

struct PipelineInner {
    persistence: Arc<dyn Persistence>,
    geo: Arc<GeoIndex>,
    bus: UpdateBus,
    directory: Arc<DriverDirectory>,
    config: PipelineConfig,
    buffer: Mutex<VecDeque<DriverLocationRecord>>,
    flush_notify: Notify,
    shutdown: Notify,
    // Serializes drains across the flusher task and explicit flush calls.
    drain_lock: tokio::sync::Mutex<()>,
    received: AtomicU64,
    persisted: AtomicU64,
    dropped: AtomicU64,
    flushes: AtomicU64,
    flush_failures: AtomicU64,
}

/// Handle to the ingest pipeline. Cheap to clone.
#[derive(Clone)]
pub struct LocationPipeline {
    inner: Arc<PipelineInner>,
}

impl LocationPipeline {
    /// Wire a pipeline against its collaborators.
    pub fn new(
        persistence: Arc<dyn Persistence>,
        geo: Arc<GeoIndex>,
        bus: UpdateBus,
        directory: Arc<DriverDirectory>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            inner: Arc::new(PipelineInner {
                persistence,
                geo,
                bus,
                directory,
                config,
                buffer: Mutex::new(VecDeque::new()),
                flush_notify: Notify::new(),
                shutdown: Notify::new(),
                drain_lock: tokio::sync::Mutex::new(()),
                received: AtomicU64::new(0),
                persisted: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                flushes: AtomicU64::new(0),
                flush_failures: AtomicU64::new(0),
            }),
        }
    }

    /// Ingest one position ping.
    ///
    /// Validates ranges, updates the geo index for AVAILABLE and ON_RIDE
    /// drivers, buffers the ping for batched persistence and fans it out on
    /// the bus. The ping is accepted even when the buffer is saturated; it
    /// then displaces the oldest buffered ping of the same driver.
    pub fn record_ping(
        &self,
        driver_id: &str,
        lat: f64,
        lng: f64,
        heading: Option<f64>,
        speed: Option<f64>,
        accuracy: Option<f64>,
    ) -> Result<()> {
        if !(-90.0..=90.0).contains(&lat) {
            return Err(EngineError::invalid_input(
                "latitude",
                "must lie in [-90, 90]",
            ));
        }
        if !(-180.0..=180.0).contains(&lng) {
            return Err(EngineError::invalid_input(
                "longitude",
                "must lie in [-180, 180]",
            ));
        }
        if let Some(speed) = speed
            && speed < 0.0
        {
            return Err(EngineError::invalid_input("speed", "must be non-negative"));
        }

        let inner = &self.inner;
        let now = Utc::now();
        inner.received.fetch_add(1, Ordering::Relaxed);

        // Geo update for drivers whose position matters right now.
        let live = inner.directory.get(driver_id);
        if let Some(state) = live
            && matches!(state.status, DriverStatus::Available | DriverStatus::OnRide)
        {
            inner.geo.add(
                driver_id,
                lat,
                lng,
                GeoMeta {
                    tier: state.tier,
                    rating: state.rating,
                },
                now.timestamp_millis(),
            );
        }

        let record = DriverLocationRecord {
            driver_id: driver_id.to_string(),
            lat,
            lng,
            heading,
            speed,
            accuracy,
            recorded_at: now,
        };

        let buffered = {
            let mut buffer = inner.buffer.lock().expect("location buffer poisoned");
            if buffer.len() >= inner.config.high_water {
                let victim = buffer
                    .iter()
                    .position(|p| p.driver_id == driver_id)
                    .unwrap_or(0);
                if buffer.remove(victim).is_some() {
                    inner.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
            buffer.push_back(record);
            buffer.len()
        };
        if buffered >= inner.config.batch_size {
            inner.flush_notify.notify_one();
        }

        // Live fan-out: anyone following the driver gets the raw ping, and
        // the ride channel mirrors the position while a ride is active.
        inner.bus.publish(
            &UpdateBus::location_topic(driver_id),
            json!({
                "driverId": driver_id,
                "lat": lat,
                "lng": lng,
                "heading": heading,
                "speed": speed,
                "accuracy": accuracy,
            }),
        );
        if let Some(ride_id) = inner.directory.active_ride(driver_id) {
            inner.bus.publish(
                &UpdateBus::ride_topic(&ride_id),
                json!({ "driverLocation": { "lat": lat, "lng": lng } }),
            );
        }

        Ok(())
    }

    /// Run the flusher loop until shutdown. Spawned by the runtime.
    pub async fn run_flusher(self) {
        let inner = &self.inner;
        debug!(
            batch_size = inner.config.batch_size,
            interval_ms = inner.config.batch_interval.as_millis() as u64,
            "Location flusher started"
        );
        loop {
            tokio::select! {
                _ = inner.shutdown.notified() => {
                    // Final drain so buffered pings survive a clean stop.
                    self.drain().await;
                    debug!("Location flusher stopped");
                    break;
                }
                _ = inner.flush_notify.notified() => {
                    self.drain().await;
                }
                _ = tokio::time::sleep(inner.config.batch_interval) => {
                    self.drain().await;
                }
            }
        }
    }

    /// Signal the flusher to stop after a final drain.
    pub fn shutdown(&self) {
        self.inner.shutdown.notify_one();
    }

    /// Drain the buffer now. Used by the flusher, shutdown and tests.
    pub async fn drain(&self) {
        let inner = &self.inner;
        let _guard = inner.drain_lock.lock().await;

        let batch: Vec<DriverLocationRecord> = {
            let mut buffer = inner.buffer.lock().expect("location buffer poisoned");
            buffer.drain(..).collect()
        };
        if batch.is_empty() {
            return;
        }

        match inner.persistence.insert_driver_locations(&batch).await {
            Ok(()) => {
                inner.persisted.fetch_add(batch.len() as u64, Ordering::Relaxed);
                inner.flushes.fetch_add(1, Ordering::Relaxed);
            }
            Err(first) => {
                warn!(error = %first, pings = batch.len(), "Location flush failed, retrying");
                tokio::time::sleep(inner.config.retry_backoff).await;
                match inner.persistence.insert_driver_locations(&batch).await {
                    Ok(()) => {
                        inner.persisted.fetch_add(batch.len() as u64, Ordering::Relaxed);
                        inner.flushes.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(second) => {
                        error!(
                            error = %second,
                            pings = batch.len(),
                            "Location flush retry failed, dropping batch"
                        );
                        inner.dropped.fetch_add(batch.len() as u64, Ordering::Relaxed);
                        inner.flush_failures.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
    }

    /// Counters snapshot.
    pub fn stats(&self) -> PipelineStats {
        let inner = &self.inner;
        PipelineStats {
            received: inner.received.load(Ordering::Relaxed),
            persisted: inner.persisted.load(Ordering::Relaxed),
            dropped: inner.dropped.load(Ordering::Relaxed),
            flushes: inner.flushes.load(Ordering::Relaxed),
            flush_failures: inner.flush_failures.load(Ordering::Relaxed),
            buffered: inner.buffer.lock().expect("location buffer poisoned").len(),
        }
    }
}
