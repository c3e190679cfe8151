// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Location ingest pipeline tests: fan-out, batching, per-driver ordering
//! and backpressure.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{PICKUP, TestContext, test_config};
use ridehail_api::{DriverStatus, RideStatus, UpdateDriverAvailabilityRequest, VehicleTier};
use ridehail_core::persistence::Persistence;

#[tokio::test]
async fn test_active_ride_fans_out_on_both_topics() {
    let ctx = TestContext::new().await;
    ctx.seed_standard_pricing().await;
    ctx.seed_rider("R1").await;
    ctx.seed_available_driver("D1", PICKUP.0, PICKUP.1, 4.9, VehicleTier::Standard)
        .await;

    let ride = ctx.create_standard_ride("R1").await;
    ctx.wait_for_status(&ride.id, RideStatus::Matched, Duration::from_secs(2))
        .await;

    let mut location_sub = ctx.engine.bus().subscribe("location:D1");
    let mut ride_sub = ctx.engine.bus().subscribe(&format!("ride:{}", ride.id));

    const PINGS: usize = 250;
    for i in 0..PINGS {
        ctx.engine
            .pipeline()
            .record_ping("D1", PICKUP.0 + i as f64 * 1e-5, PICKUP.1, None, Some(30.0), None)
            .unwrap();
    }

    // Every ping reached every subscriber present at publish time, in order.
    let mut location_messages = Vec::new();
    while let Some(message) = location_sub.try_recv() {
        location_messages.push(message);
    }
    assert_eq!(location_messages.len(), PINGS);
    for (i, message) in location_messages.iter().enumerate() {
        let lat = message.payload["lat"].as_f64().unwrap();
        assert!((lat - (PICKUP.0 + i as f64 * 1e-5)).abs() < 1e-12);
    }

    let ride_messages: Vec<_> = std::iter::from_fn(|| ride_sub.try_recv())
        .filter(|m| m.payload.get("driverLocation").is_some())
        .collect();
    assert_eq!(ride_messages.len(), PINGS);

    // Batched persistence: 250 pings at batch size 100 need at most 3
    // writes; a single explicit drain folds the remainder into one.
    ctx.engine.pipeline().drain().await;
    let stats = ctx.engine.pipeline().stats();
    assert_eq!(stats.received, PINGS as u64);
    assert_eq!(stats.persisted, PINGS as u64);
    assert_eq!(stats.dropped, 0);
    assert!(stats.flushes <= 3);
    assert_eq!(ctx.store.count_driver_locations("D1").await.unwrap(), PINGS as i64);
}

#[tokio::test]
async fn test_pings_persist_in_send_order_per_driver() {
    let ctx = TestContext::new().await;
    ctx.seed_rider("R1").await;
    ctx.seed_available_driver("D1", PICKUP.0, PICKUP.1, 4.9, VehicleTier::Standard)
        .await;
    ctx.seed_available_driver("D2", 19.07, 72.84, 4.5, VehicleTier::Standard)
        .await;

    for i in 0..50 {
        ctx.engine
            .pipeline()
            .record_ping("D1", 19.0 + i as f64 * 1e-4, 72.8, None, None, None)
            .unwrap();
        ctx.engine
            .pipeline()
            .record_ping("D2", 18.0 + i as f64 * 1e-4, 72.0, None, None, None)
            .unwrap();
    }
    ctx.engine.pipeline().drain().await;

    let d1 = ctx.store.list_driver_locations("D1", 100).await.unwrap();
    assert_eq!(d1.len(), 50);
    for (i, row) in d1.iter().enumerate() {
        assert!((row.lat - (19.0 + i as f64 * 1e-4)).abs() < 1e-12);
    }

    // The driver row carries the newest position after the flush.
    let driver = ctx.store.get_driver("D1").await.unwrap().unwrap();
    assert!((driver.last_lat.unwrap() - (19.0 + 49.0 * 1e-4)).abs() < 1e-12);
}

#[tokio::test]
async fn test_invalid_pings_are_rejected() {
    let ctx = TestContext::new().await;
    let pipeline = ctx.engine.pipeline();

    for (lat, lng, speed) in [
        (91.0, 72.8, None),
        (-90.5, 72.8, None),
        (19.0, 181.0, None),
        (19.0, -180.5, None),
        (19.0, 72.8, Some(-1.0)),
    ] {
        let err = pipeline
            .record_ping("D1", lat, lng, None, speed, None)
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_INPUT");
    }
    assert_eq!(pipeline.stats().received, 0);
    assert_eq!(pipeline.stats().buffered, 0);
}

#[tokio::test]
async fn test_backpressure_drops_oldest_ping_of_same_driver() {
    let config = ridehail_core::config::Config {
        location_high_water: 10,
        ..test_config()
    };
    let ctx = TestContext::with_config(config).await;
    ctx.seed_available_driver("D1", PICKUP.0, PICKUP.1, 4.9, VehicleTier::Standard)
        .await;

    for i in 0..15 {
        ctx.engine
            .pipeline()
            .record_ping("D1", 19.0 + i as f64 * 1e-4, 72.8, None, None, None)
            .unwrap();
    }

    let stats = ctx.engine.pipeline().stats();
    assert_eq!(stats.received, 15);
    assert_eq!(stats.dropped, 5);
    assert_eq!(stats.buffered, 10);

    ctx.engine.pipeline().drain().await;
    let rows = ctx.store.list_driver_locations("D1", 100).await.unwrap();
    assert_eq!(rows.len(), 10);
    // The survivors are the newest ten, still in order.
    for (i, row) in rows.iter().enumerate() {
        assert!((row.lat - (19.0 + (i + 5) as f64 * 1e-4)).abs() < 1e-12);
    }
}

#[tokio::test]
async fn test_geo_index_updates_follow_driver_status() {
    let ctx = TestContext::new().await;
    ctx.seed_available_driver("D1", PICKUP.0, PICKUP.1, 4.9, VehicleTier::Standard)
        .await;

    // A ping for an unknown driver buffers but never touches the index.
    ctx.engine
        .pipeline()
        .record_ping("ghost", 19.0, 72.8, None, None, None)
        .unwrap();
    assert!(ctx.engine.geo().position("ghost").is_none());

    // An available driver's ping moves their indexed position.
    ctx.engine
        .pipeline()
        .record_ping("D1", 19.0700, 72.8400, None, None, None)
        .unwrap();
    let position = ctx.engine.geo().position("D1").unwrap();
    assert!((position.lat - 19.0700).abs() < 1e-12);

    // Going on break removes the driver from the candidate pool, and
    // subsequent pings do not re-add them.
    ctx.engine
        .update_driver_availability(UpdateDriverAvailabilityRequest {
            driver_id: "D1".to_string(),
            status: DriverStatus::Break,
        })
        .await
        .unwrap();
    assert!(ctx.engine.geo().position("D1").is_none());
    ctx.engine
        .pipeline()
        .record_ping("D1", 19.0800, 72.8500, None, None, None)
        .unwrap();
    assert!(ctx.engine.geo().position("D1").is_none());
}

#[tokio::test]
async fn test_runtime_drains_buffer_on_shutdown() {
    use ridehail_core::gateway::StaticGateway;
    use ridehail_core::persistence::SqlitePersistence;
    use ridehail_core::runtime::EngineRuntime;

    let store = SqlitePersistence::in_memory().await.unwrap();
    let runtime = EngineRuntime::builder()
        .persistence(Arc::new(store.clone()))
        .gateway(Arc::new(StaticGateway::new()))
        .config(test_config())
        .build()
        .unwrap()
        .start()
        .await
        .unwrap();

    for i in 0..5 {
        runtime
            .engine()
            .pipeline()
            .record_ping("D1", 19.0 + i as f64 * 1e-4, 72.8, None, None, None)
            .unwrap();
    }
    runtime.shutdown().await.unwrap();

    assert_eq!(store.count_driver_locations("D1").await.unwrap(), 5);
}
