// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for ridehail-core integration tests.
//!
//! Provides a TestContext wiring the engine against an in-memory SQLite
//! database with migrations applied, plus seed and polling helpers.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use ridehail_api::{
    CreateRideRequest, DriverStatus, Location, RideResponse, RideStatus, TripResponse,
    UpdateDriverAvailabilityRequest, VehicleTier,
};
use ridehail_core::config::Config;
use ridehail_core::engine::RideEngine;
use ridehail_core::gateway::StaticGateway;
use ridehail_core::persistence::{
    DriverRecord, Persistence, PricingConfigRecord, RiderRecord, SqlitePersistence,
    SurgeZoneRecord,
};

/// Mumbai pickup point used across scenarios.
pub const PICKUP: (f64, f64) = (19.0596, 72.8295);
/// Mumbai dropoff point used across scenarios.
pub const DROPOFF: (f64, f64) = (19.076, 72.8777);

/// Test context that wires the engine against in-memory SQLite.
pub struct TestContext {
    pub engine: RideEngine,
    pub store: SqlitePersistence,
    pub gateway: Arc<StaticGateway>,
    pub config: Config,
}

/// Engine configuration tuned for tests: a matching backoff short enough
/// to keep suites fast but long enough that accept-path tests can claim a
/// ride before the matcher gives up on an empty index.
pub fn test_config() -> Config {
    Config {
        match_backoff: Duration::from_millis(300),
        ..Config::default()
    }
}

impl TestContext {
    /// Context with the fast test configuration.
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    /// Context with an explicit configuration.
    pub async fn with_config(config: Config) -> Self {
        let store = SqlitePersistence::in_memory()
            .await
            .expect("in-memory sqlite");
        let gateway = Arc::new(StaticGateway::new());
        let engine = RideEngine::new(
            Arc::new(store.clone()),
            gateway.clone(),
            config.clone(),
        );
        Self {
            engine,
            store,
            gateway,
            config,
        }
    }

    /// Insert a rider.
    pub async fn seed_rider(&self, rider_id: &str) {
        self.store
            .insert_rider(&RiderRecord {
                id: rider_id.to_string(),
                name: format!("Rider {rider_id}"),
                phone: "+910000000000".to_string(),
                email: format!("{rider_id}@example.test"),
                rating: 4.8,
                total_rides: 0,
                created_at: Utc::now(),
            })
            .await
            .expect("seed rider");
    }

    /// Insert a driver row without touching the geo index or directory.
    pub async fn seed_driver_row(
        &self,
        driver_id: &str,
        lat: f64,
        lng: f64,
        rating: f64,
        tier: VehicleTier,
        status: DriverStatus,
    ) {
        self.store
            .insert_driver(&DriverRecord {
                id: driver_id.to_string(),
                name: format!("Driver {driver_id}"),
                phone: "+911111111111".to_string(),
                vehicle: "MH01 AB 1234".to_string(),
                vehicle_tier: tier.to_string(),
                rating,
                acceptance_rate: 0.9,
                total_trips: 0,
                status: status.to_string(),
                last_lat: Some(lat),
                last_lng: Some(lng),
                last_location_update: Some(Utc::now()),
                created_at: Utc::now(),
            })
            .await
            .expect("seed driver");
    }

    /// Insert a driver and bring them online: AVAILABLE in the database,
    /// present in the directory and the geo index.
    pub async fn seed_available_driver(
        &self,
        driver_id: &str,
        lat: f64,
        lng: f64,
        rating: f64,
        tier: VehicleTier,
    ) {
        self.seed_driver_row(driver_id, lat, lng, rating, tier, DriverStatus::Offline)
            .await;
        self.engine
            .update_driver_availability(UpdateDriverAvailabilityRequest {
                driver_id: driver_id.to_string(),
                status: DriverStatus::Available,
            })
            .await
            .expect("driver online");
    }

    /// Insert the standard pricing row used by the scenarios:
    /// base 50, per-km 12, per-min 2.
    pub async fn seed_standard_pricing(&self) {
        self.store
            .insert_pricing_config(&PricingConfigRecord {
                id: "pc-standard".to_string(),
                region: "default".to_string(),
                ride_type: VehicleTier::Standard.to_string(),
                base_fare: 50.0,
                per_km_rate: 12.0,
                per_min_rate: 2.0,
                is_active: true,
            })
            .await
            .expect("seed pricing");
    }

    /// Insert an active surge zone with the given multiplier.
    pub async fn seed_surge(&self, multiplier: f64) {
        self.store
            .insert_surge_zone(&SurgeZoneRecord {
                id: "sz-1".to_string(),
                name: "downtown".to_string(),
                polygon: "[]".to_string(),
                multiplier,
                is_active: true,
            })
            .await
            .expect("seed surge");
    }

    /// Create a STANDARD ride from PICKUP to DROPOFF for `rider_id`.
    pub async fn create_standard_ride(&self, rider_id: &str) -> RideResponse {
        self.engine
            .create_ride(CreateRideRequest {
                rider_id: rider_id.to_string(),
                pickup: Location {
                    lat: PICKUP.0,
                    lng: PICKUP.1,
                    address: Some("Bandra".to_string()),
                },
                dropoff: Location {
                    lat: DROPOFF.0,
                    lng: DROPOFF.1,
                    address: Some("BKC".to_string()),
                },
                ride_type: VehicleTier::Standard,
                payment_method_id: Some("pm-1".to_string()),
                scheduled_at: None,
                idempotency_key: None,
            })
            .await
            .expect("create ride")
    }

    /// Poll `getRide` until it reaches `status` or the timeout elapses.
    pub async fn wait_for_status(
        &self,
        ride_id: &str,
        status: RideStatus,
        timeout: Duration,
    ) -> RideResponse {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let ride = self.engine.get_ride(ride_id).await.expect("get ride");
            if ride.status == status {
                return ride;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "ride {ride_id} stuck in {:?} waiting for {status:?}",
                ride.status
            );
            tokio::time::sleep(Duration::from_millis(15)).await;
        }
    }

    /// Current driver status string from the database.
    pub async fn driver_status(&self, driver_id: &str) -> String {
        self.store
            .get_driver(driver_id)
            .await
            .expect("get driver")
            .expect("driver exists")
            .status
    }

    /// Number of payment rows for a trip.
    pub async fn payment_count_for_trip(&self, trip_id: &str) -> i64 {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM payments WHERE trip_id = ?")
            .bind(trip_id)
            .fetch_one(self.store.pool())
            .await
            .expect("count payments");
        count.0
    }

    /// Number of notifications of `kind` for a user.
    pub async fn notification_count(&self, user_id: &str, kind: &str) -> i64 {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM notifications WHERE user_id = ? AND kind = ?")
                .bind(user_id)
                .bind(kind)
                .fetch_one(self.store.pool())
                .await
                .expect("count notifications");
        count.0
    }

    /// Driver earning row for a trip: (amount, platform_fee).
    pub async fn earning_for_trip(&self, trip_id: &str) -> Option<(f64, f64)> {
        sqlx::query_as("SELECT amount, platform_fee FROM earnings WHERE trip_id = ?")
            .bind(trip_id)
            .fetch_optional(self.store.pool())
            .await
            .expect("earning query")
    }

    /// Receipt row for a trip: (subtotal, tax, total).
    pub async fn receipt_for_trip(&self, trip_id: &str) -> Option<(f64, f64, f64)> {
        sqlx::query_as("SELECT subtotal, tax, total FROM receipts WHERE trip_id = ?")
            .bind(trip_id)
            .fetch_optional(self.store.pool())
            .await
            .expect("receipt query")
    }

    /// Drive one ride through the full happy path with driver `driver_id`
    /// already online: accept, arrive, start with the issued OTP, end with
    /// the given distance. Returns the completed ride and trip.
    pub async fn run_trip_to_completion(
        &self,
        rider_id: &str,
        driver_id: &str,
        distance_km: f64,
    ) -> (RideResponse, TripResponse) {
        use ridehail_api::{
            AcceptRideRequest, EndTripRequest, GeoPoint, MarkArrivedRequest, MarkArrivingRequest,
            StartTripRequest,
        };

        let ride = self.create_standard_ride(rider_id).await;
        // Claim explicitly so the test controls which driver wins.
        match self
            .engine
            .accept_ride(AcceptRideRequest {
                ride_id: ride.id.clone(),
                driver_id: driver_id.to_string(),
            })
            .await
        {
            Ok(_) => {}
            // The background matcher may have assigned this driver first.
            Err(_) => {
                let matched = self
                    .wait_for_status(&ride.id, RideStatus::Matched, Duration::from_secs(2))
                    .await;
                assert_eq!(matched.driver_id.as_deref(), Some(driver_id));
            }
        }

        self.engine
            .mark_arriving(MarkArrivingRequest {
                ride_id: ride.id.clone(),
                driver_id: driver_id.to_string(),
            })
            .await
            .expect("mark arriving");
        let arrived = self
            .engine
            .mark_arrived(MarkArrivedRequest {
                ride_id: ride.id.clone(),
                driver_id: driver_id.to_string(),
            })
            .await
            .expect("mark arrived");

        let trip = self
            .store
            .get_trip_by_ride(&ride.id)
            .await
            .expect("trip query")
            .expect("trip exists");

        let started = self
            .engine
            .start_trip(StartTripRequest {
                trip_id: trip.id.clone(),
                start_otp: arrived.otp,
            })
            .await
            .expect("start trip");

        let completed_trip = self
            .engine
            .end_trip(EndTripRequest {
                trip_id: started.id.clone(),
                end_location: GeoPoint::new(DROPOFF.0, DROPOFF.1),
                actual_distance: distance_km,
                route_path: None,
            })
            .await
            .expect("end trip");

        let completed_ride = self
            .engine
            .get_ride(&ride.id)
            .await
            .expect("completed ride");
        (completed_ride, completed_trip)
    }
}
