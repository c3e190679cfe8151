// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The ride lifecycle engine.
//!
//! [`RideEngine`] orchestrates ride creation, the matching loop, state
//! transitions, cancellation and settlement. It owns the in-process
//! components (geo index, update bus, lock service, idempotency store,
//! driver directory, location pipeline) and reads/writes everything
//! durable through the [`Persistence`] trait.
//!
//! Every state transition writes a ride event, invalidates the ride cache
//! and publishes on `ride:<id>`; the event insert is non-fatal so audit
//! hiccups never fail a request.

mod lifecycle;
mod matching;
mod payments;

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::{Value, json};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use ridehail_api::{
    AckResponse, CreateRideRequest, DriverInfoResponse, DriverStatus, GeoPoint,
    ListRiderHistoryRequest, Location, NotificationKind, PaymentResponse, RideHistoryResponse,
    RideResponse, RideStatus, TripResponse, UpdateDriverAvailabilityRequest,
    UpdateDriverLocationRequest, VehicleTier,
};

use crate::bus::UpdateBus;
use crate::config::Config;
use crate::directory::DriverDirectory;
use crate::error::{EngineError, Result};
use crate::gateway::PaymentGateway;
use crate::geo::{GeoIndex, haversine_km};
use crate::idempotency::IdempotencyStore;
use crate::location::{LocationPipeline, PipelineConfig};
use crate::lock::LockService;
use crate::persistence::{
    DriverRecord, NotificationRecord, Persistence, PaymentRecord, RideEventRecord, RideRecord,
    TripRecord,
};
use crate::pricing;

/// Pricing region used until multi-region routing exists.
pub(crate) const DEFAULT_REGION: &str = "default";

/// Candidates requested from the geo index per matching attempt.
pub(crate) const CANDIDATE_LIMIT: usize = 10;

pub(crate) struct EngineState {
    pub(crate) persistence: Arc<dyn Persistence>,
    pub(crate) geo: Arc<GeoIndex>,
    pub(crate) bus: UpdateBus,
    pub(crate) locks: Arc<LockService>,
    pub(crate) idempotency: Arc<IdempotencyStore>,
    pub(crate) gateway: Arc<dyn PaymentGateway>,
    pub(crate) directory: Arc<DriverDirectory>,
    pub(crate) pipeline: LocationPipeline,
    pub(crate) config: Config,
    ride_cache: Mutex<HashMap<String, RideRecord>>,
}

/// The engine facade. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct RideEngine {
    pub(crate) state: Arc<EngineState>,
}

impl RideEngine {
    /// Wire an engine against a persistence backend and a payment gateway.
    pub fn new(
        persistence: Arc<dyn Persistence>,
        gateway: Arc<dyn PaymentGateway>,
        config: Config,
    ) -> Self {
        let geo = Arc::new(GeoIndex::new());
        let bus = UpdateBus::new();
        let directory = Arc::new(DriverDirectory::new());
        let pipeline = LocationPipeline::new(
            persistence.clone(),
            geo.clone(),
            bus.clone(),
            directory.clone(),
            PipelineConfig {
                batch_size: config.location_batch_size,
                batch_interval: config.location_batch_interval,
                high_water: config.location_high_water,
                ..PipelineConfig::default()
            },
        );
        Self {
            state: Arc::new(EngineState {
                persistence,
                geo,
                bus,
                locks: Arc::new(LockService::new()),
                idempotency: Arc::new(IdempotencyStore::new()),
                gateway,
                directory,
                pipeline,
                config,
                ride_cache: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The update bus, for transports delivering events to clients.
    pub fn bus(&self) -> &UpdateBus {
        &self.state.bus
    }

    /// The geo index.
    pub fn geo(&self) -> &Arc<GeoIndex> {
        &self.state.geo
    }

    /// The lock service.
    pub fn locks(&self) -> &Arc<LockService> {
        &self.state.locks
    }

    /// The idempotency store.
    pub fn idempotency(&self) -> &Arc<IdempotencyStore> {
        &self.state.idempotency
    }

    /// The location ingest pipeline.
    pub fn pipeline(&self) -> &LocationPipeline {
        &self.state.pipeline
    }

    /// The driver live-state directory.
    pub fn directory(&self) -> &Arc<DriverDirectory> {
        &self.state.directory
    }

    /// The persistence backend.
    pub fn persistence(&self) -> &Arc<dyn Persistence> {
        &self.state.persistence
    }

    /// The engine configuration.
    pub fn config(&self) -> &Config {
        &self.state.config
    }

    /// `createRide` - validate, price, persist and start matching.
    ///
    /// A repeated request with the same idempotency key replays the stored
    /// ride instead of creating a second one.
    #[instrument(skip(self, request), fields(rider_id = %request.rider_id))]
    pub async fn create_ride(&self, request: CreateRideRequest) -> Result<RideResponse> {
        let state = &self.state;

        if !request.pickup.point().is_valid() {
            return Err(EngineError::invalid_input("pickup", "coordinates out of range"));
        }
        if !request.dropoff.point().is_valid() {
            return Err(EngineError::invalid_input("dropoff", "coordinates out of range"));
        }

        state
            .persistence
            .get_rider(&request.rider_id)
            .await?
            .ok_or_else(|| EngineError::not_found("rider", &request.rider_id))?;

        if let Some(ref key) = request.idempotency_key
            && let Some(existing) = state.persistence.find_ride_by_idempotency_key(key).await?
        {
            info!(ride_id = %existing.id, "Replaying ride for idempotency key");
            return ride_response(&existing);
        }

        let tier = request.ride_type.to_string();
        let (base_fare, per_km_rate, per_min_rate) =
            match state.persistence.find_active_pricing(DEFAULT_REGION, &tier).await? {
                Some(pricing) => (pricing.base_fare, pricing.per_km_rate, pricing.per_min_rate),
                None => (
                    state.config.default_base_fare,
                    state.config.default_per_km_rate,
                    state.config.default_per_min_rate,
                ),
            };
        // Any active zone applies; polygon containment is not evaluated.
        let surge_multiplier = match state.persistence.find_active_surge_zone().await? {
            Some(zone) => zone.multiplier.max(1.0),
            None => 1.0,
        };

        let distance_km = haversine_km(request.pickup.point(), request.dropoff.point());
        let (estimated_fare, estimated_duration_min) = pricing::estimate_fare(
            distance_km,
            base_fare,
            per_km_rate,
            per_min_rate,
            surge_multiplier,
        );

        let ride = RideRecord {
            id: Uuid::new_v4().to_string(),
            rider_id: request.rider_id.clone(),
            driver_id: None,
            pickup_lat: request.pickup.lat,
            pickup_lng: request.pickup.lng,
            pickup_address: request.pickup.address.clone(),
            dropoff_lat: request.dropoff.lat,
            dropoff_lng: request.dropoff.lng,
            dropoff_address: request.dropoff.address.clone(),
            ride_type: tier,
            status: RideStatus::Searching.to_string(),
            estimated_fare,
            estimated_distance_km: distance_km,
            estimated_duration_min,
            surge_multiplier,
            matched_at: None,
            search_attempts: 0,
            cancelled_by: None,
            cancel_reason: None,
            cancellation_fee: None,
            idempotency_key: request.idempotency_key.clone(),
            payment_method_id: request.payment_method_id.clone(),
            scheduled_at: request.scheduled_at,
            created_at: Utc::now(),
        };

        match state.persistence.insert_ride(&ride).await {
            Ok(()) => {}
            Err(EngineError::Conflict { .. }) => {
                // Lost the unique-index race; the first writer's ride wins.
                let key = request.idempotency_key.as_deref().unwrap_or_default();
                let existing = state
                    .persistence
                    .find_ride_by_idempotency_key(key)
                    .await?
                    .ok_or_else(|| EngineError::Internal {
                        message: format!("ride insert conflicted but key '{key}' not found"),
                    })?;
                return ride_response(&existing);
            }
            Err(e) => return Err(e),
        }

        state
            .announce(&ride.id, "ride_created", json!({ "status": "SEARCHING" }))
            .await;
        info!(ride_id = %ride.id, "Ride created, matching started");

        // Fire-and-forget: outcomes surface via ride:<id> or getRide.
        let _ = matching::spawn_matching(self.clone(), ride.id.clone());

        ride_response(&ride)
    }

    /// `getRide` - read a ride projection, served from cache when warm.
    pub async fn get_ride(&self, ride_id: &str) -> Result<RideResponse> {
        if let Some(cached) = self
            .state
            .ride_cache
            .lock()
            .expect("ride cache poisoned")
            .get(ride_id)
        {
            return ride_response(cached);
        }

        let ride = self
            .state
            .persistence
            .get_ride(ride_id)
            .await?
            .ok_or_else(|| EngineError::not_found("ride", ride_id))?;
        self.state
            .ride_cache
            .lock()
            .expect("ride cache poisoned")
            .insert(ride_id.to_string(), ride.clone());

        ride_response(&ride)
    }

    /// `listRiderHistory` - page through a rider's rides, newest first.
    pub async fn list_rider_history(
        &self,
        request: ListRiderHistoryRequest,
    ) -> Result<RideHistoryResponse> {
        if request.page == 0 {
            return Err(EngineError::invalid_input("page", "pages are 1-based"));
        }
        let limit = request.limit.clamp(1, 100);

        self.state
            .persistence
            .get_rider(&request.rider_id)
            .await?
            .ok_or_else(|| EngineError::not_found("rider", &request.rider_id))?;

        let offset = i64::from(request.page - 1) * i64::from(limit);
        let rides = self
            .state
            .persistence
            .list_rider_rides(&request.rider_id, i64::from(limit), offset)
            .await?;
        let total = self
            .state
            .persistence
            .count_rider_rides(&request.rider_id)
            .await?;

        Ok(RideHistoryResponse {
            rides: rides.iter().map(ride_response).collect::<Result<_>>()?,
            page: request.page,
            limit,
            total,
        })
    }

    /// `updateDriverLocation` - hot-path ping ingest.
    pub fn update_driver_location(
        &self,
        request: &UpdateDriverLocationRequest,
    ) -> Result<AckResponse> {
        self.state.pipeline.record_ping(
            &request.driver_id,
            request.latitude,
            request.longitude,
            request.heading,
            request.speed,
            request.accuracy,
        )?;
        Ok(AckResponse::ok())
    }

    /// `updateDriverAvailability` - driver goes online, offline or on break.
    ///
    /// `ON_RIDE` cannot be requested directly; it is entered only through
    /// matching. A driver with an active ride cannot change status.
    #[instrument(skip(self, request), fields(driver_id = %request.driver_id))]
    pub async fn update_driver_availability(
        &self,
        request: UpdateDriverAvailabilityRequest,
    ) -> Result<DriverInfoResponse> {
        let state = &self.state;

        if request.status == DriverStatus::OnRide {
            return Err(EngineError::invalid_input(
                "status",
                "ON_RIDE is entered through matching, not requested",
            ));
        }

        let driver = state
            .persistence
            .get_driver(&request.driver_id)
            .await?
            .ok_or_else(|| EngineError::not_found("driver", &request.driver_id))?;

        let current = parse_enum::<DriverStatus>(&driver.status, "driver status")?;
        if current == DriverStatus::OnRide
            && state
                .persistence
                .find_active_ride_for_driver(&driver.id)
                .await?
                .is_some()
        {
            return Err(EngineError::conflict(
                format!("driver:{}", driver.id),
                "driver is on an active ride",
            ));
        }

        state
            .persistence
            .update_driver_status(&driver.id, None, &request.status.to_string())
            .await?;

        let tier = parse_enum::<VehicleTier>(&driver.vehicle_tier, "vehicle tier")?;
        state
            .directory
            .set_status(&driver.id, request.status, tier, driver.rating);

        match request.status {
            DriverStatus::Available => {
                // Indexable immediately when a recent position is known;
                // otherwise the first ping inserts it.
                if let (Some(lat), Some(lng), Some(at)) =
                    (driver.last_lat, driver.last_lng, driver.last_location_update)
                {
                    state.geo.add(
                        &driver.id,
                        lat,
                        lng,
                        crate::geo::GeoMeta {
                            tier,
                            rating: driver.rating,
                        },
                        at.timestamp_millis(),
                    );
                }
            }
            _ => state.geo.remove(&driver.id),
        }

        info!(status = %request.status, "Driver availability updated");

        let mut updated = driver;
        updated.status = request.status.to_string();
        driver_response(&updated)
    }

    /// Events recorded for a ride, oldest first.
    pub async fn list_ride_events(&self, ride_id: &str) -> Result<Vec<(String, Option<Value>)>> {
        let events = self.state.persistence.list_ride_events(ride_id).await?;
        events
            .into_iter()
            .map(|event| {
                let payload = event
                    .payload
                    .as_deref()
                    .map(serde_json::from_str)
                    .transpose()?;
                Ok((event.event_type, payload))
            })
            .collect()
    }
}

impl EngineState {
    /// Shared side-effect path of every transition: audit event (non-fatal),
    /// cache invalidation, bus publish.
    pub(crate) async fn announce(&self, ride_id: &str, event_type: &str, mut payload: Value) {
        let event = RideEventRecord {
            id: None,
            ride_id: ride_id.to_string(),
            event_type: event_type.to_string(),
            payload: Some(payload.to_string()),
            created_at: Utc::now(),
        };
        if let Err(e) = self.persistence.insert_ride_event(&event).await {
            warn!(ride_id, event_type, error = %e, "Failed to insert ride event");
        }

        self.invalidate_ride(ride_id);

        if let Value::Object(ref mut map) = payload {
            map.insert("type".to_string(), Value::String(event_type.to_string()));
            map.insert("rideId".to_string(), Value::String(ride_id.to_string()));
        }
        self.bus.publish(&UpdateBus::ride_topic(ride_id), payload);
    }

    pub(crate) fn invalidate_ride(&self, ride_id: &str) {
        let _ = self
            .ride_cache
            .lock()
            .expect("ride cache poisoned")
            .remove(ride_id);
    }

    /// Durable user-visible notification; never fails the request.
    pub(crate) async fn notify(
        &self,
        user_id: &str,
        user_kind: &str,
        ride_id: Option<&str>,
        kind: NotificationKind,
        body: String,
    ) {
        let notification = NotificationRecord {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            user_kind: user_kind.to_string(),
            ride_id: ride_id.map(str::to_string),
            kind: kind.to_string(),
            body,
            created_at: Utc::now(),
        };
        if let Err(e) = self.persistence.insert_notification(&notification).await {
            warn!(user_id, kind = %kind, error = %e, "Failed to insert notification");
        }
    }
}

pub(crate) fn parse_enum<T: FromStr>(raw: &str, what: &str) -> Result<T> {
    T::from_str(raw).map_err(|_| EngineError::Internal {
        message: format!("unparseable {what}: '{raw}'"),
    })
}

pub(crate) fn ride_response(ride: &RideRecord) -> Result<RideResponse> {
    Ok(RideResponse {
        id: ride.id.clone(),
        rider_id: ride.rider_id.clone(),
        driver_id: ride.driver_id.clone(),
        pickup: Location {
            lat: ride.pickup_lat,
            lng: ride.pickup_lng,
            address: ride.pickup_address.clone(),
        },
        dropoff: Location {
            lat: ride.dropoff_lat,
            lng: ride.dropoff_lng,
            address: ride.dropoff_address.clone(),
        },
        ride_type: parse_enum(&ride.ride_type, "ride type")?,
        status: parse_enum(&ride.status, "ride status")?,
        estimated_fare: ride.estimated_fare,
        estimated_distance_km: ride.estimated_distance_km,
        estimated_duration_min: ride.estimated_duration_min,
        surge_multiplier: ride.surge_multiplier,
        matched_at: ride.matched_at,
        search_attempts: ride.search_attempts,
        cancelled_by: ride
            .cancelled_by
            .as_deref()
            .map(|by| parse_enum(by, "cancel actor"))
            .transpose()?,
        cancel_reason: ride.cancel_reason.clone(),
        cancellation_fee: ride.cancellation_fee,
        created_at: ride.created_at,
    })
}

pub(crate) fn trip_response(trip: &TripRecord) -> Result<TripResponse> {
    Ok(TripResponse {
        id: trip.id.clone(),
        ride_id: trip.ride_id.clone(),
        driver_id: trip.driver_id.clone(),
        status: parse_enum(&trip.status, "trip status")?,
        start_time: trip.start_time,
        end_time: trip.end_time,
        actual_distance_km: trip.actual_distance_km,
        base_fare: trip.base_fare,
        per_km_rate: trip.per_km_rate,
        per_min_rate: trip.per_min_rate,
        surge_multiplier: trip.surge_multiplier,
        distance_fare: trip.distance_fare,
        time_fare: trip.time_fare,
        surge_amount: trip.surge_amount,
        discount: trip.discount,
        final_fare: trip.final_fare,
        platform_fee: trip.platform_fee,
        driver_earnings: trip.driver_earnings,
    })
}

pub(crate) fn payment_response(payment: &PaymentRecord) -> Result<PaymentResponse> {
    Ok(PaymentResponse {
        id: payment.id.clone(),
        trip_id: payment.trip_id.clone(),
        amount: payment.amount,
        status: parse_enum(&payment.status, "payment status")?,
        psp_transaction_id: payment.psp_transaction_id.clone(),
        failure_reason: payment.failure_reason.clone(),
        attempts: payment.attempts,
        completed_at: payment.completed_at,
    })
}

pub(crate) fn driver_response(driver: &DriverRecord) -> Result<DriverInfoResponse> {
    Ok(DriverInfoResponse {
        id: driver.id.clone(),
        status: parse_enum(&driver.status, "driver status")?,
        vehicle_tier: parse_enum(&driver.vehicle_tier, "vehicle tier")?,
        rating: driver.rating,
        last_position: match (driver.last_lat, driver.last_lng) {
            (Some(lat), Some(lng)) => Some(GeoPoint::new(lat, lng)),
            _ => None,
        },
        last_location_update: driver.last_location_update,
    })
}
