// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Ride and trip state transitions.
//!
//! Each operation follows the same shape: load and validate, run the
//! guarded persistence transition, then emit the side effects (event,
//! cache invalidation, publish, notification). A guard that misses means
//! another actor moved the ride first and surfaces as `Conflict`.

use chrono::Utc;
use rand::Rng;
use serde_json::json;
use tracing::{info, instrument};
use uuid::Uuid;

use ridehail_api::{
    AcceptRideRequest, AcceptRideResponse, AckResponse, CancelRideRequest, DriverStatus,
    EndTripRequest, MarkArrivedRequest, MarkArrivedResponse, MarkArrivingRequest,
    NotificationKind, RideResponse, RideStatus, StartTripRequest, TripResponse, TripStatus,
};

use crate::error::{EngineError, Result};
use crate::persistence::{RideRecord, TripRecord, TripSettlement};
use crate::pricing::{self, FareInputs};

use super::matching::{MATCHING_LOCK_TTL, matching_lock_name};
use super::{DEFAULT_REGION, RideEngine, parse_enum, ride_response, trip_response};

/// Ride statuses from which a cancel is legal, in wire form.
const CANCELLABLE: [&str; 4] = ["SEARCHING", "MATCHED", "DRIVER_ARRIVING", "ARRIVED"];

fn generate_otp() -> String {
    rand::thread_rng().gen_range(1000..=9999).to_string()
}

impl RideEngine {
    /// `acceptRide` - a driver claims a searching ride.
    ///
    /// Exactly one of any number of concurrent callers succeeds; the rest
    /// receive `Conflict`.
    #[instrument(skip(self, request), fields(ride_id = %request.ride_id, driver_id = %request.driver_id))]
    pub async fn accept_ride(&self, request: AcceptRideRequest) -> Result<AcceptRideResponse> {
        let state = &self.state;

        let driver = state
            .persistence
            .get_driver(&request.driver_id)
            .await?
            .ok_or_else(|| EngineError::not_found("driver", &request.driver_id))?;
        if driver.status != DriverStatus::Available.to_string() {
            return Err(EngineError::conflict(
                format!("driver:{}", driver.id),
                "driver is not available",
            ));
        }

        let ride = state
            .persistence
            .get_ride(&request.ride_id)
            .await?
            .ok_or_else(|| EngineError::not_found("ride", &request.ride_id))?;
        if ride.status != RideStatus::Searching.to_string() {
            return Err(EngineError::conflict(
                format!("ride:{}", ride.id),
                "ride is no longer searching",
            ));
        }

        if self.try_assign(&request.ride_id, &request.driver_id).await? {
            info!("Ride accepted");
            Ok(AcceptRideResponse {
                ride_id: request.ride_id,
                message: "Ride accepted. Head to the pickup point.".to_string(),
            })
        } else {
            Err(EngineError::conflict(
                format!("driver:{}", request.driver_id),
                "driver lost availability before the ride was assigned",
            ))
        }
    }

    /// `cancelRide` - cancel a non-terminal ride.
    ///
    /// Takes the matching lock so a cancel racing the matching loop is
    /// serialized: whichever runs second observes the first one's state.
    #[instrument(skip(self, request), fields(ride_id = %request.ride_id))]
    pub async fn cancel_ride(&self, request: CancelRideRequest) -> Result<RideResponse> {
        let state = self.state.clone();
        let ride_id = request.ride_id.clone();

        let cancelled = state
            .locks
            .with_lock(&matching_lock_name(&ride_id), MATCHING_LOCK_TTL, || async {
                let ride = state
                    .persistence
                    .get_ride(&ride_id)
                    .await?
                    .ok_or_else(|| EngineError::not_found("ride", &ride_id))?;
                let status = parse_enum::<RideStatus>(&ride.status, "ride status")?;
                if status.is_terminal() {
                    return Err(EngineError::conflict(
                        format!("ride:{}", ride.id),
                        format!("ride is already {status}"),
                    ));
                }
                if status == RideStatus::InProgress {
                    return Err(EngineError::conflict(
                        format!("ride:{}", ride.id),
                        "an in-progress trip can only be completed",
                    ));
                }

                // Fee binds once a driver committed; metadata only.
                let fee = status
                    .cancellation_fee_applies()
                    .then(|| pricing::cancellation_fee(ride.estimated_fare));

                state
                    .persistence
                    .cancel_ride(
                        &ride_id,
                        &CANCELLABLE,
                        &request.cancelled_by.to_string(),
                        request.reason.as_deref(),
                        fee,
                    )
                    .await?
                    .ok_or_else(|| {
                        EngineError::conflict(
                            format!("ride:{ride_id}"),
                            "ride changed state during cancellation",
                        )
                    })
            })
            .await?;

        if let Some(ref driver_id) = cancelled.driver_id {
            self.state
                .directory
                .clear_ride(driver_id, DriverStatus::Available);
        }

        self.state
            .announce(
                &cancelled.id,
                "ride_cancelled",
                json!({
                    "status": "CANCELLED",
                    "cancelledBy": request.cancelled_by.to_string(),
                    "cancellationFee": cancelled.cancellation_fee,
                }),
            )
            .await;
        self.state
            .notify(
                &cancelled.rider_id,
                "rider",
                Some(&cancelled.id),
                NotificationKind::RideCancelled,
                format!("Your ride was cancelled by the {}.", request.cancelled_by),
            )
            .await;

        info!(cancelled_by = %request.cancelled_by, "Ride cancelled");
        ride_response(&cancelled)
    }

    /// `markArriving` - the matched driver reports being en route.
    #[instrument(skip(self, request), fields(ride_id = %request.ride_id))]
    pub async fn mark_arriving(&self, request: MarkArrivingRequest) -> Result<AckResponse> {
        let state = &self.state;
        let ride = self
            .ride_for_driver(&request.ride_id, &request.driver_id)
            .await?;

        let moved = state
            .persistence
            .update_ride_status(&ride.id, &["MATCHED"], "DRIVER_ARRIVING")
            .await?;
        if !moved {
            return Err(EngineError::conflict(
                format!("ride:{}", ride.id),
                "ride is not in MATCHED",
            ));
        }

        state
            .announce(&ride.id, "driver_arriving", json!({ "status": "DRIVER_ARRIVING" }))
            .await;
        state
            .notify(
                &ride.rider_id,
                "rider",
                Some(&ride.id),
                NotificationKind::DriverArriving,
                "Your driver is on the way to the pickup point.".to_string(),
            )
            .await;

        Ok(AckResponse::ok())
    }

    /// `markArrived` - the driver is at the pickup; issue the start OTP and
    /// create the trip with frozen pricing inputs.
    #[instrument(skip(self, request), fields(ride_id = %request.ride_id))]
    pub async fn mark_arrived(&self, request: MarkArrivedRequest) -> Result<MarkArrivedResponse> {
        let state = &self.state;
        let ride = self
            .ride_for_driver(&request.ride_id, &request.driver_id)
            .await?;
        if ride.status != RideStatus::DriverArriving.to_string() {
            return Err(EngineError::conflict(
                format!("ride:{}", ride.id),
                "ride is not in DRIVER_ARRIVING",
            ));
        }

        let otp = generate_otp();
        let (base_fare, per_km_rate, per_min_rate) = match state
            .persistence
            .find_active_pricing(DEFAULT_REGION, &ride.ride_type)
            .await?
        {
            Some(pricing) => (pricing.base_fare, pricing.per_km_rate, pricing.per_min_rate),
            None => (
                state.config.default_base_fare,
                state.config.default_per_km_rate,
                state.config.default_per_min_rate,
            ),
        };

        // Trip first: a ride at ARRIVED must always have its trip row.
        let trip = TripRecord {
            id: Uuid::new_v4().to_string(),
            ride_id: ride.id.clone(),
            driver_id: request.driver_id.clone(),
            status: TripStatus::Pending.to_string(),
            start_otp: otp.clone(),
            start_time: None,
            end_time: None,
            actual_distance_km: None,
            route_path: None,
            base_fare,
            per_km_rate,
            per_min_rate,
            surge_multiplier: ride.surge_multiplier,
            distance_fare: None,
            time_fare: None,
            surge_amount: None,
            discount: None,
            final_fare: None,
            platform_fee: None,
            driver_earnings: None,
            created_at: Utc::now(),
        };
        let trip = state.persistence.upsert_pending_trip(&trip).await?;

        let moved = state
            .persistence
            .update_ride_status(&ride.id, &["DRIVER_ARRIVING"], "ARRIVED")
            .await?;
        if !moved {
            return Err(EngineError::conflict(
                format!("ride:{}", ride.id),
                "ride changed state before arrival was recorded",
            ));
        }

        state
            .announce(&ride.id, "driver_arrived", json!({ "status": "ARRIVED" }))
            .await;
        state
            .notify(
                &ride.rider_id,
                "rider",
                Some(&ride.id),
                NotificationKind::DriverArrived,
                format!("Your driver has arrived. Share OTP {} to start the trip.", trip.start_otp),
            )
            .await;

        info!(trip_id = %trip.id, "Driver arrived, OTP issued");
        Ok(MarkArrivedResponse { otp: trip.start_otp })
    }

    /// `startTrip` - verify the OTP and begin the trip.
    ///
    /// A wrong OTP leaves every row untouched and returns `Validation`.
    #[instrument(skip(self, request), fields(trip_id = %request.trip_id))]
    pub async fn start_trip(&self, request: StartTripRequest) -> Result<TripResponse> {
        let state = &self.state;

        let trip = state
            .persistence
            .get_trip(&request.trip_id)
            .await?
            .ok_or_else(|| EngineError::not_found("trip", &request.trip_id))?;
        if trip.status != TripStatus::Pending.to_string() {
            return Err(EngineError::conflict(
                format!("trip:{}", trip.id),
                "trip is not awaiting start",
            ));
        }
        if trip.start_otp != request.start_otp {
            return Err(EngineError::validation("start OTP does not match"));
        }

        let started = state
            .persistence
            .start_trip(&trip.id, &trip.ride_id, Utc::now())
            .await?;
        if !started {
            return Err(EngineError::conflict(
                format!("trip:{}", trip.id),
                "trip or ride changed state before start",
            ));
        }

        state
            .announce(&trip.ride_id, "trip_started", json!({ "status": "IN_PROGRESS" }))
            .await;
        info!(ride_id = %trip.ride_id, "Trip started");

        let started_trip = state
            .persistence
            .get_trip(&trip.id)
            .await?
            .ok_or_else(|| EngineError::Internal {
                message: format!("trip '{}' vanished after start", trip.id),
            })?;
        trip_response(&started_trip)
    }

    /// `endTrip` - settle the fare and complete the ride.
    #[instrument(skip(self, request), fields(trip_id = %request.trip_id))]
    pub async fn end_trip(&self, request: EndTripRequest) -> Result<TripResponse> {
        let state = &self.state;

        if !request.end_location.is_valid() {
            return Err(EngineError::invalid_input(
                "endLocation",
                "coordinates out of range",
            ));
        }
        if !request.actual_distance.is_finite() || request.actual_distance < 0.0 {
            return Err(EngineError::invalid_input(
                "actualDistance",
                "must be a non-negative number",
            ));
        }

        let trip = state
            .persistence
            .get_trip(&request.trip_id)
            .await?
            .ok_or_else(|| EngineError::not_found("trip", &request.trip_id))?;
        if trip.status != TripStatus::Started.to_string() {
            return Err(EngineError::conflict(
                format!("trip:{}", trip.id),
                "trip is not in progress",
            ));
        }
        let start_time = trip.start_time.ok_or_else(|| EngineError::Internal {
            message: format!("started trip '{}' has no start time", trip.id),
        })?;

        let end_time = Utc::now();
        let duration_secs = (end_time - start_time).num_milliseconds() as f64 / 1000.0;
        let fare = pricing::calculate_fare(FareInputs {
            distance_km: request.actual_distance,
            duration_secs: duration_secs.max(0.0),
            base_fare: trip.base_fare,
            per_km_rate: trip.per_km_rate,
            per_min_rate: trip.per_min_rate,
            surge_multiplier: trip.surge_multiplier,
            discount: 0.0,
        });

        let route_path = request
            .route_path
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let settlement = TripSettlement {
            trip_id: trip.id.clone(),
            end_time,
            actual_distance_km: request.actual_distance,
            route_path,
            distance_fare: fare.distance_fare,
            time_fare: fare.time_fare,
            surge_amount: fare.surge_amount,
            discount: 0.0,
            final_fare: fare.final_fare,
            platform_fee: fare.platform_fee,
            driver_earnings: fare.driver_earnings,
            receipt_tax: pricing::receipt_tax(fare.final_fare),
        };

        let settled = state
            .persistence
            .complete_trip(&settlement)
            .await?
            .ok_or_else(|| {
                EngineError::conflict(
                    format!("trip:{}", trip.id),
                    "trip changed state before settlement",
                )
            })?;

        self.state
            .directory
            .clear_ride(&trip.driver_id, DriverStatus::Available);

        state
            .announce(
                &trip.ride_id,
                "ride_completed",
                json!({ "status": "COMPLETED", "finalFare": fare.final_fare }),
            )
            .await;

        let ride = state.persistence.get_ride(&trip.ride_id).await?;
        if let Some(ride) = ride {
            state
                .notify(
                    &ride.rider_id,
                    "rider",
                    Some(&trip.ride_id),
                    NotificationKind::RideCompleted,
                    format!("Trip completed. Fare: ₹{:.2}.", fare.final_fare),
                )
                .await;
        }

        info!(ride_id = %trip.ride_id, final_fare = fare.final_fare, "Trip settled");
        trip_response(&settled)
    }

    /// Load a ride and require it to be assigned to `driver_id`.
    async fn ride_for_driver(&self, ride_id: &str, driver_id: &str) -> Result<RideRecord> {
        let ride = self
            .state
            .persistence
            .get_ride(ride_id)
            .await?
            .ok_or_else(|| EngineError::not_found("ride", ride_id))?;
        if ride.driver_id.as_deref() != Some(driver_id) {
            return Err(EngineError::validation(
                "driver is not assigned to this ride",
            ));
        }
        Ok(ride)
    }
}
