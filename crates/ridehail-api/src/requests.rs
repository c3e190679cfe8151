// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Request DTOs for every engine operation.
//!
//! Field names serialize in camelCase to match the public contract. Optional
//! fields deserialize as absent rather than null-rejecting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{CancelActor, DriverStatus, GeoPoint, Location, VehicleTier};

/// `createRide` - request transport from a pickup to a dropoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRideRequest {
    /// The requesting rider.
    pub rider_id: String,
    /// Pickup coordinates with optional address.
    pub pickup: Location,
    /// Dropoff coordinates with optional address.
    pub dropoff: Location,
    /// Requested vehicle tier.
    pub ride_type: VehicleTier,
    /// Preferred payment method, if the rider selected one up front.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_method_id: Option<String>,
    /// Requested future start time. Accepted and persisted; dispatching
    /// scheduled rides is not implemented.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Caller-supplied key making this request safe to retry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

/// `getRide` - fetch a single ride projection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetRideRequest {
    /// The ride to fetch.
    pub ride_id: String,
}

/// `cancelRide` - cancel a non-terminal ride.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRideRequest {
    /// The ride to cancel.
    pub ride_id: String,
    /// Which participant is cancelling.
    pub cancelled_by: CancelActor,
    /// Optional free-form reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// `listRiderHistory` - page through a rider's past rides, newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRiderHistoryRequest {
    /// The rider whose history to list.
    pub rider_id: String,
    /// 1-based page number.
    pub page: u32,
    /// Page size; the engine caps this.
    pub limit: u32,
}

/// `updateDriverLocation` - a single high-frequency position ping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDriverLocationRequest {
    /// The reporting driver.
    pub driver_id: String,
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Heading in degrees clockwise from north, when the device reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    /// Speed in km/h; must be non-negative when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    /// Reported GPS accuracy in meters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
}

/// `updateDriverAvailability` - driver goes online, offline or on break.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDriverAvailabilityRequest {
    /// The driver changing status.
    pub driver_id: String,
    /// The requested status. `ON_RIDE` cannot be requested directly; it is
    /// only entered through matching.
    pub status: DriverStatus,
}

/// `acceptRide` - a driver claims a searching ride.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptRideRequest {
    /// The ride being claimed.
    pub ride_id: String,
    /// The claiming driver.
    pub driver_id: String,
}

/// `markArriving` - the matched driver reports being en route.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkArrivingRequest {
    /// The ride in question.
    pub ride_id: String,
    /// Must be the matched driver.
    pub driver_id: String,
}

/// `markArrived` - the matched driver reports reaching the pickup point.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkArrivedRequest {
    /// The ride in question.
    pub ride_id: String,
    /// Must be the matched driver.
    pub driver_id: String,
}

/// `startTrip` - begin the trip after OTP verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartTripRequest {
    /// The trip to start.
    pub trip_id: String,
    /// The 4-digit OTP shown to the rider at arrival.
    pub start_otp: String,
}

/// `endTrip` - finish the trip and settle the fare.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndTripRequest {
    /// The trip to end.
    pub trip_id: String,
    /// Where the trip ended.
    pub end_location: GeoPoint,
    /// Actual distance travelled in kilometers.
    pub actual_distance: f64,
    /// Optional travelled path as an ordered list of points.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_path: Option<Vec<GeoPoint>>,
}

/// `processPayment` - idempotently charge a completed trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessPaymentRequest {
    /// The completed trip to charge.
    pub trip_id: String,
    /// The payment method to charge against.
    pub payment_method_id: String,
    /// Caller-supplied key; repeated calls with the same key replay the
    /// first response.
    pub idempotency_key: String,
}

/// `refundPayment` - refund part or all of a completed payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundPaymentRequest {
    /// The payment to refund.
    pub payment_id: String,
    /// Refund amount; must not exceed the amount paid.
    pub amount: f64,
    /// Free-form reason recorded with the refund.
    pub reason: String,
}
