// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Response DTOs echoing persisted entity projections.
//!
//! Responses carry the persisted state of the touched entity after the
//! operation, never a partial view of in-flight state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{
    CancelActor, DriverStatus, GeoPoint, Location, PaymentStatus, RideStatus, TripStatus,
    VehicleTier,
};

/// Projection of a ride row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RideResponse {
    /// Ride identifier.
    pub id: String,
    /// The requesting rider.
    pub rider_id: String,
    /// The matched driver, once one is assigned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_id: Option<String>,
    /// Pickup location.
    pub pickup: Location,
    /// Dropoff location.
    pub dropoff: Location,
    /// Requested vehicle tier.
    pub ride_type: VehicleTier,
    /// Current lifecycle status.
    pub status: RideStatus,
    /// Straight-line fare estimate captured at creation.
    pub estimated_fare: f64,
    /// Straight-line distance estimate in kilometers.
    pub estimated_distance_km: f64,
    /// Duration estimate in minutes.
    pub estimated_duration_min: f64,
    /// Surge multiplier captured at creation.
    pub surge_multiplier: f64,
    /// When a driver was matched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_at: Option<DateTime<Utc>>,
    /// Number of matching attempts consumed so far.
    pub search_attempts: i32,
    /// Who cancelled, for cancelled rides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_by: Option<CancelActor>,
    /// Cancellation reason, when one was given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,
    /// Cancellation fee in whole rupees, for fee-bearing cancellations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancellation_fee: Option<i64>,
    /// When the ride was created.
    pub created_at: DateTime<Utc>,
}

/// A page of ride history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RideHistoryResponse {
    /// Rides on this page, newest first.
    pub rides: Vec<RideResponse>,
    /// 1-based page number echoed back.
    pub page: u32,
    /// Page size echoed back.
    pub limit: u32,
    /// Total rides for this rider.
    pub total: i64,
}

/// Projection of a driver row returned by availability changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverInfoResponse {
    /// Driver identifier.
    pub id: String,
    /// Current availability status.
    pub status: DriverStatus,
    /// Vehicle tier this driver serves.
    pub vehicle_tier: VehicleTier,
    /// Aggregate rating.
    pub rating: f64,
    /// Last known position, when one has been reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_position: Option<GeoPoint>,
    /// When the last position was reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_location_update: Option<DateTime<Utc>>,
}

/// Result of a successful `acceptRide`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptRideResponse {
    /// The claimed ride.
    pub ride_id: String,
    /// Human-readable confirmation.
    pub message: String,
}

/// Result of `markArrived`: the OTP the rider must read to the driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkArrivedResponse {
    /// 4-digit trip start OTP.
    pub otp: String,
}

/// Generic acknowledgement for fire-and-forget operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckResponse {
    /// Always true on the success path.
    pub ok: bool,
}

impl AckResponse {
    /// The canonical success acknowledgement.
    pub fn ok() -> Self {
        Self { ok: true }
    }
}

/// Projection of a trip row including the fare breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripResponse {
    /// Trip identifier.
    pub id: String,
    /// The owning ride.
    pub ride_id: String,
    /// The driver executing the trip.
    pub driver_id: String,
    /// Execution status.
    pub status: TripStatus,
    /// When the OTP was verified and the trip started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    /// When the trip ended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Actual distance travelled in kilometers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_distance_km: Option<f64>,
    /// Frozen base fare at trip creation.
    pub base_fare: f64,
    /// Frozen per-kilometer rate.
    pub per_km_rate: f64,
    /// Frozen per-minute rate.
    pub per_min_rate: f64,
    /// Surge multiplier inherited from the ride.
    pub surge_multiplier: f64,
    /// Distance component of the fare.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_fare: Option<f64>,
    /// Time component of the fare.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_fare: Option<f64>,
    /// Surge amount on top of the subtotal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub surge_amount: Option<f64>,
    /// Discount applied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discount: Option<f64>,
    /// Final fare charged to the rider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_fare: Option<f64>,
    /// Platform's share of the final fare.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_fee: Option<f64>,
    /// Driver's share of the final fare.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_earnings: Option<f64>,
}

/// Projection of a payment row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResponse {
    /// Payment identifier.
    pub id: String,
    /// The charged trip.
    pub trip_id: String,
    /// Amount charged.
    pub amount: f64,
    /// Settlement status.
    pub status: PaymentStatus,
    /// PSP transaction reference on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub psp_transaction_id: Option<String>,
    /// Failure reason on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    /// Number of charge attempts so far.
    pub attempts: i32,
    /// When the payment completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Result of `refundPayment`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundResponse {
    /// The refund row created.
    pub refund_id: String,
    /// The payment's status after the refund (REFUNDED or
    /// PARTIALLY_REFUNDED).
    pub status: PaymentStatus,
}
