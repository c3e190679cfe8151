// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interfaces and backends for ridehail-core.
//!
//! This module defines the persistence abstraction and backend
//! implementations. The store owns every entity; the engine and the other
//! components hold identifiers and read through it. Race-sensitive
//! transitions are expressed as guarded, transactional trait methods so the
//! single-winner guarantees live next to the data they protect.

pub mod postgres;
pub mod sqlite;

pub use self::postgres::PostgresPersistence;
pub use self::sqlite::SqlitePersistence;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::EngineError;

/// Rider row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RiderRecord {
    /// Stable rider identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Contact phone number.
    pub phone: String,
    /// Contact email.
    pub email: String,
    /// Aggregate rating.
    pub rating: f64,
    /// Lifetime completed rides.
    pub total_rides: i64,
    /// When the rider was created.
    pub created_at: DateTime<Utc>,
}

/// Driver row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DriverRecord {
    /// Stable driver identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Contact phone number.
    pub phone: String,
    /// Vehicle descriptor (make, model, plate).
    pub vehicle: String,
    /// Tier this driver serves (STANDARD, PREMIUM, XL).
    pub vehicle_tier: String,
    /// Aggregate rating.
    pub rating: f64,
    /// Share of offers accepted.
    pub acceptance_rate: f64,
    /// Lifetime completed trips.
    pub total_trips: i64,
    /// Current status (OFFLINE, AVAILABLE, ON_RIDE, BREAK).
    pub status: String,
    /// Last known latitude.
    pub last_lat: Option<f64>,
    /// Last known longitude.
    pub last_lng: Option<f64>,
    /// When the last position was persisted.
    pub last_location_update: Option<DateTime<Utc>>,
    /// When the driver was created.
    pub created_at: DateTime<Utc>,
}

/// Ride row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RideRecord {
    /// Ride identifier.
    pub id: String,
    /// The requesting rider.
    pub rider_id: String,
    /// The matched driver, once assigned.
    pub driver_id: Option<String>,
    /// Pickup latitude.
    pub pickup_lat: f64,
    /// Pickup longitude.
    pub pickup_lng: f64,
    /// Pickup display address.
    pub pickup_address: Option<String>,
    /// Dropoff latitude.
    pub dropoff_lat: f64,
    /// Dropoff longitude.
    pub dropoff_lng: f64,
    /// Dropoff display address.
    pub dropoff_address: Option<String>,
    /// Requested tier.
    pub ride_type: String,
    /// Current lifecycle status.
    pub status: String,
    /// Fare estimate captured at creation.
    pub estimated_fare: f64,
    /// Straight-line distance estimate in km.
    pub estimated_distance_km: f64,
    /// Duration estimate in minutes.
    pub estimated_duration_min: f64,
    /// Surge multiplier captured at creation.
    pub surge_multiplier: f64,
    /// When a driver was matched.
    pub matched_at: Option<DateTime<Utc>>,
    /// Matching attempts consumed.
    pub search_attempts: i32,
    /// Who cancelled (rider, driver, system).
    pub cancelled_by: Option<String>,
    /// Free-form cancellation reason.
    pub cancel_reason: Option<String>,
    /// Cancellation fee in whole rupees; metadata only, never charged.
    pub cancellation_fee: Option<i64>,
    /// Caller-supplied idempotency key, unique when present.
    pub idempotency_key: Option<String>,
    /// Preferred payment method.
    pub payment_method_id: Option<String>,
    /// Requested future start; persisted, never dispatched.
    pub scheduled_at: Option<DateTime<Utc>>,
    /// When the ride was created.
    pub created_at: DateTime<Utc>,
}

/// Trip row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TripRecord {
    /// Trip identifier.
    pub id: String,
    /// The owning ride (unique).
    pub ride_id: String,
    /// The executing driver.
    pub driver_id: String,
    /// Execution status (PENDING, STARTED, COMPLETED, CANCELLED).
    pub status: String,
    /// 4-digit OTP gating trip start.
    pub start_otp: String,
    /// When the OTP was verified.
    pub start_time: Option<DateTime<Utc>>,
    /// When the trip ended.
    pub end_time: Option<DateTime<Utc>>,
    /// Actual distance travelled in km.
    pub actual_distance_km: Option<f64>,
    /// Travelled path as a JSON array of points.
    pub route_path: Option<String>,
    /// Frozen base fare.
    pub base_fare: f64,
    /// Frozen per-km rate.
    pub per_km_rate: f64,
    /// Frozen per-minute rate.
    pub per_min_rate: f64,
    /// Surge multiplier inherited from the ride.
    pub surge_multiplier: f64,
    /// Distance fare component.
    pub distance_fare: Option<f64>,
    /// Time fare component.
    pub time_fare: Option<f64>,
    /// Surge amount component.
    pub surge_amount: Option<f64>,
    /// Discount applied.
    pub discount: Option<f64>,
    /// Final fare charged.
    pub final_fare: Option<f64>,
    /// Platform share.
    pub platform_fee: Option<f64>,
    /// Driver share.
    pub driver_earnings: Option<f64>,
    /// When the trip row was created.
    pub created_at: DateTime<Utc>,
}

/// Payment row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PaymentRecord {
    /// Payment identifier.
    pub id: String,
    /// The charged trip (unique).
    pub trip_id: String,
    /// Amount charged.
    pub amount: f64,
    /// Settlement status.
    pub status: String,
    /// Charged payment method.
    pub payment_method_id: String,
    /// PSP transaction reference on success.
    pub psp_transaction_id: Option<String>,
    /// Caller idempotency key (unique when present).
    pub idempotency_key: Option<String>,
    /// Failure reason on failure.
    pub failure_reason: Option<String>,
    /// Charge attempts so far.
    pub attempts: i32,
    /// Attempt ceiling.
    pub max_attempts: i32,
    /// Total refunded so far.
    pub refunded_amount: f64,
    /// When the charge completed.
    pub completed_at: Option<DateTime<Utc>>,
    /// When the charge last failed.
    pub failed_at: Option<DateTime<Utc>>,
    /// When the row was created.
    pub created_at: DateTime<Utc>,
}

/// Refund row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RefundRecord {
    /// Refund identifier.
    pub id: String,
    /// The refunded payment.
    pub payment_id: String,
    /// Refunded amount.
    pub amount: f64,
    /// Recorded reason.
    pub reason: String,
    /// When the refund was issued.
    pub created_at: DateTime<Utc>,
}

/// Earning row, one per completed trip.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EarningRecord {
    /// Earning identifier.
    pub id: String,
    /// The earning driver.
    pub driver_id: String,
    /// The settled trip (unique).
    pub trip_id: String,
    /// Driver's share.
    pub amount: f64,
    /// Platform's share, for reconciliation.
    pub platform_fee: f64,
    /// When the earning was booked.
    pub created_at: DateTime<Utc>,
}

/// Receipt row, one per completed trip.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ReceiptRecord {
    /// Receipt identifier.
    pub id: String,
    /// The settled trip (unique).
    pub trip_id: String,
    /// The billed rider.
    pub rider_id: String,
    /// Fare before tax.
    pub subtotal: f64,
    /// Tax line.
    pub tax: f64,
    /// Subtotal plus tax.
    pub total: f64,
    /// When the receipt was issued.
    pub created_at: DateTime<Utc>,
}

/// Durable user-visible notification. Append-only.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct NotificationRecord {
    /// Notification identifier.
    pub id: String,
    /// Target user id.
    pub user_id: String,
    /// Whether the target is a rider or a driver.
    pub user_kind: String,
    /// The referenced ride, where applicable.
    pub ride_id: Option<String>,
    /// Notification kind (DRIVER_MATCHED, PAYMENT_SUCCESS, ...).
    pub kind: String,
    /// Human-readable body.
    pub body: String,
    /// When the notification was written.
    pub created_at: DateTime<Utc>,
}

/// Append-only ride audit event.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RideEventRecord {
    /// Database primary key (None when inserting new events).
    #[sqlx(default)]
    pub id: Option<i64>,
    /// The audited ride.
    pub ride_id: String,
    /// Event type (ride_created, driver_matched, ...).
    pub event_type: String,
    /// Optional JSON payload.
    pub payload: Option<String>,
    /// When the event occurred.
    pub created_at: DateTime<Utc>,
}

/// Active pricing row for a (region, tier) pair.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PricingConfigRecord {
    /// Pricing config identifier.
    pub id: String,
    /// Region key.
    pub region: String,
    /// Vehicle tier key.
    pub ride_type: String,
    /// Base fare.
    pub base_fare: f64,
    /// Per-kilometer rate.
    pub per_km_rate: f64,
    /// Per-minute rate.
    pub per_min_rate: f64,
    /// Whether this row is in effect.
    pub is_active: bool,
}

/// Surge zone row. The polygon is opaque to the engine.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SurgeZoneRecord {
    /// Zone identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Opaque polygon payload.
    pub polygon: String,
    /// Multiplier applied while the zone is active.
    pub multiplier: f64,
    /// Whether the zone is in effect.
    pub is_active: bool,
}

/// One buffered driver position ping, as persisted.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DriverLocationRecord {
    /// The reporting driver.
    pub driver_id: String,
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lng: f64,
    /// Heading in degrees, when reported.
    pub heading: Option<f64>,
    /// Speed in km/h, when reported.
    pub speed: Option<f64>,
    /// GPS accuracy in meters, when reported.
    pub accuracy: Option<f64>,
    /// When the ping was received.
    pub recorded_at: DateTime<Utc>,
}

/// Outcome of the atomic SEARCHING -> MATCHED assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOutcome {
    /// The ride moved to MATCHED and the driver to ON_RIDE.
    Assigned,
    /// The ride had already left SEARCHING.
    RideNotSearching,
    /// The driver was no longer AVAILABLE; the ride is untouched.
    DriverNotAvailable,
}

/// Everything written when a trip settles.
#[derive(Debug, Clone)]
pub struct TripSettlement {
    /// The trip being settled.
    pub trip_id: String,
    /// When the trip ended.
    pub end_time: DateTime<Utc>,
    /// Actual distance travelled in km.
    pub actual_distance_km: f64,
    /// Travelled path as JSON, when reported.
    pub route_path: Option<String>,
    /// Distance fare component.
    pub distance_fare: f64,
    /// Time fare component.
    pub time_fare: f64,
    /// Surge amount component.
    pub surge_amount: f64,
    /// Discount applied.
    pub discount: f64,
    /// Final fare charged.
    pub final_fare: f64,
    /// Platform share.
    pub platform_fee: f64,
    /// Driver share.
    pub driver_earnings: f64,
    /// Receipt tax line.
    pub receipt_tax: f64,
}

/// Persistence interface used by the engine and the location pipeline.
#[allow(missing_docs)]
#[async_trait]
pub trait Persistence: Send + Sync {
    // -- riders & drivers ---------------------------------------------------

    async fn insert_rider(&self, rider: &RiderRecord) -> Result<(), EngineError>;

    async fn get_rider(&self, rider_id: &str) -> Result<Option<RiderRecord>, EngineError>;

    async fn insert_driver(&self, driver: &DriverRecord) -> Result<(), EngineError>;

    async fn get_driver(&self, driver_id: &str) -> Result<Option<DriverRecord>, EngineError>;

    /// Set a driver's status, optionally guarded on the current status.
    /// Returns whether a row was updated.
    async fn update_driver_status(
        &self,
        driver_id: &str,
        expected: Option<&str>,
        status: &str,
    ) -> Result<bool, EngineError>;

    // -- rides --------------------------------------------------------------

    async fn insert_ride(&self, ride: &RideRecord) -> Result<(), EngineError>;

    async fn get_ride(&self, ride_id: &str) -> Result<Option<RideRecord>, EngineError>;

    async fn find_ride_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<RideRecord>, EngineError>;

    /// Move a ride from one of `from` to `to`. Returns whether the guard
    /// matched and the row moved.
    async fn update_ride_status(
        &self,
        ride_id: &str,
        from: &[&str],
        to: &str,
    ) -> Result<bool, EngineError>;

    async fn increment_search_attempts(&self, ride_id: &str) -> Result<(), EngineError>;

    /// Atomically assign `driver_id` to a SEARCHING ride, moving the driver
    /// AVAILABLE -> ON_RIDE in the same transaction.
    async fn assign_driver(
        &self,
        ride_id: &str,
        driver_id: &str,
        matched_at: DateTime<Utc>,
    ) -> Result<AssignOutcome, EngineError>;

    /// Cancel a ride whose status is one of `from`. Releases the assigned
    /// driver (ON_RIDE -> AVAILABLE) and cancels a pending trip in the same
    /// transaction. Returns the updated ride, or None when the guard missed.
    async fn cancel_ride(
        &self,
        ride_id: &str,
        from: &[&str],
        cancelled_by: &str,
        reason: Option<&str>,
        fee: Option<i64>,
    ) -> Result<Option<RideRecord>, EngineError>;

    async fn list_rider_rides(
        &self,
        rider_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<RideRecord>, EngineError>;

    async fn count_rider_rides(&self, rider_id: &str) -> Result<i64, EngineError>;

    /// The driver's current non-terminal ride, if any.
    async fn find_active_ride_for_driver(
        &self,
        driver_id: &str,
    ) -> Result<Option<RideRecord>, EngineError>;

    // -- trips --------------------------------------------------------------

    /// Create the trip for a ride, or refresh its OTP if one already exists
    /// in PENDING (the driver re-announced arrival).
    async fn upsert_pending_trip(&self, trip: &TripRecord) -> Result<TripRecord, EngineError>;

    async fn get_trip(&self, trip_id: &str) -> Result<Option<TripRecord>, EngineError>;

    async fn get_trip_by_ride(&self, ride_id: &str) -> Result<Option<TripRecord>, EngineError>;

    /// Move trip PENDING -> STARTED and ride ARRIVED -> IN_PROGRESS in one
    /// transaction. Returns whether both guards matched.
    async fn start_trip(
        &self,
        trip_id: &str,
        ride_id: &str,
        start_time: DateTime<Utc>,
    ) -> Result<bool, EngineError>;

    /// Settle a STARTED trip: write fare components, complete the ride,
    /// release the driver, bump both lifetime counters, book the earning
    /// and issue the receipt, all in one transaction. Returns the settled
    /// trip, or None when the trip was not STARTED.
    async fn complete_trip(
        &self,
        settlement: &TripSettlement,
    ) -> Result<Option<TripRecord>, EngineError>;

    // -- payments -----------------------------------------------------------

    async fn insert_payment(&self, payment: &PaymentRecord) -> Result<(), EngineError>;

    async fn get_payment(&self, payment_id: &str) -> Result<Option<PaymentRecord>, EngineError>;

    async fn find_payment_by_trip(
        &self,
        trip_id: &str,
    ) -> Result<Option<PaymentRecord>, EngineError>;

    async fn find_payment_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<PaymentRecord>, EngineError>;

    /// Record the outcome of a charge attempt.
    async fn update_payment_result(
        &self,
        payment_id: &str,
        status: &str,
        psp_transaction_id: Option<&str>,
        failure_reason: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), EngineError>;

    /// Bump the attempt counter and reset the row to PENDING for a retry.
    /// Returns the new attempt count.
    async fn begin_payment_retry(&self, payment_id: &str) -> Result<i32, EngineError>;

    /// Insert a refund and move the payment to `new_status`, accumulating
    /// `refunded_amount`, in one transaction.
    async fn apply_refund(
        &self,
        refund: &RefundRecord,
        new_status: &str,
    ) -> Result<(), EngineError>;

    // -- locations ----------------------------------------------------------

    /// Batched insert of buffered pings, preserving slice order, plus a
    /// last-location update for each driver's newest ping.
    async fn insert_driver_locations(
        &self,
        pings: &[DriverLocationRecord],
    ) -> Result<(), EngineError>;

    async fn list_driver_locations(
        &self,
        driver_id: &str,
        limit: i64,
    ) -> Result<Vec<DriverLocationRecord>, EngineError>;

    async fn count_driver_locations(&self, driver_id: &str) -> Result<i64, EngineError>;

    // -- events & notifications ---------------------------------------------

    async fn insert_ride_event(&self, event: &RideEventRecord) -> Result<(), EngineError>;

    /// Events for a ride in chronological order.
    async fn list_ride_events(
        &self,
        ride_id: &str,
    ) -> Result<Vec<RideEventRecord>, EngineError>;

    async fn insert_notification(
        &self,
        notification: &NotificationRecord,
    ) -> Result<(), EngineError>;

    // -- pricing & surge ----------------------------------------------------

    async fn insert_pricing_config(
        &self,
        config: &PricingConfigRecord,
    ) -> Result<(), EngineError>;

    async fn find_active_pricing(
        &self,
        region: &str,
        ride_type: &str,
    ) -> Result<Option<PricingConfigRecord>, EngineError>;

    async fn insert_surge_zone(&self, zone: &SurgeZoneRecord) -> Result<(), EngineError>;

    /// First active surge zone. Polygon containment is deliberately not
    /// evaluated; see DESIGN.md.
    async fn find_active_surge_zone(&self) -> Result<Option<SurgeZoneRecord>, EngineError>;

    // -- health -------------------------------------------------------------

    async fn health_check_db(&self) -> Result<bool, EngineError>;
}

/// Whether a database error is a unique-constraint violation, used to
/// translate duplicate idempotency keys into replays.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.is_unique_violation(),
        _ => false,
    }
}
