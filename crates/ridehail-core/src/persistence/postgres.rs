//! PostgreSQL-backed persistence implementation.
//!
//! The production backend. Mirrors the SQLite implementation; the two are
//! kept in lockstep so the embedded and operated deployments behave
//! identically.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::EngineError;

use super::{
    AssignOutcome, DriverLocationRecord, DriverRecord, NotificationRecord, PaymentRecord,
    Persistence, PricingConfigRecord, RefundRecord, RideEventRecord, RideRecord, RiderRecord,
    SurgeZoneRecord, TripRecord, TripSettlement, is_unique_violation,
};

const RIDE_COLS: &str = "id, rider_id, driver_id, pickup_lat, pickup_lng, pickup_address, \
     dropoff_lat, dropoff_lng, dropoff_address, ride_type, status, estimated_fare, \
     estimated_distance_km, estimated_duration_min, surge_multiplier, matched_at, \
     search_attempts, cancelled_by, cancel_reason, cancellation_fee, idempotency_key, \
     payment_method_id, scheduled_at, created_at";

const TRIP_COLS: &str = "id, ride_id, driver_id, status, start_otp, start_time, end_time, \
     actual_distance_km, route_path, base_fare, per_km_rate, per_min_rate, surge_multiplier, \
     distance_fare, time_fare, surge_amount, discount, final_fare, platform_fee, \
     driver_earnings, created_at";

const PAYMENT_COLS: &str = "id, trip_id, amount, status, payment_method_id, psp_transaction_id, \
     idempotency_key, failure_reason, attempts, max_attempts, refunded_amount, completed_at, \
     failed_at, created_at";

fn numbered_placeholders(from: usize, count: usize) -> String {
    (from..from + count)
        .map(|i| format!("${i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// PostgreSQL-backed persistence provider.
#[derive(Clone)]
pub struct PostgresPersistence {
    pool: PgPool,
}

impl PostgresPersistence {
    /// Create a new PostgreSQL persistence provider from an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool, for embedding processes that share it.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl Persistence for PostgresPersistence {
    async fn insert_rider(&self, rider: &RiderRecord) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            INSERT INTO riders (id, name, phone, email, rating, total_rides, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&rider.id)
        .bind(&rider.name)
        .bind(&rider.phone)
        .bind(&rider.email)
        .bind(rider.rating)
        .bind(rider.total_rides)
        .bind(rider.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_rider(&self, rider_id: &str) -> Result<Option<RiderRecord>, EngineError> {
        let record = sqlx::query_as::<_, RiderRecord>(
            r#"
            SELECT id, name, phone, email, rating, total_rides, created_at
            FROM riders
            WHERE id = $1
            "#,
        )
        .bind(rider_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn insert_driver(&self, driver: &DriverRecord) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            INSERT INTO drivers (id, name, phone, vehicle, vehicle_tier, rating,
                                 acceptance_rate, total_trips, status, last_lat, last_lng,
                                 last_location_update, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(&driver.id)
        .bind(&driver.name)
        .bind(&driver.phone)
        .bind(&driver.vehicle)
        .bind(&driver.vehicle_tier)
        .bind(driver.rating)
        .bind(driver.acceptance_rate)
        .bind(driver.total_trips)
        .bind(&driver.status)
        .bind(driver.last_lat)
        .bind(driver.last_lng)
        .bind(driver.last_location_update)
        .bind(driver.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_driver(&self, driver_id: &str) -> Result<Option<DriverRecord>, EngineError> {
        let record = sqlx::query_as::<_, DriverRecord>(
            r#"
            SELECT id, name, phone, vehicle, vehicle_tier, rating, acceptance_rate,
                   total_trips, status, last_lat, last_lng, last_location_update, created_at
            FROM drivers
            WHERE id = $1
            "#,
        )
        .bind(driver_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn update_driver_status(
        &self,
        driver_id: &str,
        expected: Option<&str>,
        status: &str,
    ) -> Result<bool, EngineError> {
        let result = if let Some(expected) = expected {
            sqlx::query("UPDATE drivers SET status = $1 WHERE id = $2 AND status = $3")
                .bind(status)
                .bind(driver_id)
                .bind(expected)
                .execute(&self.pool)
                .await?
        } else {
            sqlx::query("UPDATE drivers SET status = $1 WHERE id = $2")
                .bind(status)
                .bind(driver_id)
                .execute(&self.pool)
                .await?
        };

        Ok(result.rows_affected() > 0)
    }

    async fn insert_ride(&self, ride: &RideRecord) -> Result<(), EngineError> {
        let query = format!(
            "INSERT INTO rides ({RIDE_COLS}) VALUES ({})",
            numbered_placeholders(1, 24)
        );
        sqlx::query(&query)
            .bind(&ride.id)
            .bind(&ride.rider_id)
            .bind(&ride.driver_id)
            .bind(ride.pickup_lat)
            .bind(ride.pickup_lng)
            .bind(&ride.pickup_address)
            .bind(ride.dropoff_lat)
            .bind(ride.dropoff_lng)
            .bind(&ride.dropoff_address)
            .bind(&ride.ride_type)
            .bind(&ride.status)
            .bind(ride.estimated_fare)
            .bind(ride.estimated_distance_km)
            .bind(ride.estimated_duration_min)
            .bind(ride.surge_multiplier)
            .bind(ride.matched_at)
            .bind(ride.search_attempts)
            .bind(&ride.cancelled_by)
            .bind(&ride.cancel_reason)
            .bind(ride.cancellation_fee)
            .bind(&ride.idempotency_key)
            .bind(&ride.payment_method_id)
            .bind(ride.scheduled_at)
            .bind(ride.created_at)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    EngineError::conflict("rides.idempotency_key", "duplicate idempotency key")
                } else {
                    e.into()
                }
            })?;

        Ok(())
    }

    async fn get_ride(&self, ride_id: &str) -> Result<Option<RideRecord>, EngineError> {
        let query = format!("SELECT {RIDE_COLS} FROM rides WHERE id = $1");
        let record = sqlx::query_as::<_, RideRecord>(&query)
            .bind(ride_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(record)
    }

    async fn find_ride_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<RideRecord>, EngineError> {
        let query = format!("SELECT {RIDE_COLS} FROM rides WHERE idempotency_key = $1");
        let record = sqlx::query_as::<_, RideRecord>(&query)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(record)
    }

    async fn update_ride_status(
        &self,
        ride_id: &str,
        from: &[&str],
        to: &str,
    ) -> Result<bool, EngineError> {
        let query = format!(
            "UPDATE rides SET status = $1 WHERE id = $2 AND status IN ({})",
            numbered_placeholders(3, from.len())
        );
        let mut q = sqlx::query(&query).bind(to).bind(ride_id);
        for status in from {
            q = q.bind(*status);
        }
        let result = q.execute(&self.pool).await?;

        Ok(result.rows_affected() > 0)
    }

    async fn increment_search_attempts(&self, ride_id: &str) -> Result<(), EngineError> {
        sqlx::query("UPDATE rides SET search_attempts = search_attempts + 1 WHERE id = $1")
            .bind(ride_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn assign_driver(
        &self,
        ride_id: &str,
        driver_id: &str,
        matched_at: DateTime<Utc>,
    ) -> Result<AssignOutcome, EngineError> {
        let mut tx = self.pool.begin().await?;

        let ride_updated = sqlx::query(
            r#"
            UPDATE rides
            SET status = 'MATCHED', driver_id = $1, matched_at = $2
            WHERE id = $3 AND status = 'SEARCHING'
            "#,
        )
        .bind(driver_id)
        .bind(matched_at)
        .bind(ride_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if ride_updated == 0 {
            tx.rollback().await?;
            return Ok(AssignOutcome::RideNotSearching);
        }

        let driver_updated = sqlx::query(
            "UPDATE drivers SET status = 'ON_RIDE' WHERE id = $1 AND status = 'AVAILABLE'",
        )
        .bind(driver_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if driver_updated == 0 {
            tx.rollback().await?;
            return Ok(AssignOutcome::DriverNotAvailable);
        }

        tx.commit().await?;
        Ok(AssignOutcome::Assigned)
    }

    async fn cancel_ride(
        &self,
        ride_id: &str,
        from: &[&str],
        cancelled_by: &str,
        reason: Option<&str>,
        fee: Option<i64>,
    ) -> Result<Option<RideRecord>, EngineError> {
        let mut tx = self.pool.begin().await?;

        let query = format!(
            "UPDATE rides
             SET status = 'CANCELLED', cancelled_by = $1, cancel_reason = $2, cancellation_fee = $3
             WHERE id = $4 AND status IN ({})",
            numbered_placeholders(5, from.len())
        );
        let mut q = sqlx::query(&query)
            .bind(cancelled_by)
            .bind(reason)
            .bind(fee)
            .bind(ride_id);
        for status in from {
            q = q.bind(*status);
        }
        if q.execute(&mut *tx).await?.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let fetch = format!("SELECT {RIDE_COLS} FROM rides WHERE id = $1");
        let ride = sqlx::query_as::<_, RideRecord>(&fetch)
            .bind(ride_id)
            .fetch_one(&mut *tx)
            .await?;

        if let Some(ref driver_id) = ride.driver_id {
            sqlx::query(
                "UPDATE drivers SET status = 'AVAILABLE' WHERE id = $1 AND status = 'ON_RIDE'",
            )
            .bind(driver_id)
            .execute(&mut *tx)
            .await?;
        }

        // A trip that never started dies with the ride.
        sqlx::query(
            "UPDATE trips SET status = 'CANCELLED' WHERE ride_id = $1 AND status = 'PENDING'",
        )
        .bind(ride_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(ride))
    }

    async fn list_rider_rides(
        &self,
        rider_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<RideRecord>, EngineError> {
        let query = format!(
            "SELECT {RIDE_COLS} FROM rides
             WHERE rider_id = $1
             ORDER BY created_at DESC, id DESC
             LIMIT $2 OFFSET $3"
        );
        let records = sqlx::query_as::<_, RideRecord>(&query)
            .bind(rider_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        Ok(records)
    }

    async fn count_rider_rides(&self, rider_id: &str) -> Result<i64, EngineError> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM rides WHERE rider_id = $1")
            .bind(rider_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(count.0)
    }

    async fn find_active_ride_for_driver(
        &self,
        driver_id: &str,
    ) -> Result<Option<RideRecord>, EngineError> {
        let query = format!(
            "SELECT {RIDE_COLS} FROM rides
             WHERE driver_id = $1
               AND status IN ('MATCHED', 'DRIVER_ARRIVING', 'ARRIVED', 'IN_PROGRESS')
             LIMIT 1"
        );
        let record = sqlx::query_as::<_, RideRecord>(&query)
            .bind(driver_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(record)
    }

    async fn upsert_pending_trip(&self, trip: &TripRecord) -> Result<TripRecord, EngineError> {
        sqlx::query(
            r#"
            INSERT INTO trips (id, ride_id, driver_id, status, start_otp, base_fare,
                               per_km_rate, per_min_rate, surge_multiplier, created_at)
            VALUES ($1, $2, $3, 'PENDING', $4, $5, $6, $7, $8, $9)
            ON CONFLICT (ride_id) DO UPDATE
                SET start_otp = EXCLUDED.start_otp
                WHERE trips.status = 'PENDING'
            "#,
        )
        .bind(&trip.id)
        .bind(&trip.ride_id)
        .bind(&trip.driver_id)
        .bind(&trip.start_otp)
        .bind(trip.base_fare)
        .bind(trip.per_km_rate)
        .bind(trip.per_min_rate)
        .bind(trip.surge_multiplier)
        .bind(trip.created_at)
        .execute(&self.pool)
        .await?;

        let query = format!("SELECT {TRIP_COLS} FROM trips WHERE ride_id = $1");
        let record = sqlx::query_as::<_, TripRecord>(&query)
            .bind(&trip.ride_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(record)
    }

    async fn get_trip(&self, trip_id: &str) -> Result<Option<TripRecord>, EngineError> {
        let query = format!("SELECT {TRIP_COLS} FROM trips WHERE id = $1");
        let record = sqlx::query_as::<_, TripRecord>(&query)
            .bind(trip_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(record)
    }

    async fn get_trip_by_ride(&self, ride_id: &str) -> Result<Option<TripRecord>, EngineError> {
        let query = format!("SELECT {TRIP_COLS} FROM trips WHERE ride_id = $1");
        let record = sqlx::query_as::<_, TripRecord>(&query)
            .bind(ride_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(record)
    }

    async fn start_trip(
        &self,
        trip_id: &str,
        ride_id: &str,
        start_time: DateTime<Utc>,
    ) -> Result<bool, EngineError> {
        let mut tx = self.pool.begin().await?;

        let trip_updated = sqlx::query(
            "UPDATE trips SET status = 'STARTED', start_time = $1 WHERE id = $2 AND status = 'PENDING'",
        )
        .bind(start_time)
        .bind(trip_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let ride_updated = sqlx::query(
            "UPDATE rides SET status = 'IN_PROGRESS' WHERE id = $1 AND status = 'ARRIVED'",
        )
        .bind(ride_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if trip_updated == 0 || ride_updated == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn complete_trip(
        &self,
        settlement: &TripSettlement,
    ) -> Result<Option<TripRecord>, EngineError> {
        let mut tx = self.pool.begin().await?;

        let trip_updated = sqlx::query(
            r#"
            UPDATE trips
            SET status = 'COMPLETED', end_time = $1, actual_distance_km = $2, route_path = $3,
                distance_fare = $4, time_fare = $5, surge_amount = $6, discount = $7,
                final_fare = $8, platform_fee = $9, driver_earnings = $10
            WHERE id = $11 AND status = 'STARTED'
            "#,
        )
        .bind(settlement.end_time)
        .bind(settlement.actual_distance_km)
        .bind(&settlement.route_path)
        .bind(settlement.distance_fare)
        .bind(settlement.time_fare)
        .bind(settlement.surge_amount)
        .bind(settlement.discount)
        .bind(settlement.final_fare)
        .bind(settlement.platform_fee)
        .bind(settlement.driver_earnings)
        .bind(&settlement.trip_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if trip_updated == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let query = format!("SELECT {TRIP_COLS} FROM trips WHERE id = $1");
        let trip = sqlx::query_as::<_, TripRecord>(&query)
            .bind(&settlement.trip_id)
            .fetch_one(&mut *tx)
            .await?;

        let rider_id: (String,) = sqlx::query_as("SELECT rider_id FROM rides WHERE id = $1")
            .bind(&trip.ride_id)
            .fetch_one(&mut *tx)
            .await?;

        sqlx::query(
            "UPDATE rides SET status = 'COMPLETED' WHERE id = $1 AND status = 'IN_PROGRESS'",
        )
        .bind(&trip.ride_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE drivers SET status = 'AVAILABLE', total_trips = total_trips + 1 WHERE id = $1",
        )
        .bind(&trip.driver_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE riders SET total_rides = total_rides + 1 WHERE id = $1")
            .bind(&rider_id.0)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO earnings (id, driver_id, trip_id, amount, platform_fee, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&trip.driver_id)
        .bind(&settlement.trip_id)
        .bind(settlement.driver_earnings)
        .bind(settlement.platform_fee)
        .bind(settlement.end_time)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO receipts (id, trip_id, rider_id, subtotal, tax, total, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&settlement.trip_id)
        .bind(&rider_id.0)
        .bind(settlement.final_fare)
        .bind(settlement.receipt_tax)
        .bind(settlement.final_fare + settlement.receipt_tax)
        .bind(settlement.end_time)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let query = format!("SELECT {TRIP_COLS} FROM trips WHERE id = $1");
        let settled = sqlx::query_as::<_, TripRecord>(&query)
            .bind(&settlement.trip_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(Some(settled))
    }

    async fn insert_payment(&self, payment: &PaymentRecord) -> Result<(), EngineError> {
        let query = format!(
            "INSERT INTO payments ({PAYMENT_COLS}) VALUES ({})",
            numbered_placeholders(1, 14)
        );
        sqlx::query(&query)
            .bind(&payment.id)
            .bind(&payment.trip_id)
            .bind(payment.amount)
            .bind(&payment.status)
            .bind(&payment.payment_method_id)
            .bind(&payment.psp_transaction_id)
            .bind(&payment.idempotency_key)
            .bind(&payment.failure_reason)
            .bind(payment.attempts)
            .bind(payment.max_attempts)
            .bind(payment.refunded_amount)
            .bind(payment.completed_at)
            .bind(payment.failed_at)
            .bind(payment.created_at)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    EngineError::conflict("payments", "payment already exists for trip or key")
                } else {
                    e.into()
                }
            })?;

        Ok(())
    }

    async fn get_payment(&self, payment_id: &str) -> Result<Option<PaymentRecord>, EngineError> {
        let query = format!("SELECT {PAYMENT_COLS} FROM payments WHERE id = $1");
        let record = sqlx::query_as::<_, PaymentRecord>(&query)
            .bind(payment_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(record)
    }

    async fn find_payment_by_trip(
        &self,
        trip_id: &str,
    ) -> Result<Option<PaymentRecord>, EngineError> {
        let query = format!("SELECT {PAYMENT_COLS} FROM payments WHERE trip_id = $1");
        let record = sqlx::query_as::<_, PaymentRecord>(&query)
            .bind(trip_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(record)
    }

    async fn find_payment_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<PaymentRecord>, EngineError> {
        let query = format!("SELECT {PAYMENT_COLS} FROM payments WHERE idempotency_key = $1");
        let record = sqlx::query_as::<_, PaymentRecord>(&query)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(record)
    }

    async fn update_payment_result(
        &self,
        payment_id: &str,
        status: &str,
        psp_transaction_id: Option<&str>,
        failure_reason: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            UPDATE payments
            SET status = $1,
                psp_transaction_id = COALESCE($2, psp_transaction_id),
                failure_reason = $3,
                completed_at = CASE WHEN $1 = 'COMPLETED' THEN $4 ELSE completed_at END,
                failed_at = CASE WHEN $1 = 'FAILED' THEN $4 ELSE failed_at END
            WHERE id = $5
            "#,
        )
        .bind(status)
        .bind(psp_transaction_id)
        .bind(failure_reason)
        .bind(at)
        .bind(payment_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn begin_payment_retry(&self, payment_id: &str) -> Result<i32, EngineError> {
        let attempts: (i32,) = sqlx::query_as(
            r#"
            UPDATE payments
            SET attempts = attempts + 1, status = 'PENDING', failure_reason = NULL
            WHERE id = $1
            RETURNING attempts
            "#,
        )
        .bind(payment_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(attempts.0)
    }

    async fn apply_refund(
        &self,
        refund: &RefundRecord,
        new_status: &str,
    ) -> Result<(), EngineError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO refunds (id, payment_id, amount, reason, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&refund.id)
        .bind(&refund.payment_id)
        .bind(refund.amount)
        .bind(&refund.reason)
        .bind(refund.created_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE payments SET status = $1, refunded_amount = refunded_amount + $2 WHERE id = $3",
        )
        .bind(new_status)
        .bind(refund.amount)
        .bind(&refund.payment_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn insert_driver_locations(
        &self,
        pings: &[DriverLocationRecord],
    ) -> Result<(), EngineError> {
        if pings.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        let mut builder = sqlx::QueryBuilder::new(
            "INSERT INTO driver_locations (driver_id, lat, lng, heading, speed, accuracy, recorded_at) ",
        );
        builder.push_values(pings, |mut row, ping| {
            row.push_bind(&ping.driver_id)
                .push_bind(ping.lat)
                .push_bind(ping.lng)
                .push_bind(ping.heading)
                .push_bind(ping.speed)
                .push_bind(ping.accuracy)
                .push_bind(ping.recorded_at);
        });
        builder.build().execute(&mut *tx).await?;

        // Last ping per driver, in slice order.
        let mut newest: HashMap<&str, &DriverLocationRecord> = HashMap::new();
        for ping in pings {
            newest.insert(ping.driver_id.as_str(), ping);
        }
        for ping in newest.into_values() {
            sqlx::query(
                "UPDATE drivers SET last_lat = $1, last_lng = $2, last_location_update = $3 WHERE id = $4",
            )
            .bind(ping.lat)
            .bind(ping.lng)
            .bind(ping.recorded_at)
            .bind(&ping.driver_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_driver_locations(
        &self,
        driver_id: &str,
        limit: i64,
    ) -> Result<Vec<DriverLocationRecord>, EngineError> {
        let records = sqlx::query_as::<_, DriverLocationRecord>(
            r#"
            SELECT driver_id, lat, lng, heading, speed, accuracy, recorded_at
            FROM driver_locations
            WHERE driver_id = $1
            ORDER BY id
            LIMIT $2
            "#,
        )
        .bind(driver_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn count_driver_locations(&self, driver_id: &str) -> Result<i64, EngineError> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM driver_locations WHERE driver_id = $1")
                .bind(driver_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(count.0)
    }

    async fn insert_ride_event(&self, event: &RideEventRecord) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            INSERT INTO ride_events (ride_id, event_type, payload, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&event.ride_id)
        .bind(&event.event_type)
        .bind(&event.payload)
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_ride_events(
        &self,
        ride_id: &str,
    ) -> Result<Vec<RideEventRecord>, EngineError> {
        let records = sqlx::query_as::<_, RideEventRecord>(
            r#"
            SELECT id, ride_id, event_type, payload, created_at
            FROM ride_events
            WHERE ride_id = $1
            ORDER BY id
            "#,
        )
        .bind(ride_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn insert_notification(
        &self,
        notification: &NotificationRecord,
    ) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            INSERT INTO notifications (id, user_id, user_kind, ride_id, kind, body, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&notification.id)
        .bind(&notification.user_id)
        .bind(&notification.user_kind)
        .bind(&notification.ride_id)
        .bind(&notification.kind)
        .bind(&notification.body)
        .bind(notification.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_pricing_config(
        &self,
        config: &PricingConfigRecord,
    ) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            INSERT INTO pricing_configs (id, region, ride_type, base_fare, per_km_rate,
                                         per_min_rate, is_active)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&config.id)
        .bind(&config.region)
        .bind(&config.ride_type)
        .bind(config.base_fare)
        .bind(config.per_km_rate)
        .bind(config.per_min_rate)
        .bind(config.is_active)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_active_pricing(
        &self,
        region: &str,
        ride_type: &str,
    ) -> Result<Option<PricingConfigRecord>, EngineError> {
        let record = sqlx::query_as::<_, PricingConfigRecord>(
            r#"
            SELECT id, region, ride_type, base_fare, per_km_rate, per_min_rate, is_active
            FROM pricing_configs
            WHERE region = $1 AND ride_type = $2 AND is_active = TRUE
            "#,
        )
        .bind(region)
        .bind(ride_type)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn insert_surge_zone(&self, zone: &SurgeZoneRecord) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            INSERT INTO surge_zones (id, name, polygon, multiplier, is_active)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&zone.id)
        .bind(&zone.name)
        .bind(&zone.polygon)
        .bind(zone.multiplier)
        .bind(zone.is_active)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_active_surge_zone(&self) -> Result<Option<SurgeZoneRecord>, EngineError> {
        let record = sqlx::query_as::<_, SurgeZoneRecord>(
            r#"
            SELECT id, name, polygon, multiplier, is_active
            FROM surge_zones
            WHERE is_active = TRUE
            ORDER BY id
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn health_check_db(&self) -> Result<bool, EngineError> {
        let row: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&self.pool).await?;
        Ok(row.0 == 1)
    }
}
