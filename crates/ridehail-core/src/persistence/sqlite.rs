//! SQLite-backed persistence implementation.
//!
//! Used for embedded deployments and the integration test suite. Matches
//! the PostgreSQL backend method for method; only placeholder syntax and a
//! few DDL types differ.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use uuid::Uuid;

use crate::error::EngineError;

use super::{
    AssignOutcome, DriverLocationRecord, DriverRecord, NotificationRecord, PaymentRecord,
    Persistence, PricingConfigRecord, RefundRecord, RideEventRecord, RideRecord, RiderRecord,
    SurgeZoneRecord, TripRecord, TripSettlement, is_unique_violation,
};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

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

fn in_placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// SQLite-backed persistence provider.
#[derive(Clone)]
pub struct SqlitePersistence {
    pool: SqlitePool,
}

impl SqlitePersistence {
    /// Create a new SQLite persistence provider from an existing pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create and initialize a new SQLite persistence from a file path.
    ///
    /// Creates parent directories and the database file if missing,
    /// connects with sensible defaults and runs all migrations.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| EngineError::Dependency {
                system: "database",
                details: format!("Failed to create directory {:?}: {}", parent, e),
            })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(|e| EngineError::Dependency {
                system: "database",
                details: format!("Failed to connect to SQLite at {:?}: {}", path, e),
            })?;

        MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| EngineError::Dependency {
                system: "database",
                details: format!("Failed to run migrations: {}", e),
            })?;

        Ok(Self { pool })
    }

    /// In-memory database with migrations applied. A single connection is
    /// used so every caller sees the same database.
    pub async fn in_memory() -> Result<Self, EngineError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| EngineError::Dependency {
                system: "database",
                details: format!("Failed to open in-memory SQLite: {}", e),
            })?;

        MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| EngineError::Dependency {
                system: "database",
                details: format!("Failed to run migrations: {}", e),
            })?;

        Ok(Self { pool })
    }

    /// The underlying pool, for embedding processes that share it.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl Persistence for SqlitePersistence {
    async fn insert_rider(&self, rider: &RiderRecord) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            INSERT INTO riders (id, name, phone, email, rating, total_rides, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
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
            WHERE id = ?
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
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
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
            WHERE id = ?
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
            sqlx::query("UPDATE drivers SET status = ? WHERE id = ? AND status = ?")
                .bind(status)
                .bind(driver_id)
                .bind(expected)
                .execute(&self.pool)
                .await?
        } else {
            sqlx::query("UPDATE drivers SET status = ? WHERE id = ?")
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
            in_placeholders(24)
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
        let query = format!("SELECT {RIDE_COLS} FROM rides WHERE id = ?");
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
        let query = format!("SELECT {RIDE_COLS} FROM rides WHERE idempotency_key = ?");
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
            "UPDATE rides SET status = ? WHERE id = ? AND status IN ({})",
            in_placeholders(from.len())
        );
        let mut q = sqlx::query(&query).bind(to).bind(ride_id);
        for status in from {
            q = q.bind(*status);
        }
        let result = q.execute(&self.pool).await?;

        Ok(result.rows_affected() > 0)
    }

    async fn increment_search_attempts(&self, ride_id: &str) -> Result<(), EngineError> {
        sqlx::query("UPDATE rides SET search_attempts = search_attempts + 1 WHERE id = ?")
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
            SET status = 'MATCHED', driver_id = ?, matched_at = ?
            WHERE id = ? AND status = 'SEARCHING'
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
            "UPDATE drivers SET status = 'ON_RIDE' WHERE id = ? AND status = 'AVAILABLE'",
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
             SET status = 'CANCELLED', cancelled_by = ?, cancel_reason = ?, cancellation_fee = ?
             WHERE id = ? AND status IN ({})",
            in_placeholders(from.len())
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

        let fetch = format!("SELECT {RIDE_COLS} FROM rides WHERE id = ?");
        let ride = sqlx::query_as::<_, RideRecord>(&fetch)
            .bind(ride_id)
            .fetch_one(&mut *tx)
            .await?;

        if let Some(ref driver_id) = ride.driver_id {
            sqlx::query(
                "UPDATE drivers SET status = 'AVAILABLE' WHERE id = ? AND status = 'ON_RIDE'",
            )
            .bind(driver_id)
            .execute(&mut *tx)
            .await?;
        }

        // A trip that never started dies with the ride.
        sqlx::query("UPDATE trips SET status = 'CANCELLED' WHERE ride_id = ? AND status = 'PENDING'")
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
             WHERE rider_id = ?
             ORDER BY created_at DESC, id DESC
             LIMIT ? OFFSET ?"
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
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM rides WHERE rider_id = ?")
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
             WHERE driver_id = ?
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
            VALUES (?, ?, ?, 'PENDING', ?, ?, ?, ?, ?, ?)
            ON CONFLICT (ride_id) DO UPDATE
                SET start_otp = excluded.start_otp
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

        let query = format!("SELECT {TRIP_COLS} FROM trips WHERE ride_id = ?");
        let record = sqlx::query_as::<_, TripRecord>(&query)
            .bind(&trip.ride_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(record)
    }

    async fn get_trip(&self, trip_id: &str) -> Result<Option<TripRecord>, EngineError> {
        let query = format!("SELECT {TRIP_COLS} FROM trips WHERE id = ?");
        let record = sqlx::query_as::<_, TripRecord>(&query)
            .bind(trip_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(record)
    }

    async fn get_trip_by_ride(&self, ride_id: &str) -> Result<Option<TripRecord>, EngineError> {
        let query = format!("SELECT {TRIP_COLS} FROM trips WHERE ride_id = ?");
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
            "UPDATE trips SET status = 'STARTED', start_time = ? WHERE id = ? AND status = 'PENDING'",
        )
        .bind(start_time)
        .bind(trip_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let ride_updated = sqlx::query(
            "UPDATE rides SET status = 'IN_PROGRESS' WHERE id = ? AND status = 'ARRIVED'",
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
            SET status = 'COMPLETED', end_time = ?, actual_distance_km = ?, route_path = ?,
                distance_fare = ?, time_fare = ?, surge_amount = ?, discount = ?,
                final_fare = ?, platform_fee = ?, driver_earnings = ?
            WHERE id = ? AND status = 'STARTED'
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

        let query = format!("SELECT {TRIP_COLS} FROM trips WHERE id = ?");
        let trip = sqlx::query_as::<_, TripRecord>(&query)
            .bind(&settlement.trip_id)
            .fetch_one(&mut *tx)
            .await?;

        let rider_id: (String,) = sqlx::query_as("SELECT rider_id FROM rides WHERE id = ?")
            .bind(&trip.ride_id)
            .fetch_one(&mut *tx)
            .await?;

        sqlx::query("UPDATE rides SET status = 'COMPLETED' WHERE id = ? AND status = 'IN_PROGRESS'")
            .bind(&trip.ride_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "UPDATE drivers SET status = 'AVAILABLE', total_trips = total_trips + 1 WHERE id = ?",
        )
        .bind(&trip.driver_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE riders SET total_rides = total_rides + 1 WHERE id = ?")
            .bind(&rider_id.0)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO earnings (id, driver_id, trip_id, amount, platform_fee, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
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
            VALUES (?, ?, ?, ?, ?, ?, ?)
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

        let query = format!("SELECT {TRIP_COLS} FROM trips WHERE id = ?");
        let settled = sqlx::query_as::<_, TripRecord>(&query)
            .bind(&settlement.trip_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(Some(settled))
    }

    async fn insert_payment(&self, payment: &PaymentRecord) -> Result<(), EngineError> {
        let query = format!(
            "INSERT INTO payments ({PAYMENT_COLS}) VALUES ({})",
            in_placeholders(14)
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
        let query = format!("SELECT {PAYMENT_COLS} FROM payments WHERE id = ?");
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
        let query = format!("SELECT {PAYMENT_COLS} FROM payments WHERE trip_id = ?");
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
        let query = format!("SELECT {PAYMENT_COLS} FROM payments WHERE idempotency_key = ?");
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
            SET status = ?1,
                psp_transaction_id = COALESCE(?2, psp_transaction_id),
                failure_reason = ?3,
                completed_at = CASE WHEN ?1 = 'COMPLETED' THEN ?4 ELSE completed_at END,
                failed_at = CASE WHEN ?1 = 'FAILED' THEN ?4 ELSE failed_at END
            WHERE id = ?5
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
            WHERE id = ?
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
            VALUES (?, ?, ?, ?, ?)
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
            "UPDATE payments SET status = ?, refunded_amount = refunded_amount + ? WHERE id = ?",
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
                "UPDATE drivers SET last_lat = ?, last_lng = ?, last_location_update = ? WHERE id = ?",
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
            WHERE driver_id = ?
            ORDER BY id
            LIMIT ?
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
            sqlx::query_as("SELECT COUNT(*) FROM driver_locations WHERE driver_id = ?")
                .bind(driver_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(count.0)
    }

    async fn insert_ride_event(&self, event: &RideEventRecord) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            INSERT INTO ride_events (ride_id, event_type, payload, created_at)
            VALUES (?, ?, ?, ?)
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
            WHERE ride_id = ?
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
            VALUES (?, ?, ?, ?, ?, ?, ?)
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
            VALUES (?, ?, ?, ?, ?, ?, ?)
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
            WHERE region = ? AND ride_type = ? AND is_active = 1
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
            VALUES (?, ?, ?, ?, ?)
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
            WHERE is_active = 1
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
