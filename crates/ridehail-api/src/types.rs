// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Domain enums and geographic primitives shared by all engine operations.
//!
//! Statuses are stored and transmitted in SCREAMING_SNAKE_CASE string form;
//! the enums here are the single source of truth for parsing and for
//! transition legality.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// A WGS84 coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude in degrees, must lie in [-90, 90].
    pub lat: f64,
    /// Longitude in degrees, must lie in [-180, 180].
    pub lng: f64,
}

impl GeoPoint {
    /// Create a new point without validating ranges.
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Whether both components lie in their valid WGS84 ranges.
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lng)
    }
}

/// A pickup or dropoff location: coordinates plus an optional display address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lng: f64,
    /// Human-readable address, when the client resolved one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl Location {
    /// The bare coordinate pair.
    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lng)
    }
}

/// Lifecycle status of a ride.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RideStatus {
    /// Looking for a driver.
    Searching,
    /// A driver has been atomically assigned.
    Matched,
    /// The matched driver is en route to pickup.
    DriverArriving,
    /// The driver is at the pickup point; a start OTP has been issued.
    Arrived,
    /// The trip is underway.
    InProgress,
    /// The trip finished and the fare was computed.
    Completed,
    /// Cancelled by rider, driver or the system.
    Cancelled,
    /// Matching exhausted its attempts without assigning a driver.
    Failed,
}

impl RideStatus {
    /// Whether a ride in this status can legally move to `to`.
    ///
    /// Encodes the full transition table: cancellation is legal from every
    /// non-terminal status except `IN_PROGRESS`, and `FAILED` is reachable
    /// only from `SEARCHING`.
    pub fn can_transition_to(self, to: RideStatus) -> bool {
        use RideStatus::*;
        matches!(
            (self, to),
            (Searching, Matched)
                | (Searching, Failed)
                | (Searching, Cancelled)
                | (Matched, DriverArriving)
                | (Matched, Cancelled)
                | (DriverArriving, Arrived)
                | (DriverArriving, Cancelled)
                | (Arrived, InProgress)
                | (Arrived, Cancelled)
                | (InProgress, Completed)
        )
    }

    /// Whether this status is terminal (no further transitions).
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RideStatus::Completed | RideStatus::Cancelled | RideStatus::Failed
        )
    }

    /// Whether a ride in this status must have a driver assigned.
    pub fn requires_driver(self) -> bool {
        matches!(
            self,
            RideStatus::Matched
                | RideStatus::DriverArriving
                | RideStatus::Arrived
                | RideStatus::InProgress
                | RideStatus::Completed
        )
    }

    /// Whether cancelling out of this status incurs a cancellation fee.
    ///
    /// A fee applies once a driver has committed, i.e. at `MATCHED` or later.
    pub fn cancellation_fee_applies(self) -> bool {
        matches!(
            self,
            RideStatus::Matched | RideStatus::DriverArriving | RideStatus::Arrived
        )
    }
}

/// Availability status of a driver.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DriverStatus {
    /// Not accepting rides; absent from the geo index.
    Offline,
    /// Accepting rides; present in the geo index while position is fresh.
    Available,
    /// Committed to exactly one non-terminal ride.
    OnRide,
    /// Temporarily unavailable without going offline.
    Break,
}

/// Execution status of a trip.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TripStatus {
    /// Created when the driver arrived; waiting for the start OTP.
    Pending,
    /// OTP verified; the ride is in progress.
    Started,
    /// Ended and fare-settled.
    Completed,
    /// The owning ride was cancelled before the trip started.
    Cancelled,
}

/// Settlement status of a payment.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    /// Row created, charge not yet attempted.
    Pending,
    /// Charge in flight at the PSP.
    Processing,
    /// Charge confirmed by the PSP.
    Completed,
    /// Charge rejected or errored.
    Failed,
    /// Fully refunded.
    Refunded,
    /// Partially refunded.
    PartiallyRefunded,
}

/// Requested vehicle tier for a ride.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VehicleTier {
    /// Regular sedan.
    Standard,
    /// Higher-rated vehicles and drivers.
    Premium,
    /// Larger vehicles for groups.
    Xl,
}

/// Which participant cancelled a ride.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CancelActor {
    /// The requesting rider.
    Rider,
    /// The matched driver.
    Driver,
    /// The engine itself (e.g. matching exhausted).
    System,
}

/// Kind of a durable user-visible notification.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    /// A driver was matched to the ride.
    DriverMatched,
    /// The driver is en route to pickup.
    DriverArriving,
    /// The driver is at the pickup point (carries the start OTP).
    DriverArrived,
    /// The trip completed; fare details attached.
    RideCompleted,
    /// The ride was cancelled.
    RideCancelled,
    /// No driver could be found.
    RideFailed,
    /// Payment settled successfully.
    PaymentSuccess,
    /// Payment failed.
    PaymentFailed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_ride_status_wire_form_round_trips() {
        for (status, wire) in [
            (RideStatus::Searching, "SEARCHING"),
            (RideStatus::Matched, "MATCHED"),
            (RideStatus::DriverArriving, "DRIVER_ARRIVING"),
            (RideStatus::Arrived, "ARRIVED"),
            (RideStatus::InProgress, "IN_PROGRESS"),
            (RideStatus::Completed, "COMPLETED"),
            (RideStatus::Cancelled, "CANCELLED"),
            (RideStatus::Failed, "FAILED"),
        ] {
            assert_eq!(status.to_string(), wire);
            assert_eq!(RideStatus::from_str(wire).unwrap(), status);
        }
    }

    #[test]
    fn test_happy_path_transitions_are_legal() {
        use RideStatus::*;
        let path = [Searching, Matched, DriverArriving, Arrived, InProgress, Completed];
        for pair in path.windows(2) {
            assert!(
                pair[0].can_transition_to(pair[1]),
                "{} -> {} should be legal",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_cancel_legality() {
        use RideStatus::*;
        for from in [Searching, Matched, DriverArriving, Arrived] {
            assert!(from.can_transition_to(Cancelled), "{from} should cancel");
        }
        // In-progress rides can only complete.
        assert!(!InProgress.can_transition_to(Cancelled));
        // Terminal states go nowhere.
        for from in [Completed, Cancelled, Failed] {
            for to in [Searching, Matched, Cancelled, Completed] {
                assert!(!from.can_transition_to(to));
            }
        }
    }

    #[test]
    fn test_failed_only_reachable_from_searching() {
        use RideStatus::*;
        assert!(Searching.can_transition_to(Failed));
        for from in [Matched, DriverArriving, Arrived, InProgress] {
            assert!(!from.can_transition_to(Failed));
        }
    }

    #[test]
    fn test_cancellation_fee_band() {
        use RideStatus::*;
        assert!(!Searching.cancellation_fee_applies());
        assert!(Matched.cancellation_fee_applies());
        assert!(DriverArriving.cancellation_fee_applies());
        assert!(Arrived.cancellation_fee_applies());
        assert!(!InProgress.cancellation_fee_applies());
    }

    #[test]
    fn test_driver_status_wire_form() {
        assert_eq!(DriverStatus::OnRide.to_string(), "ON_RIDE");
        assert_eq!(
            DriverStatus::from_str("AVAILABLE").unwrap(),
            DriverStatus::Available
        );
    }

    #[test]
    fn test_geo_point_validation() {
        assert!(GeoPoint::new(19.0596, 72.8295).is_valid());
        assert!(!GeoPoint::new(91.0, 0.0).is_valid());
        assert!(!GeoPoint::new(0.0, -180.5).is_valid());
    }
}
