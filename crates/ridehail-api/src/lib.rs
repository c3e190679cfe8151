// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Ridehail API - Versioned Engine Contract
//!
//! This crate defines the transport-independent request/response surface of
//! the ride lifecycle engine: domain enums, geographic primitives, request
//! and response DTOs for every engine operation, and the wire error body.
//!
//! The engine (`ridehail-core`) consumes these types directly; an embedding
//! process maps them onto whatever transport it exposes (HTTP, sockets,
//! message queues). Nothing in this crate knows about a transport.
//!
//! # Operations
//!
//! | Operation | Request | Response |
//! |-----------|---------|----------|
//! | `createRide` | [`CreateRideRequest`] | [`RideResponse`] |
//! | `getRide` | [`GetRideRequest`] | [`RideResponse`] |
//! | `cancelRide` | [`CancelRideRequest`] | [`RideResponse`] |
//! | `listRiderHistory` | [`ListRiderHistoryRequest`] | [`RideHistoryResponse`] |
//! | `updateDriverLocation` | [`UpdateDriverLocationRequest`] | [`AckResponse`] |
//! | `updateDriverAvailability` | [`UpdateDriverAvailabilityRequest`] | [`DriverInfoResponse`] |
//! | `acceptRide` | [`AcceptRideRequest`] | [`AcceptRideResponse`] |
//! | `markArriving` | [`MarkArrivingRequest`] | [`AckResponse`] |
//! | `markArrived` | [`MarkArrivedRequest`] | [`MarkArrivedResponse`] |
//! | `startTrip` | [`StartTripRequest`] | [`TripResponse`] |
//! | `endTrip` | [`EndTripRequest`] | [`TripResponse`] |
//! | `processPayment` | [`ProcessPaymentRequest`] | [`PaymentResponse`] |
//! | `refundPayment` | [`RefundPaymentRequest`] | [`RefundResponse`] |
//!
//! # Ride Status State Machine
//!
//! ```text
//!  ┌───────────┐
//!  │ SEARCHING │────────────────┐
//!  └─────┬─────┘                │ no drivers after N attempts
//!        │ offer accepted       ▼
//!        ▼                 ┌────────┐
//!  ┌───────────┐           │ FAILED │
//!  │  MATCHED  │           └────────┘
//!  └─────┬─────┘
//!        │ driver en route
//!        ▼
//!  ┌─────────────────┐
//!  │ DRIVER_ARRIVING │
//!  └─────┬───────────┘
//!        │ driver at pickup
//!        ▼
//!  ┌───────────┐  otp   ┌─────────────┐  end   ┌───────────┐
//!  │  ARRIVED  │───────►│ IN_PROGRESS │───────►│ COMPLETED │
//!  └───────────┘        └─────────────┘        └───────────┘
//!
//!  SEARCHING / MATCHED / DRIVER_ARRIVING / ARRIVED ──cancel──► CANCELLED
//! ```
//!
//! Terminal states are `COMPLETED`, `CANCELLED` and `FAILED`. Transition
//! legality is encoded in [`RideStatus::can_transition_to`].

#![deny(missing_docs)]

/// Wire error body and stable error codes.
pub mod error;

/// Request DTOs for every engine operation.
pub mod requests;

/// Response DTOs echoing persisted entity projections.
pub mod responses;

/// Domain enums and geographic primitives.
pub mod types;

pub use error::ErrorBody;
pub use requests::*;
pub use responses::*;
pub use types::*;

/// Version tag of this contract. Bumped on breaking surface changes.
pub const API_VERSION: &str = "v1";
