// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Idempotent fare settlement.
//!
//! `process_payment` replays its cached response for a repeated idempotency
//! key and never produces a second payment row for a trip. A declined or
//! errored charge is a normal outcome: the payment row goes FAILED and the
//! (cached) response carries that status.

use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use ridehail_api::{
    NotificationKind, PaymentResponse, PaymentStatus, ProcessPaymentRequest,
    RefundPaymentRequest, RefundResponse, TripStatus,
};

use crate::error::{EngineError, Result};
use crate::gateway::ChargeOutcome;
use crate::persistence::{PaymentRecord, RefundRecord, TripRecord};

use super::{RideEngine, payment_response};

/// How long a settled response replays for its idempotency key.
const IDEMPOTENCY_TTL: Duration = Duration::from_secs(3600);

/// Default attempt ceiling per payment row.
const MAX_PAYMENT_ATTEMPTS: i32 = 3;

fn idempotency_cache_key(key: &str) -> String {
    format!("payment:{key}")
}

impl RideEngine {
    /// `processPayment` - idempotently charge a completed trip.
    #[instrument(skip(self, request), fields(trip_id = %request.trip_id))]
    pub async fn process_payment(&self, request: ProcessPaymentRequest) -> Result<PaymentResponse> {
        let state = &self.state;
        let cache_key = idempotency_cache_key(&request.idempotency_key);

        // 1. Replay a cached response byte for byte.
        if let Some(cached) = state.idempotency.get(&cache_key) {
            info!("Replaying cached payment response");
            return Ok(serde_json::from_value(cached)?);
        }

        // 2. The trip must be settled before it can be charged.
        let trip = state
            .persistence
            .get_trip(&request.trip_id)
            .await?
            .ok_or_else(|| EngineError::not_found("trip", &request.trip_id))?;
        if trip.status != TripStatus::Completed.to_string() {
            return Err(EngineError::validation("trip is not completed"));
        }

        // 3. A completed payment for the trip short-circuits.
        let existing = state.persistence.find_payment_by_trip(&trip.id).await?;
        if let Some(ref payment) = existing
            && payment.status == PaymentStatus::Completed.to_string()
        {
            let response = payment_response(payment)?;
            self.cache_payment_response(&cache_key, &response);
            return Ok(response);
        }

        let amount = trip.final_fare.ok_or_else(|| EngineError::Internal {
            message: format!("completed trip '{}' has no final fare", trip.id),
        })?;

        // 4. Create the row, or re-arm an earlier failed attempt.
        let payment = match existing {
            Some(payment) => {
                if payment.attempts >= payment.max_attempts {
                    return Err(EngineError::conflict(
                        format!("payment:{}", payment.id),
                        "maximum charge attempts exhausted",
                    ));
                }
                let attempts = state.persistence.begin_payment_retry(&payment.id).await?;
                PaymentRecord {
                    attempts,
                    status: PaymentStatus::Pending.to_string(),
                    ..payment
                }
            }
            None => {
                let payment = PaymentRecord {
                    id: Uuid::new_v4().to_string(),
                    trip_id: trip.id.clone(),
                    amount,
                    status: PaymentStatus::Pending.to_string(),
                    payment_method_id: request.payment_method_id.clone(),
                    psp_transaction_id: None,
                    idempotency_key: Some(request.idempotency_key.clone()),
                    failure_reason: None,
                    attempts: 1,
                    max_attempts: MAX_PAYMENT_ATTEMPTS,
                    refunded_amount: 0.0,
                    completed_at: None,
                    failed_at: None,
                    created_at: Utc::now(),
                };
                match state.persistence.insert_payment(&payment).await {
                    Ok(()) => payment,
                    Err(EngineError::Conflict { .. }) => {
                        // Lost the unique-index race to a concurrent call
                        // with the same key; replay the winner's row.
                        return self.replay_raced_payment(&request, &cache_key).await;
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        // 5-8. Charge, record the outcome, notify, cache.
        let response = self.charge_and_settle(&trip, payment).await?;
        self.cache_payment_response(&cache_key, &response);
        Ok(response)
    }

    /// `retryPayment` - re-attempt a failed charge, bounded by the attempt
    /// ceiling.
    #[instrument(skip(self), fields(payment_id = %payment_id))]
    pub async fn retry_payment(&self, payment_id: &str) -> Result<PaymentResponse> {
        let state = &self.state;

        let payment = state
            .persistence
            .get_payment(payment_id)
            .await?
            .ok_or_else(|| EngineError::not_found("payment", payment_id))?;
        if payment.status != PaymentStatus::Failed.to_string() {
            return Err(EngineError::validation(
                "only failed payments can be retried",
            ));
        }
        if payment.attempts >= payment.max_attempts {
            return Err(EngineError::conflict(
                format!("payment:{}", payment.id),
                "maximum charge attempts exhausted",
            ));
        }

        let trip = state
            .persistence
            .get_trip(&payment.trip_id)
            .await?
            .ok_or_else(|| EngineError::not_found("trip", &payment.trip_id))?;

        let attempts = state.persistence.begin_payment_retry(&payment.id).await?;
        let payment = PaymentRecord {
            attempts,
            status: PaymentStatus::Pending.to_string(),
            ..payment
        };

        self.charge_and_settle(&trip, payment).await
    }

    /// `refundPayment` - refund part or all of a completed payment.
    #[instrument(skip(self, request), fields(payment_id = %request.payment_id))]
    pub async fn refund_payment(&self, request: RefundPaymentRequest) -> Result<RefundResponse> {
        let state = &self.state;

        if !request.amount.is_finite() || request.amount <= 0.0 {
            return Err(EngineError::invalid_input(
                "amount",
                "must be a positive number",
            ));
        }

        let payment = state
            .persistence
            .get_payment(&request.payment_id)
            .await?
            .ok_or_else(|| EngineError::not_found("payment", &request.payment_id))?;
        if payment.status != PaymentStatus::Completed.to_string() {
            return Err(EngineError::validation(
                "only completed payments can be refunded",
            ));
        }
        let refundable = payment.amount - payment.refunded_amount;
        if request.amount > refundable + f64::EPSILON {
            return Err(EngineError::validation(format!(
                "refund of {:.2} exceeds refundable amount {:.2}",
                request.amount, refundable
            )));
        }

        let full = (payment.refunded_amount + request.amount) >= payment.amount - 0.005;
        let new_status = if full {
            PaymentStatus::Refunded
        } else {
            PaymentStatus::PartiallyRefunded
        };

        let refund = RefundRecord {
            id: Uuid::new_v4().to_string(),
            payment_id: payment.id.clone(),
            amount: request.amount,
            reason: request.reason.clone(),
            created_at: Utc::now(),
        };
        state
            .persistence
            .apply_refund(&refund, &new_status.to_string())
            .await?;

        info!(amount = request.amount, full, "Payment refunded");
        Ok(RefundResponse {
            refund_id: refund.id,
            status: new_status,
        })
    }

    /// Run the PSP charge under its deadline and persist the outcome.
    async fn charge_and_settle(
        &self,
        trip: &TripRecord,
        payment: PaymentRecord,
    ) -> Result<PaymentResponse> {
        let state = &self.state;

        state
            .persistence
            .update_payment_result(
                &payment.id,
                &PaymentStatus::Processing.to_string(),
                None,
                None,
                Utc::now(),
            )
            .await?;

        let charge = tokio::time::timeout(
            state.config.psp_timeout,
            state.gateway.charge(payment.amount, &payment.payment_method_id),
        )
        .await
        .map_err(|_| EngineError::Timeout { operation: "psp charge" })
        .and_then(|outcome| outcome);

        let (status, psp_ref, failure) = match charge {
            Ok(ChargeOutcome::Approved { psp_ref }) => {
                (PaymentStatus::Completed, Some(psp_ref), None)
            }
            Ok(ChargeOutcome::Declined { reason }) => (PaymentStatus::Failed, None, Some(reason)),
            Err(e) => {
                warn!(payment_id = %payment.id, error = %e, "PSP charge errored");
                (PaymentStatus::Failed, None, Some(e.to_string()))
            }
        };

        state
            .persistence
            .update_payment_result(
                &payment.id,
                &status.to_string(),
                psp_ref.as_deref(),
                failure.as_deref(),
                Utc::now(),
            )
            .await?;

        let settled = state
            .persistence
            .get_payment(&payment.id)
            .await?
            .ok_or_else(|| EngineError::Internal {
                message: format!("payment '{}' vanished after charge", payment.id),
            })?;

        // Rider notification mirrors the outcome.
        let ride = state.persistence.get_ride(&trip.ride_id).await?;
        if let Some(ride) = ride {
            let (kind, body) = if status == PaymentStatus::Completed {
                (
                    NotificationKind::PaymentSuccess,
                    format!("Payment of ₹{:.2} received. Thank you!", payment.amount),
                )
            } else {
                (
                    NotificationKind::PaymentFailed,
                    "Your payment could not be processed. Please try again.".to_string(),
                )
            };
            state
                .notify(&ride.rider_id, "rider", Some(&trip.ride_id), kind, body)
                .await;
            state.bus.publish(
                &crate::bus::UpdateBus::ride_topic(&trip.ride_id),
                json!({ "type": "payment", "status": status.to_string() }),
            );
        }

        info!(payment_id = %settled.id, status = %settled.status, attempts = settled.attempts, "Charge recorded");
        payment_response(&settled)
    }

    async fn replay_raced_payment(
        &self,
        request: &ProcessPaymentRequest,
        cache_key: &str,
    ) -> Result<PaymentResponse> {
        let state = &self.state;
        let raced = state
            .persistence
            .find_payment_by_idempotency_key(&request.idempotency_key)
            .await?
            .or(state.persistence.find_payment_by_trip(&request.trip_id).await?);
        let payment = raced.ok_or_else(|| EngineError::Internal {
            message: "payment insert conflicted but no row found".to_string(),
        })?;
        let response = payment_response(&payment)?;
        self.cache_payment_response(cache_key, &response);
        Ok(response)
    }

    fn cache_payment_response(&self, cache_key: &str, response: &PaymentResponse) {
        match serde_json::to_value(response) {
            Ok(value) => {
                self.state.idempotency.set_nx(cache_key, value, IDEMPOTENCY_TTL);
            }
            Err(e) => warn!(error = %e, "Failed to cache payment response"),
        }
    }
}
