// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Payment settlement tests: idempotent replay, retry with backpressure on
//! attempts, and refunds.

mod common;

use common::{PICKUP, TestContext};
use ridehail_api::{
    PaymentStatus, ProcessPaymentRequest, RefundPaymentRequest, TripResponse, VehicleTier,
};
use ridehail_core::error::EngineError;
use ridehail_core::persistence::Persistence;

async fn settled_trip(ctx: &TestContext) -> TripResponse {
    ctx.seed_standard_pricing().await;
    ctx.seed_rider("R1").await;
    ctx.seed_available_driver("D1", PICKUP.0, PICKUP.1, 4.9, VehicleTier::Standard)
        .await;
    let (_ride, trip) = ctx.run_trip_to_completion("R1", "D1", 8.7).await;
    trip
}

fn pay_request(trip_id: &str, key: &str) -> ProcessPaymentRequest {
    ProcessPaymentRequest {
        trip_id: trip_id.to_string(),
        payment_method_id: "pm-1".to_string(),
        idempotency_key: key.to_string(),
    }
}

#[tokio::test]
async fn test_payment_is_idempotent_per_key() {
    let ctx = TestContext::new().await;
    let trip = settled_trip(&ctx).await;

    let first = ctx
        .engine
        .process_payment(pay_request(&trip.id, "key-1"))
        .await
        .unwrap();
    let second = ctx
        .engine
        .process_payment(pay_request(&trip.id, "key-1"))
        .await
        .unwrap();

    // Byte-identical replay and a single row.
    assert_eq!(first, second);
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
    assert_eq!(first.status, PaymentStatus::Completed);
    assert_eq!(first.amount, trip.final_fare.unwrap());
    assert!(first.psp_transaction_id.is_some());
    assert_eq!(ctx.payment_count_for_trip(&trip.id).await, 1);
    // Only one charge reached the gateway.
    assert_eq!(ctx.gateway.calls().len(), 1);
    assert_eq!(ctx.notification_count("R1", "PAYMENT_SUCCESS").await, 1);
}

#[tokio::test]
async fn test_completed_trip_is_never_double_charged() {
    let ctx = TestContext::new().await;
    let trip = settled_trip(&ctx).await;

    let first = ctx
        .engine
        .process_payment(pay_request(&trip.id, "key-1"))
        .await
        .unwrap();
    // A different key still converges on the same completed payment.
    let second = ctx
        .engine
        .process_payment(pay_request(&trip.id, "key-2"))
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(ctx.payment_count_for_trip(&trip.id).await, 1);
    assert_eq!(ctx.gateway.calls().len(), 1);
}

#[tokio::test]
async fn test_failed_charge_then_retry_succeeds() {
    let ctx = TestContext::new().await;
    let trip = settled_trip(&ctx).await;
    ctx.gateway.push_decline("insufficient funds");

    let failed = ctx
        .engine
        .process_payment(pay_request(&trip.id, "key-1"))
        .await
        .unwrap();
    assert_eq!(failed.status, PaymentStatus::Failed);
    assert_eq!(failed.attempts, 1);
    assert_eq!(failed.failure_reason.as_deref(), Some("insufficient funds"));
    assert_eq!(ctx.notification_count("R1", "PAYMENT_FAILED").await, 1);

    let retried = ctx.engine.retry_payment(&failed.id).await.unwrap();
    assert_eq!(retried.status, PaymentStatus::Completed);
    assert_eq!(retried.attempts, 2);
    assert_eq!(retried.id, failed.id);
    assert_eq!(ctx.payment_count_for_trip(&trip.id).await, 1);
    assert_eq!(ctx.notification_count("R1", "PAYMENT_SUCCESS").await, 1);
}

#[tokio::test]
async fn test_retry_requires_failed_status() {
    let ctx = TestContext::new().await;
    let trip = settled_trip(&ctx).await;

    let completed = ctx
        .engine
        .process_payment(pay_request(&trip.id, "key-1"))
        .await
        .unwrap();
    let err = ctx.engine.retry_payment(&completed.id).await.unwrap_err();
    assert_eq!(err.error_code(), "VALIDATION");
}

#[tokio::test]
async fn test_attempts_are_capped() {
    let ctx = TestContext::new().await;
    let trip = settled_trip(&ctx).await;
    for _ in 0..3 {
        ctx.gateway.push_decline("card blocked");
    }

    let payment = ctx
        .engine
        .process_payment(pay_request(&trip.id, "key-1"))
        .await
        .unwrap();
    let payment = ctx.engine.retry_payment(&payment.id).await.unwrap();
    let payment = ctx.engine.retry_payment(&payment.id).await.unwrap();
    assert_eq!(payment.attempts, 3);
    assert_eq!(payment.status, PaymentStatus::Failed);

    let err = ctx.engine.retry_payment(&payment.id).await.unwrap_err();
    assert_eq!(err.error_code(), "CONFLICT");
}

#[tokio::test]
async fn test_psp_transport_error_marks_payment_failed() {
    let ctx = TestContext::new().await;
    let trip = settled_trip(&ctx).await;
    ctx.gateway.push_outcome(Err(EngineError::Dependency {
        system: "psp",
        details: "connection reset".to_string(),
    }));

    let payment = ctx
        .engine
        .process_payment(pay_request(&trip.id, "key-1"))
        .await
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Failed);
    assert!(payment.failure_reason.unwrap().contains("psp"));
}

#[tokio::test]
async fn test_payment_requires_completed_trip() {
    let ctx = TestContext::new().await;
    ctx.seed_standard_pricing().await;
    ctx.seed_rider("R1").await;
    ctx.seed_available_driver("D1", PICKUP.0, PICKUP.1, 4.9, VehicleTier::Standard)
        .await;
    // Walk the ride only as far as ARRIVED.
    let ride = ctx.create_standard_ride("R1").await;
    let matched = ctx
        .wait_for_status(
            &ride.id,
            ridehail_api::RideStatus::Matched,
            std::time::Duration::from_secs(2),
        )
        .await;
    let driver_id = matched.driver_id.unwrap();
    ctx.engine
        .mark_arriving(ridehail_api::MarkArrivingRequest {
            ride_id: ride.id.clone(),
            driver_id: driver_id.clone(),
        })
        .await
        .unwrap();
    ctx.engine
        .mark_arrived(ridehail_api::MarkArrivedRequest {
            ride_id: ride.id.clone(),
            driver_id,
        })
        .await
        .unwrap();
    let trip = ctx.store.get_trip_by_ride(&ride.id).await.unwrap().unwrap();

    let err = ctx
        .engine
        .process_payment(pay_request(&trip.id, "key-1"))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "VALIDATION");
}

#[tokio::test]
async fn test_refund_full_then_partial_rules() {
    let ctx = TestContext::new().await;
    let trip = settled_trip(&ctx).await;
    let payment = ctx
        .engine
        .process_payment(pay_request(&trip.id, "key-1"))
        .await
        .unwrap();

    // Over-refund is rejected.
    let err = ctx
        .engine
        .refund_payment(RefundPaymentRequest {
            payment_id: payment.id.clone(),
            amount: payment.amount + 1.0,
            reason: "oops".to_string(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "VALIDATION");

    // Partial refund.
    let partial = ctx
        .engine
        .refund_payment(RefundPaymentRequest {
            payment_id: payment.id.clone(),
            amount: 10.0,
            reason: "late pickup".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(partial.status, PaymentStatus::PartiallyRefunded);

    // A second refund only goes through after the first one completed the
    // payment's lifecycle rules: status is now PARTIALLY_REFUNDED, which
    // refuses further refunds in this model.
    let err = ctx
        .engine
        .refund_payment(RefundPaymentRequest {
            payment_id: payment.id,
            amount: 5.0,
            reason: "again".to_string(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "VALIDATION");
}

#[tokio::test]
async fn test_refund_entire_amount_marks_refunded() {
    let ctx = TestContext::new().await;
    let trip = settled_trip(&ctx).await;
    let payment = ctx
        .engine
        .process_payment(pay_request(&trip.id, "key-1"))
        .await
        .unwrap();

    let refund = ctx
        .engine
        .refund_payment(RefundPaymentRequest {
            payment_id: payment.id.clone(),
            amount: payment.amount,
            reason: "service failure".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(refund.status, PaymentStatus::Refunded);

    let row = ctx
        .store
        .get_payment(&payment.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, "REFUNDED");
    assert_eq!(row.refunded_amount, payment.amount);
}
