// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Payment gateway facade.
//!
//! The engine never talks to a PSP directly; it sees this one-method trait.
//! A declined charge is a normal outcome (the payment row goes FAILED), a
//! transport failure is an error (retryable, Dependency/Timeout).

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use uuid::Uuid;

use crate::error::Result;

/// Outcome of a charge attempt that reached the PSP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeOutcome {
    /// The PSP approved the charge.
    Approved {
        /// PSP-side transaction reference.
        psp_ref: String,
    },
    /// The PSP declined the charge.
    Declined {
        /// PSP-provided decline reason.
        reason: String,
    },
}

/// The PSP contract used at trip completion.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Charge `amount` against `payment_method_id`.
    ///
    /// Implementations must be idempotent per (amount, method, call) - the
    /// engine guards retries with its own idempotency key, so a repeated
    /// call here means a deliberate new attempt.
    async fn charge(&self, amount: f64, payment_method_id: &str) -> Result<ChargeOutcome>;
}

/// Scriptable gateway for tests and local runs.
///
/// Outcomes are served from a queue; once the queue is empty every charge
/// is approved with a minted reference.
#[derive(Default)]
pub struct StaticGateway {
    scripted: Mutex<VecDeque<Result<ChargeOutcome>>>,
    calls: Mutex<Vec<(f64, String)>>,
}

impl StaticGateway {
    /// Gateway that approves everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an outcome for the next charge call.
    pub fn push_outcome(&self, outcome: Result<ChargeOutcome>) {
        self.scripted
            .lock()
            .expect("gateway lock poisoned")
            .push_back(outcome);
    }

    /// Queue a decline with the given reason.
    pub fn push_decline(&self, reason: &str) {
        self.push_outcome(Ok(ChargeOutcome::Declined {
            reason: reason.to_string(),
        }));
    }

    /// Charges observed so far, in call order.
    pub fn calls(&self) -> Vec<(f64, String)> {
        self.calls.lock().expect("gateway lock poisoned").clone()
    }
}

#[async_trait]
impl PaymentGateway for StaticGateway {
    async fn charge(&self, amount: f64, payment_method_id: &str) -> Result<ChargeOutcome> {
        self.calls
            .lock()
            .expect("gateway lock poisoned")
            .push((amount, payment_method_id.to_string()));

        let scripted = self
            .scripted
            .lock()
            .expect("gateway lock poisoned")
            .pop_front();
        match scripted {
            Some(outcome) => outcome,
            None => Ok(ChargeOutcome::Approved {
                psp_ref: format!("psp_{}", Uuid::new_v4().simple()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;

    #[tokio::test]
    async fn test_static_gateway_approves_by_default() {
        let gateway = StaticGateway::new();
        let outcome = gateway.charge(233.28, "pm-1").await.unwrap();
        assert!(matches!(outcome, ChargeOutcome::Approved { .. }));
        assert_eq!(gateway.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_scripted_outcomes_are_served_in_order() {
        let gateway = StaticGateway::new();
        gateway.push_decline("insufficient funds");
        gateway.push_outcome(Err(EngineError::Timeout { operation: "charge" }));

        let first = gateway.charge(100.0, "pm-1").await.unwrap();
        assert_eq!(
            first,
            ChargeOutcome::Declined {
                reason: "insufficient funds".to_string()
            }
        );

        let second = gateway.charge(100.0, "pm-1").await;
        assert!(second.is_err());

        // Queue exhausted: back to approvals.
        let third = gateway.charge(100.0, "pm-1").await.unwrap();
        assert!(matches!(third, ChargeOutcome::Approved { .. }));
    }
}
