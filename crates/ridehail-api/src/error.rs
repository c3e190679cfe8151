// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wire error body with stable error codes.
//!
//! Every failing engine operation maps onto one of seven codes. Codes are
//! part of the versioned contract; messages are free-form and may change.

use serde::{Deserialize, Serialize};

/// Error payload returned to callers in place of a success response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable machine-readable code, one of the [`codes`] constants.
    pub code: String,
    /// Human-readable description of what went wrong.
    pub message: String,
}

impl ErrorBody {
    /// Build an error body from a code constant and message.
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// The closed set of error codes surfaced by the engine.
pub mod codes {
    /// Malformed coordinates, missing required fields, invalid enum values.
    pub const INVALID_INPUT: &str = "INVALID_INPUT";
    /// The addressed entity does not exist.
    pub const NOT_FOUND: &str = "NOT_FOUND";
    /// A precondition on state or a lock was violated; retryable with backoff.
    pub const CONFLICT: &str = "CONFLICT";
    /// A business rule was violated (OTP mismatch, refund exceeds payment).
    pub const VALIDATION: &str = "VALIDATION";
    /// An external dependency did not respond within its deadline.
    pub const TIMEOUT: &str = "TIMEOUT";
    /// Persistence, cache, PSP or bus unavailable; retryable with backoff.
    pub const DEPENDENCY: &str = "DEPENDENCY";
    /// Invariant violation or bug; fatal to the request.
    pub const INTERNAL: &str = "INTERNAL";
}
