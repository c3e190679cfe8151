// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for ridehail-core.
//!
//! Provides a unified error type that maps onto the wire error codes of
//! `ridehail-api`.

use ridehail_api::ErrorBody;
use ridehail_api::error::codes;
use std::fmt;

/// Result type using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

/// Engine errors that can occur during request processing.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum EngineError {
    /// Malformed coordinates, missing required fields, invalid enum values.
    InvalidInput {
        /// The field that failed validation.
        field: String,
        /// What was wrong with it.
        message: String,
    },

    /// The addressed entity does not exist.
    NotFound {
        /// Entity kind (ride, driver, trip, payment, rider).
        entity: &'static str,
        /// The identifier that was not found.
        id: String,
    },

    /// A precondition on state or a lock was violated.
    Conflict {
        /// The contended resource.
        resource: String,
        /// Why the operation could not proceed.
        message: String,
    },

    /// A business rule was violated.
    Validation {
        /// Description of the violated rule.
        message: String,
    },

    /// An external dependency did not respond within its deadline.
    Timeout {
        /// The operation that timed out.
        operation: &'static str,
    },

    /// Persistence, cache, PSP or bus unavailable.
    Dependency {
        /// Which dependency failed.
        system: &'static str,
        /// Error details.
        details: String,
    },

    /// Invariant violation or bug. Fatal to the request.
    Internal {
        /// Context for the log line.
        message: String,
    },
}

impl EngineError {
    /// Convert this error to the wire error body.
    pub fn to_error_body(&self) -> ErrorBody {
        ErrorBody::new(self.error_code(), self.to_string())
    }

    /// Get the stable error code string for this error kind.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidInput { .. } => codes::INVALID_INPUT,
            Self::NotFound { .. } => codes::NOT_FOUND,
            Self::Conflict { .. } => codes::CONFLICT,
            Self::Validation { .. } => codes::VALIDATION,
            Self::Timeout { .. } => codes::TIMEOUT,
            Self::Dependency { .. } => codes::DEPENDENCY,
            Self::Internal { .. } => codes::INTERNAL,
        }
    }

    /// Whether a caller may retry the same request after backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Conflict { .. } | Self::Timeout { .. } | Self::Dependency { .. }
        )
    }

    /// Shorthand for a not-found error.
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Shorthand for a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Shorthand for a conflict error.
    pub fn conflict(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Conflict {
            resource: resource.into(),
            message: message.into(),
        }
    }

    /// Shorthand for an invalid-input error.
    pub fn invalid_input(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInput { field, message } => {
                write!(f, "Invalid input for '{}': {}", field, message)
            }
            Self::NotFound { entity, id } => {
                write!(f, "{} '{}' not found", entity, id)
            }
            Self::Conflict { resource, message } => {
                write!(f, "Conflict on '{}': {}", resource, message)
            }
            Self::Validation { message } => {
                write!(f, "Validation failed: {}", message)
            }
            Self::Timeout { operation } => {
                write!(f, "Operation '{}' timed out", operation)
            }
            Self::Dependency { system, details } => {
                write!(f, "Dependency '{}' failed: {}", system, details)
            }
            Self::Internal { message } => {
                write!(f, "Internal error: {}", message)
            }
        }
    }
}

impl std::error::Error for EngineError {}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        EngineError::Dependency {
            system: "database",
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Internal {
            message: format!("serialization: {}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let test_cases: Vec<(EngineError, &str)> = vec![
            (
                EngineError::invalid_input("latitude", "out of range"),
                "INVALID_INPUT",
            ),
            (EngineError::not_found("ride", "r-1"), "NOT_FOUND"),
            (
                EngineError::conflict("ride:r-1", "already matched"),
                "CONFLICT",
            ),
            (EngineError::validation("OTP mismatch"), "VALIDATION"),
            (EngineError::Timeout { operation: "charge" }, "TIMEOUT"),
            (
                EngineError::Dependency {
                    system: "psp",
                    details: "connection refused".to_string(),
                },
                "DEPENDENCY",
            ),
            (
                EngineError::Internal {
                    message: "driver row missing for matched ride".to_string(),
                },
                "INTERNAL",
            ),
        ];

        for (error, expected_code) in test_cases {
            assert_eq!(error.error_code(), expected_code, "for {:?}", error);
            let body = error.to_error_body();
            assert_eq!(body.code, expected_code);
            assert!(!body.message.is_empty());
        }
    }

    #[test]
    fn test_retryability_matches_taxonomy() {
        assert!(EngineError::conflict("x", "y").is_retryable());
        assert!(EngineError::Timeout { operation: "db" }.is_retryable());
        assert!(
            EngineError::Dependency {
                system: "bus",
                details: "closed".into()
            }
            .is_retryable()
        );
        assert!(!EngineError::validation("bad otp").is_retryable());
        assert!(!EngineError::not_found("trip", "t-9").is_retryable());
        assert!(!EngineError::invalid_input("lng", "NaN").is_retryable());
    }

    #[test]
    fn test_display_formats() {
        assert_eq!(
            EngineError::not_found("ride", "abc-123").to_string(),
            "ride 'abc-123' not found"
        );
        assert_eq!(
            EngineError::invalid_input("latitude", "must lie in [-90, 90]").to_string(),
            "Invalid input for 'latitude': must lie in [-90, 90]"
        );
        assert_eq!(
            EngineError::conflict("lock:ride:r-1:matching", "held by another worker").to_string(),
            "Conflict on 'lock:ride:r-1:matching': held by another worker"
        );
    }
}
