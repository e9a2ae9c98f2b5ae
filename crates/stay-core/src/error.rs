//! # AppError
//!
//! Centralized error handling for the booking core.
//! Every failure here is recoverable by the caller; only `Storage` means
//! something outside the core went wrong.

use thiserror::Error;

use crate::dates::DateKey;

/// The primary error type for all stay-core operations.
#[derive(Error, Debug)]
pub enum AppError {
    /// Unparseable or out-of-calendar date input
    #[error("invalid date: {0}")]
    InvalidDate(String),

    /// check_out <= check_in, or a stay that starts in the past
    #[error("invalid range: {0}")]
    InvalidRange(String),

    /// Missing or malformed field (e.g., empty rejection reason, too many guests)
    #[error("validation error: {0}")]
    ValidationError(String),

    /// The requested range is not free at query time
    #[error("dates unavailable for property {property_id}")]
    DatesUnavailable { property_id: String },

    /// Reservation race lost at commit time
    #[error("conflict on {} night(s) starting {}", .nights.len(), first_night(.nights))]
    Conflict { nights: Vec<DateKey> },

    /// Illegal booking status change
    #[error("cannot move booking from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// Resource not found (e.g., Property, Booking)
    #[error("{0} not found with ID {1}")]
    NotFound(String, String),

    /// Infrastructure failure bubbling up from a port
    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

fn first_night(nights: &[DateKey]) -> String {
    nights
        .first()
        .map(ToString::to_string)
        .unwrap_or_else(|| "-".to_string())
}

impl AppError {
    /// Stable machine-readable tag, used by the HTTP layer.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::InvalidDate(_) => "invalid_date",
            AppError::InvalidRange(_) => "invalid_range",
            AppError::ValidationError(_) => "validation_error",
            AppError::DatesUnavailable { .. } => "dates_unavailable",
            AppError::Conflict { .. } => "conflict",
            AppError::InvalidTransition { .. } => "invalid_transition",
            AppError::NotFound(..) => "not_found",
            AppError::Storage(_) => "storage_error",
        }
    }

    /// Only storage failures are worth a retry; everything else is a
    /// deterministic answer for the same input and state.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Storage(_))
    }
}

/// A specialized Result type for booking-core logic.
pub type Result<T> = std::result::Result<T, AppError>;
