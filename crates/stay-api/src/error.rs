//! Maps `AppError` onto HTTP responses.

use std::fmt;

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use log::error;
use serde::Serialize;
use stay_core::AppError;

/// Wrapper so the core error type can be returned straight from handlers.
#[derive(Debug)]
pub struct ApiError(pub AppError);

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: String,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        ApiError(err)
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self.0 {
            AppError::InvalidDate(_) | AppError::InvalidRange(_) | AppError::ValidationError(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::NotFound(..) => StatusCode::NOT_FOUND,
            AppError::DatesUnavailable { .. }
            | AppError::Conflict { .. }
            | AppError::InvalidTransition { .. } => StatusCode::CONFLICT,
            AppError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if self.0.is_retryable() {
            error!("request failed: {:#}", self.0);
        }
        HttpResponse::build(self.status_code()).json(ErrorBody {
            error: self.0.kind(),
            message: self.0.to_string(),
        })
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
