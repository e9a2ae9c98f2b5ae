//! # stay-api
//!
//! The HTTP routing layer for rusty-stay.

pub mod error;
pub mod handlers;
pub mod middleware;

use actix_web::{error::InternalError, web, ResponseError};
use stay_core::AppError;

pub use error::ApiError;
pub use handlers::AppState;

/// Configures the booking routes.
///
/// # Developer Note
/// Extractor failures (bad JSON, missing query params) are rewritten into
/// the same `{ error, message }` body the handlers return.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(|err, _req| {
        let message = err.to_string();
        InternalError::from_response(err, ApiError(AppError::ValidationError(message)).error_response()).into()
    }))
    .app_data(web::QueryConfig::default().error_handler(|err, _req| {
        let message = err.to_string();
        InternalError::from_response(err, ApiError(AppError::ValidationError(message)).error_response()).into()
    }))
    .route("/health", web::get().to(handlers::health))
    .route("/quotes", web::post().to(handlers::quote))
    .service(
        web::scope("/bookings")
            .route("", web::post().to(handlers::create_booking))
            .route("/{id}", web::get().to(handlers::get_booking))
            .route("/{id}/accept", web::post().to(handlers::accept))
            .route("/{id}/reject", web::post().to(handlers::reject))
            .route("/{id}/cancel", web::post().to(handlers::cancel))
            .route("/{id}/confirm", web::post().to(handlers::confirm))
            .route("/{id}/refund", web::get().to(handlers::refund_quote)),
    )
    .service(
        web::scope("/properties/{id}")
            .route("/availability", web::get().to(handlers::availability))
            .route("/calendar", web::get().to(handlers::calendar))
            .route("/blocks", web::post().to(handlers::block))
            .route("/blocks", web::delete().to(handlers::unblock)),
    );
}
