//! Middleware for access logging and cross-origin access.

use actix_cors::Cors;
use actix_web::middleware::Logger;

/// Access log line per request:
/// remote-ip "request-line" status-code response-size duration
pub fn standard_middleware() -> Logger {
    Logger::new(r#"%a "%r" %s %b %Dms"#)
}

/// Booking widgets live on host sites, so any origin is allowed.
pub fn cors_policy() -> Cors {
    Cors::default()
        .allow_any_origin()
        .allowed_methods(vec!["GET", "POST", "DELETE"])
        .allow_any_header()
        .max_age(3600)
}
