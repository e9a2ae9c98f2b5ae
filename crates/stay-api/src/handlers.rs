//! # stay-api Handlers
//!
//! Thin adapters between HTTP and `BookingWorkflow`. Dates arrive as strings
//! and go through `normalize`, so malformed input comes back as the same
//! `invalid_date` body the core produces.

use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stay_core::dates::{normalize, DateKey};
use stay_core::{AppError, BookingId, BookingRequest, BookingWorkflow};

use crate::error::ApiResult;

/// State shared across all Actix-web workers.
pub struct AppState {
    pub workflow: BookingWorkflow,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteBody {
    pub property_id: String,
    pub check_in: String,
    pub check_out: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookingBody {
    pub property_id: String,
    #[serde(default)]
    pub unit_ids: Vec<String>,
    pub guest_id: String,
    pub check_in: String,
    pub check_out: String,
    pub guests: u32,
}

#[derive(Debug, Deserialize)]
pub struct RejectBody {
    #[serde(default)]
    pub reason: String,
}

/// Query for availability checks and calendars. `from`/`to` are accepted as
/// aliases of `checkIn`/`checkOut`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeQuery {
    #[serde(alias = "from")]
    pub check_in: String,
    #[serde(alias = "to")]
    pub check_out: String,
    pub unit_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockBody {
    pub check_in: String,
    pub check_out: String,
    pub unit_id: Option<String>,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AvailabilityAnswer<'a> {
    property_id: &'a str,
    unit_id: Option<&'a str>,
    check_in: DateKey,
    check_out: DateKey,
    available: bool,
}

fn dates(check_in: &str, check_out: &str) -> Result<(DateKey, DateKey), AppError> {
    Ok((normalize(check_in)?, normalize(check_out)?))
}

fn booking_id(raw: &str) -> Result<BookingId, AppError> {
    Uuid::parse_str(raw)
        .map_err(|_| AppError::ValidationError(format!("'{raw}' is not a booking id")))
}

pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

/// POST /quotes
pub async fn quote(data: web::Data<AppState>, body: web::Json<QuoteBody>) -> ApiResult<HttpResponse> {
    let (check_in, check_out) = dates(&body.check_in, &body.check_out)?;
    let breakdown = data.workflow.quote(&body.property_id, check_in, check_out).await?;
    Ok(HttpResponse::Ok().json(breakdown))
}

/// POST /bookings
pub async fn create_booking(
    data: web::Data<AppState>,
    body: web::Json<CreateBookingBody>,
) -> ApiResult<HttpResponse> {
    let body = body.into_inner();
    let (check_in, check_out) = dates(&body.check_in, &body.check_out)?;
    let booking = data
        .workflow
        .create_booking(BookingRequest {
            property_id: body.property_id,
            unit_ids: body.unit_ids,
            guest_id: body.guest_id,
            check_in,
            check_out,
            guests: body.guests,
        })
        .await?;

    Ok(HttpResponse::Created()
        .insert_header(("Location", format!("/bookings/{}", booking.id)))
        .json(booking))
}

/// GET /bookings/{id}
pub async fn get_booking(data: web::Data<AppState>, path: web::Path<String>) -> ApiResult<HttpResponse> {
    let booking = data.workflow.get(booking_id(&path)?).await?;
    Ok(HttpResponse::Ok().json(booking))
}

pub async fn accept(data: web::Data<AppState>, path: web::Path<String>) -> ApiResult<HttpResponse> {
    let booking = data.workflow.accept(booking_id(&path)?).await?;
    Ok(HttpResponse::Ok().json(booking))
}

pub async fn reject(
    data: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<RejectBody>,
) -> ApiResult<HttpResponse> {
    let booking = data.workflow.reject(booking_id(&path)?, &body.reason).await?;
    Ok(HttpResponse::Ok().json(booking))
}

pub async fn cancel(data: web::Data<AppState>, path: web::Path<String>) -> ApiResult<HttpResponse> {
    let booking = data.workflow.cancel(booking_id(&path)?).await?;
    Ok(HttpResponse::Ok().json(booking))
}

pub async fn confirm(data: web::Data<AppState>, path: web::Path<String>) -> ApiResult<HttpResponse> {
    let booking = data.workflow.confirm(booking_id(&path)?).await?;
    Ok(HttpResponse::Ok().json(booking))
}

/// GET /bookings/{id}/refund
pub async fn refund_quote(data: web::Data<AppState>, path: web::Path<String>) -> ApiResult<HttpResponse> {
    let quote = data.workflow.refund_quote(booking_id(&path)?).await?;
    Ok(HttpResponse::Ok().json(quote))
}

/// GET /properties/{id}/availability?checkIn=..&checkOut=..[&unitId=..]
pub async fn availability(
    data: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<RangeQuery>,
) -> ApiResult<HttpResponse> {
    let property_id = path.into_inner();
    let (check_in, check_out) = dates(&query.check_in, &query.check_out)?;
    let unit_id = query.unit_id.as_deref();
    let available = data
        .workflow
        .ledger()
        .is_range_available(&property_id, unit_id, check_in, check_out)
        .await?;

    Ok(HttpResponse::Ok().json(AvailabilityAnswer {
        property_id: &property_id,
        unit_id,
        check_in,
        check_out,
        available,
    }))
}

/// GET /properties/{id}/calendar?from=..&to=..[&unitId=..]
pub async fn calendar(
    data: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<RangeQuery>,
) -> ApiResult<HttpResponse> {
    let (from, to) = dates(&query.check_in, &query.check_out)?;
    let days = data
        .workflow
        .ledger()
        .calendar(&path, query.unit_id.as_deref(), from, to)
        .await?;
    Ok(HttpResponse::Ok().json(days))
}

/// POST /properties/{id}/blocks
pub async fn block(
    data: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<BlockBody>,
) -> ApiResult<HttpResponse> {
    let (check_in, check_out) = dates(&body.check_in, &body.check_out)?;
    data.workflow
        .ledger()
        .block(&path, body.unit_id.as_deref(), check_in, check_out, &body.reason)
        .await?;
    Ok(HttpResponse::NoContent().finish())
}

/// DELETE /properties/{id}/blocks?checkIn=..&checkOut=..[&unitId=..]
pub async fn unblock(
    data: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<RangeQuery>,
) -> ApiResult<HttpResponse> {
    let (check_in, check_out) = dates(&query.check_in, &query.check_out)?;
    let cleared = data
        .workflow
        .ledger()
        .unblock(&path, query.unit_id.as_deref(), check_in, check_out)
        .await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "cleared": cleared })))
}
