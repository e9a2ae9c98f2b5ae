//! HTTP surface against the in-memory store.

use std::sync::Arc;

use actix_web::{http::StatusCode, test, web, App};
use serde_json::{json, Value};

use stay_api::{configure_routes, AppState};
use stay_core::traits::{MockClock, MockNotifier};
use stay_core::{
    AvailabilityLedger, BookingWorkflow, CancellationPolicy, FeeSchedule, PropertyListing, Rate,
    WorkflowDeps,
};
use stay_store_memory::MemoryStore;

fn state() -> web::Data<AppState> {
    let store = Arc::new(MemoryStore::new());
    store.upsert_listing(PropertyListing {
        id: "cabin".to_string(),
        host_id: "host-1".to_string(),
        max_guests: 4,
        base_price: 150_00,
        cleaning_fee: 50_00,
        currency: "USD".to_string(),
        unit_ids: Vec::new(),
        cancellation_policy: CancellationPolicy::Moderate,
    });

    let mut clock = MockClock::new();
    clock.expect_today().returning(|| "2024-12-01".parse().unwrap());
    let mut notifier = MockNotifier::new();
    notifier.expect_notify().returning(|_, _| Ok(()));

    web::Data::new(AppState {
        workflow: BookingWorkflow::new(
            WorkflowDeps {
                ledger: AvailabilityLedger::new(store.clone()),
                bookings: store.clone(),
                properties: store,
                notifier: Arc::new(notifier),
                clock: Arc::new(clock),
            },
            FeeSchedule::new(Rate::percent(10), Rate::percent(8)),
        ),
    })
}

fn booking_body(check_in: &str, check_out: &str) -> Value {
    json!({
        "propertyId": "cabin",
        "guestId": "guest-1",
        "checkIn": check_in,
        "checkOut": check_out,
        "guests": 2,
    })
}

#[actix_web::test]
async fn quote_returns_camel_case_breakdown() {
    let app = test::init_service(App::new().app_data(state()).configure(configure_routes)).await;

    let req = test::TestRequest::post()
        .uri("/quotes")
        .set_json(json!({ "propertyId": "cabin", "checkIn": "2024-12-15", "checkOut": "2024/12/18" }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;

    assert_eq!(body["nights"], 3);
    assert_eq!(body["subtotal"], 450_00);
    assert_eq!(body["serviceFee"], 45_00);
    assert_eq!(body["taxes"], 43_60);
    assert_eq!(body["total"], 588_60);
}

#[actix_web::test]
async fn booking_lifecycle_over_http() {
    let app = test::init_service(App::new().app_data(state()).configure(configure_routes)).await;

    let req = test::TestRequest::post()
        .uri("/bookings")
        .set_json(booking_body("2024-12-15", "2024-12-18"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let created: Value = test::read_body_json(resp).await;
    let id = created["id"].as_str().unwrap().to_string();
    assert_eq!(created["status"], "pending_approval");

    let req = test::TestRequest::get()
        .uri("/properties/cabin/availability?checkIn=2024-12-16&checkOut=2024-12-17")
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["available"], false);

    let req = test::TestRequest::post().uri(&format!("/bookings/{id}/accept")).to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "accepted");

    let req = test::TestRequest::get().uri(&format!("/bookings/{id}/refund")).to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["policy"], "moderate");
    assert_eq!(body["daysUntilCheckIn"], 14);
    assert_eq!(body["percent"], 100);

    let req = test::TestRequest::post().uri(&format!("/bookings/{id}/confirm")).to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["paymentStatus"], "paid");

    let req = test::TestRequest::post().uri(&format!("/bookings/{id}/cancel")).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "invalid_transition");
}

#[actix_web::test]
async fn errors_use_the_shared_body() {
    let app = test::init_service(App::new().app_data(state()).configure(configure_routes)).await;

    let req = test::TestRequest::post()
        .uri("/bookings")
        .set_json(booking_body("15/12/2024", "2024-12-18"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "invalid_date");

    let req = test::TestRequest::post()
        .uri("/bookings")
        .set_json(json!({ "propertyId": "cabin" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "validation_error");

    let req = test::TestRequest::get()
        .uri("/bookings/0192f0c1-0000-7000-8000-000000000000")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let req = test::TestRequest::post()
        .uri("/bookings")
        .set_json(booking_body("2024-12-15", "2024-12-18"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);
    let req = test::TestRequest::post()
        .uri("/bookings")
        .set_json(booking_body("2024-12-17", "2024-12-19"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "dates_unavailable");
}

#[actix_web::test]
async fn reject_without_reason_is_refused() {
    let app = test::init_service(App::new().app_data(state()).configure(configure_routes)).await;

    let req = test::TestRequest::post()
        .uri("/bookings")
        .set_json(booking_body("2024-12-15", "2024-12-18"))
        .to_request();
    let created: Value = test::call_and_read_body_json(&app, req).await;
    let id = created["id"].as_str().unwrap();

    let req = test::TestRequest::post()
        .uri(&format!("/bookings/{id}/reject"))
        .set_json(json!({}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

    let req = test::TestRequest::post()
        .uri(&format!("/bookings/{id}/reject"))
        .set_json(json!({ "reason": "maintenance" }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "rejected");
    assert_eq!(body["rejectionReason"], "maintenance");
}

#[actix_web::test]
async fn blocks_and_calendar() {
    let app = test::init_service(App::new().app_data(state()).configure(configure_routes)).await;

    let req = test::TestRequest::post()
        .uri("/properties/cabin/blocks")
        .set_json(json!({ "checkIn": "2024-12-20", "checkOut": "2024-12-22", "reason": "painting" }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NO_CONTENT);

    let req = test::TestRequest::get()
        .uri("/properties/cabin/calendar?from=2024-12-19&to=2024-12-23")
        .to_request();
    let days: Value = test::call_and_read_body_json(&app, req).await;
    let statuses: Vec<&str> = days
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["status"].as_str().unwrap())
        .collect();
    assert_eq!(statuses, ["available", "blocked", "blocked", "available"]);
    assert_eq!(days[1]["reason"], "painting");

    let req = test::TestRequest::delete()
        .uri("/properties/cabin/blocks?checkIn=2024-12-01&checkOut=2024-12-31")
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["cleared"], 2);

    let req = test::TestRequest::get().uri("/health").to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
}

#[actix_web::test]
async fn oversized_calendar_window_is_a_bad_request() {
    let app = test::init_service(App::new().app_data(state()).configure(configure_routes)).await;

    let req = test::TestRequest::get()
        .uri("/properties/cabin/calendar?from=2024-12-01&to=2099-12-01")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "validation_error");
}
