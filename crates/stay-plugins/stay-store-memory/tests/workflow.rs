//! End-to-end booking workflow against the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use stay_core::traits::{MockClock, MockNotifier, MockPropertyDirectory};
use stay_core::{
    AppError, AvailabilityLedger, Booking, BookingEvent, BookingId, BookingRepo, BookingRequest,
    BookingStatus, BookingWorkflow, CancellationPolicy, DateKey, DayStatus, FeeSchedule, Notifier, PaymentStatus,
    PropertyListing, Rate, WorkflowDeps,
};
use stay_store_memory::MemoryStore;

fn d(s: &str) -> DateKey {
    s.parse().unwrap()
}

/// Forwards every event to a channel so tests can await delivery.
struct ChannelNotifier(mpsc::UnboundedSender<(BookingEvent, serde_json::Value)>);

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn notify(&self, event: BookingEvent, payload: serde_json::Value) -> anyhow::Result<()> {
        self.0.send((event, payload))?;
        Ok(())
    }
}

fn clock_at(today: &'static str) -> MockClock {
    let mut clock = MockClock::new();
    clock.expect_today().returning(move || today.parse().unwrap());
    clock
}

fn cottage(units: &[&str]) -> PropertyListing {
    PropertyListing {
        id: "cottage".to_string(),
        host_id: "host-1".to_string(),
        max_guests: 4,
        base_price: 150_00,
        cleaning_fee: 50_00,
        currency: "USD".to_string(),
        unit_ids: units.iter().map(|u| u.to_string()).collect(),
        cancellation_policy: CancellationPolicy::Moderate,
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    workflow: BookingWorkflow,
    events: mpsc::UnboundedReceiver<(BookingEvent, serde_json::Value)>,
}

fn harness(listing: PropertyListing, today: &'static str) -> Harness {
    let store = Arc::new(MemoryStore::new());
    store.upsert_listing(listing);
    let (tx, events) = mpsc::unbounded_channel();
    let workflow = BookingWorkflow::new(
        WorkflowDeps {
            ledger: AvailabilityLedger::new(store.clone()),
            bookings: store.clone(),
            properties: store.clone(),
            notifier: Arc::new(ChannelNotifier(tx)),
            clock: Arc::new(clock_at(today)),
        },
        FeeSchedule::new(Rate::percent(10), Rate::percent(8)),
    );
    Harness { store, workflow, events }
}

fn request(check_in: &str, check_out: &str, guests: u32) -> BookingRequest {
    BookingRequest {
        property_id: "cottage".to_string(),
        unit_ids: Vec::new(),
        guest_id: "guest-1".to_string(),
        check_in: d(check_in),
        check_out: d(check_out),
        guests,
    }
}

async fn next_event(h: &mut Harness) -> (BookingEvent, serde_json::Value) {
    tokio::time::timeout(Duration::from_secs(2), h.events.recv())
        .await
        .expect("notification not delivered")
        .expect("channel closed")
}

#[tokio::test]
async fn create_booking_prices_reserves_and_notifies() {
    let mut h = harness(cottage(&[]), "2024-12-01");
    h.store.set_price_override("cottage", d("2024-12-16"), 200_00);

    let booking = h.workflow.create_booking(request("2024-12-15", "2024-12-18", 2)).await.unwrap();

    assert_eq!(booking.status, BookingStatus::PendingApproval);
    assert_eq!(booking.payment_status, PaymentStatus::Unpaid);
    assert_eq!(booking.host_id, "host-1");
    let price = &booking.price_breakdown;
    assert_eq!(price.subtotal, 500_00);
    assert_eq!(price.service_fee, 50_00);
    assert_eq!(price.taxes, 48_00);
    assert_eq!(price.total, 648_00);

    let cal = h
        .workflow
        .ledger()
        .calendar("cottage", None, d("2024-12-15"), d("2024-12-18"))
        .await
        .unwrap();
    assert!(cal.iter().all(|day| day.status == DayStatus::Booked && day.booking_id == Some(booking.id)));

    let (event, payload) = next_event(&mut h).await;
    assert_eq!(event, BookingEvent::BookingCreated);
    assert_eq!(payload["bookingId"], booking.id.to_string());
    assert_eq!(payload["total"], 648_00);
}

#[tokio::test]
async fn overlapping_request_is_refused_as_unavailable() {
    let h = harness(cottage(&[]), "2024-12-01");
    h.workflow.create_booking(request("2024-12-15", "2024-12-18", 2)).await.unwrap();

    let err = h
        .workflow
        .create_booking(request("2024-12-17", "2024-12-20", 2))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::DatesUnavailable { .. }));
    assert_eq!(h.store.ledger_len("cottage"), 3);

    // Back-to-back is fine: check-out day is not a night.
    h.workflow.create_booking(request("2024-12-18", "2024-12-20", 2)).await.unwrap();
}

#[tokio::test]
async fn invalid_requests_fail_before_touching_the_ledger() {
    let h = harness(cottage(&[]), "2024-12-10");

    let cases = [
        (request("2024-12-18", "2024-12-15", 2), "range"),
        (request("2024-12-15", "2024-12-15", 2), "range"),
        (request("2024-12-01", "2024-12-03", 2), "range"),
        (request("2024-12-15", "2024-12-18", 5), "validation"),
        (request("2024-12-15", "2024-12-18", 0), "validation"),
    ];
    for (req, expected) in cases {
        let err = h.workflow.create_booking(req).await.unwrap_err();
        match expected {
            "range" => assert!(matches!(err, AppError::InvalidRange(_)), "{err:?}"),
            _ => assert!(matches!(err, AppError::ValidationError(_)), "{err:?}"),
        }
    }

    let mut unknown = request("2024-12-15", "2024-12-18", 2);
    unknown.property_id = "castle".to_string();
    assert!(matches!(
        h.workflow.create_booking(unknown).await,
        Err(AppError::NotFound(..))
    ));
    assert_eq!(h.store.ledger_len("cottage"), 0);
}

#[tokio::test]
async fn happy_path_accept_then_confirm() {
    let mut h = harness(cottage(&[]), "2024-12-01");
    let booking = h.workflow.create_booking(request("2024-12-15", "2024-12-18", 2)).await.unwrap();
    next_event(&mut h).await;

    let accepted = h.workflow.accept(booking.id).await.unwrap();
    assert_eq!(accepted.status, BookingStatus::Accepted);
    assert_eq!(next_event(&mut h).await.0, BookingEvent::BookingAccepted);

    let confirmed = h.workflow.confirm(booking.id).await.unwrap();
    assert_eq!(confirmed.status, BookingStatus::Confirmed);
    assert_eq!(confirmed.payment_status, PaymentStatus::Paid);
    assert_eq!(next_event(&mut h).await.0, BookingEvent::BookingConfirmed);

    // Confirmed is terminal and keeps its nights.
    assert!(matches!(h.workflow.cancel(booking.id).await, Err(AppError::InvalidTransition { .. })));
    assert_eq!(h.store.ledger_len("cottage"), 3);
    assert_eq!(h.workflow.get(booking.id).await.unwrap().status, BookingStatus::Confirmed);
}

#[tokio::test]
async fn reject_requires_a_reason_and_then_releases() {
    let h = harness(cottage(&[]), "2024-12-01");
    let booking = h.workflow.create_booking(request("2024-12-15", "2024-12-18", 2)).await.unwrap();

    assert!(matches!(
        h.workflow.reject(booking.id, "").await,
        Err(AppError::ValidationError(_))
    ));
    assert!(!h
        .workflow
        .ledger()
        .is_range_available("cottage", None, d("2024-12-15"), d("2024-12-18"))
        .await
        .unwrap());
    assert_eq!(h.workflow.get(booking.id).await.unwrap().status, BookingStatus::PendingApproval);

    let rejected = h.workflow.reject(booking.id, "dates no longer work").await.unwrap();
    assert_eq!(rejected.status, BookingStatus::Rejected);
    assert_eq!(rejected.rejection_reason.as_deref(), Some("dates no longer work"));
    assert_eq!(h.store.ledger_len("cottage"), 0);

    assert!(matches!(
        h.workflow.accept(booking.id).await,
        Err(AppError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn cancel_from_pending_or_accepted_frees_the_nights() {
    let h = harness(cottage(&[]), "2024-12-01");
    let pending = h.workflow.create_booking(request("2024-12-15", "2024-12-18", 2)).await.unwrap();
    let accepted = h.workflow.create_booking(request("2024-12-20", "2024-12-22", 2)).await.unwrap();
    h.workflow.accept(accepted.id).await.unwrap();

    h.workflow.cancel(pending.id).await.unwrap();
    h.workflow.cancel(accepted.id).await.unwrap();
    assert_eq!(h.store.ledger_len("cottage"), 0);

    assert!(matches!(
        h.workflow.cancel(pending.id).await,
        Err(AppError::InvalidTransition { .. })
    ));
    // Retry hook is harmless on an already released booking.
    h.workflow.release_nights(pending.id).await.unwrap();

    // The freed nights can be booked again.
    h.workflow.create_booking(request("2024-12-15", "2024-12-22", 2)).await.unwrap();
}

#[tokio::test]
async fn confirm_requires_accept_first() {
    let h = harness(cottage(&[]), "2024-12-01");
    let booking = h.workflow.create_booking(request("2024-12-15", "2024-12-18", 2)).await.unwrap();
    assert!(matches!(
        h.workflow.confirm(booking.id).await,
        Err(AppError::InvalidTransition { .. })
    ));
    assert!(matches!(
        h.workflow.release_nights(booking.id).await,
        Err(AppError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn whole_listing_request_holds_every_unit() {
    let h = harness(cottage(&["north", "south"]), "2024-12-01");
    let whole = h.workflow.create_booking(request("2024-12-15", "2024-12-17", 4)).await.unwrap();
    assert_eq!(whole.unit_ids, vec!["north", "south"]);
    assert_eq!(h.store.ledger_len("cottage"), 4);

    let mut one_room = request("2024-12-16", "2024-12-18", 1);
    one_room.unit_ids = vec!["south".to_string()];
    assert!(matches!(
        h.workflow.create_booking(one_room.clone()).await,
        Err(AppError::DatesUnavailable { .. })
    ));

    h.workflow.cancel(whole.id).await.unwrap();
    let room = h.workflow.create_booking(one_room).await.unwrap();
    assert_eq!(room.unit_ids, vec!["south"]);

    let mut other_room = request("2024-12-16", "2024-12-18", 1);
    other_room.unit_ids = vec!["north".to_string()];
    h.workflow.create_booking(other_room).await.unwrap();
}

#[tokio::test]
async fn refund_quote_uses_listing_policy_and_clock() {
    let h = harness(cottage(&[]), "2024-12-13");
    let booking = h.workflow.create_booking(request("2024-12-15", "2024-12-18", 2)).await.unwrap();

    // Nothing has been captured yet.
    let unpaid = h.workflow.refund_quote(booking.id).await.unwrap();
    assert_eq!(unpaid.total_paid, 0);
    assert_eq!(unpaid.amount, 0);

    h.workflow.accept(booking.id).await.unwrap();
    h.workflow.confirm(booking.id).await.unwrap();
    let quote = h.workflow.refund_quote(booking.id).await.unwrap();
    assert_eq!(quote.policy, CancellationPolicy::Moderate);
    assert_eq!(quote.days_until_check_in, 2);
    assert_eq!(quote.total_paid, booking.price_breakdown.total);
    assert_eq!(quote.percent, 50);
    assert_eq!(quote.amount, booking.price_breakdown.total / 2);
}

#[tokio::test]
async fn finished_bookings_have_no_refund_quote() {
    let h = harness(cottage(&[]), "2024-12-01");
    let cancelled = h.workflow.create_booking(request("2024-12-15", "2024-12-18", 2)).await.unwrap();
    let rejected = h.workflow.create_booking(request("2024-12-20", "2024-12-22", 2)).await.unwrap();
    h.workflow.cancel(cancelled.id).await.unwrap();
    h.workflow.reject(rejected.id, "owner visiting").await.unwrap();

    for id in [cancelled.id, rejected.id] {
        assert!(matches!(
            h.workflow.refund_quote(id).await,
            Err(AppError::InvalidTransition { .. })
        ));
    }
}

#[tokio::test]
async fn whole_listing_block_stops_single_unit_bookings() {
    let h = harness(cottage(&["north", "south"]), "2024-12-01");
    h.workflow
        .ledger()
        .block("cottage", None, d("2024-12-15"), d("2024-12-17"), "boiler replacement")
        .await
        .unwrap();

    let mut one_room = request("2024-12-16", "2024-12-18", 1);
    one_room.unit_ids = vec!["north".to_string()];
    assert!(matches!(
        h.workflow.create_booking(one_room).await,
        Err(AppError::DatesUnavailable { .. })
    ));
    assert!(matches!(
        h.workflow.create_booking(request("2024-12-14", "2024-12-16", 2)).await,
        Err(AppError::DatesUnavailable { .. })
    ));
    let cal = h
        .workflow
        .ledger()
        .calendar("cottage", Some("south"), d("2024-12-15"), d("2024-12-18"))
        .await
        .unwrap();
    let statuses: Vec<DayStatus> = cal.iter().map(|day| day.status).collect();
    assert_eq!(statuses, [DayStatus::Blocked, DayStatus::Blocked, DayStatus::Available]);
    assert_eq!(h.store.ledger_len("cottage"), 2);
}

#[tokio::test]
async fn oversized_ranges_are_refused_before_any_work() {
    let h = harness(cottage(&[]), "2024-12-01");
    let ledger = h.workflow.ledger();

    let err = h
        .workflow
        .create_booking(request("2024-12-15", "2600-01-01", 2))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ValidationError(_)), "{err:?}");
    assert!(matches!(
        h.workflow.quote("cottage", d("2024-12-15"), d("2600-01-01")).await,
        Err(AppError::ValidationError(_))
    ));
    assert!(matches!(
        ledger.block("cottage", None, d("2024-12-15"), d("2600-01-01"), "forever").await,
        Err(AppError::ValidationError(_))
    ));
    assert!(matches!(
        ledger.calendar("cottage", None, d("2024-01-01"), d("2600-01-01")).await,
        Err(AppError::ValidationError(_))
    ));
    assert_eq!(h.store.ledger_len("cottage"), 0);

    // A full year is still fine.
    h.workflow.create_booking(request("2025-01-01", "2026-01-01", 2)).await.unwrap();
    assert_eq!(h.store.ledger_len("cottage"), 365);
}

/// Booking repo over the memory store whose inserts can lag or fail.
struct LaggingBookings {
    store: Arc<MemoryStore>,
    delay: Duration,
    fail: bool,
}

#[async_trait]
impl BookingRepo for LaggingBookings {
    async fn insert(&self, booking: &Booking) -> anyhow::Result<()> {
        tokio::time::sleep(self.delay).await;
        if self.fail {
            anyhow::bail!("disk full");
        }
        self.store.insert(booking).await
    }

    async fn get(&self, id: BookingId) -> anyhow::Result<Option<Booking>> {
        self.store.get(id).await
    }

    async fn update_status(&self, expected: BookingStatus, booking: &Booking) -> anyhow::Result<bool> {
        self.store.update_status(expected, booking).await
    }

    async fn list_for_property(&self, property_id: &str) -> anyhow::Result<Vec<Booking>> {
        self.store.list_for_property(property_id).await
    }
}

fn lagging_workflow(store: &Arc<MemoryStore>, delay: Duration, fail: bool) -> BookingWorkflow {
    store.upsert_listing(cottage(&[]));
    let mut notifier = MockNotifier::new();
    notifier.expect_notify().returning(|_, _| Ok(()));
    BookingWorkflow::new(
        WorkflowDeps {
            ledger: AvailabilityLedger::new(store.clone()),
            bookings: Arc::new(LaggingBookings { store: store.clone(), delay, fail }),
            properties: store.clone(),
            notifier: Arc::new(notifier),
            clock: Arc::new(clock_at("2024-12-01")),
        },
        FeeSchedule::default(),
    )
}

#[tokio::test]
async fn abandoned_create_still_completes() {
    let store = Arc::new(MemoryStore::new());
    let workflow = lagging_workflow(&store, Duration::from_millis(200), false);

    let attempt = tokio::time::timeout(
        Duration::from_millis(20),
        workflow.create_booking(request("2024-12-15", "2024-12-18", 2)),
    )
    .await;
    assert!(attempt.is_err(), "insert should still be in flight");

    // The reservation and the insert finish without the caller.
    tokio::time::sleep(Duration::from_millis(500)).await;
    let stored = store.list_for_property("cottage").await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(store.ledger_len("cottage"), 3);
    let cal = workflow
        .ledger()
        .calendar("cottage", None, d("2024-12-15"), d("2024-12-18"))
        .await
        .unwrap();
    assert!(cal.iter().all(|day| day.booking_id == Some(stored[0].id)));
}

#[tokio::test]
async fn failed_insert_gives_the_nights_back() {
    let store = Arc::new(MemoryStore::new());
    let workflow = lagging_workflow(&store, Duration::ZERO, true);

    let err = workflow.create_booking(request("2024-12-15", "2024-12-18", 2)).await.unwrap_err();
    assert!(matches!(err, AppError::Storage(_)), "{err:?}");
    assert_eq!(store.ledger_len("cottage"), 0);
    assert!(store.list_for_property("cottage").await.unwrap().is_empty());
}

#[tokio::test]
async fn notifier_failures_do_not_fail_the_booking() {
    let store = Arc::new(MemoryStore::new());
    store.upsert_listing(cottage(&[]));
    let mut notifier = MockNotifier::new();
    notifier
        .expect_notify()
        .returning(|_, _| Err(anyhow::anyhow!("smtp relay down")));

    let workflow = BookingWorkflow::new(
        WorkflowDeps {
            ledger: AvailabilityLedger::new(store.clone()),
            bookings: store.clone(),
            properties: store.clone(),
            notifier: Arc::new(notifier),
            clock: Arc::new(clock_at("2024-12-01")),
        },
        FeeSchedule::default(),
    );

    let booking = workflow.create_booking(request("2024-12-15", "2024-12-18", 2)).await.unwrap();
    workflow.accept(booking.id).await.unwrap();
    assert_eq!(store.get(booking.id).await.unwrap().unwrap().status, BookingStatus::Accepted);
}

#[tokio::test]
async fn directory_outage_surfaces_as_retryable_storage_error() {
    let store = Arc::new(MemoryStore::new());
    let mut directory = MockPropertyDirectory::new();
    directory
        .expect_listing()
        .returning(|_| Err(anyhow::anyhow!("listing service timed out")));
    let mut notifier = MockNotifier::new();
    notifier.expect_notify().never();

    let workflow = BookingWorkflow::new(
        WorkflowDeps {
            ledger: AvailabilityLedger::new(store.clone()),
            bookings: store.clone(),
            properties: Arc::new(directory),
            notifier: Arc::new(notifier),
            clock: Arc::new(clock_at("2024-12-01")),
        },
        FeeSchedule::default(),
    );

    let err = workflow.create_booking(request("2024-12-15", "2024-12-18", 2)).await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(store.ledger_len("cottage"), 0);
}
