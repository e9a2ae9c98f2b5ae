//! # Booking Workflow
//!
//! validate -> check availability -> price -> reserve -> persist -> notify.
//!
//! A pending request already holds its nights in the ledger so nobody can
//! book them while the host is deciding. Status changes are compare-and-set
//! against the stored status, so two concurrent decisions cannot both win.

use std::sync::Arc;

use chrono::Utc;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::dates::{days_between, DateKey, StayRange};
use crate::error::{AppError, Result};
use crate::ledger::AvailabilityLedger;
use crate::models::{
    Booking, BookingEvent, BookingId, BookingRequest, BookingStatus, PaymentStatus,
    PriceBreakdown, PropertyListing,
};
use crate::pricing::{compute_price, FeeSchedule};
use crate::refund::{evaluate_refund, CancellationPolicy};
use crate::traits::{BookingRepo, Clock, Notifier, PropertyDirectory};

/// What a guest would get back if they cancelled today.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundQuote {
    pub booking_id: BookingId,
    pub policy: CancellationPolicy,
    pub days_until_check_in: i64,
    pub total_paid: i64,
    pub percent: u8,
    pub amount: i64,
}

/// Collaborators the workflow needs, wired by the binary.
pub struct WorkflowDeps {
    pub ledger: AvailabilityLedger,
    pub bookings: Arc<dyn BookingRepo>,
    pub properties: Arc<dyn PropertyDirectory>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
}

pub struct BookingWorkflow {
    ledger: AvailabilityLedger,
    bookings: Arc<dyn BookingRepo>,
    properties: Arc<dyn PropertyDirectory>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    fees: FeeSchedule,
}

impl BookingWorkflow {
    pub fn new(deps: WorkflowDeps, fees: FeeSchedule) -> Self {
        Self {
            ledger: deps.ledger,
            bookings: deps.bookings,
            properties: deps.properties,
            notifier: deps.notifier,
            clock: deps.clock,
            fees,
        }
    }

    pub fn ledger(&self) -> &AvailabilityLedger {
        &self.ledger
    }

    pub fn fees(&self) -> &FeeSchedule {
        &self.fees
    }

    /// Prices a stay without touching the ledger.
    pub async fn quote(
        &self,
        property_id: &str,
        check_in: DateKey,
        check_out: DateKey,
    ) -> Result<PriceBreakdown> {
        let stay = self.ledger.span(check_in, check_out)?;
        let listing = self.listing(property_id).await?;
        self.price(&listing, &stay).await
    }

    pub async fn create_booking(&self, request: BookingRequest) -> Result<Booking> {
        let stay = self.ledger.span(request.check_in, request.check_out)?;
        let listing = self.listing(&request.property_id).await?;

        let today = self.clock.today();
        if stay.check_in < today {
            return Err(AppError::InvalidRange(format!(
                "check-in {} is in the past (today is {today})",
                stay.check_in
            )));
        }
        if request.guests == 0 {
            return Err(AppError::ValidationError("at least one guest is required".to_string()));
        }
        if request.guests > listing.max_guests {
            return Err(AppError::ValidationError(format!(
                "{} guests exceeds the maximum of {}",
                request.guests, listing.max_guests
            )));
        }
        let unit_ids = resolve_units(&listing, &request.unit_ids)?;
        let scopes: Vec<Option<String>> = if unit_ids.is_empty() {
            vec![None]
        } else {
            unit_ids.iter().cloned().map(Some).collect()
        };

        for scope in &scopes {
            if !self.ledger.is_free(&listing.id, scope.as_deref(), &stay).await? {
                return Err(AppError::DatesUnavailable {
                    property_id: listing.id.clone(),
                });
            }
        }

        let price_breakdown = self.price(&listing, &stay).await?;

        let now = Utc::now();
        let booking = Booking {
            id: Uuid::now_v7(),
            property_id: listing.id.clone(),
            unit_ids,
            guest_id: request.guest_id,
            host_id: listing.host_id.clone(),
            check_in: stay.check_in,
            check_out: stay.check_out,
            guests: request.guests,
            price_breakdown,
            status: BookingStatus::PendingApproval,
            payment_status: PaymentStatus::Unpaid,
            rejection_reason: None,
            created_at: now,
            updated_at: now,
        };

        // Reserve, insert and unwind run as one spawned task; dropping this
        // future does not cancel them.
        let commit = tokio::spawn(commit_booking(
            self.ledger.clone(),
            Arc::clone(&self.bookings),
            booking,
            scopes,
        ));
        let booking = commit
            .await
            .map_err(|join| AppError::Storage(anyhow::anyhow!("booking task aborted: {join}")))??;

        info!(
            "booking {} requested for {} {} ({} guests, total {})",
            booking.id,
            booking.property_id,
            stay,
            booking.guests,
            booking.price_breakdown.display_total()
        );
        self.dispatch(BookingEvent::BookingCreated, &booking);
        Ok(booking)
    }

    pub async fn get(&self, booking_id: BookingId) -> Result<Booking> {
        self.bookings
            .get(booking_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Booking".to_string(), booking_id.to_string()))
    }

    /// Host approves a pending request.
    pub async fn accept(&self, booking_id: BookingId) -> Result<Booking> {
        let booking = self.transition(booking_id, BookingStatus::Accepted, |_| {}).await?;
        self.dispatch(BookingEvent::BookingAccepted, &booking);
        Ok(booking)
    }

    /// Host declines a pending request. The reason is mandatory.
    pub async fn reject(&self, booking_id: BookingId, reason: &str) -> Result<Booking> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(AppError::ValidationError("a rejection reason is required".to_string()));
        }
        let booking = self
            .transition(booking_id, BookingStatus::Rejected, |b| {
                b.rejection_reason = Some(reason.to_string());
            })
            .await?;
        self.release_booking_nights(&booking).await?;
        self.dispatch(BookingEvent::BookingRejected, &booking);
        Ok(booking)
    }

    /// Guest or host withdraws a booking that has not been confirmed.
    pub async fn cancel(&self, booking_id: BookingId) -> Result<Booking> {
        let booking = self.transition(booking_id, BookingStatus::Cancelled, |_| {}).await?;
        self.release_booking_nights(&booking).await?;
        self.dispatch(BookingEvent::BookingCancelled, &booking);
        Ok(booking)
    }

    /// Payment captured for an accepted booking.
    pub async fn confirm(&self, booking_id: BookingId) -> Result<Booking> {
        let booking = self
            .transition(booking_id, BookingStatus::Confirmed, |b| {
                b.payment_status = PaymentStatus::Paid;
            })
            .await?;
        self.dispatch(BookingEvent::BookingConfirmed, &booking);
        Ok(booking)
    }

    /// Retry hook for a rejected/cancelled booking whose release failed.
    pub async fn release_nights(&self, booking_id: BookingId) -> Result<Booking> {
        let booking = self.get(booking_id).await?;
        if !booking.status.releases_nights() {
            return Err(AppError::InvalidTransition {
                from: booking.status.to_string(),
                to: "released".to_string(),
            });
        }
        self.release_booking_nights(&booking).await?;
        Ok(booking)
    }

    /// Refund owed under the listing's policy if cancelled today.
    ///
    /// Only money actually captured is refundable, so unpaid bookings quote
    /// zero. Rejected and cancelled bookings have nothing left to cancel.
    pub async fn refund_quote(&self, booking_id: BookingId) -> Result<RefundQuote> {
        let booking = self.get(booking_id).await?;
        if booking.status.releases_nights() {
            return Err(AppError::InvalidTransition {
                from: booking.status.to_string(),
                to: BookingStatus::Cancelled.to_string(),
            });
        }
        let listing = self.listing(&booking.property_id).await?;
        let today = self.clock.today();
        // Past check-in counts as negative notice; no policy refunds that.
        let days_until_check_in = if booking.check_in >= today {
            days_between(today, booking.check_in)?
        } else {
            -days_between(booking.check_in, today)?
        };
        let total_paid = match booking.payment_status {
            PaymentStatus::Paid => booking.price_breakdown.total,
            PaymentStatus::Unpaid => 0,
        };
        let refund = evaluate_refund(total_paid, days_until_check_in, listing.cancellation_policy);

        Ok(RefundQuote {
            booking_id,
            policy: listing.cancellation_policy,
            days_until_check_in,
            total_paid,
            percent: refund.percent,
            amount: refund.amount,
        })
    }

    async fn listing(&self, property_id: &str) -> Result<PropertyListing> {
        self.properties
            .listing(property_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Property".to_string(), property_id.to_string()))
    }

    async fn price(&self, listing: &PropertyListing, stay: &StayRange) -> Result<PriceBreakdown> {
        let overrides = self.properties.price_overrides(&listing.id, stay).await?;
        compute_price(
            stay,
            listing.base_price,
            listing.cleaning_fee,
            &overrides,
            &self.fees,
            &listing.currency,
        )
    }

    async fn transition<F>(&self, booking_id: BookingId, next: BookingStatus, edit: F) -> Result<Booking>
    where
        F: FnOnce(&mut Booking),
    {
        let current = self.get(booking_id).await?;
        let previous = current.status;
        if !previous.can_transition_to(next) {
            return Err(AppError::InvalidTransition {
                from: previous.to_string(),
                to: next.to_string(),
            });
        }

        let mut updated = current;
        updated.status = next;
        updated.updated_at = Utc::now();
        edit(&mut updated);

        if !self.bookings.update_status(previous, &updated).await? {
            // Someone else moved it between our read and write.
            let latest = self.get(booking_id).await?;
            return Err(AppError::InvalidTransition {
                from: latest.status.to_string(),
                to: next.to_string(),
            });
        }
        info!("booking {booking_id}: {previous} -> {next}");
        Ok(updated)
    }

    async fn release_booking_nights(&self, booking: &Booking) -> Result<()> {
        let stay = booking.stay();
        for scope in booking.scopes() {
            self.ledger
                .release_range(&booking.property_id, scope.as_deref(), &stay, booking.id)
                .await?;
        }
        Ok(())
    }

    /// Hands the event to the notifier without waiting for it.
    fn dispatch(&self, event: BookingEvent, booking: &Booking) {
        let payload = json!({
            "bookingId": booking.id,
            "propertyId": booking.property_id,
            "guestId": booking.guest_id,
            "hostId": booking.host_id,
            "checkIn": booking.check_in,
            "checkOut": booking.check_out,
            "status": booking.status,
            "total": booking.price_breakdown.total,
            "currency": booking.price_breakdown.currency,
            "reason": booking.rejection_reason,
        });
        let notifier = Arc::clone(&self.notifier);
        let booking_id = booking.id;

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = notifier.notify(event, payload).await {
                        warn!("notification {event} for booking {booking_id} failed: {err:#}");
                    }
                });
            }
            Err(_) => warn!("no async runtime; dropped {event} notification for booking {booking_id}"),
        }
    }
}

/// Reserves the nights, then persists the booking, giving the nights back
/// if the insert fails.
async fn commit_booking(
    ledger: AvailabilityLedger,
    bookings: Arc<dyn BookingRepo>,
    booking: Booking,
    scopes: Vec<Option<String>>,
) -> Result<Booking> {
    let stay = booking.stay();
    ledger
        .reserve_scopes(&booking.property_id, scopes, &stay, booking.id)
        .await?;

    if let Err(err) = bookings.insert(&booking).await {
        for scope in booking.scopes() {
            if let Err(unwind) = ledger
                .release_range(&booking.property_id, scope.as_deref(), &stay, booking.id)
                .await
            {
                error!("booking {} insert failed and release failed too: {unwind}", booking.id);
            }
        }
        return Err(AppError::Storage(err.context("failed to persist booking")));
    }
    Ok(booking)
}

/// Empty request on a multi-unit listing means the whole place.
fn resolve_units(listing: &PropertyListing, requested: &[String]) -> Result<Vec<String>> {
    if requested.is_empty() {
        return Ok(listing.unit_ids.clone());
    }
    let mut units = Vec::with_capacity(requested.len());
    for unit in requested {
        if !listing.unit_ids.contains(unit) {
            return Err(AppError::ValidationError(format!(
                "unit '{unit}' does not belong to property {}",
                listing.id
            )));
        }
        if !units.contains(unit) {
            units.push(unit.clone());
        }
    }
    Ok(units)
}
