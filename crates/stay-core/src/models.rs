//! # Domain Models
//!
//! These structs represent the core entities of the booking subsystem.
//! Money is always `i64` minor units (cents); bookings use UUID v7 for
//! time-ordered identification.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dates::{DateKey, StayRange};
use crate::error::AppError;
use crate::refund::CancellationPolicy;

pub type BookingId = Uuid;

/// Host-set nightly prices keyed by night. Absent nights use the base price.
pub type PriceOverrides = BTreeMap<DateKey, i64>;

/// Price of a single night of a stay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NightlyRate {
    pub date: DateKey,
    pub price: i64,
}

/// The full, immutable result of a price quote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceBreakdown {
    pub nights: u32,
    pub base_price: i64,
    pub subtotal: i64,
    pub cleaning_fee: i64,
    pub service_fee: i64,
    pub taxes: i64,
    pub total: i64,
    pub currency: String,
    pub nightly_rates: Vec<NightlyRate>,
}

impl PriceBreakdown {
    /// Renders a minor-unit amount as `123.45` for display.
    pub fn format_amount(amount: i64) -> String {
        let sign = if amount < 0 { "-" } else { "" };
        let abs = amount.unsigned_abs();
        format!("{sign}{}.{:02}", abs / 100, abs % 100)
    }

    pub fn display_total(&self) -> String {
        format!("{} {}", Self::format_amount(self.total), self.currency)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DayStatus {
    Available,
    Blocked,
    Booked,
}

impl DayStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DayStatus::Available => "available",
            DayStatus::Blocked => "blocked",
            DayStatus::Booked => "booked",
        }
    }
}

impl FromStr for DayStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, AppError> {
        match s {
            "available" => Ok(DayStatus::Available),
            "blocked" => Ok(DayStatus::Blocked),
            "booked" => Ok(DayStatus::Booked),
            other => Err(AppError::ValidationError(format!("unknown day status '{other}'"))),
        }
    }
}

/// One row of the availability ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityDay {
    pub property_id: String,
    /// `None` means the row applies to the whole property
    pub unit_id: Option<String>,
    pub day: DateKey,
    pub status: DayStatus,
    pub booking_id: Option<BookingId>,
    /// Host note for `Blocked` days
    pub reason: Option<String>,
}

impl AvailabilityDay {
    pub fn available(property_id: &str, unit_id: Option<&str>, day: DateKey) -> Self {
        Self {
            property_id: property_id.to_string(),
            unit_id: unit_id.map(str::to_string),
            day,
            status: DayStatus::Available,
            booking_id: None,
            reason: None,
        }
    }

    /// Whether this day stops `holder` from claiming it.
    pub fn blocks(&self, holder: Option<BookingId>) -> bool {
        match self.status {
            DayStatus::Available => false,
            DayStatus::Blocked => true,
            DayStatus::Booked => holder.is_none() || self.booking_id != holder,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    PendingApproval,
    Accepted,
    Confirmed,
    Rejected,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::PendingApproval => "pending_approval",
            BookingStatus::Accepted => "accepted",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Rejected => "rejected",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Confirmed | BookingStatus::Rejected | BookingStatus::Cancelled
        )
    }

    /// Terminal bookings whose nights go back to the ledger.
    pub fn releases_nights(&self) -> bool {
        matches!(self, BookingStatus::Rejected | BookingStatus::Cancelled)
    }

    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (PendingApproval, Accepted)
                | (PendingApproval, Rejected)
                | (PendingApproval, Cancelled)
                | (Accepted, Confirmed)
                | (Accepted, Cancelled)
        )
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, AppError> {
        match s {
            "pending_approval" => Ok(BookingStatus::PendingApproval),
            "accepted" => Ok(BookingStatus::Accepted),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "rejected" => Ok(BookingStatus::Rejected),
            "cancelled" => Ok(BookingStatus::Cancelled),
            other => Err(AppError::ValidationError(format!("unknown booking status '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Unpaid,
    Paid,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Unpaid => "unpaid",
            PaymentStatus::Paid => "paid",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, AppError> {
        match s {
            "unpaid" => Ok(PaymentStatus::Unpaid),
            "paid" => Ok(PaymentStatus::Paid),
            other => Err(AppError::ValidationError(format!("unknown payment status '{other}'"))),
        }
    }
}

/// A stay request as persisted. Never deleted; kept for audit/history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: BookingId,
    pub property_id: String,
    /// Empty means the booking holds the property-wide scope
    pub unit_ids: Vec<String>,
    pub guest_id: String,
    pub host_id: String,
    pub check_in: DateKey,
    pub check_out: DateKey,
    pub guests: u32,
    pub price_breakdown: PriceBreakdown,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn stay(&self) -> StayRange {
        StayRange {
            check_in: self.check_in,
            check_out: self.check_out,
        }
    }

    /// Ledger scopes held by this booking.
    pub fn scopes(&self) -> Vec<Option<String>> {
        if self.unit_ids.is_empty() {
            vec![None]
        } else {
            self.unit_ids.iter().cloned().map(Some).collect()
        }
    }
}

/// Input to `BookingWorkflow::create_booking`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRequest {
    pub property_id: String,
    #[serde(default)]
    pub unit_ids: Vec<String>,
    pub guest_id: String,
    pub check_in: DateKey,
    pub check_out: DateKey,
    pub guests: u32,
}

/// Read-only listing data owned by the property collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyListing {
    pub id: String,
    pub host_id: String,
    pub max_guests: u32,
    pub base_price: i64,
    pub cleaning_fee: i64,
    pub currency: String,
    #[serde(default)]
    pub unit_ids: Vec<String>,
    pub cancellation_policy: CancellationPolicy,
}

/// Events handed to the notification collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingEvent {
    BookingCreated,
    BookingAccepted,
    BookingRejected,
    BookingCancelled,
    BookingConfirmed,
}

impl BookingEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingEvent::BookingCreated => "booking_created",
            BookingEvent::BookingAccepted => "booking_accepted",
            BookingEvent::BookingRejected => "booking_rejected",
            BookingEvent::BookingCancelled => "booking_cancelled",
            BookingEvent::BookingConfirmed => "booking_confirmed",
        }
    }
}

impl fmt::Display for BookingEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
