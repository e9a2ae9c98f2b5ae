//! # Core Traits (Ports)
//!
//! Any plugin must implement these traits to be used by the binary.
//! Storage ports return `anyhow::Result`; a lost reservation race is a
//! normal `ClaimOutcome::Conflict`, not an error.

use async_trait::async_trait;
use chrono::Local;

use crate::dates::{DateKey, StayRange};
use crate::models::{
    AvailabilityDay, Booking, BookingEvent, BookingId, BookingStatus, DayStatus, PriceOverrides,
    PropertyListing,
};

/// What a claim writes into every night it covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimKind {
    Reserve(BookingId),
    Block { reason: String },
}

/// An all-or-nothing write across one or more scopes of a single property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerClaim {
    pub property_id: String,
    /// `None` is the property-wide scope
    pub unit_ids: Vec<Option<String>>,
    pub range: StayRange,
    pub kind: ClaimKind,
}

impl LedgerClaim {
    /// Whether an existing row prevents this claim from taking its night.
    pub fn conflicts_with(&self, existing: &AvailabilityDay) -> bool {
        match &self.kind {
            ClaimKind::Reserve(booking_id) => existing.blocks(Some(*booking_id)),
            ClaimKind::Block { .. } => existing.status == DayStatus::Booked,
        }
    }

    /// Whether a row in scope `unit_id` can clash with this claim.
    ///
    /// The property-wide scope (`None`) covers every unit, so it meets every
    /// unit scope in both directions.
    pub fn touches_scope(&self, unit_id: Option<&str>) -> bool {
        self.unit_ids
            .iter()
            .any(|scope| scopes_overlap(scope.as_deref(), unit_id))
    }

    /// The row this claim leaves behind for `unit_id` on `day`.
    pub fn row_for(&self, unit_id: Option<&str>, day: DateKey) -> AvailabilityDay {
        let mut row = AvailabilityDay::available(&self.property_id, unit_id, day);
        match &self.kind {
            ClaimKind::Reserve(booking_id) => {
                row.status = DayStatus::Booked;
                row.booking_id = Some(*booking_id);
            }
            ClaimKind::Block { reason } => {
                row.status = DayStatus::Blocked;
                row.reason = Some(reason.clone());
            }
        }
        row
    }
}

/// Two ledger scopes of one property share nights when either is the
/// property-wide scope or both name the same unit.
pub fn scopes_overlap(a: Option<&str>, b: Option<&str>) -> bool {
    a.is_none() || b.is_none() || a == b
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed,
    /// Sorted, de-duplicated nights that were already taken. Nothing was written.
    Conflict(Vec<DateKey>),
}

/// Persistence contract for availability rows.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Stored rows for the scope within `range`. Missing days are available.
    async fn days(
        &self,
        property_id: &str,
        unit_id: Option<&str>,
        range: &StayRange,
    ) -> anyhow::Result<Vec<AvailabilityDay>>;

    /// Stored rows of every scope of the property within `range`.
    async fn property_days(
        &self,
        property_id: &str,
        range: &StayRange,
    ) -> anyhow::Result<Vec<AvailabilityDay>>;

    /// Atomically applies `claim` to every night of every scope, or nothing.
    /// Rows in overlapping scopes (see `LedgerClaim::touches_scope`) count
    /// as conflicts too.
    async fn claim(&self, claim: &LedgerClaim) -> anyhow::Result<ClaimOutcome>;

    /// Removes rows in `range` booked by `booking_id`. Returns rows removed.
    async fn release(
        &self,
        property_id: &str,
        unit_id: Option<&str>,
        range: &StayRange,
        booking_id: BookingId,
    ) -> anyhow::Result<u64>;

    /// Removes host blocks in `range`. Returns rows removed.
    async fn clear_blocks(
        &self,
        property_id: &str,
        unit_id: Option<&str>,
        range: &StayRange,
    ) -> anyhow::Result<u64>;
}

/// Persistence contract for booking records.
#[async_trait]
pub trait BookingRepo: Send + Sync {
    async fn insert(&self, booking: &Booking) -> anyhow::Result<()>;
    async fn get(&self, id: BookingId) -> anyhow::Result<Option<Booking>>;

    /// Stores `booking` only if the stored status is still `expected`.
    async fn update_status(&self, expected: BookingStatus, booking: &Booking) -> anyhow::Result<bool>;

    async fn list_for_property(&self, property_id: &str) -> anyhow::Result<Vec<Booking>>;
}

/// Read-only access to listing data owned elsewhere.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait PropertyDirectory: Send + Sync {
    async fn listing(&self, property_id: &str) -> anyhow::Result<Option<PropertyListing>>;

    /// Host overrides for nights inside `range`.
    async fn price_overrides(
        &self,
        property_id: &str,
        range: &StayRange,
    ) -> anyhow::Result<PriceOverrides>;
}

/// Fire-and-forget delivery of booking events (email, chat, push...).
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: BookingEvent, payload: serde_json::Value) -> anyhow::Result<()>;
}

#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait Clock: Send + Sync {
    fn today(&self) -> DateKey;
}

/// Local civil date of the host machine.
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> DateKey {
        Local::now().date_naive().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn claim(units: &[Option<&str>]) -> LedgerClaim {
        LedgerClaim {
            property_id: "p1".to_string(),
            unit_ids: units.iter().map(|u| u.map(str::to_string)).collect(),
            range: StayRange::new("2024-12-15".parse().unwrap(), "2024-12-18".parse().unwrap())
                .unwrap(),
            kind: ClaimKind::Reserve(Uuid::now_v7()),
        }
    }

    #[test]
    fn property_wide_scope_meets_every_unit() {
        let whole = claim(&[None]);
        assert!(whole.touches_scope(None));
        assert!(whole.touches_scope(Some("a")));

        let rooms = claim(&[Some("a"), Some("b")]);
        assert!(rooms.touches_scope(None));
        assert!(rooms.touches_scope(Some("b")));
        assert!(!rooms.touches_scope(Some("c")));
    }
}
