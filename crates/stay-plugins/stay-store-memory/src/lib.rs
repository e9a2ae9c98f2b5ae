//! # stay-store-memory
//!
//! In-process implementation of `LedgerStore`, `BookingRepo` and
//! `PropertyDirectory`. Useful for tests, demos and single-node deployments
//! that don't need durability.
//!
//! Each property's ledger sits behind its own mutex. A claim checks and
//! writes every night under that one lock, so two overlapping claims on the
//! same property are serialized while different properties never contend.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::debug;

use stay_core::dates::{DateKey, StayRange};
use stay_core::models::{
    AvailabilityDay, Booking, BookingId, BookingStatus, DayStatus, PriceOverrides,
    PropertyListing,
};
use stay_core::traits::{
    BookingRepo, ClaimOutcome, LedgerClaim, LedgerStore, PropertyDirectory,
};

type ScopeKey = (Option<String>, DateKey);
type PropertyLedger = BTreeMap<ScopeKey, AvailabilityDay>;

#[derive(Default)]
pub struct MemoryStore {
    ledgers: DashMap<String, Arc<Mutex<PropertyLedger>>>,
    bookings: DashMap<BookingId, Booking>,
    listings: DashMap<String, PropertyListing>,
    overrides: DashMap<String, PriceOverrides>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listing CRUD lives elsewhere; this is how tests and the binary seed data.
    pub fn upsert_listing(&self, listing: PropertyListing) {
        self.listings.insert(listing.id.clone(), listing);
    }

    pub fn set_price_override(&self, property_id: &str, day: DateKey, price: i64) {
        self.overrides
            .entry(property_id.to_string())
            .or_default()
            .insert(day, price);
    }

    /// Number of stored ledger rows for a property, across all scopes.
    pub fn ledger_len(&self, property_id: &str) -> usize {
        let Some(ledger) = self.existing_ledger(property_id) else {
            return 0;
        };
        let len = match ledger.lock() {
            Ok(rows) => rows.len(),
            Err(_) => 0,
        };
        len
    }

    fn ledger_for(&self, property_id: &str) -> Arc<Mutex<PropertyLedger>> {
        // Clone the Arc so the DashMap shard lock is dropped before we block.
        Arc::clone(&*self.ledgers.entry(property_id.to_string()).or_default())
    }

    /// Existing ledger only; reads and deletes never create one.
    fn existing_ledger(&self, property_id: &str) -> Option<Arc<Mutex<PropertyLedger>>> {
        self.ledgers.get(property_id).map(|l| Arc::clone(&*l))
    }

    /// Number of properties with a ledger.
    pub fn ledger_count(&self) -> usize {
        self.ledgers.len()
    }
}

fn lock<'a>(
    ledger: &'a Mutex<PropertyLedger>,
    property_id: &str,
) -> anyhow::Result<MutexGuard<'a, PropertyLedger>> {
    ledger
        .lock()
        .map_err(|_| anyhow!("ledger lock poisoned for property {property_id}"))
}

fn scope_keys(unit_id: Option<&str>, range: &StayRange) -> std::ops::Range<ScopeKey> {
    let unit = unit_id.map(str::to_string);
    (unit.clone(), range.check_in)..(unit, range.check_out)
}

/// Removes rows in the scope/range matching `predicate`; returns how many.
fn remove_where(
    rows: &mut PropertyLedger,
    unit_id: Option<&str>,
    range: &StayRange,
    predicate: impl Fn(&AvailabilityDay) -> bool,
) -> u64 {
    let doomed: Vec<ScopeKey> = rows
        .range(scope_keys(unit_id, range))
        .filter(|(_, row)| predicate(row))
        .map(|(key, _)| key.clone())
        .collect();
    for key in &doomed {
        rows.remove(key);
    }
    doomed.len() as u64
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn days(
        &self,
        property_id: &str,
        unit_id: Option<&str>,
        range: &StayRange,
    ) -> anyhow::Result<Vec<AvailabilityDay>> {
        let Some(ledger) = self.existing_ledger(property_id) else {
            return Ok(Vec::new());
        };
        let rows = lock(&ledger, property_id)?;
        Ok(rows
            .range(scope_keys(unit_id, range))
            .map(|(_, row)| row.clone())
            .collect())
    }

    async fn property_days(
        &self,
        property_id: &str,
        range: &StayRange,
    ) -> anyhow::Result<Vec<AvailabilityDay>> {
        let Some(ledger) = self.existing_ledger(property_id) else {
            return Ok(Vec::new());
        };
        let rows = lock(&ledger, property_id)?;
        let mut found: Vec<AvailabilityDay> = rows
            .values()
            .filter(|row| range.contains(row.day))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.day.cmp(&b.day).then_with(|| a.unit_id.cmp(&b.unit_id)));
        Ok(found)
    }

    async fn claim(&self, claim: &LedgerClaim) -> anyhow::Result<ClaimOutcome> {
        let ledger = self.ledger_for(&claim.property_id);
        let mut rows = lock(&ledger, &claim.property_id)?;

        // Scan every scope: the property-wide scope and unit scopes overlap.
        let mut conflicts: Vec<DateKey> = rows
            .values()
            .filter(|row| {
                claim.range.contains(row.day)
                    && claim.touches_scope(row.unit_id.as_deref())
                    && claim.conflicts_with(row)
            })
            .map(|row| row.day)
            .collect();
        if !conflicts.is_empty() {
            conflicts.sort();
            conflicts.dedup();
            return Ok(ClaimOutcome::Conflict(conflicts));
        }

        for unit in &claim.unit_ids {
            for night in claim.range.nights() {
                rows.insert((unit.clone(), night), claim.row_for(unit.as_deref(), night));
            }
        }
        debug!(
            "memory ledger: claimed {} x {} night(s) on {}",
            claim.unit_ids.len(),
            claim.range.len(),
            claim.property_id
        );
        Ok(ClaimOutcome::Claimed)
    }

    async fn release(
        &self,
        property_id: &str,
        unit_id: Option<&str>,
        range: &StayRange,
        booking_id: BookingId,
    ) -> anyhow::Result<u64> {
        let Some(ledger) = self.existing_ledger(property_id) else {
            return Ok(0);
        };
        let mut rows = lock(&ledger, property_id)?;
        Ok(remove_where(&mut rows, unit_id, range, |row| {
            row.status == DayStatus::Booked && row.booking_id == Some(booking_id)
        }))
    }

    async fn clear_blocks(
        &self,
        property_id: &str,
        unit_id: Option<&str>,
        range: &StayRange,
    ) -> anyhow::Result<u64> {
        let Some(ledger) = self.existing_ledger(property_id) else {
            return Ok(0);
        };
        let mut rows = lock(&ledger, property_id)?;
        Ok(remove_where(&mut rows, unit_id, range, |row| {
            row.status == DayStatus::Blocked
        }))
    }
}

#[async_trait]
impl BookingRepo for MemoryStore {
    async fn insert(&self, booking: &Booking) -> anyhow::Result<()> {
        match self.bookings.entry(booking.id) {
            Entry::Occupied(_) => bail!("booking {} already exists", booking.id),
            Entry::Vacant(slot) => {
                slot.insert(booking.clone());
                Ok(())
            }
        }
    }

    async fn get(&self, id: BookingId) -> anyhow::Result<Option<Booking>> {
        Ok(self.bookings.get(&id).map(|b| b.clone()))
    }

    async fn update_status(&self, expected: BookingStatus, booking: &Booking) -> anyhow::Result<bool> {
        // get_mut holds the shard write lock, making this a compare-and-set.
        match self.bookings.get_mut(&booking.id) {
            Some(mut stored) if stored.status == expected => {
                *stored = booking.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_for_property(&self, property_id: &str) -> anyhow::Result<Vec<Booking>> {
        let mut found: Vec<Booking> = self
            .bookings
            .iter()
            .filter(|b| b.property_id == property_id)
            .map(|b| b.clone())
            .collect();
        found.sort_by_key(|b| b.created_at);
        Ok(found)
    }
}

#[async_trait]
impl PropertyDirectory for MemoryStore {
    async fn listing(&self, property_id: &str) -> anyhow::Result<Option<PropertyListing>> {
        Ok(self.listings.get(property_id).map(|l| l.clone()))
    }

    async fn price_overrides(
        &self,
        property_id: &str,
        range: &StayRange,
    ) -> anyhow::Result<PriceOverrides> {
        Ok(self
            .overrides
            .get(property_id)
            .map(|all| {
                all.range(range.check_in..range.check_out)
                    .map(|(day, price)| (*day, *price))
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stay_core::traits::ClaimKind;
    use uuid::Uuid;

    fn d(s: &str) -> DateKey {
        s.parse().unwrap()
    }

    fn range(a: &str, b: &str) -> StayRange {
        StayRange::new(d(a), d(b)).unwrap()
    }

    fn reserve(units: &[Option<&str>], a: &str, b: &str, id: BookingId) -> LedgerClaim {
        LedgerClaim {
            property_id: "p1".to_string(),
            unit_ids: units.iter().map(|u| u.map(str::to_string)).collect(),
            range: range(a, b),
            kind: ClaimKind::Reserve(id),
        }
    }

    #[tokio::test]
    async fn claim_writes_every_scope_and_night() {
        let store = MemoryStore::new();
        let id = Uuid::now_v7();
        let outcome = store
            .claim(&reserve(&[Some("a"), Some("b")], "2024-12-15", "2024-12-18", id))
            .await
            .unwrap();
        assert_eq!(outcome, ClaimOutcome::Claimed);
        assert_eq!(store.ledger_len("p1"), 6);

        let rows = store.days("p1", Some("a"), &range("2024-12-01", "2024-12-31")).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.booking_id == Some(id) && r.status == DayStatus::Booked));
        assert!(store.days("p1", None, &range("2024-12-01", "2024-12-31")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn conflict_reports_nights_and_writes_nothing() {
        let store = MemoryStore::new();
        store
            .claim(&reserve(&[Some("b")], "2024-12-16", "2024-12-18", Uuid::now_v7()))
            .await
            .unwrap();

        let outcome = store
            .claim(&reserve(&[Some("a"), Some("b")], "2024-12-15", "2024-12-20", Uuid::now_v7()))
            .await
            .unwrap();
        assert_eq!(outcome, ClaimOutcome::Conflict(vec![d("2024-12-16"), d("2024-12-17")]));
        assert_eq!(store.ledger_len("p1"), 2);
    }

    #[tokio::test]
    async fn release_and_clear_blocks_only_touch_their_rows() {
        let store = MemoryStore::new();
        let id = Uuid::now_v7();
        store.claim(&reserve(&[None], "2024-12-15", "2024-12-17", id)).await.unwrap();
        store
            .claim(&LedgerClaim {
                property_id: "p1".to_string(),
                unit_ids: vec![None],
                range: range("2024-12-17", "2024-12-19"),
                kind: ClaimKind::Block { reason: "maintenance".to_string() },
            })
            .await
            .unwrap();

        let wide = range("2024-12-01", "2024-12-31");
        assert_eq!(store.release("p1", None, &wide, Uuid::now_v7()).await.unwrap(), 0);
        assert_eq!(store.clear_blocks("p1", None, &wide).await.unwrap(), 2);
        assert_eq!(store.release("p1", None, &wide, id).await.unwrap(), 2);
        assert_eq!(store.release("p1", None, &wide, id).await.unwrap(), 0);
        assert_eq!(store.ledger_len("p1"), 0);
    }

    #[tokio::test]
    async fn price_overrides_are_limited_to_the_range() {
        let store = MemoryStore::new();
        store.set_price_override("p1", d("2024-12-24"), 250_00);
        store.set_price_override("p1", d("2024-12-31"), 400_00);

        let found = store.price_overrides("p1", &range("2024-12-20", "2024-12-27")).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found.get(&d("2024-12-24")), Some(&250_00));
        assert!(store.price_overrides("p2", &range("2024-12-20", "2024-12-27")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn property_wide_rows_conflict_with_unit_claims() {
        let store = MemoryStore::new();
        store
            .claim(&LedgerClaim {
                property_id: "p1".to_string(),
                unit_ids: vec![None],
                range: range("2024-12-15", "2024-12-18"),
                kind: ClaimKind::Block { reason: "renovation".to_string() },
            })
            .await
            .unwrap();

        let outcome = store
            .claim(&reserve(&[Some("a"), Some("b")], "2024-12-17", "2024-12-19", Uuid::now_v7()))
            .await
            .unwrap();
        assert_eq!(outcome, ClaimOutcome::Conflict(vec![d("2024-12-17")]));

        store
            .claim(&reserve(&[Some("a")], "2024-12-20", "2024-12-22", Uuid::now_v7()))
            .await
            .unwrap();
        let outcome = store
            .claim(&reserve(&[None], "2024-12-21", "2024-12-23", Uuid::now_v7()))
            .await
            .unwrap();
        assert_eq!(outcome, ClaimOutcome::Conflict(vec![d("2024-12-21")]));

        let all = store.property_days("p1", &range("2024-12-01", "2024-12-31")).await.unwrap();
        assert_eq!(all.len(), 5);
    }

    #[tokio::test]
    async fn deletes_on_unknown_properties_create_nothing() {
        let store = MemoryStore::new();
        let wide = range("2024-12-01", "2024-12-31");
        assert_eq!(store.clear_blocks("ghost", None, &wide).await.unwrap(), 0);
        assert_eq!(store.release("ghost", None, &wide, Uuid::now_v7()).await.unwrap(), 0);
        assert!(store.days("ghost", None, &wide).await.unwrap().is_empty());
        assert_eq!(store.ledger_count(), 0);
    }
}
