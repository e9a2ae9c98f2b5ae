//! # Availability Ledger
//!
//! Single source of truth for which property/unit/night combinations are
//! free. Callers never write rows directly; every mutation goes through a
//! `LedgerClaim` so the store can apply it atomically.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, info};

use crate::dates::{DateKey, StayRange};
use crate::error::{AppError, Result};
use crate::models::{AvailabilityDay, BookingId};
use crate::traits::{scopes_overlap, ClaimKind, ClaimOutcome, LedgerClaim, LedgerStore};

/// Longest range any single claim, check or calendar may cover.
pub const DEFAULT_MAX_NIGHTS: u32 = 366;

#[derive(Clone)]
pub struct AvailabilityLedger {
    store: Arc<dyn LedgerStore>,
    max_nights: u32,
}

impl AvailabilityLedger {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            store,
            max_nights: DEFAULT_MAX_NIGHTS,
        }
    }

    pub fn with_max_nights(mut self, max_nights: u32) -> Self {
        self.max_nights = max_nights.max(1);
        self
    }

    pub fn max_nights(&self) -> u32 {
        self.max_nights
    }

    /// A validated range no longer than `max_nights`.
    pub fn span(&self, check_in: DateKey, check_out: DateKey) -> Result<StayRange> {
        let range = StayRange::new(check_in, check_out)?;
        if range.len() > i64::from(self.max_nights) {
            return Err(AppError::ValidationError(format!(
                "{range} covers {} nights; the limit is {}",
                range.len(),
                self.max_nights
            )));
        }
        Ok(range)
    }

    /// True iff no night in the range is blocked or booked. Read-only.
    pub async fn is_range_available(
        &self,
        property_id: &str,
        unit_id: Option<&str>,
        check_in: DateKey,
        check_out: DateKey,
    ) -> Result<bool> {
        let range = self.span(check_in, check_out)?;
        self.is_free(property_id, unit_id, &range).await
    }

    /// Property-wide rows count against every unit and unit rows count
    /// against the property-wide scope.
    pub(crate) async fn is_free(
        &self,
        property_id: &str,
        unit_id: Option<&str>,
        range: &StayRange,
    ) -> Result<bool> {
        let rows = self.store.property_days(property_id, range).await?;
        Ok(rows
            .iter()
            .filter(|row| scopes_overlap(row.unit_id.as_deref(), unit_id))
            .all(|row| !row.blocks(None)))
    }

    /// Books every night for `booking_id`, or nothing.
    pub async fn reserve(
        &self,
        property_id: &str,
        unit_id: Option<&str>,
        check_in: DateKey,
        check_out: DateKey,
        booking_id: BookingId,
    ) -> Result<()> {
        let range = self.span(check_in, check_out)?;
        self.reserve_scopes(property_id, vec![unit_id.map(str::to_string)], &range, booking_id)
            .await
    }

    /// Same as `reserve`, across several units at once.
    pub async fn reserve_units(
        &self,
        property_id: &str,
        unit_ids: &[String],
        check_in: DateKey,
        check_out: DateKey,
        booking_id: BookingId,
    ) -> Result<()> {
        let range = self.span(check_in, check_out)?;
        let scopes = if unit_ids.is_empty() {
            vec![None]
        } else {
            unit_ids.iter().cloned().map(Some).collect()
        };
        self.reserve_scopes(property_id, scopes, &range, booking_id).await
    }

    pub(crate) async fn reserve_scopes(
        &self,
        property_id: &str,
        unit_ids: Vec<Option<String>>,
        range: &StayRange,
        booking_id: BookingId,
    ) -> Result<()> {
        let claim = LedgerClaim {
            property_id: property_id.to_string(),
            unit_ids,
            range: *range,
            kind: ClaimKind::Reserve(booking_id),
        };
        self.apply(claim).await?;
        debug!("reserved {property_id} {range} for booking {booking_id}");
        Ok(())
    }

    /// Returns nights owned by `booking_id` to available. Safe to repeat.
    pub async fn release(
        &self,
        property_id: &str,
        unit_id: Option<&str>,
        check_in: DateKey,
        check_out: DateKey,
        booking_id: BookingId,
    ) -> Result<()> {
        let range = StayRange::new(check_in, check_out)?;
        self.release_range(property_id, unit_id, &range, booking_id).await
    }

    pub(crate) async fn release_range(
        &self,
        property_id: &str,
        unit_id: Option<&str>,
        range: &StayRange,
        booking_id: BookingId,
    ) -> Result<()> {
        let released = self.store.release(property_id, unit_id, range, booking_id).await?;
        debug!("released {released} night(s) of {property_id} {range} held by {booking_id}");
        Ok(())
    }

    /// Host-initiated block. Fails with `Conflict` over booked nights.
    pub async fn block(
        &self,
        property_id: &str,
        unit_id: Option<&str>,
        check_in: DateKey,
        check_out: DateKey,
        reason: &str,
    ) -> Result<()> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(AppError::ValidationError("a block needs a reason".to_string()));
        }
        let range = self.span(check_in, check_out)?;
        let claim = LedgerClaim {
            property_id: property_id.to_string(),
            unit_ids: vec![unit_id.map(str::to_string)],
            range,
            kind: ClaimKind::Block {
                reason: reason.to_string(),
            },
        };
        self.apply(claim).await?;
        info!("blocked {property_id} {range}: {reason}");
        Ok(())
    }

    /// Lifts host blocks in the range. Booked nights are untouched.
    pub async fn unblock(
        &self,
        property_id: &str,
        unit_id: Option<&str>,
        check_in: DateKey,
        check_out: DateKey,
    ) -> Result<u64> {
        let range = StayRange::new(check_in, check_out)?;
        let cleared = self.store.clear_blocks(property_id, unit_id, &range).await?;
        info!("unblocked {cleared} night(s) of {property_id} {range}");
        Ok(cleared)
    }

    /// One entry per day in `[from, to)`, filling gaps with `Available`.
    /// A unit's calendar shows property-wide rows on days the unit itself
    /// has none.
    pub async fn calendar(
        &self,
        property_id: &str,
        unit_id: Option<&str>,
        from: DateKey,
        to: DateKey,
    ) -> Result<Vec<AvailabilityDay>> {
        let range = self.span(from, to)?;
        let mut stored: BTreeMap<DateKey, AvailabilityDay> = BTreeMap::new();
        let mut property_wide: BTreeMap<DateKey, AvailabilityDay> = BTreeMap::new();

        if unit_id.is_none() {
            for row in self.store.days(property_id, None, &range).await? {
                stored.insert(row.day, row);
            }
        } else {
            for row in self.store.property_days(property_id, &range).await? {
                if row.unit_id.as_deref() == unit_id {
                    stored.insert(row.day, row);
                } else if row.unit_id.is_none() {
                    property_wide.insert(row.day, row);
                }
            }
        }

        Ok(range
            .nights()
            .map(|day| {
                stored
                    .remove(&day)
                    .or_else(|| property_wide.remove(&day))
                    .unwrap_or_else(|| AvailabilityDay::available(property_id, unit_id, day))
            })
            .collect())
    }

    async fn apply(&self, claim: LedgerClaim) -> Result<()> {
        match self.store.claim(&claim).await? {
            ClaimOutcome::Claimed => Ok(()),
            ClaimOutcome::Conflict(nights) => {
                debug!(
                    "claim on {} {} lost on {} night(s)",
                    claim.property_id,
                    claim.range,
                    nights.len()
                );
                Err(AppError::Conflict { nights })
            }
        }
    }
}
