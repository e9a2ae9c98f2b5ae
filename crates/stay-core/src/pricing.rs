//! # Price Calculator
//!
//! Turns a stay plus host pricing into a `PriceBreakdown`. Integer math only;
//! the service fee is computed first and the tax is charged on the
//! fee-inclusive amount. Changing that order changes totals, so don't.

use serde::{Deserialize, Serialize};

use crate::dates::StayRange;
use crate::error::{AppError, Result};
use crate::models::{NightlyRate, PriceBreakdown, PriceOverrides};

const MILLI_PER_PERCENT: u32 = 1_000;
const MILLI_WHOLE: i128 = 100_000;

/// A percentage stored in thousandths of a percent, so `8.875%` is exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rate(u32);

impl Rate {
    pub const ZERO: Rate = Rate(0);

    /// Saturates at `u32::MAX` thousandths rather than wrapping.
    pub fn percent(percent: u32) -> Self {
        Self(percent.saturating_mul(MILLI_PER_PERCENT))
    }

    pub fn basis_points(bps: u32) -> Self {
        Self(bps.saturating_mul(10))
    }

    pub fn millipercent(milli: u32) -> Self {
        Self(milli)
    }

    pub fn as_millipercent(&self) -> u32 {
        self.0
    }

    /// `amount * rate`, rounded half-up to a multiple of `unit`.
    pub fn apply(&self, amount: i64, unit: RoundingUnit) -> Result<i64> {
        let scaled = i128::from(amount) * i128::from(self.0);
        let step = MILLI_WHOLE * i128::from(unit.0);
        let rounded = round_half_up(scaled, step) * i128::from(unit.0);
        i64::try_from(rounded)
            .map_err(|_| AppError::ValidationError(format!("amount {amount} overflows")))
    }
}

/// Granularity fees and taxes are rounded to, in minor units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoundingUnit(i64);

impl RoundingUnit {
    pub const MINOR: RoundingUnit = RoundingUnit(1);

    /// Rounds to whole major units, e.g. `major(100)` for whole dollars.
    pub fn major(minor_per_major: i64) -> Self {
        Self(minor_per_major.max(1))
    }

    pub fn minor_units(&self) -> i64 {
        self.0
    }
}

impl Default for RoundingUnit {
    fn default() -> Self {
        Self::MINOR
    }
}

/// Platform-wide fee and tax settings, usually from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub platform_fee: Rate,
    pub tax_rate: Rate,
    #[serde(default)]
    pub rounding: RoundingUnit,
}

impl FeeSchedule {
    pub fn new(platform_fee: Rate, tax_rate: Rate) -> Self {
        Self {
            platform_fee,
            tax_rate,
            rounding: RoundingUnit::MINOR,
        }
    }

    pub fn with_rounding(mut self, rounding: RoundingUnit) -> Self {
        self.rounding = rounding;
        self
    }
}

/// Non-negative `numerator / denominator` rounded half-up.
fn round_half_up(numerator: i128, denominator: i128) -> i128 {
    (numerator + denominator / 2) / denominator
}

/// Produces the price breakdown for `stay`. Pure and deterministic.
pub fn compute_price(
    stay: &StayRange,
    base_price: i64,
    cleaning_fee: i64,
    overrides: &PriceOverrides,
    fees: &FeeSchedule,
    currency: &str,
) -> Result<PriceBreakdown> {
    if base_price < 0 {
        return Err(AppError::ValidationError(format!(
            "base price must be non-negative, got {base_price}"
        )));
    }
    if cleaning_fee < 0 {
        return Err(AppError::ValidationError(format!(
            "cleaning fee must be non-negative, got {cleaning_fee}"
        )));
    }

    let nightly_rates = stay
        .nights()
        .map(|date| {
            let price = overrides.get(&date).copied().unwrap_or(base_price);
            if price < 0 {
                return Err(AppError::ValidationError(format!(
                    "override for {date} is negative ({price})"
                )));
            }
            Ok(NightlyRate { date, price })
        })
        .collect::<Result<Vec<_>>>()?;

    let subtotal = checked_sum(nightly_rates.iter().map(|rate| rate.price))?;
    let service_fee = fees.platform_fee.apply(subtotal, fees.rounding)?;
    let taxable = checked_sum([subtotal, cleaning_fee, service_fee])?;
    let taxes = fees.tax_rate.apply(taxable, fees.rounding)?;
    let total = checked_sum([taxable, taxes])?;

    Ok(PriceBreakdown {
        nights: nightly_rates.len() as u32,
        base_price,
        subtotal,
        cleaning_fee,
        service_fee,
        taxes,
        total,
        currency: currency.to_string(),
        nightly_rates,
    })
}

fn checked_sum(amounts: impl IntoIterator<Item = i64>) -> Result<i64> {
    amounts
        .into_iter()
        .try_fold(0i64, i64::checked_add)
        .ok_or_else(|| AppError::ValidationError("price total overflows".to_string()))
}
