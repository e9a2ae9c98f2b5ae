//! # Cancellation/Refund Evaluator
//!
//! Each policy is a short list of thresholds, highest first. The first rule
//! the guest qualifies for wins; no match means no refund.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefundRule {
    pub min_days_before_check_in: i64,
    pub refund_percent: u8,
}

const fn rule(min_days_before_check_in: i64, refund_percent: u8) -> RefundRule {
    RefundRule {
        min_days_before_check_in,
        refund_percent,
    }
}

const FLEXIBLE: &[RefundRule] = &[rule(1, 100), rule(0, 50)];
const MODERATE: &[RefundRule] = &[rule(5, 100), rule(0, 50)];
const STRICT: &[RefundRule] = &[rule(14, 100), rule(7, 50)];
const SUPER_STRICT: &[RefundRule] = &[];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancellationPolicy {
    Flexible,
    Moderate,
    Strict,
    SuperStrict,
}

impl CancellationPolicy {
    pub const ALL: [CancellationPolicy; 4] = [
        CancellationPolicy::Flexible,
        CancellationPolicy::Moderate,
        CancellationPolicy::Strict,
        CancellationPolicy::SuperStrict,
    ];

    /// Rules sorted by descending threshold.
    pub fn rules(&self) -> &'static [RefundRule] {
        match self {
            CancellationPolicy::Flexible => FLEXIBLE,
            CancellationPolicy::Moderate => MODERATE,
            CancellationPolicy::Strict => STRICT,
            CancellationPolicy::SuperStrict => SUPER_STRICT,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CancellationPolicy::Flexible => "flexible",
            CancellationPolicy::Moderate => "moderate",
            CancellationPolicy::Strict => "strict",
            CancellationPolicy::SuperStrict => "super_strict",
        }
    }
}

impl fmt::Display for CancellationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CancellationPolicy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, AppError> {
        match s {
            "flexible" => Ok(CancellationPolicy::Flexible),
            "moderate" => Ok(CancellationPolicy::Moderate),
            "strict" => Ok(CancellationPolicy::Strict),
            "super_strict" => Ok(CancellationPolicy::SuperStrict),
            other => Err(AppError::ValidationError(format!(
                "unknown cancellation policy '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Refund {
    pub percent: u8,
    pub amount: i64,
}

/// Refund owed for cancelling `days_until_check_in` days ahead.
pub fn evaluate_refund(total_paid: i64, days_until_check_in: i64, policy: CancellationPolicy) -> Refund {
    let percent = policy
        .rules()
        .iter()
        .find(|rule| rule.min_days_before_check_in <= days_until_check_in)
        .map_or(0, |rule| rule.refund_percent);

    let paid = i128::from(total_paid.max(0));
    let amount = (paid * i128::from(percent) + 50) / 100;

    Refund {
        percent,
        // percent <= 100 so the result never exceeds total_paid
        amount: amount as i64,
    }
}
