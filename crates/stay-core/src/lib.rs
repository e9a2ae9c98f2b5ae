//! stay-core
//!
//! Booking price & availability logic and the interface definitions
//! (ports) every storage or delivery plugin implements.

pub mod booking;
pub mod dates;
pub mod error;
pub mod ledger;
pub mod models;
pub mod pricing;
pub mod refund;
pub mod traits;

// Re-exporting for easier access in other crates
pub use booking::{BookingWorkflow, RefundQuote, WorkflowDeps};
pub use dates::{DateKey, StayRange};
pub use error::*;
pub use ledger::AvailabilityLedger;
pub use models::*;
pub use pricing::{compute_price, FeeSchedule, Rate, RoundingUnit};
pub use refund::{evaluate_refund, CancellationPolicy, Refund};
pub use traits::*;
