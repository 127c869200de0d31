//! Billing month & cycle engine.
//!
//! - `calendar`: anchor-day month boundaries
//! - `netting`: per-period netting against credit pools, currency balance
//! - `engine`: month pricing, cycle settlement and the yearly fold
//! - `source`: hourly energy per home with meter/inverter fallback

pub mod calendar;
pub mod engine;
pub mod netting;
pub mod source;

pub use calendar::{
    billing_month_containing, billing_month_starting, billing_months_for_year,
    days_in_billing_month, is_last_day_of_billing_month, previous_billing_month,
};
pub use engine::{
    aggregate_energy, bill_month, compute_month, month_energy, simulate_billing_year,
    simulate_billing_year_as_of, simulate_billing_year_from, simulate_months, summarize,
};
pub use netting::{apply_credit_balance, net_against_pool};
pub use source::{drop_partial_hours, merge_with_fallback, union_by_hour, EnergySource, ResolvedEnergy, StoreEnergySource};
