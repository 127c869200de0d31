//! Net-metering billing core.
//!
//! Raw power telemetry is integrated into hourly energy records
//! ([`aggregator`]), priced under a time-of-day net-metering tariff with
//! three-month credit cycles ([`billing`]), and snapshotted once per day as a
//! bill-to-date ([`scheduler`]).

pub mod aggregator;
pub mod billing;
pub mod config;
pub mod domain;
pub mod error;
pub mod repo;
pub mod scheduler;
pub mod telemetry;

pub use error::BillingError;
