//! Daily snapshot scheduler.
//!
//! [`DailyBillingJob`] produces the bill-to-date of one home for one local
//! date and finalizes the billing month on its last day. [`BillingScheduler`]
//! drives it once per day for every configured home.

pub mod job;
pub mod runner;

pub use job::{DailyBillingJob, DailyRunOutcome, Finalization, RunOptions};
pub use runner::{next_run_after, BillingScheduler, RunSummary, TaskStatus};
