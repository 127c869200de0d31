use chrono::NaiveDateTime;
use thiserror::Error;

/// Errors raised by the billing core.
///
/// Storage and orchestration layers wrap these in `anyhow::Error` with
/// additional context.
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Invalid billing configuration: {0}")]
    InvalidConfig(String),

    #[error("No tariff configuration loaded; energy cannot be priced")]
    MissingTariff,

    #[error("Invalid anchor day {0}: expected 1..=28")]
    InvalidAnchorDay(u32),

    #[error("Local time {0} does not exist in time zone {1}")]
    UnresolvableLocalTime(NaiveDateTime, String),

    #[error("Billing month {0} is already finalized with config {1}")]
    AlreadyFinalized(String, String),

    #[error("Unknown time zone: {0}")]
    UnknownTimeZone(String),
}

impl From<validator::ValidationErrors> for BillingError {
    fn from(errors: validator::ValidationErrors) -> Self {
        BillingError::InvalidConfig(errors.to_string())
    }
}
