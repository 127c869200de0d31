//! Net-metering tariff: anchor day, time-of-day prices and peak windows.

use chrono::NaiveTime;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use validator::{Validate, ValidationError};

use super::Rate;
use crate::BillingError;

/// Time-of-day window `[start, end)` priced at the peak rate.
///
/// Windows never wrap past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeakWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl PeakWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// Convenience constructor from whole hours; `end_hour == 24` means midnight.
    pub fn hours(start_hour: u32, end_hour: u32) -> Option<Self> {
        let start = NaiveTime::from_hms_opt(start_hour, 0, 0)?;
        let end = if end_hour == 24 {
            NaiveTime::from_hms_opt(23, 59, 59)?
        } else {
            NaiveTime::from_hms_opt(end_hour, 0, 0)?
        };
        Some(Self { start, end })
    }

    pub fn contains(&self, time: NaiveTime) -> bool {
        self.start <= time && time < self.end
    }
}

/// True when `time` falls inside any configured peak window.
pub fn is_peak<'a, I>(time: NaiveTime, windows: I) -> bool
where
    I: IntoIterator<Item = &'a PeakWindow>,
{
    windows.into_iter().any(|w| w.contains(time))
}

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FixedProration {
    #[default]
    None,
    LinearByDay,
}

/// Tariff applied to one home's net-metering account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_peak_windows"))]
pub struct BillingConfig {
    /// Day of month (1-28) on which every billing month starts
    #[validate(range(min = 1, max = 28))]
    pub anchor_day: u32,

    #[validate(range(min = 0.0))]
    pub price_offpeak_import: f64,
    #[validate(range(min = 0.0))]
    pub price_peak_import: f64,
    #[validate(range(min = 0.0))]
    pub price_offpeak_settlement: f64,
    #[validate(range(min = 0.0))]
    pub price_peak_settlement: f64,

    #[validate(range(min = 0.0))]
    pub fixed_charge_per_billing_month: f64,

    #[serde(default)]
    pub fixed_proration: FixedProration,

    #[serde(default)]
    pub peak_windows: Vec<PeakWindow>,
}

fn validate_peak_windows(cfg: &BillingConfig) -> Result<(), ValidationError> {
    if cfg.peak_windows.iter().any(|w| w.start >= w.end) {
        let mut err = ValidationError::new("peak_window_wraps");
        err.message = Some("peak windows must satisfy start < end (no wrap past midnight)".into());
        return Err(err);
    }
    Ok(())
}

impl BillingConfig {
    /// Validates and converts validator output into the core error type.
    pub fn ensure_valid(&self) -> Result<(), BillingError> {
        self.validate()?;
        Ok(())
    }

    pub fn offpeak_import_rate(&self) -> Rate {
        Rate::per_kwh(self.price_offpeak_import)
    }

    pub fn peak_import_rate(&self) -> Rate {
        Rate::per_kwh(self.price_peak_import)
    }

    pub fn offpeak_settlement_rate(&self) -> Rate {
        Rate::per_kwh(self.price_offpeak_settlement)
    }

    pub fn peak_settlement_rate(&self) -> Rate {
        Rate::per_kwh(self.price_peak_settlement)
    }

    pub fn is_peak(&self, time: NaiveTime) -> bool {
        is_peak(time, &self.peak_windows)
    }

    /// Fixed charge for a month with `elapsed_days` of `days_in_month` covered.
    pub fn fixed_charge(&self, elapsed_days: u32, days_in_month: u32) -> f64 {
        match self.fixed_proration {
            FixedProration::None => self.fixed_charge_per_billing_month,
            FixedProration::LinearByDay => {
                if days_in_month == 0 {
                    return 0.0;
                }
                let elapsed = elapsed_days.min(days_in_month);
                self.fixed_charge_per_billing_month * f64::from(elapsed) / f64::from(days_in_month)
            }
        }
    }

    /// SHA-256 fingerprint of every field that affects a bill.
    pub fn config_hash(&self) -> String {
        let windows = self
            .peak_windows
            .iter()
            .map(|w| format!(";peak={}-{}", w.start, w.end))
            .join("");
        let canonical = format!(
            "anchor={};off_imp={};peak_imp={};off_set={};peak_set={};fixed={};proration={}{windows}",
            self.anchor_day,
            self.price_offpeak_import,
            self.price_peak_import,
            self.price_offpeak_settlement,
            self.price_peak_settlement,
            self.fixed_charge_per_billing_month,
            self.fixed_proration,
        );
        format!("{:x}", Sha256::digest(canonical.as_bytes()))
    }
}
