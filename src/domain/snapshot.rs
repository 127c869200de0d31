use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{BillingMonthEnergy, CreditState, MonthCharges};

/// Below this difference (kWh) import and export count as balanced
const NEUTRAL_TOLERANCE_KWH: f64 = 0.001;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum SurplusDeficit {
    Surplus,
    Deficit,
    Neutral,
}

impl SurplusDeficit {
    pub fn classify(import_kwh: f64, export_kwh: f64) -> Self {
        let diff = export_kwh - import_kwh;
        if diff > NEUTRAL_TOLERANCE_KWH {
            Self::Surplus
        } else if diff < -NEUTRAL_TOLERANCE_KWH {
            Self::Deficit
        } else {
            Self::Neutral
        }
    }
}

/// Where the hourly energy behind a computation came from.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DataSourceKind {
    Meter,
    Inverter,
    /// Meter data with inverter-derived hours filling the gaps
    Mixed,
    /// Nothing recorded for the range
    Empty,
}

/// How the opening credit state of a month was obtained
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OpeningSource {
    /// Closing state of the previous month's finalized bill
    PriorBill,
    /// Replayed from hourly energy of the earlier months of the year
    Replayed,
    /// First month of a simulated year with no prior bill
    Fresh,
}

/// Bill-to-date for one home on one local date. Exactly one row per
/// `(home_id, date)`; re-runs overwrite it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySnapshot {
    pub home_id: String,
    pub date: NaiveDate,
    pub billing_month_id: String,
    pub elapsed_days: u32,
    pub days_in_month: u32,

    pub energy: BillingMonthEnergy,
    pub data_source: DataSourceKind,

    pub opening: CreditState,
    pub opening_source: OpeningSource,
    pub closing: CreditState,

    pub charges: MonthCharges,
    pub bill_raw_rs_to_date: f64,
    pub bill_final_rs_to_date: f64,
    pub surplus_deficit_flag: SurplusDeficit,
    pub config_hash: String,
}
