use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// Number of billing months that share one energy-credit pool
pub const MONTHS_PER_CYCLE: u32 = 3;

/// One billing month `[start, end)` anchored on the configured day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingMonth {
    /// `YYYY-MM` of the start date
    pub label: String,
    pub start: NaiveDate,
    /// Exclusive: the next month's anchor date
    pub end: NaiveDate,
    /// Year the month is simulated in (year of `start`)
    pub year: i32,
    /// Position 1-12 inside the simulated year
    pub month_number: u32,
}

impl BillingMonth {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            label: format!("{:04}-{:02}", start.year(), start.month()),
            start,
            end,
            year: start.year(),
            month_number: start.month(),
        }
    }

    pub fn days(&self) -> u32 {
        u32::try_from((self.end - self.start).num_days()).unwrap_or(0)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date < self.end
    }

    pub fn last_day(&self) -> NaiveDate {
        self.end.pred_opt().unwrap_or(self.start)
    }

    /// Days covered from the start through `date`, inclusive, capped at the month length.
    pub fn elapsed_days(&self, date: NaiveDate) -> u32 {
        if date < self.start {
            return 0;
        }
        let days = (date - self.start).num_days() + 1;
        u32::try_from(days).unwrap_or(0).min(self.days())
    }

    /// 0, 1 or 2: position inside the 3-month credit cycle
    pub fn cycle_position(&self) -> u32 {
        (self.month_number - 1) % MONTHS_PER_CYCLE
    }

    pub fn is_cycle_end(&self) -> bool {
        self.cycle_position() == MONTHS_PER_CYCLE - 1
    }

    /// 1-4: cycle index inside the simulated year
    pub fn cycle_index(&self) -> u32 {
        (self.month_number - 1) / MONTHS_PER_CYCLE + 1
    }
}

/// Energy of one billing month (or month-to-date), split by tariff period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingMonthEnergy {
    pub label: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub import_off_kwh: f64,
    pub import_peak_kwh: f64,
    pub export_off_kwh: f64,
    pub export_peak_kwh: f64,
    pub solar_kwh: f64,
    pub load_kwh: f64,
    /// Hours that contributed at least one sample
    pub hours_with_data: u32,
}

impl BillingMonthEnergy {
    pub fn empty(month: &BillingMonth) -> Self {
        Self {
            label: month.label.clone(),
            start: month.start,
            end: month.end,
            import_off_kwh: 0.0,
            import_peak_kwh: 0.0,
            export_off_kwh: 0.0,
            export_peak_kwh: 0.0,
            solar_kwh: 0.0,
            load_kwh: 0.0,
            hours_with_data: 0,
        }
    }

    pub fn total_import_kwh(&self) -> f64 {
        self.import_off_kwh + self.import_peak_kwh
    }

    pub fn total_export_kwh(&self) -> f64 {
        self.export_off_kwh + self.export_peak_kwh
    }
}

/// Accounting state threaded from one billing month into the next.
///
/// Pools are energy credits (kWh, always >= 0) that live for one cycle;
/// `credit_balance` is a currency amount (always <= 0) owed to the customer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CreditState {
    pub credits_off_cycle_kwh: f64,
    pub credits_peak_cycle_kwh: f64,
    pub credit_balance: f64,
}

/// Priced outcome of one month, before it is bound to a home or persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthCharges {
    pub net_import_off_kwh: f64,
    pub net_import_peak_kwh: f64,
    pub off_charge: f64,
    pub peak_charge: f64,
    pub fixed_charge: f64,
    pub cycle_credit_off: f64,
    pub cycle_credit_peak: f64,
    pub raw_bill: f64,
    pub final_bill: f64,
    pub settled: bool,
}

/// Finalized bill of one billing month. Immutable once written, unless
/// explicitly re-finalized under a different tariff (see `config_hash`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingMonthBill {
    /// `{home_id}:{billing_month}`
    pub id: String,
    pub home_id: String,
    pub billing_month: String,
    pub year: i32,
    pub month_number: u32,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub energy: BillingMonthEnergy,
    pub charges: MonthCharges,
    pub opening: CreditState,
    pub closing: CreditState,
    pub config_hash: String,
}

impl BillingMonthBill {
    pub fn bill_id(home_id: &str, billing_month: &str) -> String {
        format!("{home_id}:{billing_month}")
    }
}

/// Totals over a simulated year
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct YearSummary {
    pub year: i32,
    pub months: usize,
    pub total_import_kwh: f64,
    pub total_export_kwh: f64,
    pub total_solar_kwh: f64,
    pub total_load_kwh: f64,
    pub total_fixed_charges: f64,
    pub total_cycle_credits: f64,
    pub total_raw_bill: f64,
    pub total_final_bill: f64,
    pub closing: CreditState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingYearResult {
    pub months: Vec<BillingMonthBill>,
    pub summary: YearSummary,
}
