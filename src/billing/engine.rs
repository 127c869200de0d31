//! Billing month and cycle engine.
//!
//! A simulated year is a fold over its twelve billing months: every month
//! takes the `CreditState` left by the previous one and returns the state it
//! hands on. Nothing here touches storage except through an [`EnergySource`],
//! so the same inputs always reproduce the same bills.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use tracing::{debug, info};

use super::calendar::billing_months_for_year;
use super::netting::{apply_credit_balance, net_against_pool};
use super::source::EnergySource;
use crate::domain::{
    is_peak, BillingConfig, BillingMonth, BillingMonthBill, BillingMonthEnergy, BillingYearResult,
    CreditState, Energy, HomeScope, HourlyEnergyRecord, MonthCharges, PeakWindow, YearSummary,
};

/// Sums the records that fall inside `month`, splitting grid flows into
/// peak and off-peak by the time of day of each hour.
pub fn aggregate_energy(
    month: &BillingMonth,
    records: &[HourlyEnergyRecord],
    windows: &[PeakWindow],
) -> BillingMonthEnergy {
    let mut energy = BillingMonthEnergy::empty(month);
    for rec in records.iter().filter(|r| month.contains(r.date)) {
        if is_peak(rec.key().time_of_day(), windows) {
            energy.import_peak_kwh += rec.grid_import_kwh;
            energy.export_peak_kwh += rec.grid_export_kwh;
        } else {
            energy.import_off_kwh += rec.grid_import_kwh;
            energy.export_off_kwh += rec.grid_export_kwh;
        }
        energy.solar_kwh += rec.solar_kwh;
        energy.load_kwh += rec.load_kwh;
        if rec.has_data() {
            energy.hours_with_data += 1;
        }
    }
    energy
}

/// Prices one month (or month-to-date) against the state carried in.
///
/// `elapsed_days` drives fixed-charge proration. Cycle settlement only
/// happens when `complete` is set and `month` closes its cycle, so a
/// month-to-date figure never settles early.
pub fn compute_month(
    config: &BillingConfig,
    month: &BillingMonth,
    energy: &BillingMonthEnergy,
    elapsed_days: u32,
    opening: CreditState,
    complete: bool,
) -> (MonthCharges, CreditState) {
    let off = net_against_pool(
        energy.import_off_kwh,
        energy.export_off_kwh,
        opening.credits_off_cycle_kwh,
    );
    let peak = net_against_pool(
        energy.import_peak_kwh,
        energy.export_peak_kwh,
        opening.credits_peak_cycle_kwh,
    );

    let off_charge = config.offpeak_import_rate() * Energy::kilowatt_hours(off.net_import_kwh);
    let peak_charge = config.peak_import_rate() * Energy::kilowatt_hours(peak.net_import_kwh);
    let fixed_charge = config.fixed_charge(elapsed_days, month.days());

    let mut pool_off = off.pool_after_kwh;
    let mut pool_peak = peak.pool_after_kwh;
    let settled = complete && month.is_cycle_end();
    let (cycle_credit_off, cycle_credit_peak) = if settled {
        let credits = (
            config.offpeak_settlement_rate() * Energy::kilowatt_hours(pool_off),
            config.peak_settlement_rate() * Energy::kilowatt_hours(pool_peak),
        );
        pool_off = 0.0;
        pool_peak = 0.0;
        credits
    } else {
        (0.0, 0.0)
    };

    let raw_bill = off_charge + peak_charge + fixed_charge - cycle_credit_off - cycle_credit_peak;
    let balance = apply_credit_balance(raw_bill, opening.credit_balance);

    let charges = MonthCharges {
        net_import_off_kwh: off.net_import_kwh,
        net_import_peak_kwh: peak.net_import_kwh,
        off_charge,
        peak_charge,
        fixed_charge,
        cycle_credit_off,
        cycle_credit_peak,
        raw_bill,
        final_bill: balance.final_bill,
        settled,
    };
    let closing = CreditState {
        credits_off_cycle_kwh: pool_off,
        credits_peak_cycle_kwh: pool_peak,
        credit_balance: balance.credit_balance,
    };
    (charges, closing)
}

/// Bill of one complete billing month.
pub fn bill_month(
    home_id: &str,
    config: &BillingConfig,
    month: &BillingMonth,
    energy: BillingMonthEnergy,
    opening: CreditState,
) -> BillingMonthBill {
    let (charges, closing) = compute_month(config, month, &energy, month.days(), opening, true);
    BillingMonthBill {
        id: BillingMonthBill::bill_id(home_id, &month.label),
        home_id: home_id.to_string(),
        billing_month: month.label.clone(),
        year: month.year,
        month_number: month.month_number,
        start: month.start,
        end: month.end,
        energy,
        charges,
        opening,
        closing,
        config_hash: config.config_hash(),
    }
}

/// Folds `opening` through consecutive complete months.
pub fn simulate_months<I>(
    home_id: &str,
    config: &BillingConfig,
    months: I,
    opening: CreditState,
) -> Vec<BillingMonthBill>
where
    I: IntoIterator<Item = (BillingMonth, BillingMonthEnergy)>,
{
    months
        .into_iter()
        .scan(opening, |state, (month, energy)| {
            let bill = bill_month(home_id, config, &month, energy, *state);
            *state = bill.closing;
            Some(bill)
        })
        .collect()
}

pub fn summarize(year: i32, bills: &[BillingMonthBill]) -> YearSummary {
    let mut summary = bills.iter().fold(
        YearSummary {
            year,
            ..YearSummary::default()
        },
        |mut acc, bill| {
            acc.months += 1;
            acc.total_import_kwh += bill.energy.total_import_kwh();
            acc.total_export_kwh += bill.energy.total_export_kwh();
            acc.total_solar_kwh += bill.energy.solar_kwh;
            acc.total_load_kwh += bill.energy.load_kwh;
            acc.total_fixed_charges += bill.charges.fixed_charge;
            acc.total_cycle_credits += bill.charges.cycle_credit_off + bill.charges.cycle_credit_peak;
            acc.total_raw_bill += bill.charges.raw_bill;
            acc.total_final_bill += bill.charges.final_bill;
            acc
        },
    );
    summary.closing = bills.last().map(|b| b.closing).unwrap_or_default();
    summary
}

/// Energy of `month` from its start up to (excluding) `until`.
pub async fn month_energy(
    source: &dyn EnergySource,
    scope: &HomeScope,
    config: &BillingConfig,
    month: &BillingMonth,
    until: NaiveDate,
) -> Result<BillingMonthEnergy> {
    let resolved = source
        .hourly_energy(scope, month.start, until.min(month.end))
        .await
        .with_context(|| format!("Failed to load energy for {} ({})", scope.home_id, month.label))?;
    Ok(aggregate_energy(month, &resolved.records, &config.peak_windows))
}

/// Full simulated year: twelve months starting on the anchor day of each
/// calendar month of `year`, starting with empty pools and no balance.
pub async fn simulate_billing_year(
    source: &dyn EnergySource,
    config: &BillingConfig,
    year: i32,
    scope: &HomeScope,
) -> Result<BillingYearResult> {
    simulate_billing_year_from(source, config, year, scope, CreditState::default()).await
}

/// Like [`simulate_billing_year`], but month 1 opens with `opening`, usually
/// the closing state of the previous year's last bill.
pub async fn simulate_billing_year_from(
    source: &dyn EnergySource,
    config: &BillingConfig,
    year: i32,
    scope: &HomeScope,
    opening: CreditState,
) -> Result<BillingYearResult> {
    config.ensure_valid()?;
    let mut months = Vec::with_capacity(12);
    for month in billing_months_for_year(year, config.anchor_day)? {
        let energy = month_energy(source, scope, config, &month, month.end).await?;
        months.push((month, energy));
    }

    let bills = simulate_months(&scope.home_id, config, months, opening);
    let summary = summarize(year, &bills);
    info!(
        home_id = %scope.home_id,
        year,
        total_final_bill = summary.total_final_bill,
        credit_balance = summary.closing.credit_balance,
        "billing year simulated"
    );
    Ok(BillingYearResult {
        months: bills,
        summary,
    })
}

/// Simulated year as known on `as_of`: months starting later are left out and
/// the month containing `as_of` is billed to date, without settlement unless
/// `as_of` is its last day.
pub async fn simulate_billing_year_as_of(
    source: &dyn EnergySource,
    config: &BillingConfig,
    year: i32,
    scope: &HomeScope,
    as_of: NaiveDate,
) -> Result<BillingYearResult> {
    config.ensure_valid()?;
    let mut bills = Vec::new();
    let mut state = CreditState::default();

    for month in billing_months_for_year(year, config.anchor_day)? {
        if month.start > as_of {
            break;
        }
        if month.end <= as_of {
            let energy = month_energy(source, scope, config, &month, month.end).await?;
            let bill = bill_month(&scope.home_id, config, &month, energy, state);
            state = bill.closing;
            bills.push(bill);
            continue;
        }

        let until = as_of.succ_opt().unwrap_or(month.end);
        let energy = month_energy(source, scope, config, &month, until).await?;
        let elapsed = month.elapsed_days(as_of);
        let complete = as_of == month.last_day();
        let (charges, closing) = compute_month(config, &month, &energy, elapsed, state, complete);
        debug!(home_id = %scope.home_id, billing_month = %month.label, elapsed, "partial month billed");
        bills.push(BillingMonthBill {
            id: BillingMonthBill::bill_id(&scope.home_id, &month.label),
            home_id: scope.home_id.clone(),
            billing_month: month.label.clone(),
            year: month.year,
            month_number: month.month_number,
            start: month.start,
            end: month.end,
            energy,
            charges,
            opening: state,
            closing,
            config_hash: config.config_hash(),
        });
        break;
    }

    let summary = summarize(year, &bills);
    Ok(BillingYearResult {
        months: bills,
        summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::calendar::billing_month_starting;
    use crate::billing::source::StoreEnergySource;
    use crate::domain::tariff::tests::sample_config;
    use crate::domain::{FixedProration, HourKey};
    use crate::repo::{HourlyEnergyStore, MemoryStore};
    use proptest::prelude::*;
    use std::sync::Arc;

    fn month(m: u32) -> BillingMonth {
        billing_month_starting(2025, m, 15).unwrap()
    }

    fn energy(month: &BillingMonth, import_off: f64, export_off: f64) -> BillingMonthEnergy {
        BillingMonthEnergy {
            import_off_kwh: import_off,
            export_off_kwh: export_off,
            ..BillingMonthEnergy::empty(month)
        }
    }

    fn rec(date: NaiveDate, hour: u32, import: f64, export: f64) -> HourlyEnergyRecord {
        let mut r = HourlyEnergyRecord::empty("m", HourKey::new(date, hour));
        r.grid_import_kwh = import;
        r.grid_export_kwh = export;
        r.solar_kwh = export;
        r.sample_count = 12;
        r
    }

    #[test]
    fn test_export_surplus_in_first_month_becomes_pool() {
        let cfg = sample_config();
        let jan = month(1);
        let (charges, closing) =
            compute_month(&cfg, &jan, &energy(&jan, 500.0, 600.0), jan.days(), CreditState::default(), true);

        assert_eq!(charges.net_import_off_kwh, 0.0);
        assert_eq!(closing.credits_off_cycle_kwh, 100.0);
        assert_eq!(charges.raw_bill, 500.0);
        assert_eq!(charges.final_bill, 500.0);
        assert_eq!(closing.credit_balance, 0.0);
        assert!(!charges.settled);
    }

    #[test]
    fn test_cycle_end_settles_remaining_pool() {
        let cfg = sample_config();
        let mar = month(3);
        let opening = CreditState {
            credits_off_cycle_kwh: 100.0,
            ..CreditState::default()
        };
        let (charges, closing) = compute_month(&cfg, &mar, &energy(&mar, 50.0, 0.0), mar.days(), opening, true);

        assert_eq!(charges.net_import_off_kwh, 0.0);
        assert!(charges.settled);
        assert_eq!(charges.cycle_credit_off, 500.0);
        assert_eq!(charges.raw_bill, 0.0);
        assert_eq!(charges.final_bill, 0.0);
        assert_eq!(closing.credit_balance, 0.0);
        assert_eq!(closing.credits_off_cycle_kwh, 0.0);
        assert_eq!(closing.credits_peak_cycle_kwh, 0.0);
    }

    #[test]
    fn test_month_to_date_does_not_settle() {
        let cfg = sample_config();
        let mar = month(3);
        let opening = CreditState {
            credits_off_cycle_kwh: 100.0,
            ..CreditState::default()
        };
        let (charges, closing) = compute_month(&cfg, &mar, &energy(&mar, 50.0, 0.0), 10, opening, false);
        assert!(!charges.settled);
        assert_eq!(charges.cycle_credit_off, 0.0);
        assert_eq!(closing.credits_off_cycle_kwh, 50.0);
    }

    #[test]
    fn test_negative_raw_bill_accumulates_credit() {
        let mut cfg = sample_config();
        cfg.fixed_charge_per_billing_month = 100.0;
        let mar = month(3);
        let opening = CreditState {
            credits_off_cycle_kwh: 30.0,
            credits_peak_cycle_kwh: 0.0,
            credit_balance: -40.0,
        };
        // 30 kWh settle at 10 -> 300 credit against 100 fixed
        let (charges, closing) = compute_month(&cfg, &mar, &energy(&mar, 0.0, 0.0), mar.days(), opening, true);
        assert_eq!(charges.raw_bill, -200.0);
        assert_eq!(charges.final_bill, 0.0);
        assert_eq!(closing.credit_balance, -240.0);
    }

    #[test]
    fn test_linear_fixed_charge_in_partial_month() {
        let mut cfg = sample_config();
        cfg.fixed_proration = FixedProration::LinearByDay;
        let feb = month(2);
        let (charges, _) = compute_month(&cfg, &feb, &energy(&feb, 0.0, 0.0), 7, CreditState::default(), false);
        assert_eq!(charges.fixed_charge, 125.0);
    }

    #[test]
    fn test_aggregate_splits_peak_by_hour() {
        let jan = month(1);
        let day = jan.start;
        let records = [
            rec(day, 16, 1.0, 0.0),
            rec(day, 17, 2.0, 0.5),
            rec(day, 21, 3.0, 0.0),
            rec(day, 22, 4.0, 1.0),
            // outside the month
            rec(jan.end, 17, 100.0, 0.0),
        ];
        let e = aggregate_energy(&jan, &records, &sample_config().peak_windows);
        assert_eq!(e.import_off_kwh, 5.0);
        assert_eq!(e.import_peak_kwh, 5.0);
        assert_eq!(e.export_peak_kwh, 0.5);
        assert_eq!(e.export_off_kwh, 1.0);
        assert_eq!(e.hours_with_data, 4);
    }

    #[test]
    fn test_pools_carry_inside_cycle_and_reset_after() {
        let cfg = sample_config();
        let months = (1..=4).map(|m| {
            let bm = month(m);
            let e = if m == 1 { energy(&bm, 0.0, 40.0) } else { energy(&bm, 10.0, 0.0) };
            (bm, e)
        });
        let bills = simulate_months("home", &cfg, months, CreditState::default());

        assert_eq!(bills[0].closing.credits_off_cycle_kwh, 40.0);
        assert_eq!(bills[1].opening, bills[0].closing);
        assert_eq!(bills[1].closing.credits_off_cycle_kwh, 30.0);
        assert_eq!(bills[2].charges.cycle_credit_off, 200.0);
        assert_eq!(bills[2].closing.credits_off_cycle_kwh, 0.0);
        // month 4 opens a new cycle with no pool
        assert_eq!(bills[3].charges.net_import_off_kwh, 10.0);
        assert_eq!(bills[3].charges.off_charge, 200.0);
    }

    #[tokio::test]
    async fn test_simulate_year_is_deterministic() {
        let store = Arc::new(MemoryStore::new());
        let jan = month(1);
        for r in [rec(jan.start, 10, 0.0, 600.0), rec(jan.start, 18, 5.0, 0.0), rec(month(3).start, 9, 50.0, 0.0)] {
            store.upsert_hourly(&r).await.unwrap();
        }
        let source = StoreEnergySource::new(store);
        let scope = HomeScope::new("home").with_meters(["m"]);
        let cfg = sample_config();

        let first = simulate_billing_year(&source, &cfg, 2025, &scope).await.unwrap();
        let second = simulate_billing_year(&source, &cfg, 2025, &scope).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.months.len(), 12);
        assert_eq!(first.summary.months, 12);
        assert_eq!(first.months[0].charges.peak_charge, 150.0);
        // 600 exported, 50 imported in March: 550 left to settle at 10
        assert_eq!(first.months[2].charges.cycle_credit_off, 5500.0);
        assert_eq!(first.summary.total_fixed_charges, 6000.0);
    }

    #[tokio::test]
    async fn test_simulate_as_of_stops_at_current_month() {
        let store = Arc::new(MemoryStore::new());
        let source = StoreEnergySource::new(store);
        let scope = HomeScope::new("home").with_inverters(["i"]);
        let mut cfg = sample_config();
        cfg.fixed_proration = FixedProration::LinearByDay;

        let as_of = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let result = simulate_billing_year_as_of(&source, &cfg, 2025, &scope, as_of).await.unwrap();
        assert_eq!(result.months.len(), 2);
        let feb = &result.months[1];
        assert_eq!(feb.billing_month, "2025-02");
        // Feb 15 through Mar 1 is 15 of 28 days
        assert!((feb.charges.fixed_charge - 500.0 * 15.0 / 28.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let source = StoreEnergySource::new(Arc::new(MemoryStore::new()));
        let mut cfg = sample_config();
        cfg.anchor_day = 30;
        let err = simulate_billing_year(&source, &cfg, 2025, &HomeScope::new("h")).await;
        assert!(err.is_err());
    }

    proptest! {
        #[test]
        fn prop_year_invariants(
            flows in prop::collection::vec((0.0f64..800.0, 0.0f64..800.0, 0.0f64..200.0, 0.0f64..200.0), 12)
        ) {
            let cfg = sample_config();
            let months = flows.iter().enumerate().map(|(i, (io, eo, ip, ep))| {
                let bm = month(u32::try_from(i).unwrap() + 1);
                let e = BillingMonthEnergy {
                    import_off_kwh: *io,
                    export_off_kwh: *eo,
                    import_peak_kwh: *ip,
                    export_peak_kwh: *ep,
                    ..BillingMonthEnergy::empty(&bm)
                };
                (bm, e)
            });
            let bills = simulate_months("h", &cfg, months.collect::<Vec<_>>(), CreditState::default());
            for bill in &bills {
                prop_assert!(bill.closing.credits_off_cycle_kwh >= 0.0);
                prop_assert!(bill.closing.credits_peak_cycle_kwh >= 0.0);
                prop_assert!(bill.closing.credit_balance <= 0.0);
                prop_assert!(bill.charges.final_bill >= 0.0);
                if bill.month_number % 3 == 0 {
                    prop_assert_eq!(bill.closing.credits_off_cycle_kwh, 0.0);
                    prop_assert_eq!(bill.closing.credits_peak_cycle_kwh, 0.0);
                }
            }
        }
    }
}
