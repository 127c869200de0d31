mod common;

use common::{date, home, job, seed_year, tariff};
use net_metering_engine::billing::{simulate_billing_year, simulate_billing_year_from, StoreEnergySource};
use net_metering_engine::domain::{DataSourceKind, OpeningSource};
use net_metering_engine::repo::{BillingStore, MemoryStore};
use net_metering_engine::scheduler::Finalization;
use std::sync::Arc;

#[tokio::test]
async fn test_daily_runs_match_year_simulation() {
    let store = Arc::new(MemoryStore::new());
    let cfg = tariff(15);
    let scope = home();
    // 2025-01-15 .. 2026-01-14 is the 2025 simulated year
    seed_year(&store, date(2025, 1, 15), 365).await;

    let source = StoreEnergySource::new(store.clone());
    let year = simulate_billing_year(&source, &cfg, 2025, &scope).await.unwrap();
    assert_eq!(year.months.len(), 12);

    let daily = job(store.clone(), cfg.clone());
    let outcomes = daily
        .run_days(date(2025, 1, 15), date(2026, 1, 14), &scope)
        .await
        .unwrap();
    assert_eq!(outcomes.len(), 365);

    let month_ends: Vec<_> = outcomes
        .iter()
        .filter(|o| matches!(o.finalization, Finalization::Finalized(_)))
        .collect();
    assert_eq!(month_ends.len(), 12);

    for (outcome, simulated) in month_ends.iter().zip(&year.months) {
        let snap = &outcome.snapshot;
        assert_eq!(snap.billing_month_id, simulated.billing_month);
        assert_eq!(snap.energy, simulated.energy);
        assert_eq!(snap.opening, simulated.opening);
        assert_eq!(snap.charges, simulated.charges);
        assert_eq!(snap.closing, simulated.closing);
        assert_eq!(snap.data_source, DataSourceKind::Mixed);
    }

    let stored = store.bills_for_year("home-1", 2025).await.unwrap();
    assert_eq!(stored, year.months);
    assert_eq!(store.snapshot_count(), 365);
}

#[tokio::test]
async fn test_second_year_opens_with_first_year_closing() {
    let store = Arc::new(MemoryStore::new());
    let cfg = tariff(15);
    let scope = home();
    // simulated years 2025 and 2026
    seed_year(&store, date(2025, 1, 15), 730).await;

    let source = StoreEnergySource::new(store.clone());
    let first = simulate_billing_year(&source, &cfg, 2025, &scope).await.unwrap();
    let second = simulate_billing_year_from(&source, &cfg, 2026, &scope, first.summary.closing)
        .await
        .unwrap();
    assert_eq!(second.months[0].opening, first.summary.closing);

    let daily = job(store.clone(), cfg);
    let outcomes = daily
        .run_days(date(2025, 1, 15), date(2027, 1, 14), &scope)
        .await
        .unwrap();
    assert_eq!(outcomes.len(), 730);

    let new_year = outcomes
        .iter()
        .find(|o| o.snapshot.date == date(2026, 1, 15))
        .unwrap();
    assert_eq!(new_year.snapshot.opening_source, OpeningSource::PriorBill);
    assert_eq!(new_year.snapshot.opening, first.summary.closing);

    assert_eq!(store.bills_for_year("home-1", 2025).await.unwrap(), first.months);
    assert_eq!(store.bills_for_year("home-1", 2026).await.unwrap(), second.months);
}

#[tokio::test]
async fn test_replayed_opening_matches_prior_bills() {
    let store = Arc::new(MemoryStore::new());
    let cfg = tariff(15);
    let scope = home();
    seed_year(&store, date(2025, 1, 15), 365).await;

    let source = StoreEnergySource::new(store.clone());
    let year = simulate_billing_year(&source, &cfg, 2025, &scope).await.unwrap();

    // nothing finalized yet: a mid-August run reconstructs the carried state
    let daily = job(store.clone(), cfg);
    let outcome = daily.run_for_date(date(2025, 8, 20), &scope).await.unwrap();
    assert_eq!(outcome.snapshot.opening_source, OpeningSource::Replayed);
    assert_eq!(outcome.snapshot.opening, year.months[6].closing);
}

#[tokio::test]
async fn test_rerunning_the_year_changes_nothing() {
    let store = Arc::new(MemoryStore::new());
    let cfg = tariff(1);
    let scope = home();
    seed_year(&store, date(2025, 1, 1), 90).await;

    let daily = job(store.clone(), cfg);
    let first = daily.run_days(date(2025, 1, 1), date(2025, 3, 31), &scope).await.unwrap();
    let bills = store.bills_for_year("home-1", 2025).await.unwrap();

    let second = daily.run_days(date(2025, 1, 1), date(2025, 3, 31), &scope).await.unwrap();
    let snapshots: Vec<_> = first.iter().map(|o| &o.snapshot).collect();
    let again: Vec<_> = second.iter().map(|o| &o.snapshot).collect();
    assert_eq!(snapshots, again);
    assert_eq!(store.bills_for_year("home-1", 2025).await.unwrap(), bills);
    assert_eq!(bills.len(), 3);
    assert!(bills[2].charges.settled);
    assert_eq!(bills[2].closing.credits_off_cycle_kwh, 0.0);
    assert_eq!(bills[2].closing.credits_peak_cycle_kwh, 0.0);
}
