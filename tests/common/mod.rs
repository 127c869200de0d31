#![allow(dead_code)]

use chrono::NaiveDate;
use net_metering_engine::billing::StoreEnergySource;
use net_metering_engine::domain::{
    BillingConfig, FixedProration, HourKey, HourlyEnergyRecord, HomeScope, PeakWindow,
};
use net_metering_engine::repo::{HourlyEnergyStore, MemoryStore};
use net_metering_engine::scheduler::DailyBillingJob;
use std::sync::Arc;

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn tariff(anchor_day: u32) -> BillingConfig {
    BillingConfig {
        anchor_day,
        price_offpeak_import: 20.0,
        price_peak_import: 30.0,
        price_offpeak_settlement: 10.0,
        price_peak_settlement: 12.0,
        fixed_charge_per_billing_month: 500.0,
        fixed_proration: FixedProration::None,
        peak_windows: vec![PeakWindow::hours(17, 22).unwrap()],
    }
}

pub fn home() -> HomeScope {
    HomeScope::new("home-1")
        .with_meters(["meter-1"])
        .with_inverters(["inv-1"])
}

pub fn record(entity: &str, day: NaiveDate, hour: u32, import: f64, export: f64) -> HourlyEnergyRecord {
    let mut rec = HourlyEnergyRecord::empty(entity, HourKey::new(day, hour));
    rec.grid_import_kwh = import;
    rec.grid_export_kwh = export;
    rec.solar_kwh = export;
    rec.load_kwh = import;
    rec.sample_count = 60;
    rec
}

/// Seeds a year of synthetic hourly energy.
///
/// Midday hours export, evenings import at peak. Seasonal amplitude makes
/// some cycles end in surplus and others in deficit. Every seventh day has
/// no meter data and is covered by the inverter only.
pub async fn seed_year(store: &MemoryStore, from: NaiveDate, days: usize) {
    for (i, day) in from.iter_days().take(days).enumerate() {
        let season = 1.0 + (i as f64 / 365.0 * std::f64::consts::TAU).sin();
        let meter_missing = i % 7 == 0;
        for hour in 0..24 {
            let (import, export) = match hour {
                10..=14 => (0.1, 1.2 * season),
                17..=21 => (1.5, 0.0),
                0..=5 => (0.4 + 0.3 * (2.0 - season), 0.0),
                _ => (0.3, 0.05 * season),
            };
            store
                .upsert_hourly(&record("inv-1", day, hour, import * 1.02, export * 0.98))
                .await
                .unwrap();
            if !meter_missing {
                store
                    .upsert_hourly(&record("meter-1", day, hour, import, export))
                    .await
                    .unwrap();
            }
        }
    }
}

pub fn job(store: Arc<MemoryStore>, tariff: BillingConfig) -> DailyBillingJob {
    DailyBillingJob::new(
        Arc::new(StoreEnergySource::new(store.clone())),
        store,
        Some(tariff),
    )
}
