//! Hourly energy for a home, resolved from meter and inverter entities.

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::domain::{DataSourceKind, HomeScope, HourKey, HourlyEnergyRecord};
use crate::repo::HourlyEnergyStore;

/// One record per local hour, already unioned across a home's entities.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedEnergy {
    pub records: Vec<HourlyEnergyRecord>,
    pub source: DataSourceKind,
    pub meter_hours: usize,
    pub fallback_hours: usize,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EnergySource: Send + Sync {
    /// Hourly energy for `scope` with `start <= date < end`.
    async fn hourly_energy(
        &self,
        scope: &HomeScope,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<ResolvedEnergy>;
}

/// Sums per-entity records into one record per hour, labelled `scope_id`.
pub fn union_by_hour(
    scope_id: &str,
    records: &[HourlyEnergyRecord],
) -> BTreeMap<HourKey, HourlyEnergyRecord> {
    let mut merged: BTreeMap<HourKey, HourlyEnergyRecord> = BTreeMap::new();
    for rec in records {
        merged
            .entry(rec.key())
            .or_insert_with(|| HourlyEnergyRecord::empty(scope_id, rec.key()))
            .accumulate(rec);
    }
    merged
}

/// Prefers `primary` hours that carry data, filling every other hour from
/// `fallback`. Returns the merged map and how many hours came from each side.
pub fn merge_with_fallback(
    primary: BTreeMap<HourKey, HourlyEnergyRecord>,
    mut fallback: BTreeMap<HourKey, HourlyEnergyRecord>,
) -> (BTreeMap<HourKey, HourlyEnergyRecord>, usize, usize) {
    let mut merged = BTreeMap::new();
    let mut primary_hours = 0;
    let mut fallback_hours = 0;
    for (key, rec) in primary {
        if rec.has_data() {
            fallback.remove(&key);
            primary_hours += 1;
            merged.insert(key, rec);
        } else if let Some(fb) = fallback.remove(&key) {
            fallback_hours += usize::from(fb.has_data());
            merged.insert(key, fb);
        } else {
            merged.insert(key, rec);
        }
    }
    for (key, rec) in fallback {
        fallback_hours += usize::from(rec.has_data());
        merged.insert(key, rec);
    }
    (merged, primary_hours, fallback_hours)
}

/// Removes `primary` hours that fewer than `entities` entities reported when
/// `fallback` has data for them. Fallback data covers the whole home, so it
/// replaces the hour rather than one missing entity's share. Returns the
/// number of hours removed.
pub fn drop_partial_hours(
    primary: &mut BTreeMap<HourKey, HourlyEnergyRecord>,
    records: &[HourlyEnergyRecord],
    entities: usize,
    fallback: &BTreeMap<HourKey, HourlyEnergyRecord>,
) -> usize {
    let mut reporting: BTreeMap<HourKey, usize> = BTreeMap::new();
    for rec in records.iter().filter(|r| r.has_data()) {
        *reporting.entry(rec.key()).or_default() += 1;
    }
    let partial: Vec<HourKey> = reporting
        .into_iter()
        .filter(|(key, count)| *count < entities && fallback.get(key).is_some_and(|r| r.has_data()))
        .map(|(key, _)| key)
        .collect();
    for key in &partial {
        primary.remove(key);
    }
    partial.len()
}

fn provenance(meter_hours: usize, fallback_hours: usize) -> DataSourceKind {
    match (meter_hours, fallback_hours) {
        (0, 0) => DataSourceKind::Empty,
        (_, 0) => DataSourceKind::Meter,
        (0, _) => DataSourceKind::Inverter,
        _ => DataSourceKind::Mixed,
    }
}

/// Energy source backed by the `hourly_energy` store.
pub struct StoreEnergySource {
    store: Arc<dyn HourlyEnergyStore>,
}

impl StoreEnergySource {
    pub fn new(store: Arc<dyn HourlyEnergyStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EnergySource for StoreEnergySource {
    async fn hourly_energy(
        &self,
        scope: &HomeScope,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<ResolvedEnergy> {
        let inverter_records = self.store.hourly_range(&scope.inverter_ids, start, end).await?;
        let inverter = union_by_hour(&scope.home_id, &inverter_records);

        let (merged, meter_hours, fallback_hours) = if scope.has_meters() {
            let meter_records = self.store.hourly_range(&scope.meter_ids, start, end).await?;
            let mut meter = union_by_hour(&scope.home_id, &meter_records);
            let partial = drop_partial_hours(&mut meter, &meter_records, scope.meter_ids.len(), &inverter);
            if partial > 0 {
                debug!(home_id = %scope.home_id, partial, "hours with missing meters filled from inverters");
            }
            merge_with_fallback(meter, inverter)
        } else {
            let hours = inverter.values().filter(|r| r.has_data()).count();
            (inverter, 0, hours)
        };

        let source = provenance(meter_hours, fallback_hours);
        debug!(
            home_id = %scope.home_id,
            %start,
            %end,
            meter_hours,
            fallback_hours,
            %source,
            "resolved hourly energy"
        );

        Ok(ResolvedEnergy {
            records: merged.into_values().collect(),
            source,
            meter_hours,
            fallback_hours,
        })
    }
}
