//! Hourly energy aggregation.
//!
//! Converts irregularly spaced power samples into per-hour energy using a
//! left Riemann sum: each sample's power is held over the interval since the
//! previous sample, and the first sample of an hour contributes nothing.
//! An hour whose data starts late is therefore undercounted; that is the
//! accepted approximation.

pub mod integrate;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::domain::{HourKey, HourlyEnergyRecord};
use crate::repo::{HourlyEnergyStore, SampleSource};
use crate::BillingError;

pub use integrate::integrate_hour;

/// Outcome of a multi-entity or multi-hour batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregationReport {
    pub written: usize,
    pub without_data: usize,
    /// `(entity_id, hour, error)` for every skipped unit of work
    pub failures: Vec<(String, HourKey, String)>,
}

impl AggregationReport {
    fn record(&mut self, rec: &HourlyEnergyRecord) {
        self.written += 1;
        if !rec.has_data() {
            self.without_data += 1;
        }
    }

    pub fn merge(&mut self, other: AggregationReport) {
        self.written += other.written;
        self.without_data += other.without_data;
        self.failures.extend(other.failures);
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct HourlyEnergyAggregator {
    samples: Arc<dyn SampleSource>,
    store: Arc<dyn HourlyEnergyStore>,
    tz: Tz,
}

impl HourlyEnergyAggregator {
    pub fn new(samples: Arc<dyn SampleSource>, store: Arc<dyn HourlyEnergyStore>, tz: Tz) -> Self {
        Self { samples, store, tz }
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// UTC window of a local hour, from its start to the start of the next
    /// existing local hour.
    ///
    /// Ambiguous local times (autumn DST) resolve to the earliest instant, so
    /// the repeated hour spans two real hours. A non-existent start (spring
    /// DST) is an error.
    pub fn hour_window(&self, key: HourKey) -> Result<(DateTime<Utc>, DateTime<Utc>), BillingError> {
        let start = self.resolve_earliest(key)?;
        let mut next = key.next();
        // a DST gap is at most a couple of hours wide
        for _ in 0..3 {
            if let Ok(end) = self.resolve_earliest(next) {
                return Ok((start, end));
            }
            next = next.next();
        }
        Err(BillingError::UnresolvableLocalTime(next.start(), self.tz.name().to_string()))
    }

    fn resolve_earliest(&self, key: HourKey) -> Result<DateTime<Utc>, BillingError> {
        let local = key.start();
        self.tz
            .from_local_datetime(&local)
            .earliest()
            .map(|t| t.with_timezone(&Utc))
            .ok_or_else(|| BillingError::UnresolvableLocalTime(local, self.tz.name().to_string()))
    }

    /// Computes and upserts the record for the local hour containing `hour_start`.
    pub async fn compute_hourly_energy(
        &self,
        entity_id: &str,
        hour_start: NaiveDateTime,
    ) -> Result<HourlyEnergyRecord> {
        let key = HourKey::containing(hour_start);
        let (start, end) = self.hour_window(key)?;

        let samples = self
            .samples
            .get_samples(entity_id, start, end)
            .await
            .with_context(|| format!("Failed to fetch samples for {entity_id} at {key}"))?;

        let record = integrate_hour(entity_id, key, &samples);
        self.store
            .upsert_hourly(&record)
            .await
            .with_context(|| format!("Failed to store hourly energy for {entity_id} at {key}"))?;

        debug!(
            entity_id,
            hour = %key,
            samples = record.sample_count,
            import_kwh = record.grid_import_kwh,
            export_kwh = record.grid_export_kwh,
            "hourly energy computed"
        );
        Ok(record)
    }

    /// One hour for many entities. A failing entity is logged and skipped;
    /// the others still commit.
    pub async fn aggregate_hour_for_entities<'a, I>(
        &self,
        entity_ids: I,
        hour_start: NaiveDateTime,
    ) -> AggregationReport
    where
        I: IntoIterator<Item = &'a String>,
    {
        let key = HourKey::containing(hour_start);
        let mut report = AggregationReport::default();
        for entity_id in entity_ids {
            match self.compute_hourly_energy(entity_id, hour_start).await {
                Ok(rec) => report.record(&rec),
                Err(e) => {
                    warn!(entity_id = %entity_id, hour = %key, error = %e, "hourly aggregation failed, skipping");
                    report.failures.push((entity_id.clone(), key, e.to_string()));
                }
            }
        }
        report
    }

    /// Recomputes every local hour in `[from, to)` for one entity.
    pub async fn backfill(
        &self,
        entity_id: &str,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> AggregationReport {
        let mut report = AggregationReport::default();
        let mut key = HourKey::containing(from);
        while key.start() < to {
            match self.compute_hourly_energy(entity_id, key.start()).await {
                Ok(rec) => report.record(&rec),
                Err(e) => {
                    warn!(entity_id, hour = %key, error = %e, "backfill hour failed, skipping");
                    report.failures.push((entity_id.to_string(), key, e.to_string()));
                }
            }
            key = key.next();
        }
        info!(
            entity_id,
            written = report.written,
            without_data = report.without_data,
            failed = report.failures.len(),
            "backfill finished"
        );
        report
    }

    /// Backfill for several entities over the same range
    pub async fn backfill_entities<'a, I>(
        &self,
        entity_ids: I,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> AggregationReport
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut report = AggregationReport::default();
        for entity_id in entity_ids {
            report.merge(self.backfill(entity_id, from, to).await);
        }
        report
    }
}
