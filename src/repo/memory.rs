//! In-process storage used by tests and database-less deployments.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use super::{BillingStore, HourlyEnergyStore, SampleSource};
use crate::domain::{BillingMonthBill, DailySnapshot, HourlyEnergyRecord, PowerSample};

type HourlyKey = (String, NaiveDate, u32);

#[derive(Debug, Default)]
struct BillingTables {
    daily: BTreeMap<(String, NaiveDate), DailySnapshot>,
    months: BTreeMap<String, BillingMonthBill>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    samples: RwLock<HashMap<String, Vec<PowerSample>>>,
    hourly: RwLock<BTreeMap<HourlyKey, HourlyEnergyRecord>>,
    billing: RwLock<BillingTables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends telemetry for an entity, keeping it ordered by timestamp.
    pub fn insert_samples(&self, entity_id: &str, samples: impl IntoIterator<Item = PowerSample>) {
        let mut guard = self.samples.write();
        let stream = guard.entry(entity_id.to_string()).or_default();
        stream.extend(samples);
        stream.sort_by_key(|s| s.timestamp);
    }

    pub fn hourly_len(&self) -> usize {
        self.hourly.read().len()
    }

    pub fn snapshot_count(&self) -> usize {
        self.billing.read().daily.len()
    }
}

#[async_trait]
impl SampleSource for MemoryStore {
    async fn get_samples(
        &self,
        entity_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<PowerSample>> {
        let guard = self.samples.read();
        let samples = guard
            .get(entity_id)
            .map(|stream| {
                stream
                    .iter()
                    .filter(|s| s.timestamp >= start && s.timestamp < end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(samples)
    }
}

#[async_trait]
impl HourlyEnergyStore for MemoryStore {
    async fn upsert_hourly(&self, record: &HourlyEnergyRecord) -> Result<()> {
        let key = (record.entity_id.clone(), record.date, record.hour);
        self.hourly.write().insert(key, record.clone());
        Ok(())
    }

    async fn hourly_range(
        &self,
        entity_ids: &[String],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<HourlyEnergyRecord>> {
        let guard = self.hourly.read();
        let mut records = Vec::new();
        for entity_id in entity_ids {
            let lo = (entity_id.clone(), start, 0);
            let hi = (entity_id.clone(), end, 0);
            records.extend(guard.range(lo..hi).map(|(_, rec)| rec.clone()));
        }
        debug!(
            entities = entity_ids.len(),
            records = records.len(),
            %start,
            %end,
            "loaded hourly energy"
        );
        Ok(records)
    }
}

#[async_trait]
impl BillingStore for MemoryStore {
    async fn snapshot(&self, home_id: &str, date: NaiveDate) -> Result<Option<DailySnapshot>> {
        Ok(self
            .billing
            .read()
            .daily
            .get(&(home_id.to_string(), date))
            .cloned())
    }

    async fn snapshots_for_month(
        &self,
        home_id: &str,
        billing_month: &str,
    ) -> Result<Vec<DailySnapshot>> {
        Ok(self
            .billing
            .read()
            .daily
            .values()
            .filter(|s| s.home_id == home_id && s.billing_month_id == billing_month)
            .cloned()
            .collect())
    }

    async fn bill(&self, home_id: &str, billing_month: &str) -> Result<Option<BillingMonthBill>> {
        let id = BillingMonthBill::bill_id(home_id, billing_month);
        Ok(self.billing.read().months.get(&id).cloned())
    }

    async fn bills_for_year(&self, home_id: &str, year: i32) -> Result<Vec<BillingMonthBill>> {
        let mut bills: Vec<BillingMonthBill> = self
            .billing
            .read()
            .months
            .values()
            .filter(|b| b.home_id == home_id && b.year == year)
            .cloned()
            .collect();
        bills.sort_by_key(|b| b.month_number);
        Ok(bills)
    }

    async fn persist_run(
        &self,
        snapshot: &DailySnapshot,
        bill: Option<BillingMonthBill>,
        replace_bill: bool,
    ) -> Result<()> {
        // Single write guard: both rows land together or not at all.
        let mut tables = self.billing.write();
        tables
            .daily
            .insert((snapshot.home_id.clone(), snapshot.date), snapshot.clone());
        if let Some(bill) = bill {
            if replace_bill || !tables.months.contains_key(&bill.id) {
                tables.months.insert(bill.id.clone(), bill);
            }
        }
        Ok(())
    }
}
