//! Storage seams for telemetry, hourly energy and billing state.
//!
//! Logical tables:
//! - `hourly_energy` keyed by `(entity_id, date, hour)`
//! - `billing_daily` keyed by `(home_id, date)`
//! - `billing_months` keyed by `id` (`{home_id}:{billing_month}`)

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::sync::Arc;

use crate::config::Config;
use crate::domain::{BillingMonthBill, DailySnapshot, HourlyEnergyRecord, PowerSample};

pub mod memory;
#[cfg(feature = "db")]
pub mod pg;

pub use memory::MemoryStore;

/// Raw power samples supplied by the device/telemetry layer.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SampleSource: Send + Sync {
    /// Samples with `start <= timestamp < end`, ordered by time.
    async fn get_samples(
        &self,
        entity_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<PowerSample>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HourlyEnergyStore: Send + Sync {
    /// Insert or overwrite the record for its `(entity_id, date, hour)`.
    async fn upsert_hourly(&self, record: &HourlyEnergyRecord) -> Result<()>;

    /// Records for any of `entity_ids` with `start <= date < end`.
    async fn hourly_range(
        &self,
        entity_ids: &[String],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<HourlyEnergyRecord>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BillingStore: Send + Sync {
    async fn snapshot(&self, home_id: &str, date: NaiveDate) -> Result<Option<DailySnapshot>>;

    async fn snapshots_for_month(
        &self,
        home_id: &str,
        billing_month: &str,
    ) -> Result<Vec<DailySnapshot>>;

    async fn bill(&self, home_id: &str, billing_month: &str) -> Result<Option<BillingMonthBill>>;

    async fn bills_for_year(&self, home_id: &str, year: i32) -> Result<Vec<BillingMonthBill>>;

    /// Writes one run's output atomically: the snapshot is upserted and, when
    /// given, the bill is inserted. An existing bill is only overwritten when
    /// `replace_bill` is set.
    async fn persist_run(
        &self,
        snapshot: &DailySnapshot,
        bill: Option<BillingMonthBill>,
        replace_bill: bool,
    ) -> Result<()>;
}

/// Concrete stores wired from configuration
#[derive(Clone)]
pub struct Repositories {
    pub samples: Arc<dyn SampleSource>,
    pub hourly: Arc<dyn HourlyEnergyStore>,
    pub billing: Arc<dyn BillingStore>,
}

impl Repositories {
    pub async fn new(cfg: &Config) -> Result<Self> {
        #[cfg(feature = "db")]
        {
            if let Some(url) = &cfg.db.url {
                let pg = Arc::new(pg::PgRepo::connect(url, cfg.db.max_connections).await?);
                return Ok(Self {
                    samples: pg.clone(),
                    hourly: pg.clone(),
                    billing: pg,
                });
            }
        }

        let _ = cfg;
        tracing::warn!("no database configured; using in-memory storage");
        Ok(Self::in_memory(Arc::new(MemoryStore::new())))
    }

    pub fn in_memory(store: Arc<MemoryStore>) -> Self {
        Self {
            samples: store.clone(),
            hourly: store.clone(),
            billing: store,
        }
    }
}
