use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use itertools::Itertools;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{error, info, warn};

use super::DailyBillingJob;
use crate::aggregator::{AggregationReport, HourlyEnergyAggregator};
use crate::config::Config;
use crate::domain::HomeScope;

/// Task status tracking
#[derive(Debug, Clone, Default)]
pub struct TaskStatus {
    pub last_run: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Local date billed by the last run
    pub last_date: Option<NaiveDate>,
    pub run_count: u64,
    pub success_count: u64,
    pub error_count: u64,
}

/// Result of one scheduled pass over every home
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub date: Option<NaiveDate>,
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
    pub aggregation: AggregationReport,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// First `hour:minute` local time strictly after `now`.
///
/// A run time that falls into a DST gap moves to the first valid instant
/// after it.
pub fn next_run_after(now: DateTime<Utc>, tz: Tz, hour: u32, minute: u32) -> DateTime<Utc> {
    let run_time = NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN);
    let today = now.with_timezone(&tz).date_naive();

    for date in today.iter_days().take(3) {
        let mut local = date.and_time(run_time);
        for _ in 0..3 {
            if let Some(at) = tz.from_local_datetime(&local).earliest() {
                let at = at.with_timezone(&Utc);
                if at > now {
                    return at;
                }
                break;
            }
            local += Duration::minutes(30);
        }
    }
    now + Duration::days(1)
}

/// Daily timer: at the configured local time it aggregates the previous
/// day's hours for every entity and then snapshots every home.
pub struct BillingScheduler {
    job: Arc<DailyBillingJob>,
    aggregator: Arc<HourlyEnergyAggregator>,
    config: parking_lot::RwLock<Config>,
    config_path: Option<PathBuf>,
    status: Arc<RwLock<TaskStatus>>,
}

impl BillingScheduler {
    pub fn new(job: Arc<DailyBillingJob>, aggregator: Arc<HourlyEnergyAggregator>, config: Config) -> Self {
        Self {
            job,
            aggregator,
            config: parking_lot::RwLock::new(config),
            config_path: None,
            status: Arc::new(RwLock::new(TaskStatus::default())),
        }
    }

    /// Re-read configuration from `path` before every run.
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub async fn status(&self) -> TaskStatus {
        self.status.read().await.clone()
    }

    pub fn homes(&self) -> Vec<HomeScope> {
        self.config.read().homes.clone()
    }

    /// Reloads configuration between runs. A file that fails to load or
    /// validate is ignored and the previous configuration stays active.
    pub fn reload_config(&self) -> bool {
        let Some(path) = &self.config_path else {
            return false;
        };
        match Config::load_from(path) {
            Ok(cfg) => {
                if cfg.scheduler.timezone != self.config.read().scheduler.timezone {
                    warn!(
                        timezone = %cfg.scheduler.timezone,
                        "time zone changes take effect after a restart"
                    );
                }
                self.job.update_tariff(cfg.billing.clone());
                *self.config.write() = cfg;
                info!(path = %path.display(), "configuration reloaded");
                true
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "configuration reload failed, keeping previous");
                false
            }
        }
    }

    /// Aggregates every hour of `date` and runs the daily job for every home.
    pub async fn run_once(&self, date: NaiveDate) -> RunSummary {
        let homes = self.homes();
        let entities: Vec<String> = homes
            .iter()
            .flat_map(HomeScope::all_entities)
            .unique()
            .cloned()
            .collect();

        let mut summary = RunSummary {
            date: Some(date),
            ..RunSummary::default()
        };
        for hour in 0..24 {
            if let Some(start) = date.and_hms_opt(hour, 0, 0) {
                let report = self.aggregator.aggregate_hour_for_entities(&entities, start).await;
                summary.aggregation.merge(report);
            }
        }

        let mut runs = JoinSet::new();
        for scope in homes {
            let job = self.job.clone();
            runs.spawn(async move {
                let ok = job.run_daily_billing_job(date, &scope).await;
                (scope.home_id, ok)
            });
        }
        while let Some(joined) = runs.join_next().await {
            match joined {
                Ok((home_id, true)) => summary.succeeded.push(home_id),
                Ok((home_id, false)) => summary.failed.push(home_id),
                Err(e) => {
                    error!(error = %e, "billing task panicked");
                    summary.failed.push("<panicked>".to_string());
                }
            }
        }
        summary.succeeded.sort();
        summary.failed.sort();

        info!(
            %date,
            homes_ok = summary.succeeded.len(),
            homes_failed = summary.failed.len(),
            hours_written = summary.aggregation.written,
            hours_failed = summary.aggregation.failures.len(),
            "daily billing pass finished"
        );
        summary
    }

    async fn record(&self, now: DateTime<Utc>, summary: &RunSummary) {
        let mut status = self.status.write().await;
        status.last_date = summary.date;
        if summary.is_success() {
            status.last_success = Some(now);
            status.success_count += 1;
            status.last_error = None;
        } else {
            status.error_count += 1;
            status.last_error = Some(format!("billing failed for {}", summary.failed.join(", ")));
        }
    }

    /// Runs forever; each pass bills the local day that just ended.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let tz = self.config.read().scheduler.tz()?;
        loop {
            let (hour, minute) = {
                let cfg = self.config.read();
                (cfg.scheduler.run_hour, cfg.scheduler.run_minute)
            };
            let now = Utc::now();
            let next = next_run_after(now, tz, hour, minute);
            info!(next_run = %next.with_timezone(&tz), "next daily billing run scheduled");
            sleep((next - now).to_std().unwrap_or(std::time::Duration::from_secs(60))).await;

            self.reload_config();

            let now = Utc::now();
            {
                let mut status = self.status.write().await;
                status.last_run = Some(now);
                status.run_count += 1;
            }

            let Some(yesterday) = now.with_timezone(&tz).date_naive().pred_opt() else {
                continue;
            };
            let summary = self.run_once(yesterday).await;
            self.record(now, &summary).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::StoreEnergySource;
    use crate::config::{DbConfig, SchedulerConfig};
    use crate::domain::tariff::tests::sample_config;
    use crate::domain::PowerSample;
    use crate::repo::{BillingStore, MemoryStore};
    use rstest::rstest;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[rstest]
    // Kolkata is UTC+05:30; 00:30 local on the 11th is 19:00 UTC on the 10th
    #[case(utc(2025, 1, 10, 12, 0), chrono_tz::Asia::Kolkata, 0, 30, utc(2025, 1, 10, 19, 0))]
    #[case(utc(2025, 1, 10, 19, 0), chrono_tz::Asia::Kolkata, 0, 30, utc(2025, 1, 11, 19, 0))]
    #[case(utc(2025, 6, 1, 0, 59), chrono_tz::UTC, 1, 0, utc(2025, 6, 1, 1, 0))]
    // 02:30 does not exist in Stockholm on 2025-03-30
    #[case(utc(2025, 3, 29, 12, 0), chrono_tz::Europe::Stockholm, 2, 30, utc(2025, 3, 30, 1, 0))]
    fn test_next_run_after(
        #[case] now: DateTime<Utc>,
        #[case] tz: Tz,
        #[case] hour: u32,
        #[case] minute: u32,
        #[case] expected: DateTime<Utc>,
    ) {
        assert_eq!(next_run_after(now, tz, hour, minute), expected);
    }

    fn config(homes: Vec<HomeScope>) -> Config {
        Config {
            scheduler: SchedulerConfig {
                run_hour: 0,
                run_minute: 30,
                timezone: "UTC".into(),
                backfill_on_start: false,
            },
            billing: Some(sample_config()),
            homes,
            db: DbConfig::default(),
        }
    }

    fn scheduler(store: Arc<MemoryStore>, cfg: Config) -> BillingScheduler {
        let aggregator = Arc::new(HourlyEnergyAggregator::new(store.clone(), store.clone(), chrono_tz::UTC));
        let job = Arc::new(DailyBillingJob::new(
            Arc::new(StoreEnergySource::new(store.clone())),
            store,
            cfg.billing.clone(),
        ));
        BillingScheduler::new(job, aggregator, cfg)
    }

    #[tokio::test]
    async fn test_run_once_aggregates_then_bills_every_home() {
        let store = Arc::new(MemoryStore::new());
        let t0 = utc(2025, 1, 20, 10, 0);
        store.insert_samples(
            "inv-a",
            (0..=2).map(|i| PowerSample::at(t0 + Duration::minutes(30 * i)).with_grid(1000.0)),
        );
        let homes = vec![
            HomeScope::new("home-a").with_inverters(["inv-a"]),
            HomeScope::new("home-b").with_inverters(["inv-b"]),
        ];
        let sched = scheduler(store.clone(), config(homes));

        let date = NaiveDate::from_ymd_opt(2025, 1, 20).unwrap();
        let summary = sched.run_once(date).await;

        assert!(summary.is_success());
        assert_eq!(summary.succeeded, vec!["home-a", "home-b"]);
        assert_eq!(summary.aggregation.written, 48);
        let snap = store.snapshot("home-a", date).await.unwrap().unwrap();
        // 1 kW held for the half hour to 10:30, and hour 11 starts fresh
        assert!((snap.energy.import_off_kwh - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_missing_tariff_marks_homes_failed() {
        let store = Arc::new(MemoryStore::new());
        let mut cfg = config(vec![HomeScope::new("home-a").with_inverters(["inv-a"])]);
        cfg.billing = None;
        let sched = scheduler(store.clone(), cfg);

        let summary = sched.run_once(NaiveDate::from_ymd_opt(2025, 1, 20).unwrap()).await;
        assert_eq!(summary.failed, vec!["home-a"]);
        // energy is still aggregated without a tariff
        assert_eq!(store.hourly_len(), 24);
        assert_eq!(store.snapshot_count(), 0);

        sched.record(Utc::now(), &summary).await;
        let status = sched.status().await;
        assert_eq!(status.error_count, 1);
        assert!(status.last_error.unwrap().contains("home-a"));
    }

    #[test]
    fn test_failed_reload_keeps_previous_config() {
        let store = Arc::new(MemoryStore::new());
        let sched = scheduler(store, config(vec![HomeScope::new("home-a")]))
            .with_config_path("/nonexistent/billing.toml");
        assert!(!sched.reload_config());
        assert_eq!(sched.homes().len(), 1);
        assert!(sched.job.tariff().is_some());
    }
}
