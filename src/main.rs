use anyhow::Result;
use chrono::{NaiveTime, Utc};
use itertools::Itertools;
use net_metering_engine::billing::{billing_month_containing, StoreEnergySource};
use net_metering_engine::{aggregator, config, repo, scheduler, telemetry};
use std::sync::Arc;
use tracing::{info, warn};

use aggregator::HourlyEnergyAggregator;
use config::{Config, DEFAULT_CONFIG_PATH};
use repo::Repositories;
use scheduler::{BillingScheduler, DailyBillingJob};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init_tracing();

    let cfg = Config::load()?;
    let tz = cfg.scheduler.tz()?;
    if cfg.billing.is_none() {
        warn!("no [billing] section configured; hourly energy is aggregated but nothing is billed");
    }

    let repos = Repositories::new(&cfg).await?;
    let aggregator = Arc::new(HourlyEnergyAggregator::new(
        repos.samples.clone(),
        repos.hourly.clone(),
        tz,
    ));
    let job = Arc::new(
        DailyBillingJob::new(
            Arc::new(StoreEnergySource::new(repos.hourly.clone())),
            repos.billing.clone(),
            cfg.billing.clone(),
        )
        .with_aggregator(aggregator.clone()),
    );

    if cfg.scheduler.backfill_on_start {
        backfill_current_month(&cfg, &aggregator, &job).await?;
    }

    info!(
        homes = cfg.homes.len(),
        timezone = %tz,
        run_hour = cfg.scheduler.run_hour,
        "starting net-metering engine"
    );

    let scheduler = Arc::new(
        BillingScheduler::new(job, aggregator, cfg).with_config_path(DEFAULT_CONFIG_PATH),
    );

    tokio::select! {
        res = scheduler.run() => res?,
        _ = telemetry::shutdown_signal() => {},
    }

    warn!("shutdown complete");
    Ok(())
}

/// Re-aggregates the current billing month up to today and snapshots every
/// completed day of it.
async fn backfill_current_month(
    cfg: &Config,
    aggregator: &HourlyEnergyAggregator,
    job: &DailyBillingJob,
) -> Result<()> {
    let Some(billing) = &cfg.billing else {
        warn!("backfill on start skipped: no tariff configured");
        return Ok(());
    };
    let today = Utc::now().with_timezone(&aggregator.timezone()).date_naive();
    let month = billing_month_containing(today, billing.anchor_day)?;

    let entities: Vec<String> = cfg
        .homes
        .iter()
        .flat_map(|h| h.all_entities())
        .unique()
        .cloned()
        .collect();
    let report = aggregator
        .backfill_entities(
            &entities,
            month.start.and_time(NaiveTime::MIN),
            today.and_time(NaiveTime::MIN),
        )
        .await;
    info!(
        billing_month = %month.label,
        written = report.written,
        failed = report.failures.len(),
        "startup backfill aggregated"
    );

    let Some(yesterday) = today.pred_opt().filter(|d| *d >= month.start) else {
        return Ok(());
    };
    for home in &cfg.homes {
        if let Err(e) = job.run_days(month.start, yesterday, home).await {
            warn!(home_id = %home.home_id, error = %e, "startup backfill billing failed");
        }
    }
    Ok(())
}
