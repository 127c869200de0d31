use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveTime};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::aggregator::HourlyEnergyAggregator;
use crate::billing::{
    aggregate_energy, bill_month, billing_month_containing, billing_months_for_year,
    compute_month, month_energy, previous_billing_month, simulate_months, EnergySource,
};
use crate::domain::{
    BillingConfig, BillingMonth, BillingMonthBill, CreditState, DailySnapshot, HomeScope,
    OpeningSource, SurplusDeficit,
};
use crate::repo::BillingStore;
use crate::BillingError;

/// Flags of an on-demand run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Re-aggregate every hour since the billing month's start first
    pub backfill: bool,
    /// Replace an existing finalized bill computed under another tariff
    pub refinalize: bool,
}

/// What happened to the billing month's bill during a run
#[derive(Debug, Clone, PartialEq)]
pub enum Finalization {
    /// `date` is not the last day of its billing month
    NotDue,
    /// A bill was written by this run
    Finalized(BillingMonthBill),
    /// A bill already existed and was left untouched
    AlreadyFinal(BillingMonthBill),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DailyRunOutcome {
    pub snapshot: DailySnapshot,
    pub finalization: Finalization,
}

type DateKey = (String, NaiveDate);

/// Daily bill-to-date job for any number of homes.
///
/// A run computes everything in memory and hands the snapshot (plus the
/// month's bill on its last day) to [`BillingStore::persist_run`] in one
/// call, so a failed run leaves earlier rows as they were. Runs for the same
/// `(home, date)` are serialized; different homes or dates run freely.
pub struct DailyBillingJob {
    energy: Arc<dyn EnergySource>,
    store: Arc<dyn BillingStore>,
    aggregator: Option<Arc<HourlyEnergyAggregator>>,
    tariff: RwLock<Option<BillingConfig>>,
    locks: Mutex<HashMap<DateKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl DailyBillingJob {
    pub fn new(
        energy: Arc<dyn EnergySource>,
        store: Arc<dyn BillingStore>,
        tariff: Option<BillingConfig>,
    ) -> Self {
        Self {
            energy,
            store,
            aggregator: None,
            tariff: RwLock::new(tariff),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Enables the `backfill` run option.
    pub fn with_aggregator(mut self, aggregator: Arc<HourlyEnergyAggregator>) -> Self {
        self.aggregator = Some(aggregator);
        self
    }

    /// Swaps the tariff used by runs that start after this call.
    pub fn update_tariff(&self, tariff: Option<BillingConfig>) {
        *self.tariff.write() = tariff;
    }

    pub fn tariff(&self) -> Option<BillingConfig> {
        self.tariff.read().clone()
    }

    /// Success/failure form used by the timer; the error is logged.
    pub async fn run_daily_billing_job(&self, date: NaiveDate, scope: &HomeScope) -> bool {
        match self.run_for_date(date, scope).await {
            Ok(_) => true,
            Err(e) => {
                error!(home_id = %scope.home_id, %date, error = %e, "daily billing job failed");
                false
            }
        }
    }

    pub async fn run_for_date(&self, date: NaiveDate, scope: &HomeScope) -> Result<DailyRunOutcome> {
        self.run_with(date, scope, RunOptions::default()).await
    }

    /// Manual trigger with optional backfill and re-finalization.
    pub async fn run_manual(
        &self,
        date: NaiveDate,
        scope: &HomeScope,
        options: RunOptions,
    ) -> Result<DailyRunOutcome> {
        self.run_with(date, scope, options).await
    }

    /// Runs every date in `[from, to]` in order, stopping at the first failure.
    pub async fn run_days(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        scope: &HomeScope,
    ) -> Result<Vec<DailyRunOutcome>> {
        let mut outcomes = Vec::new();
        for date in from.iter_days().take_while(|d| *d <= to) {
            outcomes.push(self.run_for_date(date, scope).await?);
        }
        Ok(outcomes)
    }

    /// Finalizes the billing month containing `date` by running its last day.
    ///
    /// Fails with [`BillingError::AlreadyFinalized`] when a bill computed
    /// under a different tariff exists and `refinalize` is not set.
    pub async fn finalize_month(
        &self,
        date: NaiveDate,
        scope: &HomeScope,
        refinalize: bool,
    ) -> Result<BillingMonthBill> {
        let tariff = self.current_tariff()?;
        let month = billing_month_containing(date, tariff.anchor_day)?;
        let options = RunOptions {
            backfill: false,
            refinalize,
        };
        match self.run_with(month.last_day(), scope, options).await?.finalization {
            Finalization::Finalized(bill) => Ok(bill),
            Finalization::AlreadyFinal(bill) if bill.config_hash != tariff.config_hash() => {
                Err(BillingError::AlreadyFinalized(bill.billing_month, bill.config_hash).into())
            }
            Finalization::AlreadyFinal(bill) => Ok(bill),
            Finalization::NotDue => anyhow::bail!("{} is not the last day of {}", month.last_day(), month.label),
        }
    }

    fn current_tariff(&self) -> Result<BillingConfig, BillingError> {
        let tariff = self.tariff.read().clone().ok_or(BillingError::MissingTariff)?;
        tariff.ensure_valid()?;
        Ok(tariff)
    }

    fn date_lock(&self, scope: &HomeScope, date: NaiveDate) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks
            .entry((scope.home_id.clone(), date))
            .or_default()
            .clone()
    }

    async fn run_with(
        &self,
        date: NaiveDate,
        scope: &HomeScope,
        options: RunOptions,
    ) -> Result<DailyRunOutcome> {
        // The tariff is read once; a reload mid-run does not affect this run.
        let tariff = self.current_tariff()?;
        let lock = self.date_lock(scope, date);
        let _guard = lock.lock().await;

        let month = billing_month_containing(date, tariff.anchor_day)?;
        if options.backfill {
            self.backfill_month(&month, date, scope).await?;
        }

        let (opening, opening_source) = self.resolve_opening_state(&tariff, &month, scope).await?;

        let until = date.succ_opt().unwrap_or(month.end);
        let resolved = self
            .energy
            .hourly_energy(scope, month.start, until)
            .await
            .with_context(|| format!("Failed to load energy for {} on {date}", scope.home_id))?;
        let energy = aggregate_energy(&month, &resolved.records, &tariff.peak_windows);

        let elapsed_days = month.elapsed_days(date);
        let complete = date == month.last_day();
        let (charges, closing) = compute_month(&tariff, &month, &energy, elapsed_days, opening, complete);
        let config_hash = tariff.config_hash();

        let snapshot = DailySnapshot {
            home_id: scope.home_id.clone(),
            date,
            billing_month_id: month.label.clone(),
            elapsed_days,
            days_in_month: month.days(),
            surplus_deficit_flag: SurplusDeficit::classify(
                energy.total_import_kwh(),
                energy.total_export_kwh(),
            ),
            energy: energy.clone(),
            data_source: resolved.source,
            opening,
            opening_source,
            closing,
            bill_raw_rs_to_date: charges.raw_bill,
            bill_final_rs_to_date: charges.final_bill,
            charges,
            config_hash: config_hash.clone(),
        };

        let finalization = if complete {
            let existing = self
                .store
                .bill(&scope.home_id, &month.label)
                .await
                .context("Failed to read finalized bill")?;
            match existing {
                Some(bill) if !options.refinalize || bill.config_hash == config_hash => {
                    if bill.config_hash != config_hash {
                        warn!(
                            home_id = %scope.home_id,
                            billing_month = %month.label,
                            stored_hash = %bill.config_hash,
                            "finalized bill was computed under another tariff; keeping it"
                        );
                    }
                    Finalization::AlreadyFinal(bill)
                }
                _ => Finalization::Finalized(bill_month(&scope.home_id, &tariff, &month, energy, opening)),
            }
        } else {
            Finalization::NotDue
        };

        let new_bill = match &finalization {
            Finalization::Finalized(bill) => Some(bill.clone()),
            _ => None,
        };
        let finalized = new_bill.is_some();
        self.store
            .persist_run(&snapshot, new_bill, options.refinalize)
            .await
            .with_context(|| format!("Failed to persist billing run for {} on {date}", scope.home_id))?;

        info!(
            home_id = %scope.home_id,
            %date,
            billing_month = %month.label,
            elapsed_days,
            data_source = %snapshot.data_source,
            opening_source = %opening_source,
            bill_final_to_date = snapshot.bill_final_rs_to_date,
            flag = %snapshot.surplus_deficit_flag,
            finalized,
            "daily billing snapshot written"
        );

        Ok(DailyRunOutcome {
            snapshot,
            finalization,
        })
    }

    /// Credit state carried into `month`.
    ///
    /// The previous month's finalized bill wins, including across a year
    /// boundary. Without it, the earlier months of the same simulated year are
    /// replayed from hourly energy, starting from whatever the previous year's
    /// last bill closed with. A first month with no prior bill opens empty.
    async fn resolve_opening_state(
        &self,
        tariff: &BillingConfig,
        month: &BillingMonth,
        scope: &HomeScope,
    ) -> Result<(CreditState, OpeningSource)> {
        if let Some(closing) = self.prior_closing(tariff, month, scope).await? {
            return Ok((closing, OpeningSource::PriorBill));
        }
        if month.month_number == 1 {
            return Ok((CreditState::default(), OpeningSource::Fresh));
        }

        let months = billing_months_for_year(month.year, tariff.anchor_day)?;
        let carried_in = match months.first() {
            Some(first) => self.prior_closing(tariff, first, scope).await?.unwrap_or_default(),
            None => CreditState::default(),
        };

        let mut earlier = Vec::new();
        for m in months.into_iter().filter(|m| m.start < month.start) {
            let energy = month_energy(self.energy.as_ref(), scope, tariff, &m, m.end).await?;
            earlier.push((m, energy));
        }
        let replayed = simulate_months(&scope.home_id, tariff, earlier, carried_in);
        let state = replayed.last().map(|b| b.closing).unwrap_or(carried_in);
        Ok((state, OpeningSource::Replayed))
    }

    /// Closing state of the finalized bill of the month before `month`.
    async fn prior_closing(
        &self,
        tariff: &BillingConfig,
        month: &BillingMonth,
        scope: &HomeScope,
    ) -> Result<Option<CreditState>> {
        let previous = previous_billing_month(month, tariff.anchor_day)?;
        let bill = self
            .store
            .bill(&scope.home_id, &previous.label)
            .await
            .context("Failed to read previous finalized bill")?;
        Ok(bill.map(|b| b.closing))
    }

    async fn backfill_month(&self, month: &BillingMonth, date: NaiveDate, scope: &HomeScope) -> Result<()> {
        let aggregator = self
            .aggregator
            .as_ref()
            .context("Backfill requested but no hourly aggregator is attached")?;
        let from = month.start.and_time(NaiveTime::MIN);
        let to = date.succ_opt().unwrap_or(month.end).and_time(NaiveTime::MIN);
        let report = aggregator.backfill_entities(scope.all_entities(), from, to).await;
        if !report.is_clean() {
            warn!(
                home_id = %scope.home_id,
                failed = report.failures.len(),
                "backfill finished with skipped hours"
            );
        }
        Ok(())
    }
}
