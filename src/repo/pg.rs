#![cfg(feature = "db")]
//! PostgreSQL storage. Schema lives in `migrations/0001_billing.sql`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{postgres::PgPoolOptions, types::Json, FromRow, PgPool};
use tracing::{debug, info};

use super::{BillingStore, HourlyEnergyStore, SampleSource};
use crate::domain::{BillingMonthBill, DailySnapshot, HourlyEnergyRecord, PowerSample};

pub struct PgRepo {
    pub pool: PgPool,
}

impl PgRepo {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .context("Failed to create database pool")?;
        info!("database connection pool initialized");
        Ok(Self { pool })
    }
}

#[derive(Debug, FromRow)]
struct SampleRow {
    ts: DateTime<Utc>,
    solar_w: Option<f64>,
    load_w: Option<f64>,
    battery_voltage_v: Option<f64>,
    battery_current_a: Option<f64>,
    grid_w: Option<f64>,
}

impl From<SampleRow> for PowerSample {
    fn from(row: SampleRow) -> Self {
        Self {
            timestamp: row.ts,
            solar_w: row.solar_w,
            load_w: row.load_w,
            battery_voltage_v: row.battery_voltage_v,
            battery_current_a: row.battery_current_a,
            grid_w: row.grid_w,
        }
    }
}

#[derive(Debug, FromRow)]
struct HourlyRow {
    entity_id: String,
    date: NaiveDate,
    hour: i32,
    solar_kwh: f64,
    load_kwh: f64,
    battery_charge_kwh: f64,
    battery_discharge_kwh: f64,
    grid_import_kwh: f64,
    grid_export_kwh: f64,
    avg_solar_w: f64,
    avg_load_w: f64,
    avg_battery_w: f64,
    avg_grid_w: f64,
    sample_count: i32,
}

impl From<HourlyRow> for HourlyEnergyRecord {
    fn from(row: HourlyRow) -> Self {
        Self {
            entity_id: row.entity_id,
            date: row.date,
            hour: u32::try_from(row.hour).unwrap_or(0),
            solar_kwh: row.solar_kwh,
            load_kwh: row.load_kwh,
            battery_charge_kwh: row.battery_charge_kwh,
            battery_discharge_kwh: row.battery_discharge_kwh,
            grid_import_kwh: row.grid_import_kwh,
            grid_export_kwh: row.grid_export_kwh,
            avg_solar_w: row.avg_solar_w,
            avg_load_w: row.avg_load_w,
            avg_battery_w: row.avg_battery_w,
            avg_grid_w: row.avg_grid_w,
            sample_count: u32::try_from(row.sample_count).unwrap_or(0),
        }
    }
}

#[derive(Debug, FromRow)]
struct SnapshotRow {
    payload: Json<DailySnapshot>,
}

#[derive(Debug, FromRow)]
struct BillRow {
    payload: Json<BillingMonthBill>,
}

#[async_trait]
impl SampleSource for PgRepo {
    async fn get_samples(
        &self,
        entity_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<PowerSample>> {
        let rows: Vec<SampleRow> = sqlx::query_as(
            r#"
            SELECT ts, solar_w, load_w, battery_voltage_v, battery_current_a, grid_w
            FROM power_samples
            WHERE entity_id = $1 AND ts >= $2 AND ts < $3
            ORDER BY ts ASC
            "#,
        )
        .bind(entity_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch power samples")?;

        debug!(entity_id, count = rows.len(), "fetched power samples");
        Ok(rows.into_iter().map(PowerSample::from).collect())
    }
}

#[async_trait]
impl HourlyEnergyStore for PgRepo {
    async fn upsert_hourly(&self, record: &HourlyEnergyRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO hourly_energy (
                entity_id, date, hour,
                solar_kwh, load_kwh, battery_charge_kwh, battery_discharge_kwh,
                grid_import_kwh, grid_export_kwh,
                avg_solar_w, avg_load_w, avg_battery_w, avg_grid_w,
                sample_count
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (entity_id, date, hour) DO UPDATE SET
                solar_kwh = EXCLUDED.solar_kwh,
                load_kwh = EXCLUDED.load_kwh,
                battery_charge_kwh = EXCLUDED.battery_charge_kwh,
                battery_discharge_kwh = EXCLUDED.battery_discharge_kwh,
                grid_import_kwh = EXCLUDED.grid_import_kwh,
                grid_export_kwh = EXCLUDED.grid_export_kwh,
                avg_solar_w = EXCLUDED.avg_solar_w,
                avg_load_w = EXCLUDED.avg_load_w,
                avg_battery_w = EXCLUDED.avg_battery_w,
                avg_grid_w = EXCLUDED.avg_grid_w,
                sample_count = EXCLUDED.sample_count
            "#,
        )
        .bind(&record.entity_id)
        .bind(record.date)
        .bind(i32::try_from(record.hour)?)
        .bind(record.solar_kwh)
        .bind(record.load_kwh)
        .bind(record.battery_charge_kwh)
        .bind(record.battery_discharge_kwh)
        .bind(record.grid_import_kwh)
        .bind(record.grid_export_kwh)
        .bind(record.avg_solar_w)
        .bind(record.avg_load_w)
        .bind(record.avg_battery_w)
        .bind(record.avg_grid_w)
        .bind(i32::try_from(record.sample_count)?)
        .execute(&self.pool)
        .await
        .context("Failed to upsert hourly energy")?;
        Ok(())
    }

    async fn hourly_range(
        &self,
        entity_ids: &[String],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<HourlyEnergyRecord>> {
        let rows: Vec<HourlyRow> = sqlx::query_as(
            r#"
            SELECT entity_id, date, hour,
                   solar_kwh, load_kwh, battery_charge_kwh, battery_discharge_kwh,
                   grid_import_kwh, grid_export_kwh,
                   avg_solar_w, avg_load_w, avg_battery_w, avg_grid_w,
                   sample_count
            FROM hourly_energy
            WHERE entity_id = ANY($1) AND date >= $2 AND date < $3
            ORDER BY date ASC, hour ASC, entity_id ASC
            "#,
        )
        .bind(entity_ids)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch hourly energy")?;

        Ok(rows.into_iter().map(HourlyEnergyRecord::from).collect())
    }
}

#[async_trait]
impl BillingStore for PgRepo {
    async fn snapshot(&self, home_id: &str, date: NaiveDate) -> Result<Option<DailySnapshot>> {
        let row: Option<SnapshotRow> =
            sqlx::query_as("SELECT payload FROM billing_daily WHERE home_id = $1 AND date = $2")
                .bind(home_id)
                .bind(date)
                .fetch_optional(&self.pool)
                .await
                .context("Failed to fetch daily snapshot")?;
        Ok(row.map(|r| r.payload.0))
    }

    async fn snapshots_for_month(
        &self,
        home_id: &str,
        billing_month: &str,
    ) -> Result<Vec<DailySnapshot>> {
        let rows: Vec<SnapshotRow> = sqlx::query_as(
            r#"
            SELECT payload FROM billing_daily
            WHERE home_id = $1 AND billing_month_id = $2
            ORDER BY date ASC
            "#,
        )
        .bind(home_id)
        .bind(billing_month)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch month snapshots")?;
        Ok(rows.into_iter().map(|r| r.payload.0).collect())
    }

    async fn bill(&self, home_id: &str, billing_month: &str) -> Result<Option<BillingMonthBill>> {
        let row: Option<BillRow> = sqlx::query_as("SELECT payload FROM billing_months WHERE id = $1")
            .bind(BillingMonthBill::bill_id(home_id, billing_month))
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch billing month")?;
        Ok(row.map(|r| r.payload.0))
    }

    async fn bills_for_year(&self, home_id: &str, year: i32) -> Result<Vec<BillingMonthBill>> {
        let rows: Vec<BillRow> = sqlx::query_as(
            r#"
            SELECT payload FROM billing_months
            WHERE home_id = $1 AND year = $2
            ORDER BY month_number ASC
            "#,
        )
        .bind(home_id)
        .bind(year)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch billing months")?;
        Ok(rows.into_iter().map(|r| r.payload.0).collect())
    }

    async fn persist_run(
        &self,
        snapshot: &DailySnapshot,
        bill: Option<BillingMonthBill>,
        replace_bill: bool,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.context("Failed to start transaction")?;

        sqlx::query(
            r#"
            INSERT INTO billing_daily (
                home_id, date, billing_month_id,
                bill_raw_rs_to_date, bill_final_rs_to_date, surplus_deficit_flag, payload
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (home_id, date) DO UPDATE SET
                billing_month_id = EXCLUDED.billing_month_id,
                bill_raw_rs_to_date = EXCLUDED.bill_raw_rs_to_date,
                bill_final_rs_to_date = EXCLUDED.bill_final_rs_to_date,
                surplus_deficit_flag = EXCLUDED.surplus_deficit_flag,
                payload = EXCLUDED.payload
            "#,
        )
        .bind(&snapshot.home_id)
        .bind(snapshot.date)
        .bind(&snapshot.billing_month_id)
        .bind(snapshot.bill_raw_rs_to_date)
        .bind(snapshot.bill_final_rs_to_date)
        .bind(snapshot.surplus_deficit_flag.to_string())
        .bind(Json(snapshot))
        .execute(&mut *tx)
        .await
        .context("Failed to upsert daily snapshot")?;

        if let Some(bill) = bill {
            let conflict = if replace_bill {
                r#"ON CONFLICT (id) DO UPDATE SET
                    final_bill = EXCLUDED.final_bill,
                    config_hash = EXCLUDED.config_hash,
                    payload = EXCLUDED.payload"#
            } else {
                "ON CONFLICT (id) DO NOTHING"
            };
            let sql = format!(
                r#"
                INSERT INTO billing_months (
                    id, home_id, billing_month, year, month_number, final_bill, config_hash, payload
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                {conflict}
                "#
            );
            sqlx::query(&sql)
                .bind(&bill.id)
                .bind(&bill.home_id)
                .bind(&bill.billing_month)
                .bind(bill.year)
                .bind(i32::try_from(bill.month_number)?)
                .bind(bill.charges.final_bill)
                .bind(&bill.config_hash)
                .bind(Json(&bill))
                .execute(&mut *tx)
                .await
                .context("Failed to write finalized billing month")?;
        }

        tx.commit().await.context("Failed to commit billing run")?;
        debug!(home_id = %snapshot.home_id, date = %snapshot.date, "persisted billing run");
        Ok(())
    }
}
