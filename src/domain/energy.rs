use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::HourKey;

/// Energy moved during one local hour for one accounting entity.
///
/// Exactly one record exists per `(entity_id, date, hour)`; recomputation
/// overwrites it. `sample_count == 0` means no telemetry was seen, which is
/// not the same as a measured zero flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyEnergyRecord {
    pub entity_id: String,
    pub date: NaiveDate,
    pub hour: u32,

    // Energy per flow (kWh)
    pub solar_kwh: f64,
    pub load_kwh: f64,
    pub battery_charge_kwh: f64,
    pub battery_discharge_kwh: f64,
    pub grid_import_kwh: f64,
    pub grid_export_kwh: f64,

    // Mean of raw readings, diagnostics only (W)
    pub avg_solar_w: f64,
    pub avg_load_w: f64,
    pub avg_battery_w: f64,
    pub avg_grid_w: f64,

    pub sample_count: u32,
}

impl HourlyEnergyRecord {
    /// The "no data" record for an hour
    pub fn empty(entity_id: impl Into<String>, key: HourKey) -> Self {
        Self {
            entity_id: entity_id.into(),
            date: key.date,
            hour: key.hour,
            solar_kwh: 0.0,
            load_kwh: 0.0,
            battery_charge_kwh: 0.0,
            battery_discharge_kwh: 0.0,
            grid_import_kwh: 0.0,
            grid_export_kwh: 0.0,
            avg_solar_w: 0.0,
            avg_load_w: 0.0,
            avg_battery_w: 0.0,
            avg_grid_w: 0.0,
            sample_count: 0,
        }
    }

    pub fn key(&self) -> HourKey {
        HourKey::new(self.date, self.hour)
    }

    pub fn has_data(&self) -> bool {
        self.sample_count > 0
    }

    /// Adds another entity's bucket for the same hour into this one.
    ///
    /// Averages are summed too: the union of two devices draws the sum of
    /// their mean powers.
    pub fn accumulate(&mut self, other: &HourlyEnergyRecord) {
        self.solar_kwh += other.solar_kwh;
        self.load_kwh += other.load_kwh;
        self.battery_charge_kwh += other.battery_charge_kwh;
        self.battery_discharge_kwh += other.battery_discharge_kwh;
        self.grid_import_kwh += other.grid_import_kwh;
        self.grid_export_kwh += other.grid_export_kwh;
        self.avg_solar_w += other.avg_solar_w;
        self.avg_load_w += other.avg_load_w;
        self.avg_battery_w += other.avg_battery_w;
        self.avg_grid_w += other.avg_grid_w;
        self.sample_count += other.sample_count;
    }
}
