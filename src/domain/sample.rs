use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One raw telemetry reading for an accounting entity.
///
/// Sign conventions follow the power-flow model: battery power is positive
/// while charging, grid power is positive while importing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerSample {
    pub timestamp: DateTime<Utc>,
    pub solar_w: Option<f64>,
    pub load_w: Option<f64>,
    pub battery_voltage_v: Option<f64>,
    pub battery_current_a: Option<f64>,
    pub grid_w: Option<f64>,
}

impl PowerSample {
    pub fn at(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            solar_w: None,
            load_w: None,
            battery_voltage_v: None,
            battery_current_a: None,
            grid_w: None,
        }
    }

    pub fn with_solar(mut self, watts: f64) -> Self {
        self.solar_w = Some(watts);
        self
    }

    pub fn with_load(mut self, watts: f64) -> Self {
        self.load_w = Some(watts);
        self
    }

    pub fn with_grid(mut self, watts: f64) -> Self {
        self.grid_w = Some(watts);
        self
    }

    pub fn with_battery(mut self, voltage_v: f64, current_a: f64) -> Self {
        self.battery_voltage_v = Some(voltage_v);
        self.battery_current_a = Some(current_a);
        self
    }

    /// Battery power derived as voltage x current
    pub fn battery_w(&self) -> Option<f64> {
        match (self.battery_voltage_v, self.battery_current_a) {
            (Some(v), Some(i)) => Some(v * i),
            _ => None,
        }
    }
}
