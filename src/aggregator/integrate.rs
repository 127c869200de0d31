use chrono::{DateTime, Utc};

use crate::domain::{Energy, HourKey, HourlyEnergyRecord, Power, PowerSample};

/// Running sums for one flow
#[derive(Debug, Default, Clone, Copy)]
struct FlowAccumulator {
    positive: Energy,
    negative: Energy,
    watts_sum: f64,
    readings: u32,
    previous: Option<DateTime<Utc>>,
}

impl FlowAccumulator {
    /// Holds `reading` over the time since this flow's previous reading; the
    /// sign picks the bucket, the magnitude goes in.
    fn add(&mut self, reading: Option<f64>, at: DateTime<Utc>) {
        let Some(watts) = reading else {
            return;
        };
        let dt_hours = self
            .previous
            .map(|prev| (at - prev).num_milliseconds() as f64 / 3_600_000.0)
            .unwrap_or(0.0);
        self.previous = Some(at);
        self.watts_sum += watts;
        self.readings += 1;

        let energy = Power::watts(watts).over_hours(dt_hours);
        if watts > 0.0 {
            self.positive += energy;
        } else if watts < 0.0 {
            self.negative += energy.abs();
        }
    }

    fn average_w(&self) -> f64 {
        if self.readings == 0 {
            0.0
        } else {
            self.watts_sum / f64::from(self.readings)
        }
    }
}

/// Left Riemann sum of one hour of samples.
///
/// Samples are sorted by timestamp first. Each flow keeps its own clock:
/// `dt` of a reading is the time since that flow's previous reading (zero for
/// its first), so a sample that omits a flow does not cut that flow's
/// interval short. Battery power is `voltage x current`; positive battery
/// power is charge, positive grid power is import.
pub fn integrate_hour(entity_id: &str, key: HourKey, samples: &[PowerSample]) -> HourlyEnergyRecord {
    let mut ordered: Vec<&PowerSample> = samples.iter().collect();
    ordered.sort_by_key(|s| s.timestamp);

    let mut solar = FlowAccumulator::default();
    let mut load = FlowAccumulator::default();
    let mut battery = FlowAccumulator::default();
    let mut grid = FlowAccumulator::default();

    for sample in &ordered {
        solar.add(sample.solar_w, sample.timestamp);
        load.add(sample.load_w, sample.timestamp);
        battery.add(sample.battery_w(), sample.timestamp);
        grid.add(sample.grid_w, sample.timestamp);
    }

    let mut record = HourlyEnergyRecord::empty(entity_id, key);
    // Solar and load are unsigned flows; a negative reading is sensor noise.
    record.solar_kwh = solar.positive.as_kilowatt_hours();
    record.load_kwh = load.positive.as_kilowatt_hours();
    record.battery_charge_kwh = battery.positive.as_kilowatt_hours();
    record.battery_discharge_kwh = battery.negative.as_kilowatt_hours();
    record.grid_import_kwh = grid.positive.as_kilowatt_hours();
    record.grid_export_kwh = grid.negative.as_kilowatt_hours();
    record.avg_solar_w = solar.average_w();
    record.avg_load_w = load.average_w();
    record.avg_battery_w = battery.average_w();
    record.avg_grid_w = grid.average_w();
    record.sample_count = u32::try_from(ordered.len()).unwrap_or(u32::MAX);
    record
}
