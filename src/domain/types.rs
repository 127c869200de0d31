use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Mul, Sub};

// ============================================================================
// Physical Unit Newtypes
// ============================================================================

/// Power in Watts (W). Signed for bidirectional flows.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, PartialOrd, Default)]
pub struct Power(pub f64);

impl Power {
    pub fn watts(w: f64) -> Self {
        Self(w)
    }

    pub fn kilowatts(kw: f64) -> Self {
        Self(kw * 1000.0)
    }

    pub fn as_watts(&self) -> f64 {
        self.0
    }

    pub fn as_kilowatts(&self) -> f64 {
        self.0 / 1000.0
    }

    /// Energy delivered when this power is held for `hours`.
    pub fn over_hours(&self, hours: f64) -> Energy {
        Energy::kilowatt_hours(self.as_kilowatts() * hours)
    }
}

impl fmt::Display for Power {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.abs() >= 1000.0 {
            write!(f, "{:.2} kW", self.as_kilowatts())
        } else {
            write!(f, "{:.1} W", self.0)
        }
    }
}

/// Energy in kilowatt-hours (kWh)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, PartialOrd, Default)]
pub struct Energy(pub f64);

impl Energy {
    pub const ZERO: Energy = Energy(0.0);

    pub fn kilowatt_hours(kwh: f64) -> Self {
        Self(kwh)
    }

    pub fn watt_hours(wh: f64) -> Self {
        Self(wh / 1000.0)
    }

    pub fn as_kilowatt_hours(&self) -> f64 {
        self.0
    }

    pub fn abs(&self) -> Self {
        Self(self.0.abs())
    }
}

impl fmt::Display for Energy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3} kWh", self.0)
    }
}

impl Add for Energy {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign for Energy {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sub for Energy {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

/// Tariff rate in currency units per kWh
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, PartialOrd)]
pub struct Rate(pub f64);

impl Rate {
    pub fn per_kwh(rate: f64) -> Self {
        Self(rate)
    }

    pub fn as_per_kwh(&self) -> f64 {
        self.0
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}/kWh", self.0)
    }
}

impl Mul<Energy> for Rate {
    type Output = f64; // amount in the tariff currency
    fn mul(self, energy: Energy) -> Self::Output {
        self.0 * energy.as_kilowatt_hours()
    }
}

// ============================================================================
// Calendar keys
// ============================================================================

/// Local (date, hour) key of one hourly bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HourKey {
    pub date: NaiveDate,
    pub hour: u32,
}

impl HourKey {
    pub fn new(date: NaiveDate, hour: u32) -> Self {
        Self { date, hour }
    }

    /// Truncates a local timestamp to the hour that contains it.
    pub fn containing(ts: NaiveDateTime) -> Self {
        use chrono::Timelike;
        Self {
            date: ts.date(),
            hour: ts.hour(),
        }
    }

    pub fn start(&self) -> NaiveDateTime {
        self.date.and_time(self.time_of_day())
    }

    pub fn time_of_day(&self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hour.min(23), 0, 0).unwrap_or(NaiveTime::MIN)
    }

    /// Next hourly bucket in local wall-clock time
    pub fn next(&self) -> Self {
        if self.hour >= 23 {
            Self {
                date: self.date.succ_opt().unwrap_or(self.date),
                hour: 0,
            }
        } else {
            Self {
                date: self.date,
                hour: self.hour + 1,
            }
        }
    }
}

impl fmt::Display for HourKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:02}:00", self.date, self.hour)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_conversions() {
        let power = Power::kilowatts(5.0);
        assert_eq!(power.as_watts(), 5000.0);
        assert_eq!(power.as_kilowatts(), 5.0);
    }

    #[test]
    fn test_power_over_hours() {
        let energy = Power::watts(2000.0).over_hours(0.25);
        assert_eq!(energy.as_kilowatt_hours(), 0.5);
    }

    #[test]
    fn test_power_display() {
        assert_eq!(format!("{}", Power::watts(500.0)), "500.0 W");
        assert_eq!(format!("{}", Power::kilowatts(5.5)), "5.50 kW");
    }

    #[test]
    fn test_energy_arithmetic() {
        let mut total = Energy::kilowatt_hours(10.0);
        total += Energy::watt_hours(500.0);
        assert_eq!(total.as_kilowatt_hours(), 10.5);
        assert_eq!((total - Energy::kilowatt_hours(0.5)).as_kilowatt_hours(), 10.0);
    }

    #[test]
    fn test_rate_energy_multiplication() {
        let cost = Rate::per_kwh(20.0) * Energy::kilowatt_hours(10.0);
        assert_eq!(cost, 200.0);
    }

    #[test]
    fn test_hour_key_rollover() {
        let key = HourKey::new(NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(), 23);
        let next = key.next();
        assert_eq!(next.date, NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
        assert_eq!(next.hour, 0);
        assert_eq!(key.to_string(), "2024-12-31 23:00");
    }
}
