use anyhow::{Context, Result};
use chrono_tz::Tz;
use figment::{providers::{Env, Format, Toml}, Figment};
use serde::Deserialize;
use std::path::Path;

use crate::domain::{BillingConfig, HomeScope};
use crate::BillingError;

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub scheduler: SchedulerConfig,
    /// Missing tariff is allowed at load time: energy aggregation still runs,
    /// billing refuses to price.
    #[serde(default)]
    pub billing: Option<BillingConfig>,
    #[serde(default)]
    pub homes: Vec<HomeScope>,
    #[serde(default)]
    pub db: DbConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Local hour (0-23) at which the previous day is snapshotted
    pub run_hour: u32,
    #[serde(default)]
    pub run_minute: u32,
    /// IANA zone all stored dates and hours are interpreted in
    pub timezone: String,
    #[serde(default)]
    pub backfill_on_start: bool,
}

impl SchedulerConfig {
    pub fn tz(&self) -> Result<Tz, BillingError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| BillingError::UnknownTimeZone(self.timezone.clone()))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DbConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
        }
    }
}

fn default_max_connections() -> u32 {
    10
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let figment = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("NME__").split("__"));
        let cfg: Config = figment
            .extract()
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Checks everything that can be checked before the first run.
    pub fn validate(&self) -> Result<(), BillingError> {
        self.scheduler.tz()?;
        if self.scheduler.run_hour > 23 || self.scheduler.run_minute > 59 {
            return Err(BillingError::InvalidConfig(format!(
                "scheduler run time {:02}:{:02} is not a valid time of day",
                self.scheduler.run_hour, self.scheduler.run_minute
            )));
        }
        if let Some(billing) = &self.billing {
            billing.ensure_valid()?;
        }
        Ok(())
    }
}
