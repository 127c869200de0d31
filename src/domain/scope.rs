use serde::{Deserialize, Serialize};

/// A billed home and the telemetry entities attached to it.
///
/// Meter entities are preferred for billing; inverter entities back them up
/// hour by hour when meter data is missing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HomeScope {
    pub home_id: String,
    #[serde(default)]
    pub inverter_ids: Vec<String>,
    #[serde(default)]
    pub meter_ids: Vec<String>,
}

impl HomeScope {
    pub fn new(home_id: impl Into<String>) -> Self {
        Self {
            home_id: home_id.into(),
            inverter_ids: Vec::new(),
            meter_ids: Vec::new(),
        }
    }

    pub fn with_inverters<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inverter_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_meters<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.meter_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn has_meters(&self) -> bool {
        !self.meter_ids.is_empty()
    }

    /// Every entity whose hourly energy feeds this home, meters first
    pub fn all_entities(&self) -> impl Iterator<Item = &String> {
        self.meter_ids.iter().chain(self.inverter_ids.iter())
    }
}
