use crate::messages::telemetry::reading::Reading;
use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Request accepted by the prediction service: a flat map of feature
/// names to values.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
#[serde(transparent)]
pub struct PredictionRequest {
    pub features: BTreeMap<String, f64>,
}

impl PredictionRequest {
    /// Features derived from a published reading. Pressure is not sensed by
    /// the field unit, so it is left for the caller to add.
    ///
    /// * `reading`: a reading that carries moisture.
    pub fn from_reading(reading: &Reading) -> Self {
        let mut features = BTreeMap::new();
        if let Some(moisture) = reading.moisture {
            features.insert(String::from("soil_moisture"), f64::from(moisture));
        }
        features.insert(
            String::from("rainfall_detected"),
            f64::from(u8::from(reading.rainfall_detected)),
        );
        features.insert(String::from("temperature"), reading.temperature);
        features.insert(String::from("humidity"), reading.humidity);
        Self { features }
    }

    /// Add a feature, replacing any previous value.
    pub fn with_feature(mut self, name: &str, value: f64) -> Self {
        self.features.insert(name.to_string(), value);
        self
    }

    /// Fill `hour` and `month` from `now` when the caller has not set them.
    pub fn with_time_defaults(mut self, now: DateTime<Utc>) -> Self {
        self.features
            .entry(String::from("hour"))
            .or_insert(f64::from(now.hour()));
        self.features
            .entry(String::from("month"))
            .or_insert(f64::from(now.month()));
        self
    }
}

/// Response returned by the prediction service.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct PredictionResponse {
    pub will_rain: bool,
    pub irrigate: bool,
    /// ISO 8601 time the prediction was made.
    pub timestamp: String,
}
