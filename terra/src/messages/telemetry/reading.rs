use crate::devices::{
    hardware::soil_sensor::SoilSample, network::weather::AmbientConditions,
};
use chrono::Utc;
use serde::{Serialize, Serializer};

/// Fused reading produced once per cycle and handed to the publisher.
/// Serialises to the flat payload the downstream consumers expect.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Reading {
    /// Smoothed soil moisture in [0, 100].
    pub moisture: Option<u8>,
    /// Raw state of the first soil probe, 0 or 1, when read from hardware.
    pub soil1: Option<u8>,
    /// Raw state of the second soil probe, 0 or 1, when read from hardware.
    pub soil2: Option<u8>,
    /// Ambient temperature in °C.
    pub temperature: f64,
    /// Relative humidity in %.
    pub humidity: f64,
    /// Rain seen by the detector or reported by the weather service.
    #[serde(serialize_with = "bool_as_u8")]
    pub rainfall_detected: bool,
    /// Capture time, seconds since the unix epoch.
    pub timestamp: i64,
}

/// Downstream consumers expect `0|1` rather than a json boolean.
///
/// * `value`: flag to write.
/// * `serializer`: Serializer
pub fn bool_as_u8<S>(value: &bool, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_u8(u8::from(*value))
}

impl Reading {
    /// Assemble a reading from this cycle's sub-reads, stamped now.
    ///
    /// * `sample`: soil sensor output.
    /// * `conditions`: weather service output, possibly the fallback.
    /// * `rainfall_detected`: rain sensor output.
    pub fn capture(
        sample: &SoilSample,
        conditions: AmbientConditions,
        rainfall_detected: bool,
    ) -> Self {
        Self {
            moisture: sample.moisture,
            soil1: sample.raw1.map(|l| l.as_u8()),
            soil2: sample.raw2.map(|l| l.as_u8()),
            temperature: conditions.temperature,
            humidity: conditions.humidity,
            rainfall_detected,
            timestamp: Utc::now().timestamp(),
        }
    }

    /// Encode as the json payload published on the bus.
    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}
