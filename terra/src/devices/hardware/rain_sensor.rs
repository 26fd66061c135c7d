use crate::devices::{
    hardware::gpio::{DigitalInput, Level},
    network::weather::WeatherClient,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Rain detection board configuration.
#[derive(Deserialize, Serialize, PartialEq, Eq, Debug, Clone)]
pub struct RainSensorConfig {
    /// BCM pin of the board's digital output.
    #[serde(default = "default_pin")]
    pub pin: u32,
}

fn default_pin() -> u32 {
    27
}

impl Default for RainSensorConfig {
    fn default() -> Self {
        Self { pin: default_pin() }
    }
}

/// Digital rain detector. The board output is active low: `Low` while
/// water bridges the plate, `High` when dry. Without hardware the weather
/// service's classification is used instead.
pub enum RainSensor {
    Hardware(Box<dyn DigitalInput>),
    Simulated,
}

impl RainSensor {
    /// Whether rain is currently detected.
    ///
    /// * `weather`: fallback source, used when the pin cannot be read or
    ///   there is no hardware at all.
    pub async fn read(&mut self, weather: &WeatherClient) -> bool {
        match self {
            RainSensor::Hardware(input) => match input.read_level() {
                Ok(level) => is_rain(level),
                Err(e) => {
                    warn!(error = %e, "rain sensor read failed, asking weather service");
                    weather.fetch_rain_classification().await
                }
            },
            RainSensor::Simulated => weather.fetch_rain_classification().await,
        }
    }

    /// Give the pin back to the system.
    pub fn release(&mut self) {
        if let RainSensor::Hardware(input) = self {
            input.release();
        }
    }
}

/// Active-low conversion from the board output.
fn is_rain(level: Level) -> bool {
    level == Level::Low
}
