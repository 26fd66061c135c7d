use crate::{
    components::field::publishing::publisher::{BrokerConfig, Publish, PublishError},
    devices::{
        hardware::{
            gpio::{probe_hardware, DigitalInput, GpioError, DEFAULT_GPIO_ROOT},
            rain_sensor::{RainSensor, RainSensorConfig},
            soil_sensor::{SoilSample, SoilSensor, SoilSensorConfig},
        },
        network::weather::{FetchError, WeatherClient, WeatherClientConfig},
    },
    messages::telemetry::reading::Reading,
};
use serde::{Deserialize, Serialize};
use std::{ffi::OsStr, path::Path, time::Duration};
use strum::Display;
use thiserror::Error;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Prefix for environment variables that override the config file, i.e.
/// `TERRA__WEATHER__API_KEY`.
pub const ENV_PREFIX: &str = "TERRA";

/// Configuration for the field telemetry component. Every section can be
/// omitted and falls back to the values used on the field unit.
#[derive(Deserialize, Serialize, PartialEq, Eq, Debug, Clone)]
pub struct FusionConfig {
    /// Time between the start of consecutive cycles.
    #[serde(default = "default_cycle_period_secs")]
    pub cycle_period_secs: u64,
    /// Force hardware (`true`) or simulation (`false`). Left unset the
    /// GPIO interface is probed at startup.
    #[serde(default)]
    pub hardware: Option<bool>,
    /// Root of the sysfs gpio interface.
    #[serde(default = "default_gpio_root")]
    pub gpio_root: String,
    #[serde(default)]
    pub weather: WeatherClientConfig,
    #[serde(default)]
    pub soil: SoilSensorConfig,
    #[serde(default)]
    pub rain: RainSensorConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
}

fn default_cycle_period_secs() -> u64 {
    3
}

fn default_gpio_root() -> String {
    String::from(DEFAULT_GPIO_ROOT)
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            cycle_period_secs: default_cycle_period_secs(),
            hardware: None,
            gpio_root: default_gpio_root(),
            weather: WeatherClientConfig::default(),
            soil: SoilSensorConfig::default(),
            rain: RainSensorConfig::default(),
            broker: BrokerConfig::default(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not locate the config file {0:?}")]
    NotFound(String),
    #[error(transparent)]
    Parse(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl FusionConfig {
    /// Read the config from a yaml file, then apply any `TERRA__`
    /// environment overrides on top.
    ///
    /// * `filepath`: Path to file with configuration parameters.
    pub fn from_file<F: AsRef<OsStr>>(filepath: F) -> Result<Self, ConfigError> {
        let file = Path::new(&filepath);
        if !file.is_file() {
            return Err(ConfigError::NotFound(file.to_string_lossy().into_owned()));
        }
        let config_file = config::Config::builder()
            .add_source(config::File::new(
                &file.to_string_lossy(),
                config::FileFormat::Yaml,
            ))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let parsed = config_file.try_deserialize::<Self>()?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// Reject values the cycle cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cycle_period_secs == 0 {
            return Err(ConfigError::Invalid(String::from(
                "cycle_period_secs must be at least 1",
            )));
        }
        Ok(())
    }

    /// Cycle period as a `Duration`.
    pub fn cycle_period(&self) -> Duration {
        Duration::from_secs(self.cycle_period_secs)
    }
}

/// How the sensors are sourced for the lifetime of the process.
#[derive(Display, Copy, Clone, PartialEq, Eq, Debug)]
pub enum SensingMode {
    Hardware,
    Simulated,
}

#[derive(Error, Debug)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("hardware sensing was requested but gpio is unavailable: {0}")]
    Gpio(#[from] GpioError),
    #[error("could not build weather client: {0}")]
    Weather(#[from] FetchError),
}

#[derive(Error, Debug)]
pub enum CycleError {
    #[error(transparent)]
    Publish(#[from] PublishError),
}

/// Outcome of a single acquisition round.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// A complete reading went to the publisher.
    Published(Reading),
    /// The soil probes were judged missing; nothing was published.
    Skipped(SoilSample),
}

/// Component that fuses the weather service, rain detector and soil probes
/// into one reading per cycle.
pub struct FusionCycle<P: Publish> {
    /// Unique id of the component.
    uuid: Uuid,
    mode: SensingMode,
    period: Duration,
    weather: WeatherClient,
    soil: SoilSensor,
    rain: RainSensor,
    publisher: P,
}

impl<P: Publish> FusionCycle<P> {
    /// Assemble a cycle from already constructed parts.
    pub fn new(
        weather: WeatherClient,
        soil: SoilSensor,
        rain: RainSensor,
        publisher: P,
        period: Duration,
    ) -> Self {
        let mode = match soil {
            SoilSensor::Hardware { .. } => SensingMode::Hardware,
            SoilSensor::Simulated => SensingMode::Simulated,
        };
        Self {
            uuid: Uuid::new_v4(),
            mode,
            period,
            weather,
            soil,
            rain,
            publisher,
        }
    }

    /// Build the component from config, probing for hardware once.
    ///
    /// * `config`: component configuration.
    /// * `publisher`: sink for the readings.
    pub fn from_config(config: FusionConfig, publisher: P) -> Result<Self, StartupError> {
        config.validate()?;
        let weather = WeatherClient::new(config.weather.clone())?;
        let (soil, rain) = match Self::detect_mode(&config)? {
            Some([soil1, soil2, rain]) => (
                SoilSensor::hardware([soil1, soil2], &config.soil),
                RainSensor::Hardware(rain),
            ),
            None => (SoilSensor::Simulated, RainSensor::Simulated),
        };
        Ok(Self::new(weather, soil, rain, publisher, config.cycle_period()))
    }

    /// Claim the soil and rain pins unless simulation is forced. A failed
    /// probe drops to simulation, unless hardware was forced.
    fn detect_mode(config: &FusionConfig) -> Result<Option<[Box<dyn DigitalInput>; 3]>, GpioError> {
        if config.hardware == Some(false) {
            info!("simulation mode forced by config");
            return Ok(None);
        }
        let pins = [
            config.soil.probe_pins[0],
            config.soil.probe_pins[1],
            config.rain.pin,
        ];
        match probe_hardware(&config.gpio_root, &pins) {
            Ok(inputs) => {
                let mut inputs = inputs
                    .into_iter()
                    .map(|pin| Box::new(pin) as Box<dyn DigitalInput>);
                match (inputs.next(), inputs.next(), inputs.next()) {
                    (Some(soil1), Some(soil2), Some(rain)) => Ok(Some([soil1, soil2, rain])),
                    _ => Ok(None),
                }
            }
            Err(e) if config.hardware == Some(true) => Err(e),
            Err(e) => {
                warn!(error = %e, "gpio unavailable, running simulation mode");
                Ok(None)
            }
        }
    }

    /// Return the unique id of the component.
    pub fn get_uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn mode(&self) -> SensingMode {
        self.mode
    }

    /// Soil sensor, exposed for diagnostics.
    pub fn soil(&self) -> &SoilSensor {
        &self.soil
    }

    /// Run one acquisition round. Weather is always fetched; if the soil
    /// probes are missing the rest of the round is skipped and nothing is
    /// published.
    pub async fn tick(&mut self) -> Result<CycleOutcome, CycleError> {
        let conditions = self.weather.fetch_weather().await;

        let sample = self.soil.read();
        if sample.is_missing() {
            info!("soil probes missing, skipping publish this cycle");
            return Ok(CycleOutcome::Skipped(sample));
        }

        let rainfall_detected = self.rain.read(&self.weather).await;
        let reading = Reading::capture(&sample, conditions, rainfall_detected);
        self.publisher.publish(&reading).await?;
        Ok(CycleOutcome::Published(reading))
    }

    /// Release the sensor pins and close the publisher.
    pub async fn shutdown(&mut self) {
        self.soil.release();
        self.rain.release();
        self.publisher.close().await;
    }
}

/// Unit struct for adding controlling behaviour to the fusion cycle.
pub struct FusionCycleController;

impl FusionCycleController {
    /// Drive the cycle on a fixed period until `shutdown` is cancelled.
    /// A slow tick delays the next one rather than overlapping it, and a
    /// failed tick is logged and abandoned without stopping the loop.
    ///
    /// * `cycle`: component to drive, returned once stopped.
    /// * `shutdown`: cancelled to stop between ticks.
    pub async fn start<P: Publish>(
        mut cycle: FusionCycle<P>,
        shutdown: CancellationToken,
    ) -> FusionCycle<P> {
        let mut ticker = interval(cycle.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            uuid = %cycle.uuid,
            mode = %cycle.mode,
            period_secs = cycle.period.as_secs_f64(),
            "fusion cycle started"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if let Err(e) = cycle.tick().await {
                error!(error = %e, "cycle failed, waiting for next tick");
            }
        }

        info!(uuid = %cycle.uuid, "fusion cycle stopping");
        cycle.shutdown().await;
        cycle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        components::field::publishing::publisher::ChannelPublisher,
        devices::{
            hardware::gpio::{tests::ScriptedInput, Level},
            network::weather::tests::unreachable_client,
        },
        test_file_path,
    };
    use serial_test::serial;
    use std::fs::OpenOptions;
    use tokio::sync::mpsc;

    fn hardware_cycle(
        soil1: &[u8],
        soil2: &[u8],
        rain: &[u8],
    ) -> (FusionCycle<ChannelPublisher>, mpsc::Receiver<Reading>) {
        let (publisher, receiver) = ChannelPublisher::new(16);
        let soil = SoilSensor::hardware(
            [
                Box::new(ScriptedInput::levels(soil1)),
                Box::new(ScriptedInput::levels(soil2)),
            ],
            &SoilSensorConfig::default(),
        );
        let rain = RainSensor::Hardware(Box::new(ScriptedInput::levels(rain)));
        let cycle = FusionCycle::new(
            unreachable_client(),
            soil,
            rain,
            publisher,
            Duration::from_millis(20),
        );
        (cycle, receiver)
    }

    #[tokio::test]
    async fn test_one_wet_probe_publishes_smoothed_readings() {
        let (mut cycle, mut receiver) = hardware_cycle(&[0], &[1], &[0]);
        let mut moistures = Vec::new();
        for _ in 0..3 {
            match cycle.tick().await.unwrap() {
                CycleOutcome::Published(reading) => moistures.push(reading.moisture),
                CycleOutcome::Skipped(_) => panic!("unexpected skip"),
            }
        }
        assert_eq!(moistures, vec![Some(62), Some(69), Some(73)]);
        assert_eq!(
            cycle.soil().state().unwrap().consecutive_dry_reading_count,
            0
        );

        let first = receiver.recv().await.unwrap();
        assert_eq!(first.soil1, Some(0));
        assert_eq!(first.soil2, Some(1));
        assert!(first.rainfall_detected);
        assert_eq!(first.temperature, 27.0);
        assert_eq!(first.humidity, 60.0);
    }

    #[tokio::test]
    async fn test_missing_probes_skip_publish() {
        let (mut cycle, mut receiver) = hardware_cycle(&[1], &[1], &[1]);
        let mut outcomes = Vec::new();
        for _ in 0..6 {
            outcomes.push(cycle.tick().await.unwrap());
        }
        let published = outcomes
            .iter()
            .filter(|o| matches!(o, CycleOutcome::Published(_)))
            .count();
        assert_eq!(published, 4);
        assert!(matches!(
            outcomes[4],
            CycleOutcome::Skipped(SoilSample {
                moisture: None,
                raw1: Some(Level::High),
                raw2: Some(Level::High)
            })
        ));
        assert!(matches!(outcomes[5], CycleOutcome::Skipped(_)));

        drop(cycle);
        let mut received = Vec::new();
        while let Some(reading) = receiver.recv().await {
            received.push(reading.moisture);
        }
        assert_eq!(received, vec![Some(38), Some(30), Some(26), Some(23)]);
    }

    #[tokio::test]
    async fn test_simulated_cycle_publishes() {
        let (publisher, mut receiver) = ChannelPublisher::new(4);
        let mut cycle = FusionCycle::new(
            unreachable_client(),
            SoilSensor::Simulated,
            RainSensor::Simulated,
            publisher,
            Duration::from_millis(20),
        );
        assert_eq!(cycle.mode(), SensingMode::Simulated);
        cycle.tick().await.unwrap();
        let reading = receiver.recv().await.unwrap();
        assert!((30..=70).contains(&reading.moisture.unwrap()));
        assert_eq!(reading.soil1, None);
        assert_eq!(reading.soil2, None);
    }

    #[tokio::test]
    async fn test_publish_failure_is_a_cycle_error() {
        let (mut cycle, receiver) = hardware_cycle(&[0], &[0], &[1]);
        drop(receiver);
        assert!(matches!(
            cycle.tick().await,
            Err(CycleError::Publish(PublishError::Closed))
        ));
        // The filter state still advanced, the next tick runs as normal.
        assert_eq!(cycle.soil().state().unwrap().smoothed_moisture, 62);
    }

    #[tokio::test]
    async fn test_controller_keeps_running_after_failed_ticks_and_stops_on_cancel() {
        let (mut cycle, receiver) = hardware_cycle(&[0], &[0], &[1]);
        drop(receiver);
        let shutdown = CancellationToken::new();
        let stopper = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            stopper.cancel();
        });
        cycle = FusionCycleController::start(cycle, shutdown).await;
        // Several ticks ran even though every publish failed.
        assert!(cycle.soil().state().unwrap().smoothed_moisture > 62);
    }

    #[tokio::test]
    async fn test_controller_publishes_on_cadence() {
        let (cycle, mut receiver) = hardware_cycle(&[0], &[1], &[1]);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(FusionCycleController::start(cycle, shutdown.clone()));
        let first = receiver.recv().await.unwrap();
        let second = receiver.recv().await.unwrap();
        shutdown.cancel();
        handle.await.unwrap();
        assert_eq!(first.moisture, Some(62));
        assert_eq!(second.moisture, Some(69));
        assert!(!first.rainfall_detected);
    }

    #[tokio::test]
    async fn test_simulation_forced_by_config() {
        let config = FusionConfig {
            hardware: Some(false),
            ..FusionConfig::default()
        };
        let (publisher, _receiver) = ChannelPublisher::new(1);
        let cycle = FusionCycle::from_config(config, publisher).unwrap();
        assert_eq!(cycle.mode(), SensingMode::Simulated);
    }

    #[tokio::test]
    async fn test_missing_gpio_falls_back_to_simulation() {
        let config = FusionConfig {
            gpio_root: format!("/nonexistent/gpio-{}", Uuid::new_v4()),
            ..FusionConfig::default()
        };
        let (publisher, _receiver) = ChannelPublisher::new(1);
        let cycle = FusionCycle::from_config(config, publisher).unwrap();
        assert_eq!(cycle.mode(), SensingMode::Simulated);
    }

    #[tokio::test]
    async fn test_forced_hardware_without_gpio_is_an_error() {
        let config = FusionConfig {
            hardware: Some(true),
            gpio_root: format!("/nonexistent/gpio-{}", Uuid::new_v4()),
            ..FusionConfig::default()
        };
        let (publisher, _receiver) = ChannelPublisher::new(1);
        assert!(matches!(
            FusionCycle::from_config(config, publisher),
            Err(StartupError::Gpio(_))
        ));
    }

    #[test]
    #[serial]
    fn test_read_example_config() {
        let config = FusionConfig::from_file(test_file_path!("/config/field_unit.yaml")).unwrap();
        assert_eq!(config.cycle_period(), Duration::from_secs(3));
        assert_eq!(config.soil.missing_threshold, 5);
        assert_eq!(config.soil.probe_pins, [22, 23]);
        assert_eq!(config.rain.pin, 27);
        assert_eq!(config.broker.topic, "major/sensors");
        assert_eq!(config.hardware, None);
    }

    #[test]
    #[serial]
    fn test_environment_overrides_file() {
        std::env::set_var("TERRA__WEATHER__API_KEY", "from-env");
        std::env::set_var("TERRA__CYCLE_PERIOD_SECS", "5");
        let config = FusionConfig::from_file(test_file_path!("/config/field_unit.yaml"));
        std::env::remove_var("TERRA__WEATHER__API_KEY");
        std::env::remove_var("TERRA__CYCLE_PERIOD_SECS");

        let config = config.unwrap();
        assert_eq!(config.weather.api_key, "from-env");
        assert_eq!(config.cycle_period_secs, 5);
    }

    #[test]
    #[serial]
    fn test_zero_period_from_environment_is_rejected() {
        std::env::set_var("TERRA__CYCLE_PERIOD_SECS", "0");
        let config = FusionConfig::from_file(test_file_path!("/config/field_unit.yaml"));
        std::env::remove_var("TERRA__CYCLE_PERIOD_SECS");
        assert!(matches!(config, Err(ConfigError::Invalid(_))));
    }

    #[tokio::test]
    async fn test_zero_period_is_a_startup_error() {
        let config = FusionConfig {
            cycle_period_secs: 0,
            hardware: Some(false),
            ..FusionConfig::default()
        };
        let (publisher, _receiver) = ChannelPublisher::new(1);
        assert!(matches!(
            FusionCycle::from_config(config, publisher),
            Err(StartupError::Config(ConfigError::Invalid(_)))
        ));
    }

    #[test]
    fn test_sensing_mode_display() {
        assert_eq!(SensingMode::Hardware.to_string(), "Hardware");
        assert_eq!(SensingMode::Simulated.to_string(), "Simulated");
    }

    #[test]
    fn test_missing_config_file() {
        assert!(matches!(
            FusionConfig::from_file("./config/does_not_exist.yaml"),
            Err(ConfigError::NotFound(_))
        ));
    }

    #[test]
    #[serial]
    fn test_read_write_config_to_file() {
        let write_config = FusionConfig {
            hardware: Some(false),
            cycle_period_secs: 10,
            ..FusionConfig::default()
        };
        let path = format!(
            "{}/config/components/field/sensing/fusion_simulated.yaml",
            env!("CARGO_MANIFEST_DIR")
        );
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(Path::new(&path))
            .expect("Failed to open file");
        serde_yaml::to_writer(file, &write_config).expect("Failed to write yaml");

        let read_config = FusionConfig::from_file(&path).unwrap();
        assert_eq!(write_config, read_config, "Failed to read write config");
    }
}
