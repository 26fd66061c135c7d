use rand::Rng;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Conditions that count as rain when reported by the weather service.
const RAIN_CONDITIONS: [&str; 3] = ["Rain", "Drizzle", "Thunderstorm"];

/// Connection details for the remote weather service. The defaults point
/// at the OpenWeatherMap current weather endpoint.
#[derive(Deserialize, Serialize, PartialEq, Eq, Debug, Clone)]
pub struct WeatherClientConfig {
    /// Endpoint queried for current conditions.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Location string understood by the service, i.e. `Bangalore,IN`.
    #[serde(default = "default_location")]
    pub location: String,
    /// API credential. Usually supplied through the environment rather
    /// than the config file.
    #[serde(default)]
    pub api_key: String,
    /// Request timeout, the only bound placed on a fetch.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    String::from("https://api.openweathermap.org/data/2.5/weather")
}

fn default_location() -> String {
    String::from("Bangalore,IN")
}

fn default_timeout_secs() -> u64 {
    10
}

impl Default for WeatherClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            location: default_location(),
            api_key: String::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Ambient temperature (°C) and relative humidity (%).
#[derive(Serialize, Copy, Clone, PartialEq, Debug)]
pub struct AmbientConditions {
    pub temperature: f64,
    pub humidity: f64,
}

impl AmbientConditions {
    /// Reported whenever the weather service cannot be reached. Humidity is
    /// a float like the live value, so the payload carries `60.0`, not `60`.
    pub const FALLBACK: AmbientConditions = AmbientConditions {
        temperature: 27.0,
        humidity: 60.0,
    };
}

#[derive(Deserialize, Debug)]
struct MainSection {
    temp: f64,
    humidity: f64,
}

#[derive(Deserialize, Debug)]
struct ConditionSection {
    main: String,
}

/// Subset of the weather service response the pipeline relies on.
#[derive(Deserialize, Debug)]
pub struct WeatherReport {
    main: MainSection,
    #[serde(default)]
    weather: Vec<ConditionSection>,
}

impl WeatherReport {
    /// Temperature and humidity from the `main` section.
    pub fn conditions(&self) -> AmbientConditions {
        AmbientConditions {
            temperature: self.main.temp,
            humidity: self.main.humidity,
        }
    }

    /// Primary condition label, `weather[0].main`.
    pub fn condition(&self) -> Option<&str> {
        self.weather.first().map(|c| c.main.as_str())
    }

    /// True when the primary condition is a form of rain.
    pub fn is_raining(&self) -> Result<bool, FetchError> {
        self.condition()
            .map(|c| RAIN_CONDITIONS.contains(&c))
            .ok_or(FetchError::MissingCondition)
    }
}

/// Reasons a weather fetch can fail. None of these are surfaced past the
/// client's fallback policies.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("weather request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("weather service returned {0}")]
    Status(StatusCode),
    #[error("could not decode weather response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("weather response has no condition entry")]
    MissingCondition,
}

/// Best-effort client for the remote weather service. Each call is a single
/// request with no retries.
pub struct WeatherClient {
    http: reqwest::Client,
    config: WeatherClientConfig,
}

impl WeatherClient {
    /// Create a client by consuming a `WeatherClientConfig`.
    ///
    /// * `config`: service endpoint, location and credential.
    pub fn new(config: WeatherClientConfig) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { http, config })
    }

    /// Perform one request and decode the response.
    pub async fn try_fetch_report(&self) -> Result<WeatherReport, FetchError> {
        let response = self
            .http
            .get(&self.config.base_url)
            .query(&[
                ("q", self.config.location.as_str()),
                ("appid", self.config.api_key.as_str()),
                ("units", "metric"),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Current temperature and humidity, or [`AmbientConditions::FALLBACK`]
    /// when the service is unavailable.
    pub async fn fetch_weather(&self) -> AmbientConditions {
        match self.try_fetch_report().await {
            Ok(report) => {
                let conditions = report.conditions();
                debug!(?conditions, "weather fetched");
                conditions
            }
            Err(e) => {
                warn!(error = %e, "weather fetch failed, using fallback conditions");
                AmbientConditions::FALLBACK
            }
        }
    }

    /// Whether the service reports rain. When it cannot answer, a coin flip
    /// stands in as the last-resort signal.
    pub async fn fetch_rain_classification(&self) -> bool {
        match self
            .try_fetch_report()
            .await
            .and_then(|report| report.is_raining())
        {
            Ok(raining) => raining,
            Err(e) => {
                let guess = rand::thread_rng().gen_bool(0.5);
                warn!(error = %e, guess, "rain classification failed, guessing");
                guess
            }
        }
    }
}
