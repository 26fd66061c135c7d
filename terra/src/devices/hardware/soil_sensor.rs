use crate::devices::hardware::gpio::{DigitalInput, Level};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Moisture the estimate is pulled towards while either probe has contact.
pub const WET_TARGET: u8 = 80;
/// Moisture the estimate is pulled towards while both probes read dry.
pub const DRY_TARGET: u8 = 20;
/// Fraction of the remaining distance to the target covered each cycle.
pub const SMOOTHING_FACTOR: f64 = 0.4;
/// Neutral starting point for the smoothed estimate.
pub const INITIAL_MOISTURE: u8 = 50;
/// Range reported by the simulated sensor pair.
const SIMULATED_RANGE: std::ops::RangeInclusive<u8> = 30..=70;

/// Soil probe pair configuration.
#[derive(Deserialize, Serialize, PartialEq, Eq, Debug, Clone)]
pub struct SoilSensorConfig {
    /// BCM pins of the two redundant probes.
    #[serde(default = "default_probe_pins")]
    pub probe_pins: [u32; 2],
    /// Consecutive both-dry cycles before the pair is treated as missing.
    /// At a 3 second cycle the default is about 15 seconds.
    #[serde(default = "default_missing_threshold")]
    pub missing_threshold: u32,
}

fn default_probe_pins() -> [u32; 2] {
    [22, 23]
}

fn default_missing_threshold() -> u32 {
    5
}

impl Default for SoilSensorConfig {
    fn default() -> Self {
        Self {
            probe_pins: default_probe_pins(),
            missing_threshold: default_missing_threshold(),
        }
    }
}

/// Filter state carried between cycles for the hardware probe pair.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct SmoothingState {
    /// Exponentially smoothed moisture estimate, always within [0, 100].
    pub smoothed_moisture: u8,
    /// Consecutive cycles where both probes read dry / no contact.
    pub consecutive_dry_reading_count: u32,
}

impl Default for SmoothingState {
    fn default() -> Self {
        Self {
            smoothed_moisture: INITIAL_MOISTURE,
            consecutive_dry_reading_count: 0,
        }
    }
}

impl SmoothingState {
    /// Move the estimate a fixed fraction of the way towards `target`,
    /// truncating to a whole percentage.
    fn smooth_towards(&mut self, target: u8) {
        let current = f64::from(self.smoothed_moisture);
        let next = current + (f64::from(target) - current) * SMOOTHING_FACTOR;
        self.smoothed_moisture = next.trunc().clamp(0.0, 100.0) as u8;
    }
}

/// Result of one soil read.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct SoilSample {
    /// Smoothed moisture, `None` when the probe pair is judged missing.
    pub moisture: Option<u8>,
    /// Raw level of the first probe, hardware mode only.
    pub raw1: Option<Level>,
    /// Raw level of the second probe, hardware mode only.
    pub raw2: Option<Level>,
}

impl SoilSample {
    /// True when the probes are judged missing and the cycle should not publish.
    pub fn is_missing(&self) -> bool {
        self.moisture.is_none()
    }
}

/// Two redundant digital moisture probes, or a simulated stand-in when
/// no GPIO is available.
pub enum SoilSensor {
    Hardware {
        probes: [Box<dyn DigitalInput>; 2],
        state: SmoothingState,
        missing_threshold: u32,
    },
    Simulated,
}

impl SoilSensor {
    /// Hardware sensor with fresh smoothing state.
    ///
    /// * `probes`: the two probe inputs.
    /// * `config`: threshold for absence detection.
    pub fn hardware(probes: [Box<dyn DigitalInput>; 2], config: &SoilSensorConfig) -> Self {
        SoilSensor::Hardware {
            probes,
            state: SmoothingState::default(),
            missing_threshold: config.missing_threshold,
        }
    }

    /// Current filter state, `None` in simulation.
    pub fn state(&self) -> Option<SmoothingState> {
        match self {
            SoilSensor::Hardware { state, .. } => Some(*state),
            SoilSensor::Simulated => None,
        }
    }

    /// Take one reading from the probe pair.
    pub fn read(&mut self) -> SoilSample {
        match self {
            SoilSensor::Hardware {
                probes,
                state,
                missing_threshold,
            } => {
                let [first, second] = probes;
                let raw1 = read_probe(&mut **first);
                let raw2 = read_probe(&mut **second);
                debug!(raw1 = raw1.as_u8(), raw2 = raw2.as_u8(), "soil probes read");
                let moisture = update_state(state, *missing_threshold, raw1, raw2);
                SoilSample {
                    moisture,
                    raw1: Some(raw1),
                    raw2: Some(raw2),
                }
            }
            SoilSensor::Simulated => SoilSample {
                moisture: Some(rand::thread_rng().gen_range(SIMULATED_RANGE)),
                raw1: None,
                raw2: None,
            },
        }
    }

    /// Give the probe pins back to the system.
    pub fn release(&mut self) {
        if let SoilSensor::Hardware { probes, .. } = self {
            for probe in probes.iter_mut() {
                probe.release();
            }
        }
    }
}

/// A probe that cannot be read is counted as having no contact, which
/// feeds the absence detection rather than failing the cycle.
fn read_probe(probe: &mut dyn DigitalInput) -> Level {
    probe.read_level().unwrap_or_else(|e| {
        warn!(error = %e, "soil probe read failed, treating as no contact");
        Level::High
    })
}

/// Advance the absence counter and the filter for one pair of raw levels.
/// Returns `None` once the pair has read dry for `missing_threshold`
/// consecutive cycles; the filter is left untouched in that case.
fn update_state(
    state: &mut SmoothingState,
    missing_threshold: u32,
    raw1: Level,
    raw2: Level,
) -> Option<u8> {
    if raw1 == Level::High && raw2 == Level::High {
        state.consecutive_dry_reading_count += 1;
    } else {
        state.consecutive_dry_reading_count = 0;
    }

    if state.consecutive_dry_reading_count >= missing_threshold {
        if state.consecutive_dry_reading_count == missing_threshold {
            info!(
                cycles = missing_threshold,
                "both soil probes dry or disconnected, suppressing moisture"
            );
        }
        return None;
    }

    let target = if raw1 == Level::Low || raw2 == Level::Low {
        WET_TARGET
    } else {
        DRY_TARGET
    };
    state.smooth_towards(target);
    Some(state.smoothed_moisture)
}
