use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, warn};

/// Default location of the Linux sysfs GPIO interface on the Raspberry Pi.
pub const DEFAULT_GPIO_ROOT: &str = "/sys/class/gpio";

/// Logic level of a digital input. The field sensors all use the same
/// convention: `High` is dry / no contact, `Low` is wet / contact.
#[derive(Deserialize, Serialize, Copy, Clone, PartialEq, Eq, Debug)]
pub enum Level {
    Low,
    High,
}

impl Level {
    /// Raw value as reported by the pin, 0 or 1.
    pub fn as_u8(self) -> u8 {
        match self {
            Level::Low => 0,
            Level::High => 1,
        }
    }
}

/// Failures raised while accessing a pin.
#[derive(Error, Debug)]
pub enum GpioError {
    #[error("gpio{pin}: {source}")]
    Io {
        pin: u32,
        #[source]
        source: std::io::Error,
    },
    #[error("gpio{pin}: unexpected value {value:?}")]
    InvalidLevel { pin: u32, value: String },
}

/// A single digital input. Sensors hold these as trait objects so that the
/// hardware pins can be swapped for scripted inputs in tests.
pub trait DigitalInput: Send {
    /// Sample the current level of the input.
    fn read_level(&mut self) -> Result<Level, GpioError>;

    /// Give the input back to the system. Called once on shutdown.
    fn release(&mut self) {}
}

/// Input pin driven through the sysfs interface, i.e.
/// `/sys/class/gpio/gpio22/value`.
#[derive(Debug)]
pub struct SysfsPin {
    /// BCM pin number.
    pin: u32,
    /// Root of the sysfs gpio class.
    root: PathBuf,
    /// True if this handle exported the pin and should unexport it.
    exported: bool,
}

impl SysfsPin {
    /// Export (if needed) and configure a pin as an input.
    ///
    /// * `root`: sysfs gpio root, normally [`DEFAULT_GPIO_ROOT`].
    /// * `pin`: BCM pin number.
    pub fn open<P: AsRef<Path>>(root: P, pin: u32) -> Result<Self, GpioError> {
        let root = root.as_ref().to_path_buf();
        let pin_dir = root.join(format!("gpio{pin}"));
        let io_err = |source| GpioError::Io { pin, source };

        let exported = if pin_dir.is_dir() {
            false
        } else {
            fs::write(root.join("export"), pin.to_string()).map_err(io_err)?;
            true
        };
        fs::write(pin_dir.join("direction"), "in").map_err(io_err)?;
        debug!(pin, exported, "gpio input configured");

        Ok(Self {
            pin,
            root,
            exported,
        })
    }

    /// BCM pin number of this input.
    pub fn pin(&self) -> u32 {
        self.pin
    }

    fn value_path(&self) -> PathBuf {
        self.root.join(format!("gpio{}", self.pin)).join("value")
    }
}

impl DigitalInput for SysfsPin {
    fn read_level(&mut self) -> Result<Level, GpioError> {
        let raw = fs::read_to_string(self.value_path()).map_err(|source| GpioError::Io {
            pin: self.pin,
            source,
        })?;
        match raw.trim() {
            "0" => Ok(Level::Low),
            "1" => Ok(Level::High),
            other => Err(GpioError::InvalidLevel {
                pin: self.pin,
                value: other.to_string(),
            }),
        }
    }

    fn release(&mut self) {
        if !self.exported {
            return;
        }
        if let Err(e) = fs::write(self.root.join("unexport"), self.pin.to_string()) {
            warn!(pin = self.pin, error = %e, "failed to unexport gpio");
        }
        self.exported = false;
    }
}

/// Try to claim every requested pin. An error means the hardware is not
/// available, and the caller should run the sensors in simulation.
///
/// * `root`: sysfs gpio root.
/// * `pins`: BCM pin numbers, returned in the same order.
pub fn probe_hardware<P: AsRef<Path>>(root: P, pins: &[u32]) -> Result<Vec<SysfsPin>, GpioError> {
    let mut opened: Vec<SysfsPin> = Vec::with_capacity(pins.len());
    for &pin in pins {
        match SysfsPin::open(root.as_ref(), pin) {
            Ok(input) => opened.push(input),
            Err(e) => {
                // Hand back anything claimed before the failure.
                for input in opened.iter_mut() {
                    input.release();
                }
                return Err(e);
            }
        }
    }
    Ok(opened)
}
