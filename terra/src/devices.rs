/// Devices are the atomic units that can be combined together
/// into components. Their core responsibilities do not change
/// based on location, name etc.
pub mod hardware {
    /// Digital inputs through the sysfs gpio interface.
    pub mod gpio;
    /// Digital rain detection board.
    pub mod rain_sensor;
    /// Pair of digital soil moisture probes.
    pub mod soil_sensor;
}

/// Remote services that stand in for, or supplement, hardware.
pub mod network {
    /// Current conditions from the weather service.
    pub mod weather;
}
