/// Standardise the messages sent out of the field unit. Provide
/// tests to ensure the payload formats are respected.
pub mod telemetry {
    /// Fused sensor reading published every cycle.
    pub mod reading;
}

/// Request and response types of the downstream prediction service.
pub mod prediction;
