/**
The terra field unit gathers soil, rain and weather telemetry and publishes one
fused reading per cycle for the irrigation and rainfall models downstream. The
layout follows a component pattern: devices are atomic sensors or services,
components group devices into a unit that does one job for the system, and
messages define what crosses the process boundary.
*/

/// Components in the system are created by grouping together
/// devices into a logical unit that performs some function
/// for the overall field unit.
pub mod components;
/// Devices that are an atomic unit, and can be composed
/// with other devices into components to perform some function.
pub mod devices;
/// Message structure for communication out of the field
/// unit, to the message bus and the prediction service.
pub mod messages;
/// Logging set up and test utilities.
pub mod utils;
