/// Tracing subscriber set up for the system binaries.
pub mod logging;
/// Helpers for locating test fixtures.
pub mod tests;
