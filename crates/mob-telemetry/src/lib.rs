//! Telemetry infrastructure for mob services.
//!
//! A single place to initialize the `tracing` subscriber the same way in
//! every binary and integration test, so log shape never drifts between
//! the supervisor, the runner, and test harnesses.

pub mod logging;
