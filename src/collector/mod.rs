//! Sensor collection for the telemetry agent.
//!
//! This module provides the sensor reading types, the provider abstraction
//! the engine reads through, and the per-tick sample collector.

pub mod provider;
pub mod sampler;
pub mod types;

// Re-export commonly used types
pub use provider::{
    FileSensorProvider, ScriptedProvider, SensorError, SensorProvider, SensorReadings,
};
pub use sampler::{CollectReport, SampleCollector, SampleWindow};
pub use types::{
    awake_length, Metric, Nap, SensorSample, SleepInfo, SleepSnapshot, SleepStage, SleepStageKind,
};
