//! Core functionality for the telemetry agent.
//!
//! This module contains:
//! - Aggregation of sample windows into periodic records
//! - Sleep observation and the stability gate that debounces commits
//! - The minute schedule deciding which work a tick triggers

pub mod aggregate;
pub mod schedule;
pub mod sleep;

// Re-export commonly used types
pub use aggregate::{step_delta, rounded_mean, AggregateRecord, Aggregation, Aggregator};
pub use schedule::{minute_of_day, Schedule, TickTasks};
pub use sleep::{
    Baseline, GateEvent, GateState, Observation, PendingSleepRecord, SleepObserver, SleepRecord,
    StabilityGate,
};
