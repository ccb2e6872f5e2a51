//! Sensor reading types for the telemetry agent.
//!
//! Samples are ephemeral and live only until their window is consumed.
//! Sleep readings are normalized into a [`SleepSnapshot`] on every poll.

use serde::{Deserialize, Serialize};

/// A metric the collector or aggregator reads from the sensor provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Cumulative step count for the day
    Steps,
    /// Instantaneous heart rate (bpm)
    HeartRate,
    /// Instantaneous ambient light (lux)
    Light,
    /// Resting heart rate as computed by the device (bpm)
    RestingHeartRate,
}

impl Metric {
    /// Metrics sampled on every tick.
    pub const SAMPLED: [Metric; 3] = [Metric::Steps, Metric::HeartRate, Metric::Light];

    pub fn name(&self) -> &'static str {
        match self {
            Metric::Steps => "steps",
            Metric::HeartRate => "heart_rate",
            Metric::Light => "light",
            Metric::RestingHeartRate => "resting_heart_rate",
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A single reading captured on a tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorSample {
    pub metric: Metric,
    pub value: f64,
}

impl SensorSample {
    pub fn new(metric: Metric, value: f64) -> Self {
        Self { metric, value }
    }
}

/// Sleep stage classification as reported by the sleep sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SleepStageKind {
    Wake,
    Light,
    Deep,
    Rem,
}

impl SleepStageKind {
    /// The stage counted as awake time when computing sleep length.
    pub const AWAKE: SleepStageKind = SleepStageKind::Wake;
}

/// One contiguous stage inside a sleep session. Times are in minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SleepStage {
    pub model: SleepStageKind,
    pub start: i64,
    pub stop: i64,
}

impl SleepStage {
    pub fn new(model: SleepStageKind, start: i64, stop: i64) -> Self {
        Self { model, start, stop }
    }

    /// Length of the stage in minutes; inverted stages count as zero.
    pub fn length(&self) -> i64 {
        (self.stop - self.start).max(0)
    }
}

/// A nap recorded outside the main sleep session. Times are in minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nap {
    pub start: i64,
    pub stop: i64,
}

/// Session summary fields returned by the sleep sensor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SleepInfo {
    pub score: u32,
    pub start_time: i64,
    pub end_time: i64,
    pub total_time: i64,
}

/// Normalized sleep reading taken on each poll. Not persisted directly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SleepSnapshot {
    pub end_time: i64,
    /// Stop time of the most recent nap, or 0 when there is none
    pub nap_stop_time: i64,
    pub score: u32,
    pub start_time: i64,
    pub total_time: i64,
    pub stage_list: Vec<SleepStage>,
    pub nap_list: Vec<Nap>,
}

impl SleepSnapshot {
    /// Build a snapshot from the raw sensor pieces.
    pub fn from_parts(info: SleepInfo, stage_list: Vec<SleepStage>, nap_list: Vec<Nap>) -> Self {
        let nap_stop_time = nap_list.iter().map(|n| n.stop).max().unwrap_or(0);
        Self {
            end_time: info.end_time,
            nap_stop_time,
            score: info.score,
            start_time: info.start_time,
            total_time: info.total_time,
            stage_list,
            nap_list,
        }
    }
}

/// Total minutes spent in the awake stage.
pub fn awake_length(stages: &[SleepStage]) -> i64 {
    stages
        .iter()
        .filter(|s| s.model == SleepStageKind::AWAKE)
        .map(SleepStage::length)
        .sum()
}
