//! Reduction of a sample window into one summary record.
//!
//! A window is consumed exactly once: the caller takes it from the collector
//! and hands it here, so no sample is ever counted twice.

use crate::collector::provider::SensorProvider;
use crate::collector::sampler::SampleWindow;
use crate::collector::types::Metric;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use tracing::warn;

/// Heart rate used when a window holds no heart rate samples.
pub const DEFAULT_HEART_RATE: u32 = 80;

/// Periodic summary of one aggregation window. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateRecord {
    /// When the window closed (Unix milliseconds on disk)
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub ts: DateTime<Utc>,
    /// Steps taken during the window
    pub step_count: u64,
    /// Rounded mean heart rate (bpm)
    pub heart_rate: u32,
    /// Rounded mean ambient light (lux)
    pub light: u32,
    /// Resting heart rate, 0 when the sensor had none
    pub resting_hr: u32,
}

/// An aggregate record plus the conditions met while producing it.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    pub record: AggregateRecord,
    /// Fewer than two step samples were available
    pub insufficient_steps: bool,
    /// Heart rate fell back to the configured default
    pub heart_rate_fallback: bool,
    /// Resting heart rate was unavailable
    pub resting_fallback: bool,
}

impl Aggregation {
    /// Number of defaulted fields in this record.
    pub fn fallback_count(&self) -> u64 {
        [
            self.insufficient_steps,
            self.heart_rate_fallback,
            self.resting_fallback,
        ]
        .iter()
        .filter(|&&f| f)
        .count() as u64
    }
}

/// Reduces sample windows into [`AggregateRecord`]s.
#[derive(Debug, Clone)]
pub struct Aggregator {
    default_heart_rate: u32,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new(DEFAULT_HEART_RATE)
    }
}

impl Aggregator {
    pub fn new(default_heart_rate: u32) -> Self {
        Self { default_heart_rate }
    }

    /// Aggregate a window, reading resting heart rate from the provider.
    pub fn aggregate(
        &self,
        window: &SampleWindow,
        provider: &dyn SensorProvider,
        ts: DateTime<Utc>,
    ) -> Aggregation {
        let resting = provider.current(Metric::RestingHeartRate).ok();
        self.aggregate_with_resting(window, resting, ts)
    }

    /// Aggregate a window with an already-read resting heart rate.
    pub fn aggregate_with_resting(
        &self,
        window: &SampleWindow,
        resting: Option<f64>,
        ts: DateTime<Utc>,
    ) -> Aggregation {
        let (step_count, insufficient_steps) = match step_delta(&window.steps) {
            Some(delta) => (delta, false),
            None => {
                warn!(
                    samples = window.steps.len(),
                    "not enough step samples in window, recording 0"
                );
                (0, true)
            }
        };

        let (heart_rate, heart_rate_fallback) = match rounded_mean(&window.heart_rate) {
            Some(hr) => (hr, false),
            None => (self.default_heart_rate, true),
        };

        let light = rounded_mean(&window.light).unwrap_or(0);

        let resting_hr = resting.map(round_to_u32).unwrap_or(0);

        Aggregation {
            record: AggregateRecord {
                ts,
                step_count,
                heart_rate,
                light,
                resting_hr,
            },
            insufficient_steps,
            heart_rate_fallback,
            resting_fallback: resting.is_none(),
        }
    }
}

/// Steps taken across a cumulative counter sequence.
///
/// Returns `None` when fewer than two samples exist. A counter that went
/// backwards (daily reset) yields 0.
pub fn step_delta(steps: &[f64]) -> Option<u64> {
    if steps.len() < 2 {
        return None;
    }
    let first = steps[0];
    let last = steps[steps.len() - 1];
    Some((last - first).max(0.0).round() as u64)
}

/// Rounded arithmetic mean, `None` for an empty sequence.
pub fn rounded_mean(values: &[f64]) -> Option<u32> {
    if values.is_empty() {
        return None;
    }
    Some(round_to_u32(values.iter().mean()))
}

fn round_to_u32(value: f64) -> u32 {
    if value.is_nan() {
        return 0;
    }
    value.round().clamp(0.0, u32::MAX as f64) as u32
}
