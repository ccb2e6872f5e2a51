//! Per-tick sample collection.
//!
//! The collector appends one reading per metric per tick and never decides
//! windowing itself; the aggregator consumes the buffered window.

use crate::collector::provider::SensorProvider;
use crate::collector::types::{Metric, SensorSample};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Buffered samples for one aggregation window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleWindow {
    /// Cumulative step counter readings, in arrival order
    pub steps: Vec<f64>,
    /// Heart rate readings (bpm)
    pub heart_rate: Vec<f64>,
    /// Ambient light readings (lux)
    pub light: Vec<f64>,
}

impl SampleWindow {
    /// Append a sample to the sequence for its metric.
    pub fn push(&mut self, sample: SensorSample) {
        match sample.metric {
            Metric::Steps => self.steps.push(sample.value),
            Metric::HeartRate => self.heart_rate.push(sample.value),
            Metric::Light => self.light.push(sample.value),
            // Read on demand at aggregation time, never buffered.
            Metric::RestingHeartRate => {}
        }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty() && self.heart_rate.is_empty() && self.light.is_empty()
    }

    /// Total number of buffered samples.
    pub fn sample_count(&self) -> usize {
        self.steps.len() + self.heart_rate.len() + self.light.len()
    }
}

/// Result of one collection tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectReport {
    pub collected: usize,
    pub unavailable: Vec<Metric>,
}

/// Gathers raw readings once per tick.
#[derive(Debug, Default)]
pub struct SampleCollector {
    window: SampleWindow,
}

impl SampleCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read every sampled metric and append it to its sequence.
    ///
    /// Unavailable metrics are skipped; the aggregator substitutes defaults.
    pub fn collect(&mut self, provider: &dyn SensorProvider) -> CollectReport {
        let mut report = CollectReport::default();

        for metric in Metric::SAMPLED {
            match provider.current(metric) {
                Ok(value) => {
                    self.window.push(SensorSample::new(metric, value));
                    report.collected += 1;
                }
                Err(e) => {
                    debug!(%metric, error = %e, "sample skipped");
                    report.unavailable.push(metric);
                }
            }
        }

        report
    }

    /// Current buffered window.
    pub fn window(&self) -> &SampleWindow {
        &self.window
    }

    /// Take the buffered window, leaving the collector empty.
    pub fn take_window(&mut self) -> SampleWindow {
        std::mem::take(&mut self.window)
    }
}
