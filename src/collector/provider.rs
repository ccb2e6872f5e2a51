//! Sensor providers.
//!
//! The engine reads everything through [`SensorProvider`]. Two implementations
//! ship with the crate: [`ScriptedProvider`], whose readings are set in memory,
//! and [`FileSensorProvider`], which re-reads a JSON file on every call so an
//! external bridge process can feed readings in.

use crate::collector::types::{Metric, Nap, SleepInfo, SleepStage};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;

/// Errors returned by a sensor provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SensorError {
    /// The metric returned nothing
    Unavailable(Metric),
    /// The sleep sensor has no session data
    NoSleepData,
    /// The backing source could not be read
    Source(String),
}

impl std::fmt::Display for SensorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorError::Unavailable(metric) => write!(f, "Sensor unavailable: {metric}"),
            SensorError::NoSleepData => write!(f, "No sleep data available"),
            SensorError::Source(e) => write!(f, "Sensor source error: {e}"),
        }
    }
}

impl std::error::Error for SensorError {}

/// Read access to the device sensors.
///
/// Implementations may return stale or missing data; callers substitute
/// defaults rather than failing.
pub trait SensorProvider {
    /// Current value of a metric.
    fn current(&self, metric: Metric) -> Result<f64, SensorError>;

    /// Summary of the most recent sleep session.
    fn sleep_info(&self) -> Result<SleepInfo, SensorError>;

    /// Stage breakdown of the most recent sleep session.
    fn sleep_stages(&self) -> Result<Vec<SleepStage>, SensorError>;

    /// Naps recorded today.
    fn sleep_naps(&self) -> Result<Vec<Nap>, SensorError>;
}

/// A full set of readings. Absent fields mean "sensor unavailable".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorReadings {
    pub steps: Option<f64>,
    pub heart_rate: Option<f64>,
    pub light: Option<f64>,
    pub resting_heart_rate: Option<f64>,
    pub sleep: Option<SleepInfo>,
    #[serde(default)]
    pub stages: Vec<SleepStage>,
    #[serde(default)]
    pub naps: Vec<Nap>,
}

impl SensorReadings {
    fn metric(&self, metric: Metric) -> Result<f64, SensorError> {
        let value = match metric {
            Metric::Steps => self.steps,
            Metric::HeartRate => self.heart_rate,
            Metric::Light => self.light,
            Metric::RestingHeartRate => self.resting_heart_rate,
        };
        value
            .filter(|v| v.is_finite())
            .ok_or(SensorError::Unavailable(metric))
    }

    fn sleep_info(&self) -> Result<SleepInfo, SensorError> {
        self.sleep.ok_or(SensorError::NoSleepData)
    }
}

/// In-memory provider whose readings are set by the caller.
///
/// Cloning shares the underlying readings, so a test can keep a handle while
/// the engine owns another.
#[derive(Debug, Clone, Default)]
pub struct ScriptedProvider {
    readings: Rc<RefCell<SensorReadings>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn readings(&self) -> Ref<'_, SensorReadings> {
        self.readings.borrow()
    }

    fn readings_mut(&self) -> RefMut<'_, SensorReadings> {
        self.readings.borrow_mut()
    }

    /// Set (or clear, with `None`) the value of a metric.
    pub fn set(&self, metric: Metric, value: Option<f64>) {
        let mut readings = self.readings_mut();
        match metric {
            Metric::Steps => readings.steps = value,
            Metric::HeartRate => readings.heart_rate = value,
            Metric::Light => readings.light = value,
            Metric::RestingHeartRate => readings.resting_heart_rate = value,
        }
    }

    /// Replace the sleep session reported by the sensor.
    pub fn set_sleep(&self, info: Option<SleepInfo>, stages: Vec<SleepStage>, naps: Vec<Nap>) {
        let mut readings = self.readings_mut();
        readings.sleep = info;
        readings.stages = stages;
        readings.naps = naps;
    }

    /// Replace every reading at once.
    pub fn replace(&self, readings: SensorReadings) {
        *self.readings_mut() = readings;
    }
}

impl SensorProvider for ScriptedProvider {
    fn current(&self, metric: Metric) -> Result<f64, SensorError> {
        self.readings().metric(metric)
    }

    fn sleep_info(&self) -> Result<SleepInfo, SensorError> {
        self.readings().sleep_info()
    }

    fn sleep_stages(&self) -> Result<Vec<SleepStage>, SensorError> {
        Ok(self.readings().stages.clone())
    }

    fn sleep_naps(&self) -> Result<Vec<Nap>, SensorError> {
        Ok(self.readings().naps.clone())
    }
}

/// Provider backed by a JSON file holding [`SensorReadings`].
///
/// The file is re-read on every call. A missing or malformed file reads as
/// "everything unavailable".
#[derive(Debug, Clone)]
pub struct FileSensorProvider {
    path: PathBuf,
}

impl FileSensorProvider {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn read(&self) -> Result<SensorReadings, SensorError> {
        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| SensorError::Source(format!("{:?}: {e}", self.path)))?;
        serde_json::from_str(&content)
            .map_err(|e| SensorError::Source(format!("{:?}: {e}", self.path)))
    }
}

impl SensorProvider for FileSensorProvider {
    fn current(&self, metric: Metric) -> Result<f64, SensorError> {
        self.read()?.metric(metric)
    }

    fn sleep_info(&self) -> Result<SleepInfo, SensorError> {
        self.read()?.sleep_info()
    }

    fn sleep_stages(&self) -> Result<Vec<SleepStage>, SensorError> {
        Ok(self.read()?.stages)
    }

    fn sleep_naps(&self) -> Result<Vec<Nap>, SensorError> {
        Ok(self.read()?.naps)
    }
}
