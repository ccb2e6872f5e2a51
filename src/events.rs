//! Events delivered to the engine.
//!
//! Time and display sources push [`EngineEvent`]s into a channel; the host
//! drains it in order and hands each event to the engine, which processes it
//! to completion before the next one.

use chrono::{DateTime, NaiveDate};
use chrono_tz::Tz;
use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};

/// Display power state. Only on/off matters for write gating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayState {
    On,
    Off,
}

impl DisplayState {
    pub fn is_on(&self) -> bool {
        matches!(self, DisplayState::On)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "on" | "1" | "true" => Some(DisplayState::On),
            "off" | "0" | "false" => Some(DisplayState::Off),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DisplayState::On => "on",
            DisplayState::Off => "off",
        }
    }
}

impl std::fmt::Display for DisplayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event dispatched to the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// A wall-clock minute boundary in the configured timezone
    MinuteTick(DateTime<Tz>),
    /// Local midnight; carries the new date
    DayChanged(NaiveDate),
    /// The display was switched on or off
    DisplayChanged(DisplayState),
    /// The host is stopping
    Shutdown,
}

/// Errors starting an event source.
#[derive(Debug)]
pub enum SourceError {
    AlreadySubscribed,
    Spawn(String),
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::AlreadySubscribed => write!(f, "Event source is already subscribed"),
            SourceError::Spawn(e) => write!(f, "Failed to start event source: {e}"),
        }
    }
}

impl std::error::Error for SourceError {}

/// A producer of engine events with explicit subscription lifetime.
pub trait EventSource {
    /// Start delivering events into `sink`.
    fn subscribe(&mut self, sink: Sender<EngineEvent>) -> Result<(), SourceError>;

    /// Stop delivering events. Idempotent.
    fn unsubscribe(&mut self);

    /// Whether events are currently being delivered.
    fn is_subscribed(&self) -> bool;
}
