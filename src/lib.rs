//! Wearable Telemetry Agent - on-device sensor aggregation and sleep capture.
//!
//! This library samples wearable sensors once a minute, rolls the samples up
//! into periodic records, watches the sleep sensor until a session settles and
//! persists both streams only while the display is off.
//!
//! # Guarantees
//!
//! - **Screen-gated writes**: Nothing touches the store while the display is on
//! - **FIFO persistence**: Each stream's store only ever grows by appending, in
//!   the order records were produced
//! - **One commit per session**: A sleep session is recorded once it has been
//!   stable for a configured number of polls, and never again after a restart
//! - **One alert per record**: Each committed sleep record raises exactly one
//!   notification, after it has reached the store
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Wearable Telemetry Agent                    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐       │
//! │  │  Collector  │──▶│  Aggregate  │──▶│   Sensor    │──┐    │
//! │  │ (1 min tick)│   │ (10 min)    │   │   Writer    │  │    │
//! │  └─────────────┘   └─────────────┘   └─────────────┘  │    │
//! │         │                                             ▼    │
//! │         ▼                                       ┌─────────┐│
//! │  ┌─────────────┐   ┌─────────────┐   ┌───────┐  │  Store  ││
//! │  │   Sleep     │──▶│  Stability  │──▶│ Sleep │─▶│ (files) ││
//! │  │  Observer   │   │    Gate     │   │Writer │  └─────────┘│
//! │  └─────────────┘   └─────────────┘   └───────┘       │     │
//! │                                                      ▼     │
//! │                                              ┌────────────┐│
//! │                                              │Notification││
//! │                                              └────────────┘│
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::rc::Rc;
//! use wearable_telemetry_agent::{
//!     collector::ScriptedProvider, config::EngineConfig, events::DisplayState,
//!     notify::LogChannel, storage::MemoryStorage, Engine,
//! };
//!
//! let mut engine = Engine::new(
//!     EngineConfig::default(),
//!     ScriptedProvider::new(),
//!     Rc::new(MemoryStorage::new()),
//!     Box::new(LogChannel),
//!     DisplayState::Off,
//! );
//!
//! // Drive the engine with minute ticks from a clock source.
//! let now = chrono::Utc::now().with_timezone(&chrono_tz::Tz::UTC);
//! engine.tick(now).expect("tick");
//! ```

pub mod collector;
pub mod config;
pub mod core;
pub mod engine;
pub mod events;
pub mod notify;
pub mod service;
pub mod stats;
pub mod storage;

// Re-export key types at crate root for convenience
pub use collector::{FileSensorProvider, ScriptedProvider, SensorError, SensorProvider};
pub use config::{Config, ConfigError, EngineConfig};
pub use core::{AggregateRecord, SleepRecord};
pub use engine::{Control, Engine, EngineError};
pub use events::{DisplayState, EngineEvent, EventSource};
pub use notify::{LogChannel, Notification, NotificationChannel};
pub use service::{ClockSource, FileDisplaySource, Service, ServiceError};
pub use stats::{EngineStats, SharedStats};
pub use storage::{FileStorage, MemoryStorage, Storage, StreamId};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
