//! Sleep session observation and the stability gate.
//!
//! The sleep sensor keeps revising a session while it is being scored, so a
//! changed `end_time` does not mean the session is final. The observer flags
//! changes against the last *observed* baseline, and the gate only commits a
//! candidate after it has stayed unchanged for `threshold` consecutive polls.
//!
//! ```text
//!            change                      no change (n+1 < threshold)
//!   Idle ─────────────▶ Pending(0) ◀──┐ ┌──────────────┐
//!    ▲                    │   ▲       │ │              ▼
//!    │                    │   └───────┘ └───────── Pending(n+1)
//!    │   n+1 == threshold │     change
//!    └────── commit ◀─────┘
//! ```

use crate::collector::provider::SensorProvider;
use crate::collector::types::{awake_length, Nap, SleepInfo, SleepSnapshot, SleepStage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Consecutive unchanged polls required before a candidate is committed.
pub const DEFAULT_STABILITY_THRESHOLD: u32 = 6;

/// A committed sleep session, as persisted in the `sleep` stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SleepRecord {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub ts: DateTime<Utc>,
    pub score: u32,
    pub start_time: i64,
    pub end_time: i64,
    /// Total time minus time spent in the awake stage (minutes)
    pub sleep_length: i64,
    pub total_time: i64,
    pub stages: Vec<SleepStage>,
    pub naps: Vec<Nap>,
}

impl SleepRecord {
    /// Stop time of the latest nap in this record, or 0.
    pub fn nap_stop_time(&self) -> i64 {
        self.naps.iter().map(|n| n.stop).max().unwrap_or(0)
    }
}

/// The in-flight candidate. Replaced wholesale on every detected change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSleepRecord {
    pub score: u32,
    pub start_time: i64,
    pub end_time: i64,
    pub total_time: i64,
    pub stages: Vec<SleepStage>,
    pub naps: Vec<Nap>,
    /// When the change that produced this candidate was observed
    pub ts: DateTime<Utc>,
    /// Consecutive unchanged polls since the candidate was created
    pub stability_count: u32,
}

impl PendingSleepRecord {
    fn from_snapshot(snapshot: &SleepSnapshot, ts: DateTime<Utc>) -> Self {
        Self {
            score: snapshot.score,
            start_time: snapshot.start_time,
            end_time: snapshot.end_time,
            total_time: snapshot.total_time,
            stages: snapshot.stage_list.clone(),
            naps: snapshot.nap_list.clone(),
            ts,
            stability_count: 0,
        }
    }

    /// Total time minus the summed length of awake stages.
    pub fn sleep_length(&self) -> i64 {
        self.total_time - awake_length(&self.stages)
    }

    fn into_record(self) -> SleepRecord {
        SleepRecord {
            sleep_length: self.sleep_length(),
            ts: self.ts,
            score: self.score,
            start_time: self.start_time,
            end_time: self.end_time,
            total_time: self.total_time,
            stages: self.stages,
            naps: self.naps,
        }
    }
}

/// Last observed values used for change comparison.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Baseline {
    pub end_time: i64,
    pub nap_stop_time: i64,
}

impl Baseline {
    /// Baseline matching an already persisted record.
    pub fn from_record(record: &SleepRecord) -> Self {
        Self {
            end_time: record.end_time,
            nap_stop_time: record.nap_stop_time(),
        }
    }
}

/// One poll of the sleep sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub snapshot: SleepSnapshot,
    pub changed: bool,
}

/// Polls the sleep sensor and tracks the observed baseline.
#[derive(Debug, Clone, Default)]
pub struct SleepObserver {
    baseline: Baseline,
}

impl SleepObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_baseline(baseline: Baseline) -> Self {
        Self { baseline }
    }

    pub fn baseline(&self) -> Baseline {
        self.baseline
    }

    /// Read a normalized snapshot from the provider.
    ///
    /// A missing session reads as all zeros and never counts as a change.
    pub fn snapshot(provider: &dyn SensorProvider) -> SleepSnapshot {
        let info = match provider.sleep_info() {
            Ok(info) => info,
            Err(e) => {
                debug!(error = %e, "no sleep info");
                SleepInfo::default()
            }
        };
        let stages = provider.sleep_stages().unwrap_or_else(|e| {
            warn!(error = %e, "sleep stages unavailable");
            Vec::new()
        });
        let naps = provider.sleep_naps().unwrap_or_else(|e| {
            warn!(error = %e, "sleep naps unavailable");
            Vec::new()
        });
        SleepSnapshot::from_parts(info, stages, naps)
    }

    /// Whether a snapshot differs from the baseline.
    ///
    /// Zero values mean "nothing recorded" and never count as a change.
    pub fn is_change(&self, snapshot: &SleepSnapshot) -> bool {
        let end_changed =
            snapshot.end_time != 0 && snapshot.end_time != self.baseline.end_time;
        let nap_changed =
            snapshot.nap_stop_time != 0 && snapshot.nap_stop_time != self.baseline.nap_stop_time;
        end_changed || nap_changed
    }

    /// Compare a snapshot to the baseline, moving the baseline on change.
    pub fn observe(&mut self, snapshot: SleepSnapshot) -> Observation {
        let changed = self.is_change(&snapshot);
        if changed {
            if snapshot.end_time != 0 {
                self.baseline.end_time = snapshot.end_time;
            }
            if snapshot.nap_stop_time != 0 {
                self.baseline.nap_stop_time = snapshot.nap_stop_time;
            }
        }
        Observation { snapshot, changed }
    }

    /// Poll the provider and observe the result.
    pub fn poll(&mut self, provider: &dyn SensorProvider) -> Observation {
        self.observe(Self::snapshot(provider))
    }
}

/// Externally visible gate state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Idle,
    Pending(u32),
}

/// What a single observation did to the gate.
#[derive(Debug, Clone, PartialEq)]
pub enum GateEvent {
    /// Idle and nothing changed
    Ignored,
    /// A first change created a candidate
    Started,
    /// A further change replaced the candidate and reset the counter
    Replaced,
    /// Unchanged poll; carries the new counter value
    Held(u32),
    /// The candidate was stable long enough and is now final
    Committed(SleepRecord),
}

/// Debounce state machine holding at most one candidate.
#[derive(Debug, Clone)]
pub struct StabilityGate {
    threshold: u32,
    pending: Option<PendingSleepRecord>,
}

impl Default for StabilityGate {
    fn default() -> Self {
        Self::new(DEFAULT_STABILITY_THRESHOLD)
    }
}

impl StabilityGate {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            pending: None,
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn state(&self) -> GateState {
        match &self.pending {
            None => GateState::Idle,
            Some(p) => GateState::Pending(p.stability_count),
        }
    }

    pub fn pending(&self) -> Option<&PendingSleepRecord> {
        self.pending.as_ref()
    }

    /// Advance the state machine by one observation.
    pub fn observe(&mut self, observation: &Observation, now: DateTime<Utc>) -> GateEvent {
        if observation.changed {
            let candidate = PendingSleepRecord::from_snapshot(&observation.snapshot, now);
            let replaced = self.pending.replace(candidate).is_some();
            debug!(
                end_time = observation.snapshot.end_time,
                nap_stop_time = observation.snapshot.nap_stop_time,
                replaced,
                "sleep change detected"
            );
            return if replaced {
                GateEvent::Replaced
            } else {
                GateEvent::Started
            };
        }

        let Some(pending) = self.pending.as_mut() else {
            return GateEvent::Ignored;
        };

        let count = pending.stability_count + 1;
        if count < self.threshold {
            pending.stability_count = count;
            return GateEvent::Held(count);
        }

        match self.pending.take() {
            Some(pending) => {
                let record = pending.into_record();
                info!(
                    end_time = record.end_time,
                    sleep_length = record.sleep_length,
                    score = record.score,
                    "sleep record committed"
                );
                GateEvent::Committed(record)
            }
            None => GateEvent::Ignored,
        }
    }
}
