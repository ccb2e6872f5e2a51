//! Engine activity counters.
//!
//! Counts what the engine did during the session (samples read, records
//! produced, queued and written, flush failures) and optionally persists the
//! cumulative totals across restarts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// Activity counters for the current session.
#[derive(Debug)]
pub struct EngineStats {
    samples_collected: AtomicU64,
    sensor_fallbacks: AtomicU64,
    aggregates_produced: AtomicU64,
    sleep_commits: AtomicU64,
    records_queued: AtomicU64,
    records_written: AtomicU64,
    flushes: AtomicU64,
    flush_failures: AtomicU64,
    notifications_sent: AtomicU64,
    handler_errors: AtomicU64,
    days_observed: AtomicU64,
    instance_id: Uuid,
    session_start: DateTime<Utc>,
    persist_path: Option<PathBuf>,
}

macro_rules! counter {
    ($record:ident, $field:ident) => {
        pub fn $record(&self, count: u64) {
            self.$field.fetch_add(count, Ordering::Relaxed);
        }
    };
}

impl EngineStats {
    pub fn new() -> Self {
        Self {
            samples_collected: AtomicU64::new(0),
            sensor_fallbacks: AtomicU64::new(0),
            aggregates_produced: AtomicU64::new(0),
            sleep_commits: AtomicU64::new(0),
            records_queued: AtomicU64::new(0),
            records_written: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
            flush_failures: AtomicU64::new(0),
            notifications_sent: AtomicU64::new(0),
            handler_errors: AtomicU64::new(0),
            days_observed: AtomicU64::new(0),
            instance_id: Uuid::new_v4(),
            session_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Create stats that continue from totals saved at `path`.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut stats = Self::new();
        stats.persist_path = Some(path);

        if let Err(e) = stats.load() {
            warn!(error = %e, "could not load previous stats");
        }

        stats
    }

    counter!(record_samples, samples_collected);
    counter!(record_sensor_fallbacks, sensor_fallbacks);
    counter!(record_aggregates, aggregates_produced);
    counter!(record_sleep_commits, sleep_commits);
    counter!(record_queued, records_queued);
    counter!(record_written, records_written);
    counter!(record_flushes, flushes);
    counter!(record_flush_failures, flush_failures);
    counter!(record_notifications, notifications_sent);
    counter!(record_handler_errors, handler_errors);
    counter!(record_days, days_observed);

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// Current counter values.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            samples_collected: self.samples_collected.load(Ordering::Relaxed),
            sensor_fallbacks: self.sensor_fallbacks.load(Ordering::Relaxed),
            aggregates_produced: self.aggregates_produced.load(Ordering::Relaxed),
            sleep_commits: self.sleep_commits.load(Ordering::Relaxed),
            records_queued: self.records_queued.load(Ordering::Relaxed),
            records_written: self.records_written.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            flush_failures: self.flush_failures.load(Ordering::Relaxed),
            notifications_sent: self.notifications_sent.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
            days_observed: self.days_observed.load(Ordering::Relaxed),
            instance_id: self.instance_id,
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let s = self.snapshot();
        format!(
            "Engine Statistics:\n\
             - Samples collected: {}\n\
             - Sensor fallbacks: {}\n\
             - Aggregate records: {}\n\
             - Sleep commits: {}\n\
             - Records queued: {}\n\
             - Records written: {}\n\
             - Flushes: {} ({} failed)\n\
             - Notifications sent: {}\n\
             - Handler errors: {}\n\
             - Days observed: {}\n\
             - Session duration: {} seconds",
            s.samples_collected,
            s.sensor_fallbacks,
            s.aggregates_produced,
            s.sleep_commits,
            s.records_queued,
            s.records_written,
            s.flushes,
            s.flush_failures,
            s.notifications_sent,
            s.handler_errors,
            s.days_observed,
            s.session_duration_secs
        )
    }

    /// Save cumulative totals to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let s = self.snapshot();
            let persisted = PersistedStats {
                samples_collected: s.samples_collected,
                sensor_fallbacks: s.sensor_fallbacks,
                aggregates_produced: s.aggregates_produced,
                sleep_commits: s.sleep_commits,
                records_queued: s.records_queued,
                records_written: s.records_written,
                flushes: s.flushes,
                flush_failures: s.flush_failures,
                notifications_sent: s.notifications_sent,
                handler_errors: s.handler_errors,
                days_observed: s.days_observed,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;
            std::fs::write(path, json)?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let p: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;

                self.samples_collected.store(p.samples_collected, Ordering::Relaxed);
                self.sensor_fallbacks.store(p.sensor_fallbacks, Ordering::Relaxed);
                self.aggregates_produced.store(p.aggregates_produced, Ordering::Relaxed);
                self.sleep_commits.store(p.sleep_commits, Ordering::Relaxed);
                self.records_queued.store(p.records_queued, Ordering::Relaxed);
                self.records_written.store(p.records_written, Ordering::Relaxed);
                self.flushes.store(p.flushes, Ordering::Relaxed);
                self.flush_failures.store(p.flush_failures, Ordering::Relaxed);
                self.notifications_sent.store(p.notifications_sent, Ordering::Relaxed);
                self.handler_errors.store(p.handler_errors, Ordering::Relaxed);
                self.days_observed.store(p.days_observed, Ordering::Relaxed);
            }
        }
        Ok(())
    }
}

impl Default for EngineStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub samples_collected: u64,
    pub sensor_fallbacks: u64,
    pub aggregates_produced: u64,
    pub sleep_commits: u64,
    pub records_queued: u64,
    pub records_written: u64,
    pub flushes: u64,
    pub flush_failures: u64,
    pub notifications_sent: u64,
    pub handler_errors: u64,
    pub days_observed: u64,
    pub instance_id: Uuid,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

/// Stats format for persistence.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    samples_collected: u64,
    sensor_fallbacks: u64,
    aggregates_produced: u64,
    sleep_commits: u64,
    records_queued: u64,
    records_written: u64,
    flushes: u64,
    flush_failures: u64,
    notifications_sent: u64,
    handler_errors: u64,
    #[serde(default)]
    days_observed: u64,
    last_updated: DateTime<Utc>,
}

/// Stats shared between the engine and its host.
pub type SharedStats = Arc<EngineStats>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counting() {
        let stats = EngineStats::new();
        stats.record_samples(3);
        stats.record_samples(2);
        stats.record_flush_failures(1);

        let s = stats.snapshot();
        assert_eq!(s.samples_collected, 5);
        assert_eq!(s.flush_failures, 1);
        assert_eq!(s.records_written, 0);
    }

    #[test]
    fn test_summary_format() {
        let stats = EngineStats::new();
        let summary = stats.summary();
        assert!(summary.contains("Samples collected"));
        assert!(summary.contains("Flushes: 0 (0 failed)"));
        assert!(summary.contains("Days observed: 0"));

        stats.record_days(2);
        assert!(stats.summary().contains("Days observed: 2"));
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");

        let stats = EngineStats::with_persistence(path.clone());
        stats.record_aggregates(4);
        stats.record_sleep_commits(1);
        stats.save().unwrap();

        let reloaded = EngineStats::with_persistence(path);
        let s = reloaded.snapshot();
        assert_eq!(s.aggregates_produced, 4);
        assert_eq!(s.sleep_commits, 1);
        assert_ne!(s.instance_id, stats.instance_id());
    }
}
