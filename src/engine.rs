//! The aggregation, debounce and screen-gated write engine.
//!
//! One [`Engine`] owns every piece of mutable state: the sample buffers, the
//! sleep baseline and pending candidate, both write queues and the deferred
//! notification count. It is created when the service starts and dropped (via
//! [`Engine::teardown`]) when it stops. Events are handled one at a time and
//! run to completion.

use crate::collector::{SampleCollector, SensorProvider};
use crate::config::EngineConfig;
use crate::core::{
    AggregateRecord, Aggregator, Baseline, GateEvent, GateState, PendingSleepRecord,
    SleepObserver, SleepRecord, StabilityGate,
};
use crate::events::{DisplayState, EngineEvent};
use crate::notify::{NotificationChannel, NotificationDispatcher};
use crate::stats::{EngineStats, SharedStats};
use crate::storage::{
    FlushOutcome, QueueReason, Storage, Store, StreamId, StreamWriter, SubmitOutcome,
};
use chrono::{DateTime, NaiveDate, SubsecRound, Utc};
use chrono_tz::Tz;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Errors raised inside an event handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// A tick at or before the previously handled one
    StaleTick {
        last: DateTime<Utc>,
        got: DateTime<Utc>,
    },
    /// The handler panicked
    Panicked(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::StaleTick { last, got } => {
                write!(f, "Stale tick at {got} (last handled {last})")
            }
            EngineError::Panicked(msg) => write!(f, "Handler panicked: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}

/// Whether the host should keep dispatching events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    Stop,
}

/// What a minute tick did.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub samples_collected: usize,
    pub aggregate: Option<SubmitOutcome<AggregateRecord>>,
    pub sleep: Option<GateEvent>,
}

/// Outcome of the flushes run on an on→off display transition.
#[derive(Debug, Clone, PartialEq)]
pub struct FlushReport {
    pub sensor: FlushOutcome<AggregateRecord>,
    pub sleep: FlushOutcome<SleepRecord>,
}

/// The telemetry engine.
pub struct Engine<P> {
    config: EngineConfig,
    provider: P,
    collector: SampleCollector,
    aggregator: Aggregator,
    observer: SleepObserver,
    gate: StabilityGate,
    sensor: StreamWriter<AggregateRecord>,
    sleep: StreamWriter<SleepRecord>,
    notifier: NotificationDispatcher,
    display: DisplayState,
    last_tick: Option<DateTime<Utc>>,
    stats: SharedStats,
}

impl<P> std::fmt::Debug for Engine<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("display", &self.display)
            .field("gate", &self.gate.state())
            .field("sensor", &self.sensor)
            .field("sleep", &self.sleep)
            .field("notifier", &self.notifier)
            .finish()
    }
}

impl<P: SensorProvider> Engine<P> {
    /// Create an engine.
    ///
    /// The sleep baseline is seeded from the last stored sleep record so a
    /// restart does not commit the same session twice.
    pub fn new(
        config: EngineConfig,
        provider: P,
        storage: Rc<dyn Storage>,
        channel: Box<dyn NotificationChannel>,
        display: DisplayState,
    ) -> Self {
        let sensor = StreamWriter::new(Store::new(StreamId::Sensor, storage.clone()));
        let sleep = StreamWriter::new(Store::<SleepRecord>::new(StreamId::Sleep, storage));

        let baseline = sleep
            .store()
            .load()
            .last()
            .map(Baseline::from_record)
            .unwrap_or_default();
        debug!(?baseline, "sleep baseline seeded");

        Self {
            config,
            provider,
            collector: SampleCollector::new(),
            aggregator: Aggregator::new(config.default_heart_rate),
            observer: SleepObserver::with_baseline(baseline),
            gate: StabilityGate::new(config.stability_threshold),
            sensor,
            sleep,
            notifier: NotificationDispatcher::new(channel, config.notifications),
            display,
            last_tick: None,
            stats: Arc::new(EngineStats::new()),
        }
    }

    /// Use shared (possibly persisted) stats instead of fresh ones.
    pub fn with_stats(mut self, stats: SharedStats) -> Self {
        self.stats = stats;
        self
    }

    pub fn stats(&self) -> &SharedStats {
        &self.stats
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn display(&self) -> DisplayState {
        self.display
    }

    pub fn gate_state(&self) -> GateState {
        self.gate.state()
    }

    pub fn pending_sleep(&self) -> Option<&PendingSleepRecord> {
        self.gate.pending()
    }

    pub fn sleep_baseline(&self) -> Baseline {
        self.observer.baseline()
    }

    pub fn sensor_writer(&self) -> &StreamWriter<AggregateRecord> {
        &self.sensor
    }

    pub fn sleep_writer(&self) -> &StreamWriter<SleepRecord> {
        &self.sleep
    }

    /// Whether a committed sleep record is still waiting for its alert.
    pub fn notification_deferred(&self) -> bool {
        self.notifier.is_deferred()
    }

    /// Number of samples buffered for the current window.
    pub fn buffered_samples(&self) -> usize {
        self.collector.window().sample_count()
    }

    /// Handle one event. Never fails: handler errors and panics are logged
    /// and the engine stays ready for the next event.
    pub fn handle(&mut self, event: EngineEvent) -> Control {
        if event == EngineEvent::Shutdown {
            return Control::Stop;
        }

        let result = catch_unwind(AssertUnwindSafe(|| self.dispatch(event)));
        let result = match result {
            Ok(result) => result,
            Err(panic) => Err(EngineError::Panicked(panic_message(panic.as_ref()))),
        };

        if let Err(e) = result {
            error!(error = %e, "event handler failed");
            self.stats.record_handler_errors(1);
        }
        Control::Continue
    }

    fn dispatch(&mut self, event: EngineEvent) -> Result<(), EngineError> {
        match event {
            EngineEvent::MinuteTick(at) => self.tick(at).map(|_| ()),
            EngineEvent::DayChanged(date) => {
                self.day_changed(date);
                Ok(())
            }
            EngineEvent::DisplayChanged(state) => {
                self.set_display(state);
                Ok(())
            }
            EngineEvent::Shutdown => Ok(()),
        }
    }

    /// Handle a minute tick: collect, then aggregate and/or poll sleep when due.
    ///
    /// Record timestamps are truncated to whole milliseconds, the precision
    /// they are stored with.
    pub fn tick(&mut self, at: DateTime<Tz>) -> Result<TickReport, EngineError> {
        let ts = at.with_timezone(&Utc).trunc_subsecs(3);
        if let Some(last) = self.last_tick {
            if ts <= last {
                return Err(EngineError::StaleTick { last, got: ts });
            }
        }
        self.last_tick = Some(ts);

        let collected = self.collector.collect(&self.provider);
        self.stats.record_samples(collected.collected as u64);
        self.stats
            .record_sensor_fallbacks(collected.unavailable.len() as u64);

        let tasks = self.config.schedule.tasks_at(&at);
        debug!(at = %at.format("%H:%M"), ?tasks, "tick");

        let aggregate = tasks.aggregate.then(|| self.aggregate(ts));
        let sleep = tasks.poll_sleep.then(|| self.poll_sleep(ts));

        Ok(TickReport {
            samples_collected: collected.collected,
            aggregate,
            sleep,
        })
    }

    fn aggregate(&mut self, ts: DateTime<Utc>) -> SubmitOutcome<AggregateRecord> {
        let window = self.collector.take_window();
        let aggregation = self.aggregator.aggregate(&window, &self.provider, ts);
        self.stats.record_aggregates(1);
        self.stats
            .record_sensor_fallbacks(aggregation.fallback_count());

        info!(
            steps = aggregation.record.step_count,
            heart_rate = aggregation.record.heart_rate,
            light = aggregation.record.light,
            resting_hr = aggregation.record.resting_hr,
            "aggregate record produced"
        );

        let outcome = self.sensor.submit(aggregation.record, self.display);
        record_submit(&self.stats, StreamId::Sensor, &outcome);
        outcome
    }

    fn poll_sleep(&mut self, ts: DateTime<Utc>) -> GateEvent {
        let observation = self.observer.poll(&self.provider);
        let event = self.gate.observe(&observation, ts);
        if let GateEvent::Committed(record) = &event {
            self.commit_sleep(record.clone());
        }
        event
    }

    fn commit_sleep(&mut self, record: SleepRecord) {
        self.stats.record_sleep_commits(1);
        self.notifier.committed();

        let outcome = self.sleep.submit(record, self.display);
        record_submit(&self.stats, StreamId::Sleep, &outcome);
        match outcome {
            SubmitOutcome::Written(records) => self.notify(&records),
            SubmitOutcome::Queued { .. } => {
                info!("sleep record queued, notification deferred until flush");
            }
        }
    }

    /// Apply a display state change. An on→off transition flushes both
    /// streams; the report is returned only in that case.
    pub fn set_display(&mut self, state: DisplayState) -> Option<FlushReport> {
        let previous = std::mem::replace(&mut self.display, state);
        debug!(%previous, current = %state, "display state");

        if previous.is_on() && !state.is_on() {
            Some(self.flush_all())
        } else {
            None
        }
    }

    fn flush_all(&mut self) -> FlushReport {
        let sensor = self.sensor.flush();
        record_flush(&self.stats, &sensor);

        let sleep = self.sleep.flush();
        record_flush(&self.stats, &sleep);
        if let FlushOutcome::Flushed(records) = &sleep {
            self.notify(records);
        }

        FlushReport { sensor, sleep }
    }

    fn notify(&mut self, records: &[SleepRecord]) {
        let sent = self.notifier.persisted(records);
        self.stats.record_notifications(sent as u64);
    }

    fn day_changed(&mut self, date: NaiveDate) {
        self.stats.record_days(1);
        info!(%date, "=== day change ===");
    }

    /// Stop the engine. Queued records are not flushed; the number lost is
    /// logged and returned.
    pub fn teardown(self) -> usize {
        let lost = self.sensor.discard() + self.sleep.discard();
        if lost > 0 {
            warn!(lost, "engine stopped with unflushed records");
        }
        if self.gate.pending().is_some() {
            debug!("pending sleep candidate dropped");
        }
        lost
    }
}

fn record_submit<R>(
    stats: &EngineStats,
    stream: StreamId,
    outcome: &SubmitOutcome<R>,
) {
    match outcome {
        SubmitOutcome::Written(records) => {
            stats.record_written(records.len() as u64);
        }
        SubmitOutcome::Queued { reason, len } => {
            stats.record_queued(1);
            if let QueueReason::WriteFailed(e) = reason {
                warn!(%stream, error = %e, len, "direct write failed, record queued");
                stats.record_flush_failures(1);
            }
        }
    }
}

fn record_flush<R>(stats: &EngineStats, outcome: &FlushOutcome<R>) {
    match outcome {
        FlushOutcome::Flushed(records) => {
            stats.record_flushes(1);
            stats.record_written(records.len() as u64);
        }
        FlushOutcome::Failed(_) => {
            stats.record_flushes(1);
            stats.record_flush_failures(1);
        }
        FlushOutcome::Empty | FlushOutcome::InProgress => {}
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{Metric, ScriptedProvider};
    use crate::notify::RecordingChannel;
    use crate::storage::MemoryStorage;
    use chrono::TimeZone;

    fn at(minute: u32) -> DateTime<Tz> {
        Tz::UTC
            .with_ymd_and_hms(2024, 3, 1, 0, 0, 0)
            .unwrap()
            + chrono::Duration::minutes(minute as i64)
    }

    fn engine(display: DisplayState) -> (ScriptedProvider, Rc<MemoryStorage>, Engine<ScriptedProvider>) {
        let provider = ScriptedProvider::new();
        let storage = Rc::new(MemoryStorage::new());
        let engine = Engine::new(
            EngineConfig::default(),
            provider.clone(),
            storage.clone() as Rc<dyn Storage>,
            Box::new(RecordingChannel::new()),
            display,
        );
        (provider, storage, engine)
    }

    #[test]
    fn test_tick_collects_and_aggregates_on_period() {
        let (provider, _storage, mut engine) = engine(DisplayState::Off);
        provider.set(Metric::Steps, Some(100.0));
        provider.set(Metric::HeartRate, Some(70.0));

        let report = engine.tick(at(1)).unwrap();
        assert_eq!(report.samples_collected, 2);
        assert!(report.aggregate.is_none());
        assert!(report.sleep.is_some());

        provider.set(Metric::Steps, Some(160.0));
        let report = engine.tick(at(10)).unwrap();
        match report.aggregate {
            Some(SubmitOutcome::Written(records)) => {
                assert_eq!(records[0].step_count, 60);
                assert_eq!(records[0].heart_rate, 70);
            }
            other => panic!("expected direct write, got {other:?}"),
        }
        assert_eq!(engine.buffered_samples(), 0);
    }

    #[test]
    fn test_stale_tick_is_rejected() {
        let (_provider, _storage, mut engine) = engine(DisplayState::Off);
        engine.tick(at(5)).unwrap();
        assert!(matches!(
            engine.tick(at(5)),
            Err(EngineError::StaleTick { .. })
        ));

        // Through the top-level handler it is logged and counted only.
        assert_eq!(engine.handle(EngineEvent::MinuteTick(at(4))), Control::Continue);
        assert_eq!(engine.stats().snapshot().handler_errors, 1);
    }

    #[test]
    fn test_display_transitions() {
        let (_provider, _storage, mut engine) = engine(DisplayState::Off);
        assert!(engine.set_display(DisplayState::Off).is_none());
        assert!(engine.set_display(DisplayState::On).is_none());
        let report = engine.set_display(DisplayState::Off).unwrap();
        assert_eq!(report.sensor, FlushOutcome::Empty);
        assert_eq!(report.sleep, FlushOutcome::Empty);
    }

    #[test]
    fn test_shutdown_stops() {
        let (_provider, _storage, mut engine) = engine(DisplayState::On);
        assert_eq!(engine.handle(EngineEvent::Shutdown), Control::Stop);
    }

    struct PanickingProvider;

    impl SensorProvider for PanickingProvider {
        fn current(&self, _metric: Metric) -> Result<f64, crate::collector::SensorError> {
            panic!("sensor driver crashed")
        }
        fn sleep_info(&self) -> Result<crate::collector::SleepInfo, crate::collector::SensorError> {
            panic!("sensor driver crashed")
        }
        fn sleep_stages(
            &self,
        ) -> Result<Vec<crate::collector::SleepStage>, crate::collector::SensorError> {
            Ok(Vec::new())
        }
        fn sleep_naps(&self) -> Result<Vec<crate::collector::Nap>, crate::collector::SensorError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_panicking_handler_is_contained() {
        let mut engine = Engine::new(
            EngineConfig::default(),
            PanickingProvider,
            Rc::new(MemoryStorage::new()) as Rc<dyn Storage>,
            Box::new(RecordingChannel::new()),
            DisplayState::On,
        );

        assert_eq!(engine.handle(EngineEvent::MinuteTick(at(0))), Control::Continue);
        assert_eq!(engine.handle(EngineEvent::MinuteTick(at(1))), Control::Continue);
        assert_eq!(engine.stats().snapshot().handler_errors, 2);

        // Display handling is unaffected.
        assert_eq!(
            engine.handle(EngineEvent::DisplayChanged(DisplayState::Off)),
            Control::Continue
        );
        assert_eq!(engine.display(), DisplayState::Off);
    }

    #[test]
    fn test_teardown_reports_lost_records() {
        let (_provider, _storage, mut engine) = engine(DisplayState::On);
        engine.tick(at(0)).unwrap();
        engine.tick(at(10)).unwrap();
        assert_eq!(engine.sensor_writer().queue_len(), 2);
        assert_eq!(engine.teardown(), 2);
    }
}
