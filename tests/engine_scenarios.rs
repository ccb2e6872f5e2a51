//! End-to-end scenarios driving the engine with scripted sensors and
//! in-memory or on-disk storage.

use chrono::{DateTime, TimeZone};
use chrono_tz::Tz;
use std::rc::Rc;
use wearable_telemetry_agent::collector::{
    Metric, Nap, ScriptedProvider, SleepInfo, SleepStage, SleepStageKind,
};
use wearable_telemetry_agent::config::EngineConfig;
use wearable_telemetry_agent::core::{AggregateRecord, GateEvent, GateState, SleepRecord};
use wearable_telemetry_agent::events::{DisplayState, EngineEvent};
use wearable_telemetry_agent::notify::RecordingChannel;
use wearable_telemetry_agent::storage::{
    parse_records, serialize_records, FileStorage, FlushOutcome, MemoryStorage, QueueReason,
    Storage, Store, StreamId, SubmitOutcome,
};
use wearable_telemetry_agent::Engine;

fn at(minute: i64) -> DateTime<Tz> {
    Tz::UTC.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap() + chrono::Duration::minutes(minute)
}

fn sleep_info(end_time: i64) -> SleepInfo {
    SleepInfo {
        score: 78,
        start_time: end_time - 480,
        end_time,
        total_time: 480,
    }
}

struct Harness {
    provider: ScriptedProvider,
    storage: Rc<MemoryStorage>,
    channel: RecordingChannel,
    engine: Engine<ScriptedProvider>,
}

impl Harness {
    fn new(display: DisplayState) -> Self {
        Self::with_storage(Rc::new(MemoryStorage::new()), display)
    }

    fn with_storage(storage: Rc<MemoryStorage>, display: DisplayState) -> Self {
        let provider = ScriptedProvider::new();
        provider.set(Metric::HeartRate, Some(64.0));
        let channel = RecordingChannel::new();
        let engine = Engine::new(
            EngineConfig::default(),
            provider.clone(),
            storage.clone() as Rc<dyn Storage>,
            Box::new(channel.clone()),
            display,
        );
        Self {
            provider,
            storage,
            channel,
            engine,
        }
    }

    /// Tick every minute in `from..=to`, calling `before` ahead of each tick.
    /// Returns the minutes at which a sleep record was committed.
    fn run(&mut self, from: i64, to: i64, mut before: impl FnMut(i64, &ScriptedProvider)) -> Vec<i64> {
        let mut commits = Vec::new();
        for minute in from..=to {
            before(minute, &self.provider);
            let report = self.engine.tick(at(minute)).unwrap();
            if let Some(GateEvent::Committed(_)) = report.sleep {
                commits.push(minute);
            }
        }
        commits
    }

    fn stored_sleep(&self) -> Vec<SleepRecord> {
        Store::new(StreamId::Sleep, self.storage.clone() as Rc<dyn Storage>).load()
    }

    fn stored_sensor(&self) -> Vec<AggregateRecord> {
        Store::new(StreamId::Sensor, self.storage.clone() as Rc<dyn Storage>).load()
    }
}

/// The sleep session is revised at minutes 1, 6 and 11, then settles.
fn settling_session(minute: i64, provider: &ScriptedProvider) {
    let end_time = match minute {
        1..=5 => Some(400),
        6..=10 => Some(410),
        m if m >= 11 => Some(420),
        _ => None,
    };
    if let Some(end_time) = end_time {
        provider.set_sleep(Some(sleep_info(end_time)), Vec::new(), Vec::new());
    }
}

#[test]
fn test_session_commits_once_after_six_stable_polls() {
    let mut harness = Harness::new(DisplayState::Off);

    let commits = harness.run(0, 120, settling_session);

    assert_eq!(commits, vec![41]);
    let stored = harness.stored_sleep();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].end_time, 420);
    assert_eq!(stored[0].ts, at(11).with_timezone(&chrono::Utc));
    assert_eq!(harness.engine.gate_state(), GateState::Idle);
    assert_eq!(harness.channel.count(), 1);
}

#[test]
fn test_revision_resets_stability_count() {
    let mut harness = Harness::new(DisplayState::Off);

    // Settles at minute 11, revised again at minute 31 after four stable polls.
    let commits = harness.run(0, 90, |minute, provider| {
        settling_session(minute, provider);
        if minute >= 31 {
            provider.set_sleep(Some(sleep_info(435)), Vec::new(), Vec::new());
        }
    });

    assert_eq!(commits, vec![61]);
    assert_eq!(harness.stored_sleep()[0].end_time, 435);
}

#[test]
fn test_display_on_never_touches_store() {
    let mut harness = Harness::new(DisplayState::On);

    harness.run(0, 45, |minute, provider| {
        provider.set(Metric::Steps, Some(1000.0 + minute as f64 * 10.0));
        settling_session(minute, provider);
    });

    assert_eq!(harness.storage.write_count(), 0);
    assert_eq!(harness.engine.sensor_writer().queue_len(), 5);
    assert_eq!(harness.engine.sleep_writer().queue_len(), 1);

    let report = harness.engine.tick(at(50)).unwrap();
    match report.aggregate {
        Some(SubmitOutcome::Queued { reason, len }) => {
            assert_eq!(reason, QueueReason::DisplayOn);
            assert_eq!(len, 6);
        }
        other => panic!("expected queued record, got {other:?}"),
    }
    assert_eq!(harness.storage.write_count(), 0);
}

#[test]
fn test_notification_deferred_until_flush() {
    let mut harness = Harness::new(DisplayState::On);

    let commits = harness.run(0, 41, settling_session);
    assert_eq!(commits, vec![41]);
    assert!(harness.engine.notification_deferred());
    assert_eq!(harness.channel.count(), 0);

    harness.engine.handle(EngineEvent::DisplayChanged(DisplayState::Off));
    assert!(!harness.engine.notification_deferred());
    assert_eq!(harness.channel.count(), 1);
    assert_eq!(harness.stored_sleep().len(), 1);

    // Later transitions do not repeat the alert.
    harness.engine.handle(EngineEvent::DisplayChanged(DisplayState::On));
    harness.engine.handle(EngineEvent::DisplayChanged(DisplayState::Off));
    assert_eq!(harness.channel.count(), 1);
    assert_eq!(harness.channel.sent()[0].title, "Sleep recorded");
}

#[test]
fn test_flush_appends_queue_after_existing_records() {
    let storage = Rc::new(MemoryStorage::new());
    let existing_sensor = AggregateRecord {
        ts: at(-10).with_timezone(&chrono::Utc),
        step_count: 12,
        heart_rate: 70,
        light: 3,
        resting_hr: 55,
    };
    let existing_sleep = SleepRecord {
        ts: at(-600).with_timezone(&chrono::Utc),
        score: 70,
        start_time: -180,
        end_time: 300,
        sleep_length: 460,
        total_time: 480,
        stages: vec![
            SleepStage::new(SleepStageKind::Light, -180, -60),
            SleepStage::new(SleepStageKind::Wake, -60, -40),
            SleepStage::new(SleepStageKind::Deep, -40, 300),
        ],
        naps: vec![Nap { start: 200, stop: 230 }],
    };
    storage.insert(
        StreamId::Sensor.file_name(),
        &serialize_records(std::slice::from_ref(&existing_sensor)).unwrap(),
    );
    storage.insert(
        StreamId::Sleep.file_name(),
        &serialize_records(std::slice::from_ref(&existing_sleep)).unwrap(),
    );

    let mut harness = Harness::with_storage(storage, DisplayState::On);
    assert_eq!(harness.run(0, 41, settling_session), vec![41]);
    let queued_sensor = harness.engine.sensor_writer().queued();
    let queued_sleep = harness.engine.sleep_writer().queued();
    assert_eq!(queued_sensor.len(), 5);
    assert_eq!(queued_sleep.len(), 1);

    let report = harness.engine.set_display(DisplayState::Off).unwrap();
    assert_eq!(report.sensor, FlushOutcome::Flushed(queued_sensor.clone()));
    assert_eq!(report.sleep, FlushOutcome::Flushed(queued_sleep.clone()));

    let mut expected_sensor = vec![existing_sensor];
    expected_sensor.extend(queued_sensor);
    assert_eq!(harness.stored_sensor(), expected_sensor);

    let mut expected_sleep = vec![existing_sleep];
    expected_sleep.extend(queued_sleep);
    assert_eq!(harness.stored_sleep(), expected_sleep);

    assert_eq!(harness.engine.sensor_writer().queue_len(), 0);
    assert_eq!(harness.engine.sleep_writer().queue_len(), 0);
}

#[test]
fn test_written_records_match_store_at_sub_millisecond_ticks() {
    let mut harness = Harness::new(DisplayState::Off);
    let offset = chrono::Duration::nanoseconds(123_456_789);

    let mut written_sensor = Vec::new();
    let mut written_sleep = Vec::new();
    for minute in 0..=41 {
        settling_session(minute, &harness.provider);
        let report = harness.engine.tick(at(minute) + offset).unwrap();
        if let Some(SubmitOutcome::Written(records)) = report.aggregate {
            written_sensor.extend(records);
        }
        if let Some(GateEvent::Committed(record)) = report.sleep {
            written_sleep.push(record);
        }
    }

    assert_eq!(written_sensor.len(), 5);
    assert_eq!(written_sleep.len(), 1);
    assert_eq!(
        written_sensor[1].ts,
        (at(10) + chrono::Duration::milliseconds(123)).with_timezone(&chrono::Utc)
    );

    assert_eq!(harness.stored_sensor(), written_sensor);
    assert_eq!(harness.stored_sleep(), written_sleep);
    let reparsed: Vec<AggregateRecord> =
        parse_records(&serialize_records(&written_sensor).unwrap()).unwrap();
    assert_eq!(reparsed, written_sensor);
}

#[test]
fn test_failed_flush_keeps_queue_for_retry() {
    let mut harness = Harness::new(DisplayState::On);
    harness.run(0, 10, |_, _| {});
    assert_eq!(harness.engine.sensor_writer().queue_len(), 2);

    harness.storage.set_fail_writes(true);
    let report = harness.engine.set_display(DisplayState::Off).unwrap();
    assert!(matches!(report.sensor, FlushOutcome::Failed(_)));
    assert_eq!(harness.engine.sensor_writer().queue_len(), 2);
    assert!(harness.stored_sensor().is_empty());

    // A direct write while the store is failing stays queued behind the rest.
    let report = harness.engine.tick(at(20)).unwrap();
    assert!(matches!(
        report.aggregate,
        Some(SubmitOutcome::Queued {
            reason: QueueReason::WriteFailed(_),
            len: 3
        })
    ));

    harness.storage.set_fail_writes(false);
    let report = harness.engine.tick(at(30)).unwrap();
    match report.aggregate {
        Some(SubmitOutcome::Written(records)) => assert_eq!(records.len(), 4),
        other => panic!("expected write, got {other:?}"),
    }
    assert_eq!(harness.stored_sensor().len(), 4);
    assert_eq!(harness.engine.stats().snapshot().flush_failures, 2);
}

#[test]
fn test_restart_does_not_recommit_stored_session() {
    let storage = Rc::new(MemoryStorage::new());

    let mut first = Harness::with_storage(storage.clone(), DisplayState::Off);
    assert_eq!(first.run(0, 60, settling_session), vec![41]);
    assert_eq!(first.engine.teardown(), 0);

    let mut second = Harness::with_storage(storage, DisplayState::Off);
    assert_eq!(second.engine.sleep_baseline().end_time, 420);
    second
        .provider
        .set_sleep(Some(sleep_info(420)), Vec::new(), Vec::new());

    let commits = second.run(100, 200, |_, _| {});
    assert!(commits.is_empty());
    assert_eq!(second.stored_sleep().len(), 1);
}

#[test]
fn test_corrupt_store_is_replaced_on_flush() {
    let storage = Rc::new(MemoryStorage::new());
    storage.insert(StreamId::Sensor.file_name(), "{not json");

    let mut harness = Harness::with_storage(storage, DisplayState::Off);
    harness.run(0, 0, |_, _| {});

    let stored = harness.stored_sensor();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].heart_rate, 64);
}

#[test]
fn test_file_storage_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let storage: Rc<dyn Storage> = Rc::new(FileStorage::new(dir.path().join("store")));

    let provider = ScriptedProvider::new();
    let channel = RecordingChannel::new();
    let mut engine = Engine::new(
        EngineConfig::default(),
        provider.clone(),
        storage.clone(),
        Box::new(channel.clone()),
        DisplayState::Off,
    );

    for minute in 0..=41 {
        settling_session(minute, &provider);
        engine.tick(at(minute)).unwrap();
    }

    let text = std::fs::read_to_string(dir.path().join("store").join("sleep.json")).unwrap();
    let json: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(json[0]["endTime"], 420);
    assert_eq!(json[0]["sleepLength"], 480);
    assert!(json[0]["ts"].is_i64());

    let sensor: Vec<AggregateRecord> = Store::new(StreamId::Sensor, storage).load();
    assert_eq!(sensor.len(), 5);
    assert_eq!(sensor[0].heart_rate, 80);
    assert_eq!(channel.count(), 1);
}
