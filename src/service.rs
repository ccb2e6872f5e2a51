//! Event sources and the lifecycle host.
//!
//! [`ClockSource`] emits a tick per wall-clock minute and a day-change event
//! at local midnight. [`FileDisplaySource`] watches a state file and emits
//! display changes. [`Service`] subscribes the sources at init, feeds their
//! events to the engine in arrival order and unsubscribes them at teardown.

use crate::collector::SensorProvider;
use crate::engine::{Control, Engine};
use crate::events::{DisplayState, EngineEvent, EventSource, SourceError};
use crate::stats::SharedStats;
use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use chrono_tz::Tz;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Longest a source thread sleeps before re-checking its stop flag.
const STOP_CHECK_INTERVAL: Duration = Duration::from_millis(200);

/// Start of the minute following `now`.
pub fn next_minute(now: DateTime<Tz>) -> DateTime<Tz> {
    let floored = now
        .with_nanosecond(0)
        .and_then(|t| t.with_second(0))
        .unwrap_or(now);
    floored + ChronoDuration::minutes(1)
}

/// Events due at a minute boundary, given the previously emitted boundary.
pub fn boundary_events(previous: Option<DateTime<Tz>>, boundary: DateTime<Tz>) -> Vec<EngineEvent> {
    let mut events = Vec::with_capacity(2);
    if let Some(previous) = previous {
        if previous.date_naive() != boundary.date_naive() {
            events.push(EngineEvent::DayChanged(boundary.date_naive()));
        }
    }
    events.push(EngineEvent::MinuteTick(boundary));
    events
}

/// Per-minute and per-day time source.
pub struct ClockSource {
    tz: Tz,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ClockSource {
    pub fn new(tz: Tz) -> Self {
        Self {
            tz,
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }
}

impl EventSource for ClockSource {
    fn subscribe(&mut self, sink: Sender<EngineEvent>) -> Result<(), SourceError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(SourceError::AlreadySubscribed);
        }

        let running = self.running.clone();
        let tz = self.tz;
        let handle = thread::Builder::new()
            .name("clock-source".to_string())
            .spawn(move || {
                let mut previous: Option<DateTime<Tz>> = None;
                let mut boundary = next_minute(Utc::now().with_timezone(&tz));

                while running.load(Ordering::SeqCst) {
                    let now = Utc::now().with_timezone(&tz);
                    if now < boundary {
                        let wait = (boundary - now).to_std().unwrap_or(Duration::ZERO);
                        thread::sleep(wait.min(STOP_CHECK_INTERVAL));
                        continue;
                    }

                    for event in boundary_events(previous, boundary) {
                        if sink.send(event).is_err() {
                            debug!("clock sink closed");
                            running.store(false, Ordering::SeqCst);
                            return;
                        }
                    }
                    previous = Some(boundary);
                    // Skip boundaries missed while suspended rather than replaying them.
                    boundary = next_minute(now);
                }
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                SourceError::Spawn(e.to_string())
            })?;

        self.handle = Some(handle);
        info!(tz = %self.tz, "clock source subscribed");
        Ok(())
    }

    fn unsubscribe(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
            info!("clock source unsubscribed");
        }
    }

    fn is_subscribed(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Current display state.
pub trait DisplayStateProvider {
    fn current(&self) -> DisplayState;
}

/// Read a display state file. A missing or unreadable file reads as off.
pub fn read_display_state(path: &Path) -> DisplayState {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|s| DisplayState::parse(&s))
        .unwrap_or(DisplayState::Off)
}

/// Write a display state file.
pub fn write_display_state(path: &Path, state: DisplayState) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, state.as_str())
}

/// Display state backed by a file, polled for changes.
pub struct FileDisplaySource {
    path: PathBuf,
    poll: Duration,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl FileDisplaySource {
    pub fn new(path: PathBuf, poll: Duration) -> Self {
        Self {
            path,
            poll,
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }
}

impl DisplayStateProvider for FileDisplaySource {
    fn current(&self) -> DisplayState {
        read_display_state(&self.path)
    }
}

impl EventSource for FileDisplaySource {
    fn subscribe(&mut self, sink: Sender<EngineEvent>) -> Result<(), SourceError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(SourceError::AlreadySubscribed);
        }

        let running = self.running.clone();
        let path = self.path.clone();
        let poll = self.poll;
        let mut last = self.current();

        let handle = thread::Builder::new()
            .name("display-source".to_string())
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    thread::sleep(poll);
                    let state = read_display_state(&path);
                    if state == last {
                        continue;
                    }
                    last = state;
                    if sink.send(EngineEvent::DisplayChanged(state)).is_err() {
                        debug!("display sink closed");
                        running.store(false, Ordering::SeqCst);
                        return;
                    }
                }
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                SourceError::Spawn(e.to_string())
            })?;

        self.handle = Some(handle);
        info!(path = ?self.path, "display source subscribed");
        Ok(())
    }

    fn unsubscribe(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
            info!("display source unsubscribed");
        }
    }

    fn is_subscribed(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Errors from the service host.
#[derive(Debug)]
pub enum ServiceError {
    Source(SourceError),
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceError::Source(e) => write!(f, "Event source error: {e}"),
        }
    }
}

impl std::error::Error for ServiceError {}

impl From<SourceError> for ServiceError {
    fn from(e: SourceError) -> Self {
        ServiceError::Source(e)
    }
}

/// Lifecycle host: owns the engine and its event sources.
pub struct Service<P> {
    engine: Engine<P>,
    sources: Vec<Box<dyn EventSource>>,
    sender: Sender<EngineEvent>,
    receiver: Receiver<EngineEvent>,
}

impl<P: SensorProvider> Service<P> {
    /// Subscribe every source and take ownership of the engine.
    pub fn init(
        engine: Engine<P>,
        mut sources: Vec<Box<dyn EventSource>>,
    ) -> Result<Self, ServiceError> {
        let (sender, receiver) = unbounded();

        let mut failure = None;
        for (i, source) in sources.iter_mut().enumerate() {
            if let Err(e) = source.subscribe(sender.clone()) {
                failure = Some((i, e));
                break;
            }
        }
        if let Some((i, e)) = failure {
            for source in sources[..i].iter_mut() {
                source.unsubscribe();
            }
            return Err(e.into());
        }

        info!(instance = %engine.stats().instance_id(), "service initialized");
        Ok(Self {
            engine,
            sources,
            sender,
            receiver,
        })
    }

    /// Sender for injecting events (e.g. a shutdown from a signal handler).
    pub fn sender(&self) -> Sender<EngineEvent> {
        self.sender.clone()
    }

    pub fn engine(&self) -> &Engine<P> {
        &self.engine
    }

    pub fn stats(&self) -> &SharedStats {
        self.engine.stats()
    }

    /// Dispatch events in arrival order until a shutdown event arrives or
    /// `running` is cleared. Returns the number of events handled.
    pub fn run(&mut self, running: &AtomicBool) -> usize {
        let mut handled = 0;
        while running.load(Ordering::SeqCst) {
            match self.receiver.recv_timeout(Duration::from_millis(100)) {
                Ok(event) => {
                    if self.engine.handle(event) == Control::Stop {
                        info!("shutdown requested");
                        break;
                    }
                    handled += 1;
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    warn!("event channel disconnected");
                    break;
                }
            }
        }
        handled
    }

    /// Unsubscribe every source and stop the engine. Records still queued
    /// are lost; their count is returned.
    pub fn teardown(mut self) -> usize {
        for source in self.sources.iter_mut() {
            source.unsubscribe();
        }
        let stats = self.engine.stats().clone();
        let lost = self.engine.teardown();
        if let Err(e) = stats.save() {
            warn!(error = %e, "could not save stats");
        }
        lost
    }
}
