//! User-facing alerts for committed sleep records.
//!
//! Every committed record produces exactly one alert, sent once the record is
//! durably stored. A record committed while the display is on only reaches
//! the store on the next flush, so its alert is deferred until then.

use crate::core::SleepRecord;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{debug, info};

/// A button attached to a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub text: String,
    /// Page or service the action opens, with an optional `?query`
    pub target: String,
}

/// A notification handed to the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub actions: Vec<NotificationAction>,
}

impl Notification {
    /// Alert announcing a stored sleep record.
    pub fn sleep_recorded(record: &SleepRecord) -> Self {
        let minutes = record.sleep_length.max(0);
        Self {
            title: "Sleep recorded".to_string(),
            body: format!(
                "Slept {}h {:02}m, score {}",
                minutes / 60,
                minutes % 60,
                record.score
            ),
            actions: vec![
                NotificationAction {
                    text: "Home Page".to_string(),
                    target: "page/home".to_string(),
                },
                NotificationAction {
                    text: "Stop Service".to_string(),
                    target: "service?action=exit".to_string(),
                },
            ],
        }
    }
}

/// Fire-and-forget notification sink.
pub trait NotificationChannel {
    fn notify(&self, notification: &Notification);
}

/// Channel that writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogChannel;

impl NotificationChannel for LogChannel {
    fn notify(&self, notification: &Notification) {
        info!(
            title = %notification.title,
            body = %notification.body,
            actions = notification.actions.len(),
            "notification"
        );
    }
}

/// Channel that keeps every notification. Clones share the same list.
#[derive(Debug, Clone, Default)]
pub struct RecordingChannel {
    sent: Rc<RefCell<Vec<Notification>>>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.borrow().clone()
    }

    pub fn count(&self) -> usize {
        self.sent.borrow().len()
    }
}

impl NotificationChannel for RecordingChannel {
    fn notify(&self, notification: &Notification) {
        self.sent.borrow_mut().push(notification.clone());
    }
}

/// Tracks committed records awaiting their alert.
pub struct NotificationDispatcher {
    channel: Box<dyn NotificationChannel>,
    enabled: bool,
    awaiting: usize,
}

impl std::fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationDispatcher")
            .field("enabled", &self.enabled)
            .field("awaiting", &self.awaiting)
            .finish()
    }
}

impl NotificationDispatcher {
    pub fn new(channel: Box<dyn NotificationChannel>, enabled: bool) -> Self {
        Self {
            channel,
            enabled,
            awaiting: 0,
        }
    }

    /// A record was committed and handed to the writer.
    pub fn committed(&mut self) {
        self.awaiting += 1;
    }

    /// Whether a committed record is still waiting on a flush.
    pub fn is_deferred(&self) -> bool {
        self.awaiting > 0
    }

    pub fn deferred_count(&self) -> usize {
        self.awaiting
    }

    /// Records just persisted to the sleep store. Sends one alert per record
    /// and returns how many were sent.
    pub fn persisted(&mut self, records: &[SleepRecord]) -> usize {
        if records.is_empty() {
            return 0;
        }
        self.awaiting = self.awaiting.saturating_sub(records.len());

        if !self.enabled {
            debug!(count = records.len(), "notifications disabled, skipping alerts");
            return 0;
        }
        for record in records {
            self.channel.notify(&Notification::sleep_recorded(record));
        }
        records.len()
    }
}
