//! Display-gated write queue and flusher for one stream.
//!
//! The store may only be written while the display is off. Records produced
//! while it is on wait in a FIFO queue until the next on→off transition
//! flushes them. Each stream has its own in-flight flag, so a flush never
//! interleaves with another write to the same store, including re-entrant
//! calls made from inside the storage layer.

use crate::events::DisplayState;
use crate::storage::store::{Store, StoreError, StreamId};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use tracing::{debug, info, warn};

/// Why a record was queued instead of written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueReason {
    /// The display is on
    DisplayOn,
    /// A flush of this stream is already running
    FlushInProgress,
    /// The direct write failed; retried on the next flush
    WriteFailed(StoreError),
}

/// Result of handing a record to the writer.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome<R> {
    /// Persisted immediately, together with any records queued before it.
    /// Records are listed in store order and end with the submitted one.
    Written(Vec<R>),
    /// Held in the queue
    Queued { reason: QueueReason, len: usize },
}

/// Result of a flush attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum FlushOutcome<R> {
    /// Nothing was queued
    Empty,
    /// Another flush of this stream is running; this call did nothing
    InProgress,
    /// These records were appended to the store and removed from the queue
    Flushed(Vec<R>),
    /// The rewrite failed; the queue is unchanged
    Failed(StoreError),
}

/// Marks a stream as busy for the lifetime of the guard.
struct FlushGuard<'a> {
    flag: &'a Cell<bool>,
}

impl<'a> FlushGuard<'a> {
    fn acquire(flag: &'a Cell<bool>) -> Option<Self> {
        if flag.replace(true) {
            None
        } else {
            Some(Self { flag })
        }
    }
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.flag.set(false);
    }
}

/// Write queue plus flusher for a single stream.
pub struct StreamWriter<R> {
    store: Store<R>,
    queue: RefCell<VecDeque<R>>,
    flushing: Cell<bool>,
}

impl<R> std::fmt::Debug for StreamWriter<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamWriter")
            .field("store", &self.store)
            .field("queued", &self.queue.borrow().len())
            .field("flushing", &self.flushing.get())
            .finish()
    }
}

impl<R: Serialize + DeserializeOwned + Clone> StreamWriter<R> {
    pub fn new(store: Store<R>) -> Self {
        Self {
            store,
            queue: RefCell::new(VecDeque::new()),
            flushing: Cell::new(false),
        }
    }

    pub fn stream(&self) -> StreamId {
        self.store.stream()
    }

    pub fn store(&self) -> &Store<R> {
        &self.store
    }

    pub fn queue_len(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Copy of the queued records in arrival order.
    pub fn queued(&self) -> Vec<R> {
        self.queue.borrow().iter().cloned().collect()
    }

    pub fn is_flushing(&self) -> bool {
        self.flushing.get()
    }

    /// Hand a ready record to the writer.
    ///
    /// With the display on the record is queued and the store is not touched.
    /// With the display off it is written straight away, after anything still
    /// queued, unless a flush of this stream is running.
    pub fn submit(&self, record: R, display: DisplayState) -> SubmitOutcome<R> {
        if display.is_on() {
            return self.enqueue(record, QueueReason::DisplayOn);
        }
        if self.is_flushing() {
            return self.enqueue(record, QueueReason::FlushInProgress);
        }

        self.queue.borrow_mut().push_back(record);
        match self.flush() {
            FlushOutcome::Flushed(records) => SubmitOutcome::Written(records),
            FlushOutcome::Failed(e) => SubmitOutcome::Queued {
                reason: QueueReason::WriteFailed(e),
                len: self.queue_len(),
            },
            // Neither can happen right after a push with the flag clear.
            FlushOutcome::InProgress => SubmitOutcome::Queued {
                reason: QueueReason::FlushInProgress,
                len: self.queue_len(),
            },
            FlushOutcome::Empty => SubmitOutcome::Written(Vec::new()),
        }
    }

    /// Merge every queued record into the store.
    ///
    /// The store is read (failures read as empty), extended with the queue in
    /// arrival order and rewritten once. Only then are those records removed
    /// from the queue. Records queued while the rewrite was running stay for
    /// the next flush.
    pub fn flush(&self) -> FlushOutcome<R> {
        let Some(_guard) = FlushGuard::acquire(&self.flushing) else {
            debug!(stream = %self.stream(), "flush already running, skipping");
            return FlushOutcome::InProgress;
        };

        let batch: Vec<R> = self.queue.borrow().iter().cloned().collect();
        if batch.is_empty() {
            return FlushOutcome::Empty;
        }

        match self.store.append(&batch) {
            Ok(total) => {
                self.queue.borrow_mut().drain(..batch.len());
                info!(
                    stream = %self.stream(),
                    flushed = batch.len(),
                    total,
                    "flushed queued records"
                );
                FlushOutcome::Flushed(batch)
            }
            Err(e) => {
                warn!(
                    stream = %self.stream(),
                    queued = batch.len(),
                    error = %e,
                    "flush failed, keeping queue for retry"
                );
                FlushOutcome::Failed(e)
            }
        }
    }

    /// Drop everything still queued, returning how many records were lost.
    pub fn discard(&self) -> usize {
        let mut queue = self.queue.borrow_mut();
        let lost = queue.len();
        queue.clear();
        lost
    }

    fn enqueue(&self, record: R, reason: QueueReason) -> SubmitOutcome<R> {
        let mut queue = self.queue.borrow_mut();
        queue.push_back(record);
        debug!(stream = %self.stream(), len = queue.len(), ?reason, "record queued");
        SubmitOutcome::Queued {
            reason,
            len: queue.len(),
        }
    }
}
