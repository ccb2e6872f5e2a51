//! Durable record store.
//!
//! Each stream is one UTF-8 file holding a single JSON array. Every mutation
//! reads the whole array, extends it and rewrites the file in one operation.
//! Read and parse failures are recovered as an empty sequence.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::path::PathBuf;
use std::rc::Rc;
use tracing::{debug, warn};

/// A persisted data stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamId {
    Sensor,
    Sleep,
}

impl StreamId {
    pub const ALL: [StreamId; 2] = [StreamId::Sensor, StreamId::Sleep];

    pub fn name(&self) -> &'static str {
        match self {
            StreamId::Sensor => "sensor",
            StreamId::Sleep => "sleep",
        }
    }

    /// Storage identifier of the stream's file.
    pub fn file_name(&self) -> &'static str {
        match self {
            StreamId::Sensor => "sensor.json",
            StreamId::Sleep => "sleep.json",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "sensor" => Some(StreamId::Sensor),
            "sleep" => Some(StreamId::Sleep),
            _ => None,
        }
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors from the raw text storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    NotFound(String),
    Io(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::NotFound(id) => write!(f, "Not found: {id}"),
            StorageError::Io(e) => write!(f, "IO error: {e}"),
        }
    }
}

impl std::error::Error for StorageError {}

/// Errors from reading or writing a record store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    Read(StorageError),
    Parse(String),
    Serialize(String),
    Write(StorageError),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Read(e) => write!(f, "Store read error: {e}"),
            StoreError::Parse(e) => write!(f, "Store parse error: {e}"),
            StoreError::Serialize(e) => write!(f, "Store serialize error: {e}"),
            StoreError::Write(e) => write!(f, "Store write error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Whole-file text storage.
pub trait Storage {
    /// Read the full text stored under `id`.
    fn read_text(&self, id: &str) -> Result<String, StorageError>;

    /// Replace the full text stored under `id`.
    fn write_text(&self, id: &str, text: &str) -> Result<(), StorageError>;
}

/// Storage in a directory, one file per id.
///
/// Writes go to a temporary file that is then renamed over the target, so a
/// reader sees either the old or the new contents.
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    pub fn path_for(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }
}

impl Storage for FileStorage {
    fn read_text(&self, id: &str) -> Result<String, StorageError> {
        let path = self.path_for(id);
        std::fs::read_to_string(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound(format!("{path:?}")),
            _ => StorageError::Io(format!("{path:?}: {e}")),
        })
    }

    fn write_text(&self, id: &str, text: &str) -> Result<(), StorageError> {
        std::fs::create_dir_all(&self.root)
            .map_err(|e| StorageError::Io(format!("{:?}: {e}", self.root)))?;

        let path = self.path_for(id);
        let tmp = self.root.join(format!(".{id}.tmp"));
        std::fs::write(&tmp, text).map_err(|e| StorageError::Io(format!("{tmp:?}: {e}")))?;
        std::fs::rename(&tmp, &path).map_err(|e| StorageError::Io(format!("{path:?}: {e}")))?;
        Ok(())
    }
}

/// In-memory storage with injectable write failures.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    files: RefCell<HashMap<String, String>>,
    fail_writes: Cell<bool>,
    writes: Cell<usize>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent writes fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.set(fail);
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> usize {
        self.writes.get()
    }

    pub fn contents(&self, id: &str) -> Option<String> {
        self.files.borrow().get(id).cloned()
    }

    pub fn insert(&self, id: &str, text: &str) {
        self.files.borrow_mut().insert(id.to_string(), text.to_string());
    }
}

impl Storage for MemoryStorage {
    fn read_text(&self, id: &str) -> Result<String, StorageError> {
        self.contents(id)
            .ok_or_else(|| StorageError::NotFound(id.to_string()))
    }

    fn write_text(&self, id: &str, text: &str) -> Result<(), StorageError> {
        if self.fail_writes.get() {
            return Err(StorageError::Io(format!("write to {id} rejected")));
        }
        self.insert(id, text);
        self.writes.set(self.writes.get() + 1);
        Ok(())
    }
}

/// Serialize a record list into its stored form.
pub fn serialize_records<R: Serialize>(records: &[R]) -> Result<String, StoreError> {
    serde_json::to_string(records).map_err(|e| StoreError::Serialize(e.to_string()))
}

/// Parse a stored record list. Blank text is an empty list.
pub fn parse_records<R: DeserializeOwned>(text: &str) -> Result<Vec<R>, StoreError> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(text).map_err(|e| StoreError::Parse(e.to_string()))
}

/// Append-only record sequence for one stream.
pub struct Store<R> {
    stream: StreamId,
    storage: Rc<dyn Storage>,
    _records: PhantomData<fn() -> R>,
}

impl<R> std::fmt::Debug for Store<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").field("stream", &self.stream).finish()
    }
}

impl<R: Serialize + DeserializeOwned> Store<R> {
    pub fn new(stream: StreamId, storage: Rc<dyn Storage>) -> Self {
        Self {
            stream,
            storage,
            _records: PhantomData,
        }
    }

    pub fn stream(&self) -> StreamId {
        self.stream
    }

    /// Read and parse the stored records, surfacing failures.
    pub fn try_load(&self) -> Result<Vec<R>, StoreError> {
        let text = self
            .storage
            .read_text(self.stream.file_name())
            .map_err(StoreError::Read)?;
        parse_records(&text)
    }

    /// Read the stored records, treating any failure as an empty store.
    pub fn load(&self) -> Vec<R> {
        match self.try_load() {
            Ok(records) => records,
            Err(StoreError::Read(StorageError::NotFound(_))) => {
                debug!(stream = %self.stream, "store file missing, starting empty");
                Vec::new()
            }
            Err(e) => {
                warn!(stream = %self.stream, error = %e, "store unreadable, treating as empty");
                Vec::new()
            }
        }
    }

    /// Append records in order and rewrite the store. Returns the new length.
    pub fn append(&self, records: &[R]) -> Result<usize, StoreError>
    where
        R: Clone,
    {
        let mut all = self.load();
        all.extend_from_slice(records);
        let text = serialize_records(&all)?;
        self.storage
            .write_text(self.stream.file_name(), &text)
            .map_err(StoreError::Write)?;
        Ok(all.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{Nap, SleepStage, SleepStageKind};
    use crate::core::{AggregateRecord, SleepRecord};
    use chrono::{TimeZone, Utc};

    fn record(i: i64) -> AggregateRecord {
        AggregateRecord {
            ts: Utc.timestamp_millis_opt(1_700_000_000_000 + i * 600_000).unwrap(),
            step_count: i as u64 * 10,
            heart_rate: 70,
            light: 5,
            resting_hr: 0,
        }
    }

    fn memory_store() -> (Rc<MemoryStorage>, Store<AggregateRecord>) {
        let storage = Rc::new(MemoryStorage::new());
        let store = Store::new(StreamId::Sensor, storage.clone() as Rc<dyn Storage>);
        (storage, store)
    }

    #[test]
    fn test_parse_serialize_round_trip() {
        let records = vec![record(0), record(1), record(2)];
        let text = serialize_records(&records).unwrap();
        let parsed: Vec<AggregateRecord> = parse_records(&text).unwrap();
        assert_eq!(parsed, records);

        let empty: Vec<AggregateRecord> = parse_records("").unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_sleep_records_round_trip() {
        let records = vec![
            SleepRecord {
                ts: Utc.timestamp_millis_opt(1_700_000_123_456).unwrap(),
                score: 84,
                start_time: 1380,
                end_time: 1860,
                sleep_length: 455,
                total_time: 480,
                stages: vec![
                    SleepStage::new(SleepStageKind::Light, 1380, 1500),
                    SleepStage::new(SleepStageKind::Wake, 1500, 1525),
                    SleepStage::new(SleepStageKind::Rem, 1525, 1600),
                    SleepStage::new(SleepStageKind::Deep, 1600, 1860),
                ],
                naps: vec![Nap { start: 780, stop: 810 }],
            },
            SleepRecord {
                ts: Utc.timestamp_millis_opt(1_700_086_400_000).unwrap(),
                score: 0,
                start_time: 0,
                end_time: 0,
                sleep_length: 0,
                total_time: 0,
                stages: Vec::new(),
                naps: vec![Nap { start: 840, stop: 865 }, Nap { start: 900, stop: 920 }],
            },
        ];

        let text = serialize_records(&records).unwrap();
        assert!(text.contains(r#""sleepLength":455"#));
        assert!(text.contains(r#""model":"rem""#));

        let parsed: Vec<SleepRecord> = parse_records(&text).unwrap();
        assert_eq!(parsed, records);
    }

    #[test]
    fn test_missing_and_corrupt_store_load_empty() {
        let (storage, store) = memory_store();
        assert!(store.load().is_empty());

        storage.insert("sensor.json", "{not json");
        assert!(matches!(store.try_load(), Err(StoreError::Parse(_))));
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_append_preserves_order() {
        let (storage, store) = memory_store();

        assert_eq!(store.append(&[record(0)]).unwrap(), 1);
        assert_eq!(store.append(&[record(1), record(2)]).unwrap(), 3);
        assert_eq!(store.load(), vec![record(0), record(1), record(2)]);
        assert_eq!(storage.write_count(), 2);
    }

    #[test]
    fn test_append_write_failure_leaves_store() {
        let (storage, store) = memory_store();
        store.append(&[record(0)]).unwrap();

        storage.set_fail_writes(true);
        assert!(matches!(
            store.append(&[record(1)]),
            Err(StoreError::Write(StorageError::Io(_)))
        ));
        assert_eq!(store.load(), vec![record(0)]);
    }

    #[test]
    fn test_file_storage_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("store"));

        assert!(matches!(
            storage.read_text("sleep.json"),
            Err(StorageError::NotFound(_))
        ));

        storage.write_text("sleep.json", "[]").unwrap();
        storage.write_text("sleep.json", "[1]").unwrap();
        assert_eq!(storage.read_text("sleep.json").unwrap(), "[1]");
        assert!(!storage.root().join(".sleep.json.tmp").exists());
    }

    #[test]
    fn test_stream_id_parse() {
        assert_eq!(StreamId::parse("Sleep"), Some(StreamId::Sleep));
        assert_eq!(StreamId::parse(" sensor "), Some(StreamId::Sensor));
        assert_eq!(StreamId::parse("steps"), None);
    }
}
