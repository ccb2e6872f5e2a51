//! Durable storage for the telemetry agent.
//!
//! Records reach the store only through a [`StreamWriter`], which gates
//! writes on the display state.

pub mod queue;
pub mod store;

// Re-export commonly used types
pub use queue::{FlushOutcome, QueueReason, StreamWriter, SubmitOutcome};
pub use store::{
    parse_records, serialize_records, FileStorage, MemoryStorage, Storage, StorageError, Store,
    StoreError, StreamId,
};
