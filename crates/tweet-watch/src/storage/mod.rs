//! Durable state: crash-safe JSON files and the dedup store.

mod atomic;
mod dedup;

pub use atomic::{read_json, write_json_atomic};
pub use dedup::{BoundedIdSet, DedupStore, DEFAULT_RETENTION};
