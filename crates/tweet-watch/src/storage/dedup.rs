//! Durable record of which timeline items were examined and announced.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::atomic::{read_json, write_json_atomic};
use crate::error::WatchResult;

/// Ids kept per set; older ids are evicted first.
pub const DEFAULT_RETENTION: usize = 1000;

/// Insertion-ordered id set that evicts its oldest entries past a capacity.
#[derive(Debug, Clone, Default)]
pub struct BoundedIdSet {
    order: VecDeque<String>,
    members: HashSet<String>,
    capacity: usize,
}

impl BoundedIdSet {
    /// Create an empty set holding at most `capacity` ids.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::new(),
            members: HashSet::new(),
            capacity,
        }
    }

    fn from_ids(ids: Vec<String>, capacity: usize) -> Self {
        let mut set = Self::new(capacity);
        for id in ids {
            set.insert(&id);
        }
        set
    }

    /// Whether `id` is present.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.members.contains(id)
    }

    /// Append `id` if absent, then evict down to capacity.
    ///
    /// Returns `true` if the id was newly added.
    pub fn insert(&mut self, id: &str) -> bool {
        if !self.members.insert(id.to_string()) {
            return false;
        }
        self.order.push_back(id.to_string());
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
        true
    }

    /// Number of ids held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Ids oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }
}

/// On-disk shape of the dedup file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct DedupFile {
    #[serde(default)]
    processed_ids: Vec<String>,
    #[serde(default)]
    notified_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_item_id: Option<String>,
    #[serde(default)]
    last_update: Option<DateTime<Utc>>,
}

/// Seen/notified id sets plus the newest-item marker, flushed as one file.
#[derive(Debug)]
pub struct DedupStore {
    processed: BoundedIdSet,
    notified: BoundedIdSet,
    last_item_id: Option<String>,
    last_update: Option<DateTime<Utc>>,
    path: Option<PathBuf>,
}

impl DedupStore {
    /// Create an in-memory store that is never written to disk.
    #[must_use]
    pub fn in_memory(retention: usize) -> Self {
        Self {
            processed: BoundedIdSet::new(retention),
            notified: BoundedIdSet::new(retention),
            last_item_id: None,
            last_update: None,
            path: None,
        }
    }

    /// Load the store from `path`, starting empty if the file is missing or
    /// unreadable.
    pub fn load(path: &Path, retention: usize) -> Self {
        let file = match read_json::<DedupFile>(path) {
            Ok(Some(file)) => file,
            Ok(None) => DedupFile::default(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Unreadable dedup state, starting fresh");
                DedupFile::default()
            }
        };

        let store = Self {
            processed: BoundedIdSet::from_ids(file.processed_ids, retention),
            notified: BoundedIdSet::from_ids(file.notified_ids, retention),
            last_item_id: file.last_item_id,
            last_update: file.last_update,
            path: Some(path.to_path_buf()),
        };
        tracing::debug!(
            processed = store.processed.len(),
            notified = store.notified.len(),
            marker = ?store.last_item_id,
            "Loaded dedup state"
        );
        store
    }

    /// Whether `id` was examined in an earlier cycle.
    #[must_use]
    pub fn is_processed(&self, id: &str) -> bool {
        self.processed.contains(id)
    }

    /// Whether `id` already triggered a notification.
    #[must_use]
    pub fn is_notified(&self, id: &str) -> bool {
        self.notified.contains(id)
    }

    /// Record `id` as examined.
    pub fn mark_processed(&mut self, id: &str) {
        self.processed.insert(id);
    }

    /// Record `id` as announced.
    pub fn mark_notified(&mut self, id: &str) {
        self.notified.insert(id);
    }

    /// Processed ids, oldest first.
    #[must_use]
    pub fn processed(&self) -> &BoundedIdSet {
        &self.processed
    }

    /// Notified ids, oldest first.
    #[must_use]
    pub fn notified(&self) -> &BoundedIdSet {
        &self.notified
    }

    /// Id of the newest item seen so far, used as the `since_id` marker.
    #[must_use]
    pub fn last_item_id(&self) -> Option<&str> {
        self.last_item_id.as_deref()
    }

    /// Advance the newest-item marker.
    pub fn set_last_item_id(&mut self, id: &str) {
        self.last_item_id = Some(id.to_string());
    }

    /// When the store was last flushed.
    #[must_use]
    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.last_update
    }

    /// Rewrite the whole file with the current sets, stamped with `now`.
    pub fn flush(&mut self, now: DateTime<Utc>) -> WatchResult<()> {
        self.last_update = Some(now);
        let Some(path) = &self.path else {
            return Ok(());
        };

        let file = DedupFile {
            processed_ids: self.processed.iter().map(str::to_string).collect(),
            notified_ids: self.notified.iter().map(str::to_string).collect(),
            last_item_id: self.last_item_id.clone(),
            last_update: self.last_update,
        };
        write_json_atomic(path, &file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_processed_is_idempotent() {
        let mut store = DedupStore::in_memory(DEFAULT_RETENTION);
        store.mark_processed("42");
        store.mark_processed("42");
        assert!(store.is_processed("42"));
        assert_eq!(store.processed().len(), 1);
        assert!(!store.is_notified("42"));
    }

    #[test]
    fn test_retention_is_fifo() {
        let mut store = DedupStore::in_memory(DEFAULT_RETENTION);
        for i in 0..1500 {
            store.mark_processed(&i.to_string());
        }

        assert_eq!(store.processed().len(), 1000);
        let kept: Vec<&str> = store.processed().iter().collect();
        let expected: Vec<String> = (500..1500).map(|i| i.to_string()).collect();
        assert_eq!(kept, expected.iter().map(String::as_str).collect::<Vec<_>>());
        assert!(!store.is_processed("499"));
        assert!(store.is_processed("500"));
    }

    #[test]
    fn test_reinsert_does_not_refresh_position() {
        let mut set = BoundedIdSet::new(2);
        assert!(set.insert("a"));
        assert!(set.insert("b"));
        assert!(!set.insert("a"));
        set.insert("c");
        assert!(!set.contains("a"));
        assert!(set.contains("b"));
        assert!(set.contains("c"));
    }

    #[test]
    fn test_flush_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("processed_tweets.json");

        let mut store = DedupStore::load(&path, DEFAULT_RETENTION);
        store.mark_processed("100");
        store.mark_processed("101");
        store.mark_notified("101");
        store.set_last_item_id("101");
        let now = Utc::now();
        store.flush(now).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["processed_ids"], serde_json::json!(["100", "101"]));
        assert_eq!(raw["notified_ids"], serde_json::json!(["101"]));
        assert!(raw["last_update"].is_string());

        let reloaded = DedupStore::load(&path, DEFAULT_RETENTION);
        assert!(reloaded.is_processed("100"));
        assert!(reloaded.is_notified("101"));
        assert_eq!(reloaded.last_item_id(), Some("101"));
        assert_eq!(reloaded.last_update(), Some(now));
    }

    #[test]
    fn test_reload_truncates_oversized_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("processed_tweets.json");
        let ids: Vec<String> = (0..5).map(|i| i.to_string()).collect();
        std::fs::write(
            &path,
            serde_json::json!({"processed_ids": ids, "notified_ids": []}).to_string(),
        )
        .unwrap();

        let store = DedupStore::load(&path, 3);
        assert_eq!(store.processed().iter().collect::<Vec<_>>(), vec!["2", "3", "4"]);
    }
}
