//! Per-credential sliding-window request ledger.
//!
//! Each credential index owns a list of request timestamps (Unix seconds).
//! Timestamps older than the window are purged lazily, right before a
//! usability check, so the persisted file may hold stale entries until the
//! next check touches that index.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{FailureKind, WatchResult};
use crate::storage::{read_json, write_json_atomic};

/// Length of the provider's quota window (15 minutes).
pub const WINDOW_SECS: i64 = 900;

/// Requests per window the provider allows on the free tier.
pub const DEFAULT_PROVIDER_CAP: u32 = 100;

/// Share of the provider cap kept in reserve for clock skew and outside use.
pub const DEFAULT_HEADROOM_PERCENT: u32 = 10;

/// Quota policy shared by every credential in the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaPolicy {
    /// Window length in seconds.
    pub window_secs: i64,
    /// Max requests per window (strictly fewer are usable).
    pub limit: usize,
    /// Whether rejected attempts (429/401/transient) consume quota.
    pub count_rejected: bool,
}

impl QuotaPolicy {
    /// Derive the limit from the provider cap minus a headroom percentage.
    #[must_use]
    pub fn from_cap(provider_cap: u32, headroom_percent: u32, count_rejected: bool) -> Self {
        let headroom = headroom_percent.min(100);
        let limit = u64::from(provider_cap) * u64::from(100 - headroom) / 100;
        Self {
            window_secs: WINDOW_SECS,
            limit: limit as usize,
            count_rejected,
        }
    }
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self::from_cap(DEFAULT_PROVIDER_CAP, DEFAULT_HEADROOM_PERCENT, false)
    }
}

/// Most recent failed attempt on a credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastError {
    /// Unix seconds of the failure.
    pub time: i64,
    /// What went wrong.
    pub error: FailureKind,
}

/// Persisted usage of one credential.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaRecord {
    /// Request timestamps (Unix seconds), oldest first.
    #[serde(default)]
    pub requests: Vec<i64>,
    /// Last failure, cleared by the next success.
    #[serde(default)]
    pub last_error: Option<LastError>,
}

/// Result of a completed request attempt, as the ledger sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The provider served the request.
    Success,
    /// The attempt failed with the given classification.
    Failed(FailureKind),
}

/// Sliding-window usage ledger for the credential pool.
#[derive(Debug)]
pub struct QuotaLedger {
    policy: QuotaPolicy,
    records: BTreeMap<usize, QuotaRecord>,
    path: Option<PathBuf>,
}

impl QuotaLedger {
    /// Create an in-memory ledger that is never written to disk.
    #[must_use]
    pub fn in_memory(policy: QuotaPolicy) -> Self {
        Self {
            policy,
            records: BTreeMap::new(),
            path: None,
        }
    }

    /// Load a ledger from `path`, starting empty if the file is missing or
    /// unreadable.
    pub fn load(path: &Path, policy: QuotaPolicy) -> Self {
        let records = match read_json::<BTreeMap<usize, QuotaRecord>>(path) {
            Ok(Some(records)) => {
                tracing::debug!(path = %path.display(), credentials = records.len(), "Loaded quota ledger");
                records
            }
            Ok(None) => BTreeMap::new(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Unreadable quota ledger, starting fresh");
                BTreeMap::new()
            }
        };

        Self {
            policy,
            records,
            path: Some(path.to_path_buf()),
        }
    }

    /// The policy this ledger enforces.
    #[must_use]
    pub fn policy(&self) -> QuotaPolicy {
        self.policy
    }

    /// Drop timestamps that fell out of the window for credential `index`.
    pub fn purge(&mut self, index: usize, now: DateTime<Utc>) {
        let window = self.policy.window_secs;
        let now = now.timestamp();
        if let Some(record) = self.records.get_mut(&index) {
            record.requests.retain(|&t| now - t < window);
        }
    }

    /// Whether credential `index` has quota left at `now`.
    pub fn usable(&mut self, index: usize, now: DateTime<Utc>) -> bool {
        self.usage_count(index, now) < self.policy.limit
    }

    /// Requests recorded for `index` inside the window ending at `now`.
    pub fn usage_count(&mut self, index: usize, now: DateTime<Utc>) -> usize {
        self.purge(index, now);
        self.records.get(&index).map_or(0, |r| r.requests.len())
    }

    /// Record a completed attempt on credential `index`.
    ///
    /// Successful and malformed responses were served by the provider and
    /// always consume quota. Rejected attempts consume quota only when the
    /// policy says so; they always set `last_error`.
    pub fn record_attempt(&mut self, index: usize, now: DateTime<Utc>, outcome: AttemptOutcome) {
        let count_rejected = self.policy.count_rejected;
        let record = self.records.entry(index).or_default();
        let ts = now.timestamp();

        match outcome {
            AttemptOutcome::Success => {
                record.requests.push(ts);
                record.last_error = None;
            }
            AttemptOutcome::Failed(kind) => {
                if kind == FailureKind::Malformed || count_rejected {
                    record.requests.push(ts);
                }
                record.last_error = Some(LastError {
                    time: ts,
                    error: kind,
                });
            }
        }
    }

    /// Read-only view of a credential's record.
    #[must_use]
    pub fn record(&self, index: usize) -> Option<&QuotaRecord> {
        self.records.get(&index)
    }

    /// Write the ledger to its file, if it has one.
    pub fn flush(&self) -> WatchResult<()> {
        match &self.path {
            Some(path) => write_json_atomic(path, &self.records),
            None => Ok(()),
        }
    }
}
