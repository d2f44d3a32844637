//! Keyword watcher for a single public timeline.
//!
//! This crate provides:
//! - A pool of API bearer tokens rotated round-robin under a per-token
//!   sliding-window quota, persisted across restarts
//! - Timeline polling with a since-marker and a bounded, durable dedup store
//! - Case-insensitive keyword matching over mixed-script text
//! - Chat webhook alerts through the `notify` crate
//! - A one-shot [`Monitor::run_cycle`] gated by a daily local-time window

pub mod config;
pub mod error;
pub mod filter;
pub mod monitor;
pub mod quota;
pub mod storage;
pub mod twitter;

// Re-export main types
pub use config::{MonitorWindow, WatchConfig};
pub use error::{FailureKind, RemoteFailure, WatchError, WatchResult};
pub use filter::KeywordFilter;
pub use monitor::{CycleOutcome, CycleReport, Monitor, Phase};
pub use quota::{Credential, CredentialRotator, QuotaLedger, QuotaPolicy};
pub use storage::DedupStore;
pub use twitter::{Item, TimelineApi, TwitterClient};
