//! Configuration for the watcher.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Offset, Timelike, Utc};
use notify::{NotifyChannel, Notifier, WeComChannel, ENV_NOTIFY_DISABLED};

use crate::error::{WatchError, WatchResult};
use crate::filter::DEFAULT_KEYWORDS;
use crate::quota::{QuotaPolicy, DEFAULT_HEADROOM_PERCENT, DEFAULT_PROVIDER_CAP};
use crate::storage::DEFAULT_RETENTION;
use crate::twitter::{DEFAULT_BASE_URL, MAX_RESULTS, MIN_RESULTS};

/// Default account to watch.
pub const DEFAULT_TARGET_USERNAME: &str = "binancezh";

/// Default monitoring window, local hours inclusive.
pub const DEFAULT_START_HOUR: u32 = 11;
pub const DEFAULT_END_HOUR: u32 = 23;

/// Default target timezone (UTC+8).
pub const DEFAULT_UTC_OFFSET_HOURS: i32 = 8;

/// Default polling cadence in seconds.
pub const DEFAULT_MONITOR_INTERVAL_SECS: u64 = 1800;

/// Default page size for the timeline request.
pub const DEFAULT_MAX_RESULTS: u32 = 10;

/// Default pause between two notifications.
pub const DEFAULT_SEND_INTERVAL_SECS: u64 = 2;

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Default directory for state files.
pub const DEFAULT_STATE_DIR: &str = "data";

/// Highest numbered `TWITTER_BEARER_TOKEN_<n>` variable consulted.
const MAX_NUMBERED_TOKENS: usize = 20;

/// File name of the quota ledger inside the state directory.
pub const LEDGER_FILE: &str = "token_usage.json";

/// File name of the dedup store inside the state directory.
pub const DEDUP_FILE: &str = "processed_tweets.json";

/// Daily window during which cycles run, in a fixed-offset timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorWindow {
    /// First local hour that is monitored.
    pub start_hour: u32,
    /// Last local hour that is monitored (the whole hour counts).
    pub end_hour: u32,
    /// Timezone offset from UTC in hours.
    pub utc_offset_hours: i32,
}

impl MonitorWindow {
    /// The target timezone.
    #[must_use]
    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_hours * 3600).unwrap_or_else(|| Utc.fix())
    }

    /// Whether `now` falls inside the window.
    #[must_use]
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        let hour = now.with_timezone(&self.offset()).hour();
        self.start_hour <= hour && hour <= self.end_hour
    }
}

impl Default for MonitorWindow {
    fn default() -> Self {
        Self {
            start_hour: DEFAULT_START_HOUR,
            end_hour: DEFAULT_END_HOUR,
            utc_offset_hours: DEFAULT_UTC_OFFSET_HOURS,
        }
    }
}

/// Complete watcher configuration.
#[derive(Clone)]
pub struct WatchConfig {
    /// Bearer tokens, in rotation order.
    pub credentials: Vec<String>,
    /// Chat webhook URL; notifications fail when absent.
    pub webhook_url: Option<String>,
    /// Suppress all notifications.
    pub notify_disabled: bool,
    /// Users mentioned in every notification.
    pub mentioned: Vec<String>,
    /// Handle of the watched account.
    pub target_handle: String,
    /// When cycles are allowed to run.
    pub window: MonitorWindow,
    /// Cadence used by the `watch` command.
    pub poll_interval: Duration,
    /// Keywords to look for.
    pub keywords: Vec<String>,
    /// Timeline page size.
    pub max_results: u32,
    /// Per-credential quota policy.
    pub quota: QuotaPolicy,
    /// Pause between consecutive notifications.
    pub send_interval: Duration,
    /// Ids retained per dedup set.
    pub retention: usize,
    /// Directory holding the ledger and dedup files.
    pub state_dir: PathBuf,
    /// Timeline API root.
    pub api_base_url: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl std::fmt::Debug for WatchConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchConfig")
            .field("credentials", &self.credentials.len())
            .field("webhook_url", &self.webhook_url.as_ref().map(|_| "<set>"))
            .field("notify_disabled", &self.notify_disabled)
            .field("mentioned", &self.mentioned)
            .field("target_handle", &self.target_handle)
            .field("window", &self.window)
            .field("poll_interval", &self.poll_interval)
            .field("keywords", &self.keywords)
            .field("max_results", &self.max_results)
            .field("quota", &self.quota)
            .field("send_interval", &self.send_interval)
            .field("retention", &self.retention)
            .field("state_dir", &self.state_dir)
            .field("api_base_url", &self.api_base_url)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl WatchConfig {
    /// Create configuration from environment variables.
    ///
    /// # Required Environment Variables
    /// - `TWITTER_BEARER_TOKENS` (comma-separated), or any of
    ///   `TWITTER_BEARER_TOKEN`, `TWITTER_BEARER_TOKEN_1` .. `TWITTER_BEARER_TOKEN_20`
    ///
    /// # Optional Environment Variables
    /// - `WECHAT_WEBHOOK_URL`, `WECHAT_MENTIONED_LIST`, `NOTIFY_DISABLED`
    /// - `TARGET_USERNAME` (default: binancezh)
    /// - `MONITOR_START_HOUR`, `MONITOR_END_HOUR`, `MONITOR_UTC_OFFSET_HOURS` (default: 11, 23, 8)
    /// - `MONITOR_INTERVAL` seconds (default: 1800)
    /// - `ALPHA_KEYWORDS` (comma-separated)
    /// - `MAX_RESULTS` (default: 10)
    /// - `QUOTA_PROVIDER_CAP`, `QUOTA_HEADROOM_PERCENT`, `QUOTA_COUNT_REJECTED` (default: 100, 10, false)
    /// - `NOTIFY_SEND_INTERVAL_SECS` (default: 2)
    /// - `STATE_DIR` (default: data)
    /// - `TWITTER_API_BASE_URL`, `REQUEST_TIMEOUT_SECS`
    pub fn from_env() -> WatchResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> WatchResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let credentials = read_credentials(&get);

        let keywords = get("ALPHA_KEYWORDS").map_or_else(
            || DEFAULT_KEYWORDS.iter().map(ToString::to_string).collect(),
            |raw| split_list(&raw),
        );

        let provider_cap: u32 = parse_or(&get, "QUOTA_PROVIDER_CAP", DEFAULT_PROVIDER_CAP)?;
        let headroom: u32 = parse_or(&get, "QUOTA_HEADROOM_PERCENT", DEFAULT_HEADROOM_PERCENT)?;
        let count_rejected = parse_flag(&get, "QUOTA_COUNT_REJECTED");
        if provider_cap == 0 {
            return Err(WatchError::Config("QUOTA_PROVIDER_CAP must be positive".to_string()));
        }
        if headroom >= 100 {
            return Err(WatchError::Config(
                "QUOTA_HEADROOM_PERCENT must be below 100".to_string(),
            ));
        }

        let config = Self {
            credentials,
            webhook_url: get("WECHAT_WEBHOOK_URL"),
            notify_disabled: parse_flag(&get, ENV_NOTIFY_DISABLED),
            mentioned: get("WECHAT_MENTIONED_LIST")
                .map(|raw| split_list(&raw))
                .unwrap_or_default(),
            target_handle: get("TARGET_USERNAME")
                .unwrap_or_else(|| DEFAULT_TARGET_USERNAME.to_string()),
            window: MonitorWindow {
                start_hour: parse_or(&get, "MONITOR_START_HOUR", DEFAULT_START_HOUR)?,
                end_hour: parse_or(&get, "MONITOR_END_HOUR", DEFAULT_END_HOUR)?,
                utc_offset_hours: parse_or(&get, "MONITOR_UTC_OFFSET_HOURS", DEFAULT_UTC_OFFSET_HOURS)?,
            },
            poll_interval: Duration::from_secs(parse_or(
                &get,
                "MONITOR_INTERVAL",
                DEFAULT_MONITOR_INTERVAL_SECS,
            )?),
            keywords,
            max_results: parse_or::<u32>(&get, "MAX_RESULTS", DEFAULT_MAX_RESULTS)?
                .clamp(MIN_RESULTS, MAX_RESULTS),
            quota: QuotaPolicy::from_cap(provider_cap, headroom, count_rejected),
            send_interval: Duration::from_secs(parse_or(
                &get,
                "NOTIFY_SEND_INTERVAL_SECS",
                DEFAULT_SEND_INTERVAL_SECS,
            )?),
            retention: DEFAULT_RETENTION,
            state_dir: get("STATE_DIR").map_or_else(|| PathBuf::from(DEFAULT_STATE_DIR), PathBuf::from),
            api_base_url: get("TWITTER_API_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            request_timeout: Duration::from_secs(parse_or(
                &get,
                "REQUEST_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )?),
        };

        if config.webhook_url.is_none() && !config.notify_disabled {
            tracing::warn!("WECHAT_WEBHOOK_URL not set, notifications will fail");
        }

        Ok(config)
    }

    /// Check invariants that must hold before any network call.
    pub fn validate(&self) -> WatchResult<()> {
        if self.credentials.is_empty() {
            return Err(WatchError::Config(
                "no bearer token configured (set TWITTER_BEARER_TOKENS)".to_string(),
            ));
        }
        if self.target_handle.is_empty() {
            return Err(WatchError::Config("TARGET_USERNAME is empty".to_string()));
        }
        if self.window.start_hour > 23 || self.window.end_hour > 23 {
            return Err(WatchError::Config("monitor hours must be within 0..=23".to_string()));
        }
        if self.window.start_hour > self.window.end_hour {
            return Err(WatchError::Config(format!(
                "monitor window start {} is after end {}",
                self.window.start_hour, self.window.end_hour
            )));
        }
        if self.window.utc_offset_hours.abs() > 23 {
            return Err(WatchError::Config(
                "MONITOR_UTC_OFFSET_HOURS must be within -23..=23".to_string(),
            ));
        }
        if self.quota.limit == 0 {
            return Err(WatchError::Config("quota limit rounds down to zero".to_string()));
        }
        if self.keywords.is_empty() {
            return Err(WatchError::Config("keyword list is empty".to_string()));
        }
        Ok(())
    }

    /// Notifier delivering to the configured webhook with the configured
    /// request timeout.
    #[must_use]
    pub fn notifier(&self) -> Notifier {
        if self.notify_disabled {
            tracing::info!("Notifications disabled via NOTIFY_DISABLED");
            return Notifier::disabled();
        }

        let channels: Vec<Arc<dyn NotifyChannel>> = match &self.webhook_url {
            Some(url) => vec![Arc::new(WeComChannel::new(url.clone(), self.request_timeout))],
            None => vec![],
        };
        Notifier::with_channels(channels)
    }

    /// Path of the quota ledger file.
    #[must_use]
    pub fn ledger_path(&self) -> PathBuf {
        self.state_dir.join(LEDGER_FILE)
    }

    /// Path of the dedup store file.
    #[must_use]
    pub fn dedup_path(&self) -> PathBuf {
        self.state_dir.join(DEDUP_FILE)
    }
}

fn read_credentials(get: &impl Fn(&str) -> Option<String>) -> Vec<String> {
    if let Some(raw) = get("TWITTER_BEARER_TOKENS") {
        let tokens = split_list(&raw);
        if !tokens.is_empty() {
            return tokens;
        }
    }

    let keys = std::iter::once("TWITTER_BEARER_TOKEN".to_string())
        .chain((1..=MAX_NUMBERED_TOKENS).map(|i| format!("TWITTER_BEARER_TOKEN_{i}")));

    let mut tokens: Vec<String> = Vec::new();
    for key in keys {
        if let Some(token) = get(&key) {
            if !tokens.contains(&token) {
                tokens.push(token);
            }
        }
    }
    tokens
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn parse_flag(get: &impl Fn(&str) -> Option<String>, key: &str) -> bool {
    get(key).is_some_and(|raw| notify::flag_enabled(&raw))
}

fn parse_or<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> WatchResult<T> {
    match get(key) {
        Some(raw) => raw
            .parse()
            .map_err(|_| WatchError::Config(format!("invalid value for {key}: {raw:?}"))),
        None => Ok(default),
    }
}
