//! Webhook chat notifications for tweet-watch.
//!
//! This crate delivers plain-text alerts to group-chat webhooks. Delivery is
//! awaited so the caller knows whether each message went out and can pace
//! consecutive sends to respect the chat service's own rate limit.
//!
//! # Usage
//!
//! ```no_run
//! use notify::{Message, Notifier};
//!
//! # async fn demo() {
//! // Create notifier from environment variables
//! let notifier = Notifier::from_env();
//!
//! if let Err(e) = notifier.send(&Message::text("Alpha points are live")).await {
//!     eprintln!("notification failed: {e}");
//! }
//! # }
//! ```
//!
//! # Configuration
//!
//! The notifier is configured via environment variables:
//!
//! - `WECHAT_WEBHOOK_URL`: WeCom group robot webhook URL (enables WeCom channel)
//! - `NOTIFY_DISABLED`: Set to "true" to disable all notifications
//!
//! # Architecture
//!
//! - [`NotifyChannel`] trait defines the interface for notification channels
//! - [`WeComChannel`] implements WeCom group robot webhooks
//! - [`Notifier`] dispatches messages to all enabled channels

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod channels;
pub mod error;
pub mod message;

pub use channels::wecom::WeComChannel;
pub use channels::NotifyChannel;
pub use error::ChannelError;
pub use message::Message;

use std::sync::Arc;
use tracing::{debug, info, warn};

/// Environment variable to disable all notifications.
pub const ENV_NOTIFY_DISABLED: &str = "NOTIFY_DISABLED";

/// Whether a boolean-ish setting is on: `1` or `true` in any case.
#[must_use]
pub fn flag_enabled(value: &str) -> bool {
    let value = value.trim();
    value == "1" || value.eq_ignore_ascii_case("true")
}

/// Central notification dispatcher.
///
/// The `Notifier` manages multiple notification channels and sends each
/// message to every enabled channel in turn.
pub struct Notifier {
    channels: Vec<Arc<dyn NotifyChannel>>,
    disabled: bool,
}

impl Notifier {
    /// Create a new notifier from environment variables.
    ///
    /// This will auto-detect which channels are configured based on
    /// environment variables and enable them accordingly.
    #[must_use]
    pub fn from_env() -> Self {
        let disabled = std::env::var(ENV_NOTIFY_DISABLED)
            .map(|v| flag_enabled(&v))
            .unwrap_or(false);

        if disabled {
            info!("Notifications disabled via NOTIFY_DISABLED");
            return Self::disabled();
        }

        let mut channels: Vec<Arc<dyn NotifyChannel>> = vec![];

        let wecom = WeComChannel::from_env();
        if wecom.enabled() {
            info!("WeCom notifications enabled");
            channels.push(Arc::new(wecom));
        }

        Self::with_channels(channels)
    }

    /// Create a notifier with specific channels.
    #[must_use]
    pub fn with_channels(channels: Vec<Arc<dyn NotifyChannel>>) -> Self {
        if channels.is_empty() {
            warn!("No notification channels configured");
        } else {
            debug!(
                channel_count = channels.len(),
                "Notification system initialized"
            );
        }

        Self {
            channels,
            disabled: false,
        }
    }

    /// Create a disabled notifier (for testing or when notifications are off).
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            channels: vec![],
            disabled: true,
        }
    }

    /// Check if any notification channels are enabled.
    #[must_use]
    pub fn has_channels(&self) -> bool {
        !self.disabled && !self.channels.is_empty()
    }

    /// Get the number of enabled channels.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        if self.disabled {
            0
        } else {
            self.channels.len()
        }
    }

    /// Send a message to every channel and collect the per-channel results.
    pub async fn notify_and_wait(&self, message: &Message) -> Vec<(String, Result<(), ChannelError>)> {
        if self.disabled || self.channels.is_empty() {
            return vec![];
        }

        let mut results = vec![];

        for channel in &self.channels {
            let channel_name = channel.name().to_string();

            if !channel.enabled() {
                debug!(channel = %channel_name, "Channel disabled, skipping");
                continue;
            }

            let result = channel.send(message).await;
            results.push((channel_name, result));
        }

        results
    }

    /// Send a message, succeeding only if at least one channel was attempted
    /// and none failed.
    ///
    /// The first channel error is returned; later errors are logged.
    pub async fn send(&self, message: &Message) -> Result<(), ChannelError> {
        let results = self.notify_and_wait(message).await;
        if results.is_empty() {
            return Err(ChannelError::NotConfigured(
                "no notification channel enabled".to_string(),
            ));
        }

        let mut first_error = None;
        for (channel, result) in results {
            if let Err(e) = result {
                if first_error.is_none() {
                    first_error = Some(e);
                } else {
                    warn!(channel = %channel, error = %e, "Additional channel failure");
                }
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::from_env()
    }
}
