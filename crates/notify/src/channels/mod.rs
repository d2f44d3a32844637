//! Notification channel implementations.

pub mod wecom;

use async_trait::async_trait;

use crate::error::ChannelError;
use crate::message::Message;

/// Trait for notification channels (WeCom group robots, etc.).
#[async_trait]
pub trait NotifyChannel: Send + Sync {
    /// Get the name of this channel.
    fn name(&self) -> &'static str;

    /// Check if this channel is enabled/configured.
    fn enabled(&self) -> bool;

    /// Send a message to this channel.
    async fn send(&self, message: &Message) -> Result<(), ChannelError>;
}
